use evalshell::backend::failover::FailOverBackend;
use evalshell::backend::{BackendFactory, ExecutionBackend, FakeBackend, FnFactory};
use evalshell::compiler::BasicCompiler;
use evalshell::errors::ShellError;
use evalshell::image::ExecutionException;
use evalshell::session::{Session, SessionState};
use evalshell::snippet::SnippetKey;
use evalshell::types::{SnippetKind, Status};
use std::sync::Arc;

fn session_over(backends: &[&FakeBackend]) -> Session {
    let factories = backends
        .iter()
        .map(|backend| {
            let backend = (*backend).clone();
            Arc::new(FnFactory::new(backend.name().to_string(), move || {
                Box::new(backend.clone()) as Box<dyn ExecutionBackend>
            })) as Arc<dyn BackendFactory>
        })
        .collect();
    Session::new(FailOverBackend::new(factories), Box::new(BasicCompiler))
}

fn declare(session: &mut Session, source: &str) -> SnippetKey {
    session.eval(source).expect("eval")[0].key
}

#[test]
fn enumerating_variables_after_close_fails() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    declare(&mut session, "int a;");
    assert_eq!(session.variables().expect("open").len(), 1);
    session.close();

    assert_eq!(session.variables(), Err(ShellError::SessionClosed));
    assert_eq!(session.methods(), Err(ShellError::SessionClosed));
    assert_eq!(session.types(), Err(ShellError::SessionClosed));
    assert_eq!(session.imports(), Err(ShellError::SessionClosed));
    assert_eq!(session.snippets(), Err(ShellError::SessionClosed));
}

#[test]
fn status_survives_close() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    let key = declare(&mut session, "int a;");
    let before = session.status(key).expect("status");
    session.close();
    assert_eq!(session.status(key), Ok(before));
    assert_eq!(before, Status::Valid);
}

#[test]
fn drop_after_close_fails_and_keeps_the_record() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    let key = declare(&mut session, "int a;");
    session.close();

    assert_eq!(session.drop(key), Err(ShellError::SessionClosed));
    assert_eq!(session.status(key), Ok(Status::Valid));
    assert_eq!(backend.count("redefine"), 0);
}

#[test]
fn thrown_exception_is_an_outcome_and_session_stays_open() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    declare(
        &mut session,
        "int fail() { throw new IllegalArgumentException(\"bad input\"); }",
    );
    let events = session.eval("fail()").expect("evaluation itself succeeds");
    assert_eq!(events[0].status, Status::Valid);
    assert_eq!(
        events[0].exception,
        Some(ExecutionException::Thrown {
            exception_class: "IllegalArgumentException".to_string(),
            message: Some("bad input".to_string()),
        })
    );
    assert_eq!(session.state(), SessionState::Open);
    let next = session.eval("1 + 1").expect("still usable");
    assert_eq!(next[0].value.as_deref(), Some("2"));
}

#[test]
fn every_mutating_operation_refuses_after_close() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    let key = declare(&mut session, "int a = 5;");
    session.close();

    assert_eq!(session.eval("int b;"), Err(ShellError::SessionClosed));
    assert_eq!(session.var_value(key), Err(ShellError::SessionClosed));
    assert_eq!(session.add_to_classpath("/lib"), Err(ShellError::SessionClosed));
    assert_eq!(session.start(), Err(ShellError::SessionClosed));
}

#[test]
fn queries_keep_answering_after_close() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    let f = declare(&mut session, "int f() { return g() + missing; }");
    let bad = declare(&mut session, "int x = ;");
    let expected_unresolved = session.unresolved_dependencies(f).expect("deps");
    let expected_diagnostics = session.diagnostics(bad).expect("diags").to_vec();
    session.close();

    assert_eq!(session.status(f), Ok(Status::RecoverableDefined));
    assert_eq!(session.status(bad), Ok(Status::Rejected));
    assert_eq!(
        session.unresolved_dependencies(f),
        Ok(expected_unresolved.clone())
    );
    assert_eq!(
        expected_unresolved.into_iter().collect::<Vec<_>>(),
        vec!["g", "missing"]
    );
    assert_eq!(
        session.diagnostics(bad).map(<[_]>::to_vec),
        Ok(expected_diagnostics.clone())
    );
    assert!(!expected_diagnostics.is_empty());
    assert!(matches!(
        session.status(SnippetKey(99)),
        Err(ShellError::UnknownSnippet(_))
    ));
}

#[test]
fn close_twice_stops_once_and_tolerates_never_started_backend() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    declare(&mut session, "int a;");
    session.close();
    session.close();
    assert!(session.is_closed());
    assert_eq!(backend.count("stop"), 1);
    drop(session);
    assert_eq!(backend.count("stop"), 1);

    let broken = FakeBackend::failing("broken", "no capability");
    let mut never_started = session_over(&[&broken]);
    never_started.close();
    never_started.close();
    assert!(broken.calls().is_empty());

    let mut failed_search = session_over(&[&broken]);
    assert!(matches!(
        failed_search.eval("1"),
        Err(ShellError::AllBackendsFailed(_))
    ));
    failed_search.close();
    assert_eq!(broken.count("stop"), 0);
}

#[test]
fn dropping_a_declaration_detaches_it_from_the_backend() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    let key = declare(&mut session, "int f() { return 1; }");
    let caller = declare(&mut session, "int g() { return f(); }");
    let events = session.drop(key).expect("drop");

    assert_eq!(events[0].status, Status::Dropped);
    assert_eq!(events[1].key, caller);
    assert_eq!(events[1].status, Status::RecoverableDefined);
    assert_eq!(backend.count("redefine"), 2);
    assert!(session.methods().expect("open").iter().all(|s| s.key != key));

    let call = session.eval("g()").expect("eval");
    assert!(matches!(
        call[0].exception,
        Some(ExecutionException::Unresolved { ref name }) if name == "f"
    ));
}

#[test]
fn overwritten_declaration_is_reported_with_its_cause() {
    let backend = FakeBackend::new("real");
    let mut session = session_over(&[&backend]);
    let old = declare(&mut session, "int f() { return 1; }");
    let events = session.eval("int f() { return 2; }").expect("eval");
    assert_eq!(events[1].key, old);
    assert_eq!(events[1].previous_status, Status::Valid);
    assert_eq!(events[1].status, Status::Overwritten);
    assert_eq!(events[1].cause, Some(events[0].key));

    let methods = session.methods().expect("open");
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0].kind, SnippetKind::Method);
    assert_eq!(session.eval("f()").expect("eval")[0].value.as_deref(), Some("2"));
}
