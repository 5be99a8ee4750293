//! A session binds one snippet registry to one fail-over backend.
//!
//! Open sessions accept input. Once closed, anything that would reach the
//! backend or add work fails with [`ShellError::SessionClosed`], while status,
//! diagnostics and unresolved-dependency queries keep answering from the
//! registry.

use crate::backend::failover::FailOverBackend;
use crate::backend::ExecutionBackend;
use crate::compiler::{CompileRequest, CompiledSnippet, SnippetCompiler};
use crate::config::SessionConfig;
use crate::errors::ShellError;
use crate::logging::{record, JsonlLogger, Level};
use crate::registry::{declared_name, SnippetRegistry};
use crate::snippet::{Diagnostic, Snippet, SnippetEvent, SnippetKey};
use crate::types::{SnippetKind, Status};
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

pub struct Session {
    state: SessionState,
    registry: SnippetRegistry,
    backend: FailOverBackend,
    compiler: Box<dyn SnippetCompiler>,
    next_id: usize,
    next_startup_id: usize,
    logger: Option<JsonlLogger>,
}

impl Session {
    pub fn new(backend: FailOverBackend, compiler: Box<dyn SnippetCompiler>) -> Self {
        Self {
            state: SessionState::Open,
            registry: SnippetRegistry::new(),
            backend,
            compiler,
            next_id: 0,
            next_startup_id: 0,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Option<JsonlLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Creates a session and applies the configured classpath and startup
    /// snippets. Either one forces the backend search.
    pub fn open(
        config: &SessionConfig,
        backend: FailOverBackend,
        compiler: Box<dyn SnippetCompiler>,
        logger: Option<JsonlLogger>,
    ) -> Result<Self, ShellError> {
        let mut session = Self::new(backend, compiler).with_logger(logger);
        for entry in &config.classpath {
            session.add_to_classpath(&entry.to_string_lossy())?;
        }
        for source in &config.startup {
            session.next_startup_id += 1;
            let id = format!("s{}", session.next_startup_id);
            session.evaluate(source, id)?;
        }
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Runs the backend search now instead of on first use.
    pub fn start(&mut self) -> Result<(), ShellError> {
        self.ensure_open()?;
        self.backend.start()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend.chosen_name()
    }

    pub fn eval(&mut self, source: &str) -> Result<Vec<SnippetEvent>, ShellError> {
        self.ensure_open()?;
        self.next_id += 1;
        let id = self.next_id.to_string();
        self.evaluate(source, id)
    }

    pub fn drop(&mut self, key: SnippetKey) -> Result<Vec<SnippetEvent>, ShellError> {
        self.ensure_open()?;
        let snippet = self.known(key)?.clone();
        if !snippet.kind.is_persistent() || !snippet.status.is_active() {
            return Err(ShellError::InvalidArgument(format!(
                "snippet {} is not an active declaration",
                snippet.id
            )));
        }
        if snippet.loaded {
            if let Some(image) = &snippet.image {
                self.backend.redefine(&[image.tombstone()])?;
            }
        }
        let previous = self.registry.drop(key)?;
        record(
            self.logger.as_ref(),
            Level::Info,
            "snippet_dropped",
            json!({"id": snippet.id, "name": snippet.name}),
        );

        let mut events = vec![SnippetEvent::new(key, previous, Status::Dropped)];
        self.refresh_dependents(declared_name(&snippet).to_string(), key, &mut events)?;
        Ok(events)
    }

    pub fn var_value(&mut self, key: SnippetKey) -> Result<String, ShellError> {
        self.ensure_open()?;
        let snippet = self.known(key)?;
        if snippet.kind != SnippetKind::Var {
            return Err(ShellError::InvalidArgument(format!(
                "snippet {} is not a variable",
                snippet.id
            )));
        }
        if snippet.status != Status::Valid {
            return Err(ShellError::InvalidArgument(format!(
                "variable {} is not defined",
                snippet.name
            )));
        }
        let class_name = snippet.class_name.clone();
        let field = snippet.name.clone();
        self.backend.var_value(&class_name, &field)
    }

    pub fn add_to_classpath(&mut self, path: &str) -> Result<bool, ShellError> {
        self.ensure_open()?;
        self.backend.add_to_classpath(path)
    }

    /// Every snippet ever evaluated, in evaluation order.
    pub fn snippets(&self) -> Result<Vec<&Snippet>, ShellError> {
        self.ensure_open()?;
        Ok(self.registry.all().iter().collect())
    }

    pub fn variables(&self) -> Result<Vec<&Snippet>, ShellError> {
        self.active_of_kind(SnippetKind::Var)
    }

    pub fn methods(&self) -> Result<Vec<&Snippet>, ShellError> {
        self.active_of_kind(SnippetKind::Method)
    }

    pub fn types(&self) -> Result<Vec<&Snippet>, ShellError> {
        self.active_of_kind(SnippetKind::Class)
    }

    pub fn imports(&self) -> Result<Vec<&Snippet>, ShellError> {
        self.active_of_kind(SnippetKind::Import)
    }

    pub fn status(&self, key: SnippetKey) -> Result<Status, ShellError> {
        Ok(self.known(key)?.status)
    }

    pub fn diagnostics(&self, key: SnippetKey) -> Result<&[Diagnostic], ShellError> {
        self.registry
            .diagnostics(key)
            .ok_or_else(|| ShellError::UnknownSnippet(key.to_string()))
    }

    pub fn unresolved_dependencies(&self, key: SnippetKey) -> Result<BTreeSet<String>, ShellError> {
        self.registry
            .unresolved_dependencies(key)
            .ok_or_else(|| ShellError::UnknownSnippet(key.to_string()))
    }

    pub fn snippet(&self, key: SnippetKey) -> Option<&Snippet> {
        self.registry.lookup(key)
    }

    /// Looks a snippet up by id, then by declared name.
    pub fn find(&self, reference: &str) -> Option<&Snippet> {
        self.registry
            .find_by_id(reference)
            .or_else(|| self.registry.active_declaration(reference))
            .or_else(|| {
                self.registry
                    .all()
                    .iter()
                    .rev()
                    .find(|snippet| snippet.kind.is_persistent() && snippet.name == reference)
            })
    }

    /// Stops the backend once; later calls do nothing.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        let stopped = self.backend.stop();
        record(
            self.logger.as_ref(),
            Level::Info,
            "session_closed",
            json!({
                "snippets": self.registry.all().len(),
                "backend": self.backend.chosen_name(),
                "stop_error": stopped.err().map(|err| err.to_string()),
            }),
        );
    }

    fn ensure_open(&self) -> Result<(), ShellError> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(ShellError::SessionClosed),
        }
    }

    fn known(&self, key: SnippetKey) -> Result<&Snippet, ShellError> {
        self.registry
            .lookup(key)
            .ok_or_else(|| ShellError::UnknownSnippet(key.to_string()))
    }

    fn active_of_kind(&self, kind: SnippetKind) -> Result<Vec<&Snippet>, ShellError> {
        self.ensure_open()?;
        Ok(self.registry.active_of_kind(kind))
    }

    fn evaluate(&mut self, source: &str, id: String) -> Result<Vec<SnippetEvent>, ShellError> {
        let key = self.registry.next_key();
        let class_name = format!("$Snippet{}", key.0);
        let compiled = self.compiler.compile(&CompileRequest {
            source,
            class_name: &class_name,
            symbols: &self.registry,
        })?;
        let mut status = resolution_status(&compiled);
        let entry = compiled.entry.clone();
        let unresolved = compiled.unresolved.clone();
        let mut snippet = new_snippet(key, id, source, class_name.clone(), compiled);
        if status == Status::Rejected && snippet.kind == SnippetKind::Expression {
            snippet.diagnostics.extend(
                unresolved
                    .iter()
                    .map(|name| Diagnostic::error(format!("cannot find symbol: {name}"))),
            );
        }

        if status.is_defined() {
            if let Some(image) = &snippet.image {
                if self.backend.load(std::slice::from_ref(image))? {
                    snippet.loaded = true;
                } else {
                    snippet
                        .diagnostics
                        .push(Diagnostic::error(format!("backend could not load {}", image.name)));
                    status = Status::Rejected;
                }
            }
        }
        snippet.status = status;
        let kind = snippet.kind;
        let name = snippet.name.clone();
        let provides = declared_name(&snippet).to_string();
        let snippet_id = snippet.id.clone();

        let overwritten = self.registry.put(snippet)?;
        let mut main = SnippetEvent::new(key, Status::Nonexistent, status);
        if status == Status::Valid {
            self.run_entry(&class_name, kind, &name, entry.as_deref(), &mut main)?;
        }
        record(
            self.logger.as_ref(),
            Level::Info,
            "snippet_evaluated",
            json!({
                "id": snippet_id,
                "kind": kind.as_str(),
                "status": status.as_str(),
                "value": main.value,
                "exception": main.exception.as_ref().map(ToString::to_string),
            }),
        );

        let mut events = vec![main];
        if let Some(old) = overwritten {
            events.push(SnippetEvent::new(old.key, old.status, Status::Overwritten).caused_by(key));
        }
        if kind.is_persistent() && status.is_active() {
            self.refresh_dependents(provides, key, &mut events)?;
        }
        Ok(events)
    }

    /// Runs an initializer or expression body and records its outcome on
    /// `event`. Exceptions from the evaluated code are part of the outcome.
    fn run_entry(
        &mut self,
        class_name: &str,
        kind: SnippetKind,
        name: &str,
        entry: Option<&str>,
        event: &mut SnippetEvent,
    ) -> Result<(), ShellError> {
        if let Some(entry) = entry {
            match self.backend.invoke(class_name, entry) {
                Ok(value) => event.value = Some(value),
                Err(ShellError::Execution(exception)) => event.exception = Some(exception),
                Err(err) => return Err(err),
            }
        }
        if kind == SnippetKind::Var {
            event.value = Some(self.backend.var_value(class_name, name)?);
        }
        Ok(())
    }

    /// Recompiles everything that references `name`, transitively through
    /// snippets whose status changes, and reports those changes.
    fn refresh_dependents(
        &mut self,
        name: String,
        cause: SnippetKey,
        events: &mut Vec<SnippetEvent>,
    ) -> Result<(), ShellError> {
        let mut queue = VecDeque::from([name]);
        let mut visited = BTreeSet::from([cause]);
        while let Some(name) = queue.pop_front() {
            for dependent in self.registry.dependents_of(&name) {
                if !visited.insert(dependent) {
                    continue;
                }
                let Some(event) = self.recompile(dependent, cause)? else {
                    continue;
                };
                if let Some(snippet) = self.registry.lookup(dependent) {
                    queue.push_back(declared_name(snippet).to_string());
                }
                events.push(event);
            }
        }
        Ok(())
    }

    /// Returns an event only when the snippet's status changed.
    fn recompile(
        &mut self,
        key: SnippetKey,
        cause: SnippetKey,
    ) -> Result<Option<SnippetEvent>, ShellError> {
        let current = self.known(key)?.clone();
        let compiled = self.compiler.compile(&CompileRequest {
            source: &current.source,
            class_name: &current.class_name,
            symbols: &self.registry,
        })?;
        let mut status = match resolution_status(&compiled) {
            Status::Rejected => recoverable_status(current.kind),
            status => status,
        };
        let entry = compiled.entry.clone();
        let mut updated = current.clone();
        updated.type_name = compiled.type_name;
        updated.dependencies = compiled.dependencies;
        updated.diagnostics = compiled.diagnostics;
        updated.image = compiled.image;

        let mut event = SnippetEvent::new(key, current.status, status).caused_by(cause);
        let mut first_load = false;
        if status.is_defined() {
            if let Some(image) = &updated.image {
                let images = std::slice::from_ref(image);
                let accepted = if current.loaded {
                    self.backend.redefine(images)?
                } else {
                    self.backend.load(images)?
                };
                if accepted {
                    first_load = !current.loaded;
                    updated.loaded = true;
                } else {
                    status = recoverable_status(current.kind);
                }
            }
        }
        event.status = status;
        updated.status = status;
        self.registry.put(updated)?;

        if status == Status::Valid && first_load && current.kind == SnippetKind::Var {
            self.run_entry(
                &current.class_name,
                current.kind,
                &current.name,
                entry.as_deref(),
                &mut event,
            )?;
        }
        if event.status == event.previous_status {
            return Ok(None);
        }
        Ok(Some(event))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolution_status(compiled: &CompiledSnippet) -> Status {
    if compiled.kind == SnippetKind::Erroneous || compiled.has_errors() {
        return Status::Rejected;
    }
    if compiled.unresolved.is_empty() {
        return Status::Valid;
    }
    match compiled.kind {
        SnippetKind::Import => Status::Valid,
        SnippetKind::Var => Status::RecoverableNotDefined,
        SnippetKind::Method | SnippetKind::Class => Status::RecoverableDefined,
        SnippetKind::Expression | SnippetKind::Erroneous => Status::Rejected,
    }
}

fn recoverable_status(kind: SnippetKind) -> Status {
    if kind == SnippetKind::Var {
        Status::RecoverableNotDefined
    } else {
        Status::RecoverableDefined
    }
}

fn new_snippet(
    key: SnippetKey,
    id: String,
    source: &str,
    class_name: String,
    compiled: CompiledSnippet,
) -> Snippet {
    let name = if compiled.kind == SnippetKind::Expression && compiled.name.is_empty() {
        format!("${id}")
    } else {
        compiled.name
    };
    Snippet {
        key,
        id,
        kind: compiled.kind,
        name,
        type_name: compiled.type_name,
        signature: compiled.signature,
        arity: compiled.arity,
        source: source.trim().to_string(),
        class_name,
        status: Status::Nonexistent,
        dependencies: compiled.dependencies,
        diagnostics: compiled.diagnostics,
        image: compiled.image,
        loaded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::{Session, SessionState};
    use crate::backend::failover::FailOverBackend;
    use crate::backend::{BackendFactory, ExecutionBackend, FakeBackend, FnFactory};
    use crate::compiler::BasicCompiler;
    use crate::config::SessionConfig;
    use crate::errors::ShellError;
    use crate::image::ExecutionException;
    use crate::snippet::SnippetKey;
    use crate::types::Status;
    use std::sync::Arc;

    fn session_with(fake: &FakeBackend) -> Session {
        let fake = fake.clone();
        let factory: Arc<dyn BackendFactory> = Arc::new(FnFactory::new("fake", move || {
            Box::new(fake.clone()) as Box<dyn ExecutionBackend>
        }));
        Session::new(FailOverBackend::new(vec![factory]), Box::new(BasicCompiler))
    }

    fn main_key(session: &mut Session, source: &str) -> SnippetKey {
        session.eval(source).expect("eval")[0].key
    }

    #[test]
    fn variable_declaration_reports_its_default() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        let events = session.eval("int a;").expect("eval");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, Status::Valid);
        assert_eq!(events[0].previous_status, Status::Nonexistent);
        assert_eq!(events[0].value.as_deref(), Some("0"));
        assert_eq!(session.var_value(events[0].key).expect("value"), "0");
    }

    #[test]
    fn throwing_initializer_keeps_variable_valid() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        session
            .eval("int boom() { throw new IllegalStateException(\"nope\"); }")
            .expect("method");
        let events = session.eval("int x = boom();").expect("var");
        assert_eq!(events[0].status, Status::Valid);
        assert_eq!(
            events[0].exception,
            Some(ExecutionException::Thrown {
                exception_class: "IllegalStateException".to_string(),
                message: Some("nope".to_string()),
            })
        );
        assert_eq!(events[0].value.as_deref(), Some("0"));
    }

    #[test]
    fn forward_reference_resolves_when_declared() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        let f = main_key(&mut session, "int f() { return g() + 1; }");
        assert_eq!(session.status(f).expect("status"), Status::RecoverableDefined);
        let early = session.eval("f()").expect("call");
        assert!(matches!(
            early[0].exception,
            Some(ExecutionException::Unresolved { ref name }) if name == "g"
        ));

        let events = session.eval("int g() { return 41; }").expect("declare g");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].key, f);
        assert_eq!(events[1].status, Status::Valid);
        assert_eq!(events[1].cause, Some(events[0].key));

        let value = session.eval("f()").expect("call");
        assert_eq!(value[0].value.as_deref(), Some("42"));
    }

    #[test]
    fn redeclaration_overwrites_and_rebinds_dependents() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        let first = main_key(&mut session, "int x = 1;");
        session.eval("int twice() { return x + x; }").expect("method");
        let events = session.eval("String x = \"a\";").expect("redeclare");
        assert_eq!(events[1].key, first);
        assert_eq!(events[1].status, Status::Overwritten);
        assert_eq!(session.status(first).expect("status"), Status::Overwritten);

        let value = session.eval("twice()").expect("call");
        assert_eq!(value[0].value.as_deref(), Some("\"aa\""));
    }

    #[test]
    fn unresolved_expression_is_rejected_with_diagnostic() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        let events = session.eval("missing + 1").expect("eval");
        assert_eq!(events[0].status, Status::Rejected);
        let diagnostics = session.diagnostics(events[0].key).expect("diagnostics");
        assert_eq!(diagnostics[0].message, "cannot find symbol: missing");
        assert!(fake.calls().iter().all(|call| call != "load"));
    }

    #[test]
    fn overly_long_input_is_rejected_and_the_session_carries_on() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        let chain = vec!["1"; 800].join(" + ");
        let events = session.eval(&chain).expect("eval");
        assert_eq!(events[0].status, Status::Rejected);
        let diagnostics = session.diagnostics(events[0].key).expect("diagnostics");
        assert!(diagnostics
            .iter()
            .any(|d| d.message.contains("expression too complex")));

        let value = session.eval("2 + 3").expect("eval");
        assert_eq!(value[0].value.as_deref(), Some("5"));
    }

    #[test]
    fn int_arithmetic_overflows_like_the_declared_type() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        let events = session.eval("int x = 2147483647 + 1;").expect("int");
        assert_eq!(events[0].value.as_deref(), Some("-2147483648"));
        let events = session.eval("long y = 2147483647L + 1;").expect("long");
        assert_eq!(events[0].value.as_deref(), Some("2147483648"));
    }

    #[test]
    fn drop_detaches_declaration_and_demotes_dependents() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        let g = main_key(&mut session, "int g() { return 1; }");
        let f = main_key(&mut session, "int f() { return g(); }");
        let events = session.drop(g).expect("drop");
        assert_eq!(events[0].status, Status::Dropped);
        assert_eq!(events[0].previous_status, Status::Valid);
        assert_eq!(events[1].key, f);
        assert_eq!(events[1].status, Status::RecoverableDefined);
        assert_eq!(
            session
                .unresolved_dependencies(f)
                .expect("deps")
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["g"]
        );
        assert!(matches!(
            session.drop(g),
            Err(ShellError::InvalidArgument(_))
        ));
    }

    #[test]
    fn close_is_idempotent_and_stops_backend_once() {
        let fake = FakeBackend::new("fake");
        let mut session = session_with(&fake);
        let key = main_key(&mut session, "int a;");
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(fake.count("stop"), 1);
        assert_eq!(session.status(key).expect("status"), Status::Valid);
        assert!(matches!(session.eval("1"), Err(ShellError::SessionClosed)));
        drop(session);
        assert_eq!(fake.count("stop"), 1);
    }

    #[test]
    fn startup_snippets_get_startup_ids() {
        let fake = FakeBackend::new("fake");
        let config = SessionConfig {
            classpath: vec!["/opt/lib".into()],
            startup: vec!["int base = 10;".to_string()],
        };
        let fake_for_factory = fake.clone();
        let factory: Arc<dyn BackendFactory> = Arc::new(FnFactory::new("fake", move || {
            Box::new(fake_for_factory.clone()) as Box<dyn ExecutionBackend>
        }));
        let mut session = Session::open(
            &config,
            FailOverBackend::new(vec![factory]),
            Box::new(BasicCompiler),
            None,
        )
        .expect("open");
        assert_eq!(session.find("s1").map(|s| s.name.as_str()), Some("base"));
        assert_eq!(fake.calls()[1], "add_to_classpath /opt/lib");
        let events = session.eval("base").expect("eval");
        assert_eq!(session.snippet(events[0].key).map(|s| s.id.as_str()), Some("1"));
        assert_eq!(events[0].value.as_deref(), Some("10"));
    }
}
