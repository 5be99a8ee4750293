use assert_cmd::cargo::cargo_bin_cmd;
use evalshell::agent::LoopbackLauncher;
use evalshell::backend::factory::{LocalFactory, RemoteFactory};
use evalshell::backend::failover::FailOverBackend;
use evalshell::backend::remote::RemoteBackend;
use evalshell::backend::{BackendFactory, ExecutionBackend};
use evalshell::errors::ShellError;
use evalshell::image::{ClassImage, ExecutionException, Expr, FieldImage, MethodImage};
use evalshell::protocol::{decode_response, encode, AgentRequest, AgentResponse, PROTOCOL_VERSION};
use evalshell::runtime::{
    FakeFileSystem, FileSystem, ProcessLauncher, ProcessRequest, ProductionFileSystem,
    ProductionProcessLauncher,
};
use evalshell::types::ClassStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn agent_request() -> ProcessRequest {
    ProcessRequest {
        program: env!("CARGO_BIN_EXE_evalshell").to_string(),
        args: vec!["--agent".to_string()],
        cwd: Some(env!("CARGO_MANIFEST_DIR").into()),
    }
}

fn counter() -> ClassImage {
    ClassImage {
        name: "$Snippet0".to_string(),
        fields: vec![FieldImage {
            name: "count".to_string(),
            type_name: "int".to_string(),
            default_value: "0".to_string(),
        }],
        methods: vec![
            MethodImage {
                name: "$init".to_string(),
                params: Vec::new(),
                body: Expr::Assign {
                    class_name: "$Snippet0".to_string(),
                    field: "count".to_string(),
                    value: Box::new(Expr::Literal {
                        value: "7".to_string(),
                    }),
                },
            },
            MethodImage {
                name: "fail".to_string(),
                params: Vec::new(),
                body: Expr::Throw {
                    exception_class: "RuntimeException".to_string(),
                    message: Some("boom".to_string()),
                },
            },
        ],
    }
}

fn exercise(backend: &mut RemoteBackend) {
    backend.start().expect("start");
    assert!(backend.load(&[counter()]).expect("load"));
    assert_eq!(backend.invoke("$Snippet0", "$init").expect("init"), "7");
    assert_eq!(backend.var_value("$Snippet0", "count").expect("value"), "7");
    assert_eq!(
        backend.invoke("$Snippet0", "fail"),
        Err(ShellError::Execution(ExecutionException::Thrown {
            exception_class: "RuntimeException".to_string(),
            message: Some("boom".to_string()),
        }))
    );
    assert_eq!(
        backend.class_status("$Snippet0").expect("status"),
        ClassStatus::Loaded
    );
    backend.stop().expect("stop");
    assert_eq!(
        backend.invoke("$Snippet0", "$init"),
        Err(ShellError::Backend("remote backend is not running".to_string()))
    );
}

#[test]
fn remote_backend_over_loopback_agent() {
    let launcher: Arc<dyn ProcessLauncher> =
        Arc::new(LoopbackLauncher::new(Arc::new(FakeFileSystem::default())));
    let mut backend = RemoteBackend::new(launcher, agent_request());
    exercise(&mut backend);
}

#[test]
fn remote_backend_over_spawned_agent_process() {
    let mut backend = RemoteBackend::new(Arc::new(ProductionProcessLauncher), agent_request());
    exercise(&mut backend);
}

#[test]
fn agent_resolves_classes_from_its_classpath() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lib = ClassImage {
        name: "Lib".to_string(),
        fields: Vec::new(),
        methods: vec![MethodImage {
            name: "answer".to_string(),
            params: Vec::new(),
            body: Expr::Literal {
                value: "42".to_string(),
            },
        }],
    };
    ProductionFileSystem
        .write_string(
            &dir.path().join("Lib.json"),
            &serde_json::to_string(&lib).expect("image json"),
        )
        .expect("write class");

    let mut backend = RemoteBackend::new(Arc::new(ProductionProcessLauncher), agent_request());
    backend.start().expect("start");
    assert_eq!(
        backend.class_status("Lib").expect("status"),
        ClassStatus::NotFound
    );
    assert!(backend
        .add_to_classpath(&dir.path().to_string_lossy())
        .expect("classpath"));
    assert_eq!(
        backend.class_status("Lib").expect("status"),
        ClassStatus::Loadable
    );
    assert_eq!(backend.invoke("Lib", "answer").expect("invoke"), "42");
    backend.stop().expect("stop");
}

#[test]
fn agent_mode_speaks_json_lines_on_stdio() {
    let input = [
        encode(&AgentRequest::Hello).expect("hello"),
        "not json".to_string(),
        encode(&AgentRequest::Invoke {
            class_name: "Missing".to_string(),
            method: "m".to_string(),
        })
        .expect("invoke"),
        encode(&AgentRequest::Stop).expect("stop"),
    ]
    .join("\n");

    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.arg("--agent").write_stdin(format!("{input}\n"));
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");
    let replies = stdout
        .lines()
        .map(|line| decode_response(line).expect("response"))
        .collect::<Vec<_>>();

    assert_eq!(replies.len(), 4);
    assert_eq!(
        replies[0],
        AgentResponse::Ready {
            version: PROTOCOL_VERSION
        }
    );
    assert!(matches!(&replies[1], AgentResponse::Failed { message } if message.contains("invalid agent message")));
    assert!(matches!(
        &replies[2],
        AgentResponse::Exception {
            exception: ExecutionException::Thrown { exception_class, .. }
        } if exception_class == "NoClassDefFoundError"
    ));
    assert_eq!(replies[3], AgentResponse::Done { ok: true });
}

#[cfg(unix)]
#[test]
fn silent_agent_times_out_and_the_search_moves_on() {
    let silent = RemoteFactory::new(
        Arc::new(ProductionProcessLauncher),
        ProcessRequest {
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
            cwd: None,
        },
        Duration::from_millis(200),
    );
    let local = LocalFactory::new(Arc::new(FakeFileSystem::default()));
    let mut coordinator = FailOverBackend::new(vec![
        Arc::new(silent) as Arc<dyn BackendFactory>,
        Arc::new(local),
    ]);

    let started = Instant::now();
    coordinator.start().expect("local takes over");
    assert_eq!(coordinator.chosen_name(), Some("local"));
    assert!(started.elapsed() < Duration::from_secs(10));
}
