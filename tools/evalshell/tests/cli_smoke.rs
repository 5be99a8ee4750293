use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

fn stdout_of(out: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(out.get_output().stdout.clone()).expect("utf8")
}

#[test]
fn help_lists_shell_flags() {
    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = stdout_of(&out);

    assert!(stdout.contains("--strategy"));
    assert!(stdout.contains("--class-path"));
    assert!(stdout.contains("--no-startup"));
    assert!(!stdout.contains("--agent"));
}

#[test]
fn local_strategy_evaluates_stdin() {
    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.args(["--strategy", "local"])
        .write_stdin("int a = 2;\na + 3\n/vars\n/exit\n");
    let out = cmd.assert().success();
    assert_eq!(
        stdout_of(&out),
        "a ==> 2\n$2 ==> 5\n|    int a = 2\n|  Goodbye\n"
    );
}

#[test]
fn default_strategy_runs_through_the_relaunched_agent() {
    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.write_stdin("String s = \"x\";\ns + 1\n");
    let out = cmd.assert().success();
    assert_eq!(stdout_of(&out), "s ==> \"x\"\n$2 ==> \"x1\"\n");
}

#[test]
fn startup_snippets_come_from_config_unless_disabled() {
    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.arg("--config")
        .arg(fixture("configs/startup-local.toml"))
        .write_stdin("twice(base)\n");
    let out = cmd.assert().success();
    assert_eq!(stdout_of(&out), "$1 ==> 20\n");

    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.arg("--config")
        .arg(fixture("configs/startup-local.toml"))
        .arg("--no-startup")
        .write_stdin("base\n");
    let out = cmd.assert().success();
    assert_eq!(stdout_of(&out), "|  Error:\n|  cannot find symbol: base\n");
}

#[test]
fn unusable_backends_exit_nonzero_with_each_cause() {
    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.arg("--config")
        .arg(fixture("configs/unreachable-remote.toml"))
        .write_stdin("1\n");
    let out = cmd.assert().failure().code(1);
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.starts_with("session cannot start: remote: "));
}

#[test]
fn invalid_config_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.arg("--config").arg(fixture("configs/missing.toml"));
    cmd.assert().failure();

    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.arg("--config")
        .arg(fixture("configs/duplicate-strategy.toml"));
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("execution.strategies lists local more than once"));
}

#[test]
fn session_events_are_logged_as_jsonl() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("logs/session.jsonl");
    let mut cmd = cargo_bin_cmd!("evalshell");
    cmd.args(["--strategy", "local"])
        .arg("--log")
        .arg(&log)
        .write_stdin("int a;\n/drop a\n");
    cmd.assert().success();

    let text = std::fs::read_to_string(&log).expect("log written");
    let kinds = text
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("json");
            value["event_type"].as_str().unwrap_or_default().to_string()
        })
        .collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            "backend_selected",
            "snippet_evaluated",
            "snippet_dropped",
            "session_closed"
        ]
    );
}
