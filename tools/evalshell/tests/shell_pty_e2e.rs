use expectrl::{Eof, Expect};
use std::process::Command;

fn shell_command(strategy: &str) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_evalshell"));
    cmd.arg("--strategy").arg(strategy);
    cmd
}

#[test]
fn pty_e2e_interactive_shell_greets_and_evaluates() {
    let mut session = expectrl::Session::spawn(shell_command("local")).expect("spawn pty");
    session
        .expect("Welcome to evalshell (local backend)")
        .expect("banner");
    session.expect("/help").expect("help hint");

    session.send_line("int f() { return g() + 1; }").expect("send f");
    session
        .expect("created method f(), however, it cannot be invoked until g is declared")
        .expect("recoverable feedback");
    session.send_line("int g() { return 1; }").expect("send g");
    session.expect("update modified method f()").expect("update");
    session.send_line("f()").expect("send call");
    session.expect("==> 2").expect("value");

    session.send_line("/exit").expect("send exit");
    session.expect("Goodbye").expect("goodbye");
    session.expect(Eof).expect("session exited");
}

#[test]
fn pty_e2e_remote_agent_survives_user_exceptions() {
    let mut session = expectrl::Session::spawn(shell_command("remote")).expect("spawn pty");
    session
        .expect("Welcome to evalshell (remote backend)")
        .expect("banner");
    session
        .send_line("int boom() { throw new RuntimeException(\"boom\"); }")
        .expect("send boom");
    session.send_line("boom()").expect("send call");
    session
        .expect("Exception RuntimeException: boom")
        .expect("exception feedback");
    session.send_line("1 + 1").expect("send sum");
    session.expect("==> 2").expect("still running");
    session.send_line("/exit").expect("send exit");
    session.expect(Eof).expect("session exited");
}
