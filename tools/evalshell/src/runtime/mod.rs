use crate::errors::ShellError;
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// Line-oriented duplex link to a launched process.
pub trait Channel: Send {
    fn send_line(&mut self, line: &str) -> Result<(), ShellError>;
    /// `Ok(None)` once the other side has closed its output.
    fn recv_line(&mut self) -> Result<Option<String>, ShellError>;
    /// Like [`Channel::recv_line`], but fails once `timeout` passes without a
    /// line. Channels that never block can rely on the default.
    fn recv_line_within(&mut self, _timeout: Duration) -> Result<Option<String>, ShellError> {
        self.recv_line()
    }
    fn terminate(&mut self) -> Result<(), ShellError>;
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, request: ProcessRequest) -> Result<Box<dyn Channel>, ShellError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, ShellError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ShellError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), ShellError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn stdin_is_tty(&self) -> bool;
    fn read_line(&self) -> Result<Option<String>, ShellError>;
    fn write_line(&self, line: &str) -> Result<(), ShellError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ShellError> {
        std::fs::read_to_string(path).map_err(|e| ShellError::Io(e.to_string()))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ShellError> {
        std::fs::write(path, contents).map_err(|e| ShellError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ShellError> {
        std::fs::create_dir_all(path).map_err(|e| ShellError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionProcessLauncher;

impl ProcessLauncher for ProductionProcessLauncher {
    fn launch(&self, request: ProcessRequest) -> Result<Box<dyn Channel>, ShellError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| ShellError::Process(format!("{}: {e}", request.program)))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ShellError::Process(
                "child process pipes unavailable".to_string(),
            ));
        };
        Ok(Box::new(ProcessChannel {
            child,
            stdin,
            lines: spawn_line_reader(stdout),
        }))
    }
}

/// Reads the child's stdout on its own thread so receivers can wait with a
/// deadline. The sender is dropped at end of output.
fn spawn_line_reader(stdout: ChildStdout) -> Receiver<Result<String, String>> {
    let (sender, lines) = mpsc::channel();
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();
                    if sender.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = sender.send(Err(e.to_string()));
                    break;
                }
            }
        }
    });
    lines
}

struct ProcessChannel {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<Result<String, String>>,
}

impl Channel for ProcessChannel {
    fn send_line(&mut self, line: &str) -> Result<(), ShellError> {
        writeln!(self.stdin, "{line}").map_err(|e| ShellError::Process(e.to_string()))?;
        self.stdin
            .flush()
            .map_err(|e| ShellError::Process(e.to_string()))
    }

    fn recv_line(&mut self) -> Result<Option<String>, ShellError> {
        match self.lines.recv() {
            Ok(line) => line.map(Some).map_err(ShellError::Process),
            Err(_) => Ok(None),
        }
    }

    fn recv_line_within(&mut self, timeout: Duration) -> Result<Option<String>, ShellError> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => line.map(Some).map_err(ShellError::Process),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(ShellError::Process(format!(
                "no reply within {} ms",
                timeout.as_millis()
            ))),
        }
    }

    fn terminate(&mut self) -> Result<(), ShellError> {
        if self
            .child
            .try_wait()
            .map_err(|e| ShellError::Process(e.to_string()))?
            .is_none()
        {
            self.child
                .kill()
                .map_err(|e| ShellError::Process(e.to_string()))?;
        }
        self.child
            .wait()
            .map(|_| ())
            .map_err(|e| ShellError::Process(e.to_string()))
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdin_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdin())
    }

    fn read_line(&self) -> Result<Option<String>, ShellError> {
        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ShellError::Io(e.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()))
    }

    fn write_line(&self, line: &str) -> Result<(), ShellError> {
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| ShellError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            launcher: Arc::new(ProductionProcessLauncher),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<ShellError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: ShellError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().expect("dirs lock").clone()
    }

    fn maybe_fail(&self) -> Result<(), ShellError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ShellError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| ShellError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ShellError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ShellError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    input: Arc<Mutex<VecDeque<String>>>,
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    pub fn with_input(lines: &[&str]) -> Self {
        let terminal = Self::default();
        terminal
            .input
            .lock()
            .expect("input lock")
            .extend(lines.iter().map(|line| line.to_string()));
        terminal
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn stdin_is_tty(&self) -> bool {
        self.is_tty
    }

    fn read_line(&self) -> Result<Option<String>, ShellError> {
        Ok(self.input.lock().expect("input lock").pop_front())
    }

    fn write_line(&self, line: &str) -> Result<(), ShellError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

type QueuedChannel = Result<Box<dyn Channel>, ShellError>;

#[derive(Default, Clone)]
pub struct FakeProcessLauncher {
    channels: Arc<Mutex<VecDeque<QueuedChannel>>>,
    launched: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl FakeProcessLauncher {
    pub fn push_channel(&self, channel: QueuedChannel) {
        self.channels
            .lock()
            .expect("channels lock")
            .push_back(channel);
    }

    pub fn launched(&self) -> Vec<ProcessRequest> {
        self.launched.lock().expect("launched lock").clone()
    }
}

impl ProcessLauncher for FakeProcessLauncher {
    fn launch(&self, request: ProcessRequest) -> Result<Box<dyn Channel>, ShellError> {
        self.launched.lock().expect("launched lock").push(request);
        self.channels
            .lock()
            .expect("channels lock")
            .pop_front()
            .unwrap_or_else(|| Err(ShellError::Process("no fake channel queued".to_string())))
    }
}

/// Channel that replays canned responses and records what was sent.
#[derive(Default, Clone)]
pub struct ScriptedChannel {
    responses: Arc<Mutex<VecDeque<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    terminated: Arc<Mutex<bool>>,
}

impl ScriptedChannel {
    pub fn with_responses(lines: &[&str]) -> Self {
        let channel = Self::default();
        channel
            .responses
            .lock()
            .expect("responses lock")
            .extend(lines.iter().map(|line| line.to_string()));
        channel
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn was_terminated(&self) -> bool {
        *self.terminated.lock().expect("terminated lock")
    }
}

impl Channel for ScriptedChannel {
    fn send_line(&mut self, line: &str) -> Result<(), ShellError> {
        self.sent.lock().expect("sent lock").push(line.to_string());
        Ok(())
    }

    fn recv_line(&mut self) -> Result<Option<String>, ShellError> {
        Ok(self.responses.lock().expect("responses lock").pop_front())
    }

    fn terminate(&mut self) -> Result<(), ShellError> {
        *self.terminated.lock().expect("terminated lock") = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Channel, FakeFileSystem, FakeProcessLauncher, FakeTerminal, FileSystem, ProcessLauncher,
        ProcessRequest, ProductionProcessLauncher, ScriptedChannel, Terminal,
    };
    use crate::errors::ShellError;
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn request() -> ProcessRequest {
        ProcessRequest {
            program: "evalshell".to_string(),
            args: vec!["--agent".to_string()],
            cwd: None,
        }
    }

    #[test]
    fn fake_launcher_hands_out_queued_channels_in_order() {
        let launcher = FakeProcessLauncher::default();
        launcher.push_channel(Err(ShellError::Process("spawn refused".to_string())));
        launcher.push_channel(Ok(Box::new(ScriptedChannel::with_responses(&["hi"]))));

        let first = launcher.launch(request());
        assert!(matches!(first, Err(ShellError::Process(message)) if message == "spawn refused"));
        let mut second = launcher.launch(request()).expect("second channel");
        assert_eq!(second.recv_line().expect("recv"), Some("hi".to_string()));
        assert!(launcher.launch(request()).is_err());
        assert_eq!(launcher.launched().len(), 3);
    }

    #[test]
    fn scripted_channel_records_traffic() {
        let channel = ScriptedChannel::default();
        let mut boxed: Box<dyn Channel> = Box::new(channel.clone());
        boxed.send_line("{\"op\":\"hello\"}").expect("send");
        assert_eq!(boxed.recv_line().expect("recv"), None);
        boxed.terminate().expect("terminate");
        assert_eq!(channel.sent(), vec!["{\"op\":\"hello\"}".to_string()]);
        assert!(channel.was_terminated());
    }

    #[test]
    fn fake_file_system_fails_once_on_request() {
        let fs = FakeFileSystem::with_file("/cfg.toml", "x = 1");
        fs.set_fail_next(ShellError::Io("disk gone".to_string()));
        assert!(fs.read_to_string(Path::new("/cfg.toml")).is_err());
        assert_eq!(
            fs.read_to_string(Path::new("/cfg.toml")).expect("read"),
            "x = 1"
        );
    }

    #[test]
    fn fake_terminal_replays_input_then_reports_eof() {
        let terminal = FakeTerminal::with_input(&["int a;"]);
        assert_eq!(terminal.read_line().expect("line"), Some("int a;".to_string()));
        assert_eq!(terminal.read_line().expect("eof"), None);
        terminal.write_line("done").expect("write");
        assert_eq!(terminal.written_lines(), vec!["done".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn process_channel_gives_up_on_a_silent_child() {
        let mut channel = ProductionProcessLauncher
            .launch(ProcessRequest {
                program: "sleep".to_string(),
                args: vec!["30".to_string()],
                cwd: None,
            })
            .expect("spawn sleep");
        let started = Instant::now();
        let err = channel
            .recv_line_within(Duration::from_millis(100))
            .expect_err("silent child");
        assert_eq!(err, ShellError::Process("no reply within 100 ms".to_string()));
        channel.terminate().expect("terminate");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn process_channel_reads_lines_until_end_of_output() {
        let mut channel = ProductionProcessLauncher
            .launch(ProcessRequest {
                program: "echo".to_string(),
                args: vec!["ready".to_string()],
                cwd: None,
            })
            .expect("spawn echo");
        assert_eq!(
            channel
                .recv_line_within(Duration::from_secs(5))
                .expect("line"),
            Some("ready".to_string())
        );
        assert_eq!(channel.recv_line().expect("eof"), None);
    }
}
