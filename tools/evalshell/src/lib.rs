pub mod agent;
pub mod backend;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod image;
pub mod log_retention;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod shell;
pub mod snippet;
pub mod types;

use backend::factory::{remote_request, BackendRegistry};
use backend::failover::FailOverBackend;
use clap::{error::ErrorKind, Parser, ValueEnum};
use compiler::BasicCompiler;
use config::{load_config, AppConfig, CliOverrides};
use errors::ShellError;
use logging::JsonlLogger;
use runtime::{FileSystem, ProductionRuntime};
use session::Session;
use shell::Shell;
use std::time::Duration;
use types::BackendKind;

#[derive(Debug, Clone, Parser)]
#[command(name = "evalshell")]
#[command(about = "Interactive snippet evaluation shell")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    /// Backend to try, in order; repeat to list several.
    #[arg(long = "strategy", value_enum)]
    pub strategies: Vec<CliBackend>,
    #[arg(long = "class-path")]
    pub class_path: Vec<std::path::PathBuf>,
    #[arg(long = "log")]
    pub log: Option<std::path::PathBuf>,
    #[arg(long, default_value_t = false)]
    pub no_startup: bool,
    /// Serve the agent protocol on stdin/stdout instead of starting a shell.
    #[arg(long, hide = true, default_value_t = false)]
    pub agent: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliBackend {
    Remote,
    Local,
}

impl From<CliBackend> for BackendKind {
    fn from(value: CliBackend) -> Self {
        match value {
            CliBackend::Remote => BackendKind::Remote,
            CliBackend::Local => BackendKind::Local,
        }
    }
}

pub fn run() -> Result<i32, ShellError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| ShellError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, ShellError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(ShellError::Cli(error.to_string())),
        },
    };

    if cli.agent {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        agent::serve(stdin.lock(), stdout.lock(), runtime.file_system.clone())?;
        return Ok(0);
    }

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        strategies: cli.strategies.iter().copied().map(Into::into).collect(),
        class_path: cli.class_path.clone(),
        log_path: cli.log.clone(),
        no_startup: cli.no_startup,
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    let logger = build_logger(&cfg, runtime.file_system.as_ref())?;
    let start_session = || -> Result<Session, ShellError> {
        let mut session = open_session(&cfg, cwd, runtime, logger.clone())?;
        session.start()?;
        Ok(session)
    };

    let mut session = start_session()?;

    if runtime.terminal.stdin_is_tty() {
        runtime.terminal.write_line(&format!(
            "|  Welcome to evalshell ({} backend)",
            session.backend_name().unwrap_or("unknown")
        ))?;
        runtime
            .terminal
            .write_line("|  For an introduction type: /help")?;
    }

    Shell::new(
        &mut session,
        runtime.terminal.as_ref(),
        runtime.file_system.as_ref(),
    )
    .with_reopen(Box::new(start_session))
    .run()?;
    session.close();
    Ok(0)
}

/// Builds the candidate list from config and applies classpath and startup
/// snippets. The backend search runs on the first backend operation.
pub fn open_session(
    cfg: &AppConfig,
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
    logger: Option<JsonlLogger>,
) -> Result<Session, ShellError> {
    let fallback_program = match &cfg.execution.remote.program {
        Some(program) => program.clone(),
        None => std::env::current_exe()
            .map_err(|e| ShellError::Io(e.to_string()))?
            .to_string_lossy()
            .into_owned(),
    };
    let registry = BackendRegistry::with_defaults(
        remote_request(&cfg.execution.remote, &fallback_program, cwd),
        Duration::from_millis(cfg.execution.remote.start_timeout_ms),
        runtime.launcher.clone(),
        runtime.file_system.clone(),
    );
    let candidates = registry.candidates(&cfg.execution.strategies)?;
    let backend = FailOverBackend::new(candidates).with_logger(logger.clone());
    Session::open(&cfg.session, backend, Box::new(BasicCompiler), logger)
}

fn build_logger(cfg: &AppConfig, fs: &dyn FileSystem) -> Result<Option<JsonlLogger>, ShellError> {
    let Some(path) = &cfg.logging.path else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent)?;
    }
    Ok(Some(JsonlLogger {
        path: path.clone(),
        max_payload_bytes: cfg.logging.max_payload_bytes,
        budget_bytes: cfg.logging.budget_bytes,
    }))
}
