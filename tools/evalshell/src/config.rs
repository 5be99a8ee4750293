use crate::errors::ShellError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use crate::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const REMOTE_AGENT_FLAG: &str = "--agent";
pub const DEFAULT_START_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub strategies: Vec<BackendKind>,
    pub class_path: Vec<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub no_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub execution: ExecutionConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub strategies: Vec<BackendKind>,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Agent executable; `None` relaunches the running binary.
    pub program: Option<String>,
    pub args: Vec<String>,
    /// How long the agent may take to answer the handshake.
    pub start_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub classpath: Vec<PathBuf>,
    pub startup: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig {
                strategies: vec![BackendKind::Remote, BackendKind::Local],
                remote: RemoteConfig {
                    program: None,
                    args: vec![REMOTE_AGENT_FLAG.to_string()],
                    start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
                },
            },
            session: SessionConfig {
                classpath: Vec::new(),
                startup: Vec::new(),
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    execution: Option<PartialExecutionConfig>,
    session: Option<PartialSessionConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialExecutionConfig {
    strategies: Option<Vec<BackendKind>>,
    remote: Option<PartialRemoteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRemoteConfig {
    program: Option<String>,
    args: Option<Vec<String>>,
    start_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSessionConfig {
    classpath: Option<Vec<PathBuf>>,
    startup: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, ShellError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig =
            toml::from_str(&file_contents).map_err(|e| ShellError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    absolutize_paths(&mut cfg, process_cwd);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(execution) = partial.execution {
        if let Some(strategies) = execution.strategies {
            cfg.execution.strategies = strategies;
        }
        if let Some(remote) = execution.remote {
            if let Some(program) = remote.program {
                cfg.execution.remote.program = Some(program);
            }
            if let Some(args) = remote.args {
                cfg.execution.remote.args = args;
            }
            if let Some(timeout) = remote.start_timeout_ms {
                cfg.execution.remote.start_timeout_ms = timeout;
            }
        }
    }

    if let Some(session) = partial.session {
        if let Some(classpath) = session.classpath {
            cfg.session.classpath = classpath;
        }
        if let Some(startup) = session.startup {
            cfg.session.startup = startup;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = Some(path);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if !overrides.strategies.is_empty() {
        cfg.execution.strategies = overrides.strategies.clone();
    }
    cfg.session
        .classpath
        .extend(overrides.class_path.iter().cloned());
    if let Some(path) = &overrides.log_path {
        cfg.logging.path = Some(path.clone());
    }
    if overrides.no_startup {
        cfg.session.startup.clear();
    }
}

fn absolutize_paths(cfg: &mut AppConfig, base: &Path) {
    for entry in &mut cfg.session.classpath {
        *entry = absolutize_path(base, entry);
    }
    if let Some(path) = &cfg.logging.path {
        cfg.logging.path = Some(absolutize_path(base, path));
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), ShellError> {
    if cfg.execution.strategies.is_empty() {
        return Err(ShellError::InvalidConfig(
            "execution.strategies must list at least one backend".to_string(),
        ));
    }

    let mut seen = BTreeSet::new();
    for kind in &cfg.execution.strategies {
        if !seen.insert(*kind) {
            return Err(ShellError::InvalidConfig(format!(
                "execution.strategies lists {} more than once",
                kind.as_str()
            )));
        }
    }

    if cfg.execution.strategies.contains(&BackendKind::Remote) {
        if let Some(program) = &cfg.execution.remote.program {
            if program.trim().is_empty() {
                return Err(ShellError::InvalidConfig(
                    "execution.remote.program must not be blank".to_string(),
                ));
            }
        }
    }

    if cfg.logging.max_payload_bytes == 0 {
        return Err(ShellError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    if cfg.logging.budget_bytes == 0 {
        return Err(ShellError::InvalidConfig(
            "logging.budget_bytes must be greater than zero".to_string(),
        ));
    }

    if cfg.execution.remote.start_timeout_ms == 0 {
        return Err(ShellError::InvalidConfig(
            "execution.remote.start_timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
