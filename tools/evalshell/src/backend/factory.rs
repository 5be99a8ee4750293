use crate::backend::local::{LocalBackend, LOCAL_BACKEND_NAME};
use crate::backend::remote::{RemoteBackend, REMOTE_BACKEND_NAME};
use crate::backend::{BackendFactory, ExecutionBackend};
use crate::config::RemoteConfig;
use crate::errors::ShellError;
use crate::runtime::{FileSystem, ProcessLauncher, ProcessRequest};
use crate::types::BackendKind;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct LocalFactory {
    file_system: Arc<dyn FileSystem>,
}

impl LocalFactory {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self { file_system }
    }
}

impl BackendFactory for LocalFactory {
    fn name(&self) -> &str {
        LOCAL_BACKEND_NAME
    }

    fn create(&self) -> Box<dyn ExecutionBackend> {
        Box::new(LocalBackend::new(self.file_system.clone()))
    }
}

pub struct RemoteFactory {
    launcher: Arc<dyn ProcessLauncher>,
    request: ProcessRequest,
    start_timeout: Duration,
}

impl RemoteFactory {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        request: ProcessRequest,
        start_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            request,
            start_timeout,
        }
    }
}

impl BackendFactory for RemoteFactory {
    fn name(&self) -> &str {
        REMOTE_BACKEND_NAME
    }

    fn create(&self) -> Box<dyn ExecutionBackend> {
        Box::new(
            RemoteBackend::new(self.launcher.clone(), self.request.clone())
                .with_start_timeout(self.start_timeout),
        )
    }
}

/// Launch request for the agent; an unset program relaunches `fallback_program`.
pub fn remote_request(config: &RemoteConfig, fallback_program: &str, cwd: &Path) -> ProcessRequest {
    ProcessRequest {
        program: config
            .program
            .clone()
            .unwrap_or_else(|| fallback_program.to_string()),
        args: config.args.clone(),
        cwd: Some(cwd.to_path_buf()),
    }
}

#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<BackendKind, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    pub fn with_defaults(
        remote: ProcessRequest,
        start_timeout: Duration,
        launcher: Arc<dyn ProcessLauncher>,
        file_system: Arc<dyn FileSystem>,
    ) -> Self {
        let mut this = Self::default();
        this.register(
            BackendKind::Remote,
            Arc::new(RemoteFactory::new(launcher, remote, start_timeout)),
        );
        this.register(BackendKind::Local, Arc::new(LocalFactory::new(file_system)));
        this
    }

    pub fn register(&mut self, kind: BackendKind, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(kind, factory);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn BackendFactory>> {
        self.factories.get(&kind).cloned()
    }

    /// Factories for `kinds`, in the given order.
    pub fn candidates(
        &self,
        kinds: &[BackendKind],
    ) -> Result<Vec<Arc<dyn BackendFactory>>, ShellError> {
        kinds
            .iter()
            .map(|kind| {
                self.get(*kind).ok_or_else(|| {
                    ShellError::InvalidConfig(format!(
                        "no backend registered for strategy {}",
                        kind.as_str()
                    ))
                })
            })
            .collect()
    }
}
