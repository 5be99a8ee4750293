//! Execution backends: the components that actually run compiled snippets.
//!
//! Every strategy implements [`ExecutionBackend`]. A backend is constructed
//! idle, becomes usable after a successful [`ExecutionBackend::start`], and is
//! released with [`ExecutionBackend::stop`]. [`failover::FailOverBackend`]
//! picks the first candidate that starts and then forwards everything to it.

use crate::errors::ShellError;
use crate::image::ClassImage;
use crate::runtime::FakeFileSystem;
use crate::types::ClassStatus;
use local::LocalBackend;
use std::sync::{Arc, Mutex};

pub mod factory;
pub mod failover;
pub mod local;
pub mod remote;

pub trait ExecutionBackend: Send {
    fn name(&self) -> &str;

    /// Fails with [`ShellError::BackendStart`]; a failed start leaves nothing
    /// running.
    fn start(&mut self) -> Result<(), ShellError>;

    /// Safe to call after a failed start.
    fn stop(&mut self) -> Result<(), ShellError>;

    /// `Ok(false)` when the backend declines the entry; a missing path is not
    /// an error.
    fn add_to_classpath(&mut self, path: &str) -> Result<bool, ShellError>;

    /// Makes compiled classes available for execution. `Ok(false)` when any
    /// of them could not be loaded.
    fn load(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError>;

    /// Replaces the bodies of already loaded classes in place, keeping their
    /// static state.
    fn redefine(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError>;

    /// Runs a zero-argument method and renders its result. A failure of the
    /// code itself comes back as [`ShellError::Execution`].
    fn invoke(&mut self, class_name: &str, method: &str) -> Result<String, ShellError>;

    /// Never fails for an unknown name; reports [`ClassStatus::NotFound`].
    fn class_status(&mut self, class_name: &str) -> Result<ClassStatus, ShellError>;

    fn var_value(&mut self, class_name: &str, field: &str) -> Result<String, ShellError>;
}

pub trait BackendFactory: Send + Sync {
    fn name(&self) -> &str;
    fn create(&self) -> Box<dyn ExecutionBackend>;
}

/// Factory backed by a closure.
pub struct FnFactory<F> {
    name: String,
    make: F,
}

impl<F> FnFactory<F>
where
    F: Fn() -> Box<dyn ExecutionBackend> + Send + Sync,
{
    pub fn new(name: impl Into<String>, make: F) -> Self {
        Self {
            name: name.into(),
            make,
        }
    }
}

impl<F> BackendFactory for FnFactory<F>
where
    F: Fn() -> Box<dyn ExecutionBackend> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Box<dyn ExecutionBackend> {
        (self.make)()
    }
}

/// Backend whose start always fails, for strategies that cannot run on this
/// host and for exercising fail-over.
pub struct UnavailableBackend {
    name: String,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    fn unavailable(&self) -> ShellError {
        ShellError::Backend(format!("{} is unavailable: {}", self.name, self.reason))
    }
}

impl ExecutionBackend for UnavailableBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), ShellError> {
        Err(ShellError::BackendStart(self.reason.clone()))
    }

    fn stop(&mut self) -> Result<(), ShellError> {
        Ok(())
    }

    fn add_to_classpath(&mut self, _path: &str) -> Result<bool, ShellError> {
        Err(self.unavailable())
    }

    fn load(&mut self, _classes: &[ClassImage]) -> Result<bool, ShellError> {
        Err(self.unavailable())
    }

    fn redefine(&mut self, _classes: &[ClassImage]) -> Result<bool, ShellError> {
        Err(self.unavailable())
    }

    fn invoke(&mut self, _class_name: &str, _method: &str) -> Result<String, ShellError> {
        Err(self.unavailable())
    }

    fn class_status(&mut self, _class_name: &str) -> Result<ClassStatus, ShellError> {
        Err(self.unavailable())
    }

    fn var_value(&mut self, _class_name: &str, _field: &str) -> Result<String, ShellError> {
        Err(self.unavailable())
    }
}

/// Test double that records every call and delegates to a [`local::LocalBackend`].
/// Clones share state, so a test can keep one and hand another to a factory.
///
/// Public alongside the fakes in [`crate::runtime`] so integration tests can
/// drive sessions without a real agent. A poisoned lock panics, which is only
/// reachable after another test thread already panicked.
#[derive(Clone)]
pub struct FakeBackend {
    name: String,
    start_error: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
    crashed: Arc<Mutex<Option<String>>>,
    inner: Arc<Mutex<LocalBackend>>,
}

impl FakeBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_error: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            crashed: Arc::new(Mutex::new(None)),
            inner: Arc::new(Mutex::new(LocalBackend::new(Arc::new(
                FakeFileSystem::default(),
            )))),
        }
    }

    pub fn failing(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            start_error: Some(reason.into()),
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|seen| seen.as_str() == call).count()
    }

    /// Every later operation except `start` and `stop` fails with
    /// [`ShellError::Backend`], as a backend that died mid-session would.
    pub fn crash(&self, reason: impl Into<String>) {
        *self.crashed.lock().expect("crash lock") = Some(reason.into());
    }

    fn note(&self, call: String) -> Result<(), ShellError> {
        self.calls.lock().expect("calls lock").push(call);
        match self.crashed.lock().expect("crash lock").as_ref() {
            Some(reason) => Err(ShellError::Backend(reason.clone())),
            None => Ok(()),
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, LocalBackend> {
        self.inner.lock().expect("backend lock")
    }
}

impl ExecutionBackend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), ShellError> {
        let _ = self.note("start".to_string());
        if let Some(reason) = &self.start_error {
            return Err(ShellError::BackendStart(reason.clone()));
        }
        self.inner().start()
    }

    fn stop(&mut self) -> Result<(), ShellError> {
        let _ = self.note("stop".to_string());
        self.inner().stop()
    }

    fn add_to_classpath(&mut self, path: &str) -> Result<bool, ShellError> {
        self.note(format!("add_to_classpath {path}"))?;
        self.inner().add_to_classpath(path)
    }

    fn load(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError> {
        self.note("load".to_string())?;
        self.inner().load(classes)
    }

    fn redefine(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError> {
        self.note("redefine".to_string())?;
        self.inner().redefine(classes)
    }

    fn invoke(&mut self, class_name: &str, method: &str) -> Result<String, ShellError> {
        self.note(format!("invoke {class_name}.{method}"))?;
        self.inner().invoke(class_name, method)
    }

    fn class_status(&mut self, class_name: &str) -> Result<ClassStatus, ShellError> {
        self.note(format!("class_status {class_name}"))?;
        self.inner().class_status(class_name)
    }

    fn var_value(&mut self, class_name: &str, field: &str) -> Result<String, ShellError> {
        self.note(format!("var_value {class_name}.{field}"))?;
        self.inner().var_value(class_name, field)
    }
}
