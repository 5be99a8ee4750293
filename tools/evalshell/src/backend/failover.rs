//! Fail-over coordination over an ordered list of backend candidates.
//!
//! The search happens once, lazily, on the first operation. Candidates are
//! tried in list order and the first one whose `start` succeeds is kept for
//! the lifetime of the coordinator. A backend that fails later is reported to
//! the caller as is; no other candidate is tried, because the classes and
//! static values it held cannot be replayed onto a fresh backend.

use crate::backend::{BackendFactory, ExecutionBackend};
use crate::errors::{ShellError, StartFailure};
use crate::image::ClassImage;
use crate::logging::{record, JsonlLogger, Level};
use crate::types::ClassStatus;
use serde_json::json;
use std::cell::OnceCell;
use std::sync::Arc;

pub const FAILOVER_NAME: &str = "failover";

type Outcome = Result<Box<dyn ExecutionBackend>, Vec<StartFailure>>;

pub struct FailOverBackend {
    candidates: Vec<Arc<dyn BackendFactory>>,
    outcome: OnceCell<Outcome>,
    logger: Option<JsonlLogger>,
}

impl FailOverBackend {
    pub fn new(candidates: Vec<Arc<dyn BackendFactory>>) -> Self {
        Self {
            candidates,
            outcome: OnceCell::new(),
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Option<JsonlLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Name of the locked-in backend, if the search has found one.
    pub fn chosen_name(&self) -> Option<&str> {
        match self.outcome.get() {
            Some(Ok(backend)) => Some(backend.name()),
            _ => None,
        }
    }

    /// Per-candidate causes, once the search has run out of candidates.
    pub fn failures(&self) -> Option<&[StartFailure]> {
        match self.outcome.get() {
            Some(Err(failures)) => Some(failures),
            _ => None,
        }
    }

    fn search(&self) -> Outcome {
        let mut failures = Vec::new();
        for factory in &self.candidates {
            let mut backend = factory.create();
            match backend.start() {
                Ok(()) => {
                    record(
                        self.logger.as_ref(),
                        Level::Info,
                        "backend_selected",
                        json!({
                            "backend": factory.name(),
                            "attempt": failures.len() + 1,
                        }),
                    );
                    return Ok(backend);
                }
                Err(err) => {
                    let cause = match err {
                        ShellError::BackendStart(cause) => cause,
                        other => other.to_string(),
                    };
                    record(
                        self.logger.as_ref(),
                        Level::Warn,
                        "backend_start_failed",
                        json!({"backend": factory.name(), "cause": cause}),
                    );
                    failures.push(StartFailure {
                        backend: factory.name().to_string(),
                        cause,
                    });
                }
            }
        }
        record(
            self.logger.as_ref(),
            Level::Error,
            "backends_exhausted",
            json!({"failures": failures}),
        );
        Err(failures)
    }

    fn resolve(&mut self) -> Result<&mut Box<dyn ExecutionBackend>, ShellError> {
        if self.outcome.get().is_none() {
            let outcome = self.search();
            let _ = self.outcome.set(outcome);
        }
        match self.outcome.get_mut() {
            Some(Ok(backend)) => Ok(backend),
            Some(Err(failures)) => Err(ShellError::AllBackendsFailed(failures.clone())),
            None => Err(ShellError::AllBackendsFailed(Vec::new())),
        }
    }
}

impl ExecutionBackend for FailOverBackend {
    fn name(&self) -> &str {
        self.chosen_name().unwrap_or(FAILOVER_NAME)
    }

    fn start(&mut self) -> Result<(), ShellError> {
        self.resolve().map(|_| ())
    }

    /// Stops the chosen backend. Without one there is nothing to release.
    fn stop(&mut self) -> Result<(), ShellError> {
        match self.outcome.get_mut() {
            Some(Ok(backend)) => {
                let result = backend.stop();
                if let Err(err) = &result {
                    record(
                        self.logger.as_ref(),
                        Level::Warn,
                        "backend_stop_failed",
                        json!({"error": err.to_string()}),
                    );
                }
                result
            }
            _ => Ok(()),
        }
    }

    fn add_to_classpath(&mut self, path: &str) -> Result<bool, ShellError> {
        self.resolve()?.add_to_classpath(path)
    }

    fn load(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError> {
        self.resolve()?.load(classes)
    }

    fn redefine(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError> {
        self.resolve()?.redefine(classes)
    }

    fn invoke(&mut self, class_name: &str, method: &str) -> Result<String, ShellError> {
        self.resolve()?.invoke(class_name, method)
    }

    fn class_status(&mut self, class_name: &str) -> Result<ClassStatus, ShellError> {
        self.resolve()?.class_status(class_name)
    }

    fn var_value(&mut self, class_name: &str, field: &str) -> Result<String, ShellError> {
        self.resolve()?.var_value(class_name, field)
    }
}
