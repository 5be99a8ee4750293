//! The remote side of the remote backend.
//!
//! `evalshell --agent` serves one [`LocalBackend`] over stdin/stdout using the
//! JSON-lines protocol in [`crate::protocol`]. [`LoopbackChannel`] runs the
//! same request handling in process.

use crate::backend::local::LocalBackend;
use crate::backend::ExecutionBackend;
use crate::errors::ShellError;
use crate::protocol::{decode_request, encode, AgentRequest, AgentResponse, PROTOCOL_VERSION};
use crate::runtime::{Channel, FileSystem, ProcessLauncher, ProcessRequest};
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Arc;

/// Answers requests until `stop` or end of input.
pub fn serve<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
    file_system: Arc<dyn FileSystem>,
) -> Result<(), ShellError> {
    let mut backend = LocalBackend::new(file_system);
    for line in reader.lines() {
        let line = line.map_err(|e| ShellError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let (response, stop) = match decode_request(&line) {
            Ok(request) => {
                let stop = request == AgentRequest::Stop;
                (handle_request(&mut backend, request), stop)
            }
            Err(err) => (
                AgentResponse::Failed {
                    message: err.to_string(),
                },
                false,
            ),
        };
        writeln!(writer, "{}", encode(&response)?).map_err(|e| ShellError::Io(e.to_string()))?;
        writer.flush().map_err(|e| ShellError::Io(e.to_string()))?;
        if stop {
            break;
        }
    }
    backend.stop()
}

pub fn handle_request(backend: &mut LocalBackend, request: AgentRequest) -> AgentResponse {
    let result = match request {
        AgentRequest::Hello => backend.start().map(|()| AgentResponse::Ready {
            version: PROTOCOL_VERSION,
        }),
        AgentRequest::AddToClasspath { path } => backend
            .add_to_classpath(&path)
            .map(|ok| AgentResponse::Done { ok }),
        AgentRequest::Load { classes } => backend.load(&classes).map(|ok| AgentResponse::Done { ok }),
        AgentRequest::Redefine { classes } => backend
            .redefine(&classes)
            .map(|ok| AgentResponse::Done { ok }),
        AgentRequest::Invoke { class_name, method } => backend
            .invoke(&class_name, &method)
            .map(|value| AgentResponse::Value { value }),
        AgentRequest::ClassStatus { class_name } => backend
            .class_status(&class_name)
            .map(|status| AgentResponse::Status { status }),
        AgentRequest::VarValue { class_name, field } => backend
            .var_value(&class_name, &field)
            .map(|value| AgentResponse::Value { value }),
        AgentRequest::Stop => backend.stop().map(|()| AgentResponse::Done { ok: true }),
    };
    match result {
        Ok(response) => response,
        Err(ShellError::Execution(exception)) => AgentResponse::Exception { exception },
        Err(err) => AgentResponse::Failed {
            message: err.to_string(),
        },
    }
}

/// In-process channel to an agent; replies are queued as requests arrive.
pub struct LoopbackChannel {
    backend: LocalBackend,
    pending: VecDeque<String>,
    closed: bool,
}

impl LoopbackChannel {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self {
            backend: LocalBackend::new(file_system),
            pending: VecDeque::new(),
            closed: false,
        }
    }
}

impl Channel for LoopbackChannel {
    fn send_line(&mut self, line: &str) -> Result<(), ShellError> {
        if self.closed {
            return Err(ShellError::Process("loopback agent has exited".to_string()));
        }
        let response = match decode_request(line) {
            Ok(request) => handle_request(&mut self.backend, request),
            Err(err) => AgentResponse::Failed {
                message: err.to_string(),
            },
        };
        self.pending.push_back(encode(&response)?);
        Ok(())
    }

    fn recv_line(&mut self) -> Result<Option<String>, ShellError> {
        Ok(self.pending.pop_front())
    }

    fn terminate(&mut self) -> Result<(), ShellError> {
        self.closed = true;
        self.pending.clear();
        self.backend.stop()
    }
}

/// Launcher whose "processes" are loopback agents.
pub struct LoopbackLauncher {
    file_system: Arc<dyn FileSystem>,
}

impl LoopbackLauncher {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self { file_system }
    }
}

impl ProcessLauncher for LoopbackLauncher {
    fn launch(&self, _request: ProcessRequest) -> Result<Box<dyn Channel>, ShellError> {
        Ok(Box::new(LoopbackChannel::new(self.file_system.clone())))
    }
}
