use crate::backend::ExecutionBackend;
use crate::errors::ShellError;
use crate::image::ClassImage;
use crate::protocol::{decode_response, encode, AgentRequest, AgentResponse, PROTOCOL_VERSION};
use crate::runtime::{Channel, ProcessLauncher, ProcessRequest};
use crate::types::ClassStatus;
use std::sync::Arc;
use std::time::Duration;

pub const REMOTE_BACKEND_NAME: &str = "remote";
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs snippets in a separate agent process reached over a line channel.
pub struct RemoteBackend {
    launcher: Arc<dyn ProcessLauncher>,
    request: ProcessRequest,
    start_timeout: Duration,
    channel: Option<Box<dyn Channel>>,
}

impl RemoteBackend {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, request: ProcessRequest) -> Self {
        Self {
            launcher,
            request,
            start_timeout: DEFAULT_START_TIMEOUT,
            channel: None,
        }
    }

    /// Bounds the wait for the agent's `ready` reply.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    fn handshake(channel: &mut dyn Channel, timeout: Duration) -> Result<(), ShellError> {
        channel.send_line(&encode(&AgentRequest::Hello)?)?;
        let Some(line) = channel.recv_line_within(timeout)? else {
            return Err(ShellError::Protocol(
                "agent exited before the handshake".to_string(),
            ));
        };
        match decode_response(&line)? {
            AgentResponse::Ready { version } if version == PROTOCOL_VERSION => Ok(()),
            AgentResponse::Ready { version } => Err(ShellError::Protocol(format!(
                "agent speaks protocol {version}, expected {PROTOCOL_VERSION}"
            ))),
            other => Err(ShellError::Protocol(format!(
                "expected ready, got {other:?}"
            ))),
        }
    }

    fn round_trip(&mut self, request: &AgentRequest) -> Result<AgentResponse, ShellError> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(ShellError::Backend(
                "remote backend is not running".to_string(),
            ));
        };
        let line = encode(request)?;
        channel
            .send_line(&line)
            .map_err(|e| ShellError::Backend(format!("{} failed: {e}", request.op())))?;
        let reply = channel
            .recv_line()
            .map_err(|e| ShellError::Backend(format!("{} failed: {e}", request.op())))?;
        let Some(reply) = reply else {
            if let Some(mut lost) = self.channel.take() {
                let _ = lost.terminate();
            }
            return Err(ShellError::Backend(
                "remote agent closed the connection".to_string(),
            ));
        };
        match decode_response(&reply)? {
            AgentResponse::Failed { message } => Err(ShellError::Backend(message)),
            AgentResponse::Exception { exception } => Err(ShellError::Execution(exception)),
            response => Ok(response),
        }
    }

    fn expect_done(&mut self, request: AgentRequest) -> Result<bool, ShellError> {
        match self.round_trip(&request)? {
            AgentResponse::Done { ok } => Ok(ok),
            other => Err(unexpected(&request, &other)),
        }
    }

    fn expect_value(&mut self, request: AgentRequest) -> Result<String, ShellError> {
        match self.round_trip(&request)? {
            AgentResponse::Value { value } => Ok(value),
            other => Err(unexpected(&request, &other)),
        }
    }
}

impl ExecutionBackend for RemoteBackend {
    fn name(&self) -> &str {
        REMOTE_BACKEND_NAME
    }

    fn start(&mut self) -> Result<(), ShellError> {
        if self.channel.is_some() {
            return Ok(());
        }
        let mut channel = self
            .launcher
            .launch(self.request.clone())
            .map_err(|e| ShellError::BackendStart(e.to_string()))?;
        if let Err(err) = Self::handshake(&mut *channel, self.start_timeout) {
            let _ = channel.terminate();
            return Err(ShellError::BackendStart(err.to_string()));
        }
        self.channel = Some(channel);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ShellError> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };
        let farewell = encode(&AgentRequest::Stop).and_then(|line| channel.send_line(&line));
        if farewell.is_ok() {
            let _ = channel.recv_line();
        }
        let terminated = channel.terminate();
        farewell
            .and(terminated)
            .map_err(|e| ShellError::Backend(format!("stop failed: {e}")))
    }

    fn add_to_classpath(&mut self, path: &str) -> Result<bool, ShellError> {
        self.expect_done(AgentRequest::AddToClasspath {
            path: path.to_string(),
        })
    }

    fn load(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError> {
        self.expect_done(AgentRequest::Load {
            classes: classes.to_vec(),
        })
    }

    fn redefine(&mut self, classes: &[ClassImage]) -> Result<bool, ShellError> {
        self.expect_done(AgentRequest::Redefine {
            classes: classes.to_vec(),
        })
    }

    fn invoke(&mut self, class_name: &str, method: &str) -> Result<String, ShellError> {
        self.expect_value(AgentRequest::Invoke {
            class_name: class_name.to_string(),
            method: method.to_string(),
        })
    }

    fn class_status(&mut self, class_name: &str) -> Result<ClassStatus, ShellError> {
        let request = AgentRequest::ClassStatus {
            class_name: class_name.to_string(),
        };
        match self.round_trip(&request)? {
            AgentResponse::Status { status } => Ok(status),
            other => Err(unexpected(&request, &other)),
        }
    }

    fn var_value(&mut self, class_name: &str, field: &str) -> Result<String, ShellError> {
        self.expect_value(AgentRequest::VarValue {
            class_name: class_name.to_string(),
            field: field.to_string(),
        })
    }
}

fn unexpected(request: &AgentRequest, response: &AgentResponse) -> ShellError {
    ShellError::Protocol(format!(
        "unexpected response to {}: {response:?}",
        request.op()
    ))
}
