use crate::errors::ShellError;
use crate::image::{ClassImage, ExecutionException};
use crate::types::ClassStatus;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AgentRequest {
    Hello,
    AddToClasspath { path: String },
    Load { classes: Vec<ClassImage> },
    Redefine { classes: Vec<ClassImage> },
    Invoke { class_name: String, method: String },
    ClassStatus { class_name: String },
    VarValue { class_name: String, field: String },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AgentResponse {
    Ready { version: u32 },
    Done { ok: bool },
    Value { value: String },
    Status { status: ClassStatus },
    Exception { exception: ExecutionException },
    Failed { message: String },
}

impl AgentRequest {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::AddToClasspath { .. } => "add_to_classpath",
            Self::Load { .. } => "load",
            Self::Redefine { .. } => "redefine",
            Self::Invoke { .. } => "invoke",
            Self::ClassStatus { .. } => "class_status",
            Self::VarValue { .. } => "var_value",
            Self::Stop => "stop",
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, ShellError> {
    serde_json::to_string(message)
        .map_err(|e| ShellError::Protocol(format!("encode failed: {e}")))
}

pub fn decode_request(line: &str) -> Result<AgentRequest, ShellError> {
    serde_json::from_str(line).map_err(|err| invalid_line(line, &err))
}

pub fn decode_response(line: &str) -> Result<AgentResponse, ShellError> {
    serde_json::from_str(line).map_err(|err| invalid_line(line, &err))
}

fn invalid_line(line: &str, err: &serde_json::Error) -> ShellError {
    ShellError::Protocol(format!(
        "invalid agent message: {err}; input={}",
        line.chars().take(256).collect::<String>(),
    ))
}
