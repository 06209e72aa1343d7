use thiserror::Error;

use crate::backend::error_chain_text;

/// Failures that abort a whole agent run. Tool failures never show up here;
/// tools turn them into status text the agent can read.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("an agent run is already in progress")]
    Busy,

    #[error("failed to start agent worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{0}")]
    Runtime(String),

    #[error("malformed tool call: {0}")]
    MalformedToolCall(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("agent stopped after {0} steps without a final answer")]
    StepLimit(usize),

    #[error("agent worker panicked: {0}")]
    Panicked(String),
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Runtime(error_chain_text(&err, 512))
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
