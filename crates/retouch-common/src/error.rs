//! Error taxonomy shared by the bridge crates.
//!
//! Codes returned by `code()` travel in outbound `error` envelopes so the page
//! script can render a message without parsing the human-readable text.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Transport closed")]
    Closed,

    #[error("Disconnected after {attempts} reconnect attempts")]
    Disconnected { attempts: u32 },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("No pending request with id {0}")]
    UnknownRequest(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::NotConnected => "NOT_CONNECTED",
            TransportError::ConnectionLost => "CONNECTION_LOST",
            TransportError::Closed => "TRANSPORT_CLOSED",
            TransportError::Disconnected { .. } => "DISCONNECTED",
            TransportError::Connect(_) => "CONNECT_FAILED",
            TransportError::MalformedEnvelope(_) => "MALFORMED_ENVELOPE",
            TransportError::UnknownRequest(_) => "UNKNOWN_REQUEST",
            TransportError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Agent session is busy with another instruction")]
    Busy,

    #[error("Agent process failure: {0}")]
    Process(String),

    #[error("Agent task failed (exit code {code:?}): {detail}")]
    TaskFailed { code: Option<i32>, detail: String },

    #[error("Agent did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("Agent is not configured: {0}")]
    NotConfigured(String),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Process(err.to_string())
    }
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Busy => "AGENT_BUSY",
            AgentError::Process(_) => "AGENT_PROCESS_ERROR",
            AgentError::TaskFailed { .. } => "AGENT_TASK_FAILED",
            AgentError::Timeout { .. } => "AGENT_TIMEOUT",
            AgentError::NotConfigured(_) => "AGENT_NOT_CONFIGURED",
        }
    }

    /// Whether resubmitting the same instruction later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Busy | AgentError::Timeout { .. })
    }
}
