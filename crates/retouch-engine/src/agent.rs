use async_trait::async_trait;
pub use retouch_common::error::AgentError;

/// The external coding agent, as seen by the bridge.
///
/// Starting and stopping whatever process sits behind an implementation is the
/// implementation's business. The bridge only ever calls `submit`, and only
/// through an [`AgentSession`](crate::session::AgentSession), which guarantees
/// that two instructions never overlap.
#[async_trait]
pub trait Agent: Send {
    /// Hand one instruction to the agent.
    ///
    /// Must not return until the agent has finished applying it (Ok) or
    /// reported a failure.
    async fn submit(&mut self, instruction: &str) -> Result<(), AgentError>;

    /// Short label used in logs.
    fn name(&self) -> &str {
        "agent"
    }
}
