//! Bridge coordinator: selection message in, agent outcome out.
//!
//! input → format → submit to the agent session → outcome
//!
//! This is the one place every browser request is logged, so it logs the
//! request identity, the selection summary, the instruction text and the
//! terminal outcome.

use crate::agent::AgentError;
use crate::session::AgentSession;
use retouch_common::formatter::format_instruction;
use retouch_common::protocol::{SelectionMessage, Stage};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A failed request, tagged with the request id and the stage that failed.
#[derive(Debug, Clone, Error)]
#[error("request {request_id}: agent failed: {source}")]
pub struct BridgeError {
    pub request_id: u64,
    #[source]
    pub source: AgentError,
}

impl BridgeError {
    pub fn stage(&self) -> Stage {
        Stage::Agent
    }

    pub fn code(&self) -> &'static str {
        self.source.code()
    }
}

pub struct Bridge {
    session: Arc<AgentSession>,
    timeout: Option<Duration>,
}

impl Bridge {
    pub fn new(session: Arc<AgentSession>) -> Self {
        Self {
            session,
            timeout: None,
        }
    }

    /// Bound each request, queueing included. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &Arc<AgentSession> {
        &self.session
    }

    /// Formats `msg` and blocks until the agent has applied it.
    ///
    /// Returns the instruction text that was handed to the agent.
    pub async fn handle_message(&self, msg: &SelectionMessage) -> Result<String, BridgeError> {
        let screenshot_bytes = match msg.screenshot_bytes() {
            Some(Ok(bytes)) => bytes.len(),
            Some(Err(e)) => {
                warn!(request_id = msg.id, error = %e, "Ignoring undecodable screenshot");
                0
            }
            None => 0,
        };
        info!(
            request_id = msg.id,
            elements = msg.elements.len(),
            area = %format!("{:.0}x{:.0}", msg.area.width, msg.area.height),
            screenshot_bytes,
            instruction = %msg.instruction,
            "Handling selection message"
        );

        let formatted = format_instruction(msg);
        debug!(request_id = msg.id, formatted = %formatted, "Formatted instruction");

        if self.session.is_busy() {
            info!(request_id = msg.id, "Agent busy, queueing request");
        }

        let result = match self.timeout {
            Some(timeout) => self.session.submit_timeout(&formatted, timeout).await,
            None => self.session.submit(&formatted).await,
        };

        match result {
            Ok(()) => {
                info!(request_id = msg.id, "Request complete");
                Ok(formatted)
            }
            Err(source) => {
                error!(request_id = msg.id, code = source.code(), error = %source, "Request failed");
                Err(BridgeError {
                    request_id: msg.id,
                    source,
                })
            }
        }
    }
}
