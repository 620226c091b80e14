//! Exclusive handle to the agent conversation.
//!
//! `submit` queues: callers wait on a fair async mutex and run strictly in the
//! order they arrived. `try_submit` is the fail-fast variant for callers that
//! prefer to retry themselves. Neither ever lets two instructions reach the
//! agent at the same time.

use crate::agent::{Agent, AgentError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub struct AgentSession {
    agent: Mutex<Box<dyn Agent>>,
    busy: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Clears the busy flag even if the submitting future is dropped mid-flight.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AgentSession {
    pub fn new(agent: impl Agent + 'static) -> Self {
        Self::from_boxed(Box::new(agent))
    }

    pub fn from_boxed(agent: Box<dyn Agent>) -> Self {
        Self {
            agent: Mutex::new(agent),
            busy: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Waits for the session, then blocks until the agent is done with `text`.
    pub async fn submit(&self, text: &str) -> Result<(), AgentError> {
        let agent = self.agent.lock().await;
        self.run(agent, text).await
    }

    /// Like [`submit`](Self::submit) but rejects with `AgentError::Busy`
    /// instead of queueing behind an in-flight instruction.
    pub async fn try_submit(&self, text: &str) -> Result<(), AgentError> {
        let agent = self.agent.try_lock().map_err(|_| AgentError::Busy)?;
        self.run(agent, text).await
    }

    /// [`submit`](Self::submit) with a deadline covering both queueing and
    /// execution. On expiry the in-flight call is dropped, which releases the
    /// session for the next caller.
    pub async fn submit_timeout(&self, text: &str, timeout: Duration) -> Result<(), AgentError> {
        match tokio::time::timeout(timeout, self.submit(text)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Agent submission timed out");
                Err(AgentError::Timeout {
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// (completed, failed) submissions so far.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.completed.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
        )
    }

    async fn run(
        &self,
        mut agent: MutexGuard<'_, Box<dyn Agent>>,
        text: &str,
    ) -> Result<(), AgentError> {
        self.busy.store(true, Ordering::SeqCst);
        let _guard = BusyGuard(&self.busy);

        debug!(agent = agent.name(), chars = text.chars().count(), "Submitting instruction");
        let result = agent.submit(text).await;

        match &result {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                info!(agent = agent.name(), "Agent finished instruction");
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(agent = agent.name(), error = %e, "Agent reported failure");
            }
        }
        result
    }
}
