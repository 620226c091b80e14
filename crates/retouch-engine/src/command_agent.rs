use crate::agent::{Agent, AgentError};
use crate::config::schema::AgentConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// How much of the agent's stderr is kept in a failure report.
const FAILURE_TAIL_CHARS: usize = 2000;

/// Runs an external agent CLI once per instruction, inside the project directory.
///
/// The instruction is passed as the final argument. Conversation continuity is
/// left to the agent CLI itself (e.g. a "continue last session" flag in `args`).
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
}

impl CommandAgent {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(
        config: &AgentConfig,
        workdir: impl Into<PathBuf>,
    ) -> Result<Self, AgentError> {
        if config.program.trim().is_empty() {
            return Err(AgentError::NotConfigured("agent.program is empty".into()));
        }
        Ok(Self::new(config.program.clone(), workdir).with_args(config.args.clone()))
    }
}

#[async_trait]
impl Agent for CommandAgent {
    async fn submit(&mut self, instruction: &str) -> Result<(), AgentError> {
        info!(program = %self.program, workdir = %self.workdir.display(), "Launching agent command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(instruction)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AgentError::Process(format!("failed to run {}: {}", self.program, e)))?;

        if output.status.success() {
            debug!(
                stdout_bytes = output.stdout.len(),
                "Agent command exited successfully"
            );
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            tail(&String::from_utf8_lossy(&output.stdout), FAILURE_TAIL_CHARS)
        } else {
            tail(&stderr, FAILURE_TAIL_CHARS)
        };
        Err(AgentError::TaskFailed {
            code: output.status.code(),
            detail,
        })
    }

    fn name(&self) -> &str {
        &self.program
    }
}

fn tail(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    let count = s.chars().count();
    if count <= max_chars {
        return s.to_string();
    }
    s.chars().skip(count - max_chars).collect()
}
