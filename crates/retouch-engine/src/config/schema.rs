use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetouchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9001
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Per-request deadline. Unset means wait for the agent indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl AgentConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout_secs: None,
        }
    }
}

fn default_program() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    vec!["--continue".to_string(), "--print".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_timeline_branch")]
    pub timeline_branch: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            timeline_branch: default_timeline_branch(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            list_limit: default_list_limit(),
        }
    }
}

fn default_timeline_branch() -> String {
    "retouch-timeline".to_string()
}

fn default_author_name() -> String {
    "Retouch".to_string()
}

fn default_author_email() -> String {
    "checkpoints@retouch.dev".to_string()
}

fn default_list_limit() -> usize {
    50
}
