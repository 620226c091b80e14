use super::schema::RetouchConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./retouch.yaml
    /// 2. ~/.retouch/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<RetouchConfig, ConfigError> {
        let local_config = PathBuf::from("./retouch.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".retouch").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        debug!("No config file found, using defaults");
        Ok(RetouchConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<RetouchConfig, ConfigError> {
        debug!(path = %path.display(), "Loading config");
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// An explicit path wins; otherwise fall back to the default search.
    pub async fn load(path: Option<&Path>) -> Result<RetouchConfig, ConfigError> {
        match path {
            Some(path) => Self::load_from(path).await,
            None => Self::load_default().await,
        }
    }
}
