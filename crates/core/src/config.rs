use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Process configuration, read entirely from the environment.
/// Every variable is required; startup fails fast on the first gap.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub dataset_path: PathBuf,
    pub artifact_path: PathBuf,
    pub templates_path: PathBuf,
    pub port: u16,
    pub admin_token: String,
    pub session_secret: String,
    pub max_job_runtime_secs: u64,
    /// Node names that always score zero in the dispatcher election.
    pub node_blacklist: Vec<String>,
    pub compiler_host: String,
    pub compiler_port: u16,
    pub db_path: PathBuf,
}

impl ManagerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            dataset_path: PathBuf::from(require("REEF_DATASETS_PATH")?),
            artifact_path: PathBuf::from(require("REEF_ARTIFACTS_PATH")?),
            templates_path: PathBuf::from(require("REEF_TEMPLATES_PATH")?),
            port: parse("REEF_MANAGER_PORT")?,
            admin_token: require("REEF_ADMIN_TOKEN")?,
            session_secret: require("REEF_SESSION_SECRET")?,
            max_job_runtime_secs: parse("REEF_JOB_MAX_RUNTIME_SECS")?,
            node_blacklist: parse_blacklist(&require("REEF_NODES_BLACKLIST")?)?,
            compiler_host: require("REEF_COMPILER_HOST")?,
            compiler_port: parse("REEF_COMPILER_PORT")?,
            db_path: PathBuf::from(require("REEF_DB_PATH")?),
        })
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::Missing(var))
}

fn parse<T>(var: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    require(var)?.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn parse_blacklist(raw: &str) -> Result<Vec<String>, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::Invalid {
        var: "REEF_NODES_BLACKLIST",
        reason: format!("expected a JSON array of strings: {e}"),
    })
}
