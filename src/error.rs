use thiserror::Error;

pub type BlastResult<T> = Result<T, BlastError>;

#[derive(Error, Debug)]
pub enum BlastError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Package '{0}' is not installed and not known to the package index")]
    PackageNotFound(String),

    #[error("Invalid package name: {0}")]
    InvalidPackageName(String),

    /// A package or service query could not be completed.
    #[error("Query failed ({command}): {reason}")]
    QueryFailure { command: String, reason: String },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Only ever raised inside the cache layer; callers see a cache miss.
    #[error("Graph cache is corrupt: {0}")]
    CacheCorruption(String),

    #[error("Could not acquire cache lock: {0}")]
    LockTimeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for BlastError {
    fn from(err: tokio::task::JoinError) -> Self {
        BlastError::TaskFailed(format!("Task join error: {}", err))
    }
}

impl From<tempfile::PersistError> for BlastError {
    fn from(err: tempfile::PersistError) -> Self {
        BlastError::Io(err.error)
    }
}

impl BlastError {
    pub fn query(command: impl Into<String>, reason: impl Into<String>) -> Self {
        BlastError::QueryFailure {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn is_query_failure(&self) -> bool {
        matches!(self, BlastError::QueryFailure { .. } | BlastError::Timeout(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BlastError::LockTimeout(_) | BlastError::Timeout(_))
    }

    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            BlastError::InvalidPackageName(_) | BlastError::PackageNotFound(_)
        )
    }

    /// Process exit code for the CLI; stable per error class so callers never
    /// have to parse the message.
    pub fn exit_code(&self) -> i32 {
        match self {
            BlastError::InvalidPackageName(_) => 2,
            BlastError::PackageNotFound(_) => 3,
            BlastError::QueryFailure { .. } | BlastError::Timeout(_) => 4,
            BlastError::LockTimeout(_) => 5,
            BlastError::ConfigError(_) | BlastError::Toml(_) => 6,
            _ => 1,
        }
    }
}
