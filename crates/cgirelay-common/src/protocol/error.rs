use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Invalid form field: {0}")]
    InvalidFormField(String),

    #[error("Registry lock not acquired within {0}ms")]
    RegistryLocked(u64),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Failed to resolve port '{0}'")]
    Resolve(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<std::num::ParseIntError> for RelayError {
    fn from(err: std::num::ParseIntError) -> Self {
        RelayError::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
