use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reference store error: {message}")]
    Store { message: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },
}

impl PipelineError {
    pub fn store(message: impl Into<String>) -> Self {
        PipelineError::Store {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
