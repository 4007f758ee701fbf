use thiserror::Error;

/// Error taxonomy for the wallet daemon, mirroring the kinds the façade
/// maps to `{error, code}` pairs for callers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Reservation error: {0}")]
    Reservation(String),

    #[error("Broadcast error: {0}")]
    Broadcast(String),

    #[error("BEEF invalid: {0}")]
    BeefInvalid(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Stable short code surfaced to RPC callers alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ERR_VALIDATION",
            AppError::NotFound(_) => "ERR_NOT_FOUND",
            AppError::Reservation(_) => "ERR_RESERVATION",
            AppError::Broadcast(_) => "ERR_BROADCAST",
            AppError::BeefInvalid(_) => "ERR_BEEF_INVALID",
            AppError::Storage(_) => "ERR_STORAGE",
            AppError::Permission(_) => "ERR_PERMISSION",
            AppError::Internal(_) => "ERR_INTERNAL",
            AppError::Config(_) => "ERR_CONFIG",
            AppError::Io(_) => "ERR_IO",
            AppError::Json(_) => "ERR_JSON",
            AppError::TaskJoin(_) => "ERR_INTERNAL",
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open {name} database: {source}")]
    DatabaseOpen {
        name: String,
        #[source]
        source: sled::Error,
    },

    #[error("Database operation failed: {0}")]
    DatabaseOp(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::DatabaseOp(e.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
