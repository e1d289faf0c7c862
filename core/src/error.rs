use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Statement error: {0}")]
    Statement(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient balance in account '{account_id}'")]
    InsufficientBalance { account_id: String },

    #[error("Invalid statement date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Cannot {action} record '{id}' in status '{status}'")]
    InvalidTransition {
        id: String,
        status: String,
        action: &'static str,
    },

    #[error("Record '{id}' is not accepted by policy '{policy}'")]
    ProcessingRejected { id: String, policy: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PayError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type PayResult<T> = Result<T, PayError>;
