use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

pub type AuthResult<T> = Result<T, AuthStoreError>;

#[derive(Debug, ThisError)]
pub enum AuthStoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown key category: {0}")]
    UnknownCategory(String),

    #[error("Config error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for AuthStoreError {
    fn from(e: figment::Error) -> Self {
        AuthStoreError::Config(Box::new(e))
    }
}
