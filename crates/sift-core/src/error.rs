use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiftError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("field '{0}' is not indexed")]
    FieldNotIndexed(String),
    #[error("record has no primary key at '{0}'")]
    MissingPrimaryKey(String),
    #[error("not found")]
    NotFound,
    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, SiftError>;
