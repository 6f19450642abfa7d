//! Error types shared across the gadgeteer core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("parent node not found: {0}")]
    ParentNotFound(String),

    #[error("node already completed: {0}")]
    NodeAlreadyCompleted(String),

    #[error("stored output not found: {0}")]
    OutputNotFound(String),

    #[error("stored media not found: {0}")]
    MediaNotFound(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
