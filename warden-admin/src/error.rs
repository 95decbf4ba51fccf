//! Error types for the admin surface

use hyper::StatusCode;
use thiserror::Error;
use warden_proxy::{StoreError, WardenError};

pub type Result<T> = std::result::Result<T, AdminError>;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Warden(#[from] WardenError),
}

impl AdminError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdminError::BadRequest(_) | AdminError::Json(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Warden(WardenError::Cidr(_) | WardenError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            AdminError::Store(_) | AdminError::Warden(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
