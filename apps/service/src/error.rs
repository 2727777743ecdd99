use thiserror::Error;

use crate::database::models::TargetId;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Target {0} not found")]
    NotFound(TargetId),
    #[error("{0}")]
    Invalid(String),
    #[error("{0:#}")]
    Store(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
