use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

/// Transport-facing error taxonomy. Domain errors are raised close to
/// detection and cross the handler boundary unchanged; this is the single
/// place where they turn into user-facing responses.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("chat id is required, e.g. ?chat=-1001399056118")]
    NotEnoughArguments,
    #[error("identifiers must be numeric, e.g. ?chat=-1001399056118")]
    MalformedIdentifier,
    #[error("not found")]
    NotFound,
    #[error("report is already resolved")]
    AlreadyResolved,
    #[error("batch write failed, no changes were applied")]
    Transaction,
    #[error("internal error")]
    Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::AlreadyResolved => ApiError::AlreadyResolved,
            RepoError::Transaction(_) => ApiError::Transaction,
            // NoNeighbours is control flow inside the services; if it reaches
            // the boundary a handler forgot to absorb it.
            RepoError::NoNeighbours | RepoError::Internal(_) => ApiError::Internal,
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotEnoughArguments | ApiError::MalformedIdentifier => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyResolved => StatusCode::CONFLICT,
            ApiError::Transaction | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody {
            error: self.to_string(),
        })
    }
}
