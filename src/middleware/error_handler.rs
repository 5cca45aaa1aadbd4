use actix_web::{
    error::{JsonPayloadError, QueryPayloadError},
    Error, HttpRequest,
};

use crate::core::AppError;

/// Malformed JSON bodies answer with the same envelope as every other error
pub fn json_error_handler(err: JsonPayloadError, req: &HttpRequest) -> Error {
    log_rejection(req, &err);
    AppError::validation(format!("Invalid request body: {}", err)).into()
}

pub fn query_error_handler(err: QueryPayloadError, req: &HttpRequest) -> Error {
    log_rejection(req, &err);
    AppError::validation(format!("Invalid query string: {}", err)).into()
}

fn log_rejection(req: &HttpRequest, err: &dyn std::fmt::Display) {
    tracing::warn!(
        method = %req.method(),
        path = %req.path(),
        error = %err,
        "Request payload rejected"
    );
}
