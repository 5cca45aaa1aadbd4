use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};

/// Application-wide Result type
pub type Result<T> = std::result::Result<T, AppError>;

/// MySQL error numbers that indicate a lost lock race (deadlock, lock wait timeout)
const MYSQL_RETRYABLE_ERRORS: [u16; 2] = [1205, 1213];

/// Main application error type
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// Input the caller must correct (over-allocation, cross-tenant invoice, bad amount)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Actor lacks tenant membership or the required capability
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Concurrent modification detected; the whole operation may be retried
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation blocked by a business rule (e.g. reversal gating)
    #[error("Business rule violated ({code}): {message}")]
    BusinessRule { code: String, message: String },

    /// Unauthorized access (missing or invalid credentials)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Database operation errors
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if let Some(mysql_err) =
                db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
            {
                if MYSQL_RETRYABLE_ERRORS.contains(&mysql_err.number()) {
                    return AppError::Conflict(format!(
                        "concurrent modification detected: {}",
                        mysql_err.message()
                    ));
                }
            }
        }
        AppError::Database(err)
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = self.to_string();

        let mut body = serde_json::json!({
            "error": {
                "message": error_message,
                "code": status_code.as_u16(),
                "kind": self.kind(),
                "retryable": self.is_retryable(),
            }
        });

        if let AppError::BusinessRule { code, .. } = self {
            body["error"]["reason"] = serde_json::Value::String(code.clone());
        }

        HttpResponse::build(status_code).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Permission(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BusinessRule { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Helper functions for common error scenarios
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        AppError::Permission(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound(resource.into())
    }

    pub fn business_rule(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::BusinessRule {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Stable, machine-readable error category
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Permission(_) => "permission",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::BusinessRule { .. } => "business_rule",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::RateLimitExceeded(_) => "rate_limited",
            AppError::Database(_) => "database",
            AppError::Configuration(_) => "configuration",
            AppError::Json(_) => "json",
            AppError::Internal(_) => "internal",
        }
    }

    /// Only lost lock races are worth retrying as a whole
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }

    /// Failures that are not the caller's fault and must be audit-logged
    pub fn is_unclassified(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Internal(_) | AppError::Json(_)
        )
    }

    /// Business-rule code, if this error carries one
    pub fn rule_code(&self) -> Option<&str> {
        match self {
            AppError::BusinessRule { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}
