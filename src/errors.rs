//! # Error Handling
//!
//! Two families of errors exist, matching how the list engine degrades:
//!
//! - [`PredicateError`]: a single filter, ordering or search entry could not be
//!   turned into a query. These come from client input, are logged at debug
//!   level and the entry is dropped. They never reach the client.
//! - [`ApiError`]: a request-level failure. Configuration mistakes (a field in
//!   an allow-list that does not exist, a lazy filter that cannot be applied, a
//!   collection for the wrong entity) and database failures end up here and are
//!   returned to the caller.
//!
//! ## Logging
//!
//! Internal error details are logged using the `tracing` crate and are never
//! sent to clients:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_target(false)
//!     .compact()
//!     .init();
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::Serialize;
use std::fmt;

use crate::filtering::predicate::Lookup;

/// Why a predicate could not be built or applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// The path does not resolve to a field of the entity
    UnknownField(String),
    /// The value does not fit the field or lookup
    InvalidValue { field: String, reason: String },
    /// The lookup cannot be used on this field
    UnsupportedLookup { field: String, lookup: Lookup },
    /// A `CURRENT_CALLER` placeholder reached a collection
    UnresolvedCaller,
    /// The collection provider cannot express this predicate
    Unsupported(String),
}

impl fmt::Display for PredicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField(path) => write!(f, "unknown field '{path}'"),
            Self::InvalidValue { field, reason } => write!(f, "invalid value for '{field}': {reason}"),
            Self::UnsupportedLookup { field, lookup } => {
                write!(f, "lookup '{}' not supported on '{field}'", lookup.suffix())
            }
            Self::UnresolvedCaller => write!(f, "CURRENT_CALLER was not resolved"),
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl std::error::Error for PredicateError {}

/// API error type with automatic logging and sanitized responses
#[derive(Debug)]
pub enum ApiError {
    /// 404 Not Found - Resource doesn't exist
    NotFound {
        /// Entity name (e.g., "user")
        resource: String,
        /// Optional ID that wasn't found
        id: Option<String>,
    },

    /// 400 Bad Request - Request could not be decoded at all
    BadRequest {
        /// User-facing error message
        message: String,
    },

    /// 500 Internal Server Error - Programmer error in controller setup
    Configuration {
        /// Details (logged, not sent to user)
        message: String,
    },

    /// 500 Internal Server Error - Database error (details logged, not exposed)
    Database {
        /// User-facing generic message
        message: String,
        /// Internal error (logged, not sent to user)
        internal: DbErr,
    },

    /// 500 Internal Server Error - Generic internal error
    Internal {
        /// User-facing generic message
        message: String,
        /// Internal error details (logged, not sent to user)
        internal: Option<String>,
    },
}

impl ApiError {
    /// Create a 404 Not Found error
    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    /// Create a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a configuration error
    ///
    /// # Example
    /// ```rust,ignore
    /// return Err(ApiError::configuration("ordering field 'nick' does not exist"));
    /// ```
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a 500 Internal Server Error from a database error
    ///
    /// The database error details are logged but NOT sent to the user.
    pub fn database(err: DbErr) -> Self {
        Self::Database {
            message: "A database error occurred".to_string(),
            internal: err,
        }
    }

    /// Create a 500 Internal Server Error with optional details
    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. } | Self::Database { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the user-facing error message (sanitized)
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { resource, id } => {
                if let Some(id) = id {
                    format!("{resource} with ID '{id}' not found")
                } else {
                    format!("{resource} not found")
                }
            }
            Self::BadRequest { message } => message.clone(),
            Self::Configuration { .. } => "Internal Server Error".to_string(),
            Self::Database { message, .. } | Self::Internal { message, .. } => message.clone(),
        }
    }

    /// Log internal error details (not sent to user)
    fn log_internal(&self) {
        match self {
            Self::Database { internal, .. } => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::Configuration { message } => {
                tracing::error!(details = %message, "Controller misconfigured");
            }
            Self::Internal {
                internal: Some(details),
                ..
            } => {
                tracing::error!(details = %details, "Internal error occurred");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

/// Error response sent to users (sanitized)
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();
        let body = ErrorResponse {
            error: self.user_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Configuration details are for the operator, not the client body
            Self::Configuration { message } => write!(f, "configuration error: {message}"),
            _ => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert SeaORM `DbErr` to `ApiError`
///
/// - `DbErr::RecordNotFound` → 404 Not Found
/// - All other `DbErr` variants → 500 Internal Server Error
impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        match &err {
            DbErr::RecordNotFound(msg) => {
                let resource = msg.split_whitespace().next().unwrap_or("Resource");
                Self::NotFound {
                    resource: resource.to_string(),
                    id: None,
                }
            }
            _ => Self::database(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_with_id() {
        let err = ApiError::not_found("user", Some("123".to_string()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.user_message(), "user with ID '123' not found");
    }

    #[test]
    fn test_not_found_without_id() {
        let err = ApiError::not_found("user", None);
        assert_eq!(err.user_message(), "user not found");
    }

    #[test]
    fn test_configuration_error_is_sanitized() {
        let err = ApiError::configuration("ordering field 'nick' does not exist");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "Internal Server Error");
        assert!(err.to_string().contains("nick"));
    }

    #[test]
    fn test_database_error() {
        let err = ApiError::database(DbErr::Type("Type mismatch error".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.user_message(), "A database error occurred");
    }

    #[test]
    fn test_dberr_record_not_found_becomes_404() {
        let api_err: ApiError = DbErr::RecordNotFound("user not found".to_string()).into();
        assert_eq!(api_err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_all_other_dberr_become_500() {
        let test_cases = vec![
            DbErr::Custom("Any custom error".to_string()),
            DbErr::Type("Type error".to_string()),
            DbErr::Json("JSON error".to_string()),
        ];

        for db_err in test_cases {
            let api_err: ApiError = db_err.into();
            assert_eq!(api_err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(api_err.user_message(), "A database error occurred");
        }
    }

    #[test]
    fn test_predicate_error_display() {
        let err = PredicateError::UnsupportedLookup {
            field: "active".to_string(),
            lookup: Lookup::IContains,
        };
        assert_eq!(err.to_string(), "lookup 'icontains' not supported on 'active'");
    }
}
