use std::time::Duration;

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth_token::TokenError;
use crate::db::connection::ConnectionSnapshot;

/// Failure of a database connection attempt or liveness check.
///
/// `Clone` because one attempt's outcome is handed to every caller waiting on it.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DbError {
    #[error("invalid connection options: {0}")]
    Options(String),

    #[error("database unreachable: {0}")]
    Unreachable(String),

    #[error("database did not answer within {0:?}")]
    Timeout(Duration),

    #[error("connection attempt was aborted")]
    Aborted,
}

impl DbError {
    pub fn name(&self) -> &'static str {
        match self {
            DbError::Options(_) => "ConfigurationError",
            DbError::Unreachable(_) => "NetworkError",
            DbError::Timeout(_) => "TimeoutError",
            DbError::Aborted => "AbortError",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No token, authorization denied")]
    NoToken,

    #[error("Token format is invalid")]
    InvalidFormat,

    #[error("Server authentication is not configured")]
    ConfigError,

    #[error("Token has expired")]
    TokenExpired { expired_at: DateTime<Utc> },

    #[error("Token is not valid")]
    TokenInvalid,

    #[error("Authentication failed: {0}")]
    Unexpected(TokenError),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::NoToken => "NO_TOKEN",
            AuthError::InvalidFormat => "INVALID_FORMAT",
            AuthError::ConfigError => "CONFIG_ERROR",
            AuthError::TokenExpired { .. } => "TOKEN_EXPIRED",
            AuthError::TokenInvalid => "TOKEN_INVALID",
            AuthError::Unexpected(_) => "AUTH_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expired_at: Option<DateTime<Utc>>,
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::NoToken
            | AuthError::InvalidFormat
            | AuthError::TokenExpired { .. }
            | AuthError::TokenInvalid => StatusCode::UNAUTHORIZED,
            AuthError::ConfigError | AuthError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let expired_at = match self {
            AuthError::TokenExpired { expired_at } => Some(*expired_at),
            _ => None,
        };

        HttpResponse::build(self.status_code()).json(AuthErrorResponse {
            success: false,
            error: self.to_string(),
            code: self.code(),
            expired_at,
        })
    }
}

/// Diagnostic payload attached to `DB_CONNECTION_ERROR` outside production.
#[derive(Debug, Clone, Serialize)]
pub struct DbErrorDetails {
    pub name: &'static str,
    pub message: String,
    pub state: ConnectionSnapshot,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Database connection error")]
    DbUnavailable {
        source: DbError,
        details: Option<Box<DbErrorDetails>>,
    },

    #[error("Password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Member already exists")]
    MemberExists,

    #[error("{0}")]
    Validation(String),

    #[error("Member not found")]
    MemberNotFound,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn db_unavailable(source: DbError, snapshot: Option<ConnectionSnapshot>) -> Self {
        let details = snapshot.map(|state| {
            Box::new(DbErrorDetails {
                name: source.name(),
                message: source.to_string(),
                state,
            })
        });
        AppError::DbUnavailable { source, details }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::DbUnavailable { .. } => "DB_CONNECTION_ERROR",
            AppError::PasswordHash(_) => "INTERNAL_ERROR",
            AppError::Auth(err) => err.code(),
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::MemberExists => "MEMBER_EXISTS",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::MemberNotFound => "MEMBER_NOT_FOUND",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Token(_) => "TOKEN_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    success: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a DbErrorDetails>,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(err) => err.status_code(),
            AppError::InvalidCredentials
            | AppError::MemberExists
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::MemberNotFound => StatusCode::NOT_FOUND,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DbUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::PasswordHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let details = match self {
            AppError::Auth(err) => return err.error_response(),
            AppError::DbUnavailable { details, .. } => details.as_deref(),
            _ => None,
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            success: false,
            error: self.to_string(),
            code: self.code(),
            details,
        })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
