use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub property: String,
    pub message: String,
}

impl FieldError {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("email already exists")]
    DuplicateEmail,

    #[error("otp expired")]
    OtpExpired,

    #[error("otp incorrect")]
    OtpIncorrect,

    #[error("email not found")]
    EmailNotFound,

    #[error("password incorrect")]
    PasswordIncorrect,

    #[error("credentials conflict")]
    CredentialsConflict,

    #[error("access denied")]
    AccessDenied,

    #[error("token invalid")]
    TokenInvalid,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Collapses credential failures into the generic access-denied class so the
    /// response does not reveal which half of the credentials was wrong.
    pub fn conceal(self) -> Self {
        match self {
            AuthError::EmailNotFound | AuthError::PasswordIncorrect => AuthError::AccessDenied,
            other => other,
        }
    }

    /// Fails with `Validation` when `errors` is non-empty.
    pub fn check(errors: Vec<FieldError>) -> Result<(), AuthError> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation(errors))
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) | AuthError::DuplicateEmail => "VALIDATION_ERROR",
            AuthError::OtpExpired => "OTP_EXPIRED",
            AuthError::OtpIncorrect => "OTP_INCORRECT",
            AuthError::EmailNotFound => "EMAIL_NOT_FOUND",
            AuthError::CredentialsConflict => "CREDENTIALS_CONFLICT",
            AuthError::PasswordIncorrect | AuthError::AccessDenied | AuthError::TokenInvalid => {
                "ACCESS_DENIED"
            }
            AuthError::Forbidden => "FORBIDDEN",
            AuthError::NotFound(_) => "NOT_FOUND",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::DuplicateEmail
            | AuthError::OtpExpired
            | AuthError::OtpIncorrect => StatusCode::BAD_REQUEST,
            AuthError::EmailNotFound | AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::CredentialsConflict => StatusCode::CONFLICT,
            AuthError::PasswordIncorrect
            | AuthError::AccessDenied
            | AuthError::TokenInvalid
            | AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AuthError::Validation(_) | AuthError::DuplicateEmail => "Invalid input".into(),
            AuthError::OtpExpired => "The code has expired, request a new one".into(),
            AuthError::OtpIncorrect => "The code is incorrect".into(),
            AuthError::EmailNotFound => "Email not found".into(),
            AuthError::CredentialsConflict => "Credentials incorrect".into(),
            AuthError::PasswordIncorrect | AuthError::AccessDenied | AuthError::TokenInvalid => {
                "Access Denied".into()
            }
            AuthError::Forbidden => "Forbidden resource".into(),
            AuthError::NotFound(what) => format!("{what} not found"),
            AuthError::Internal(_) => "Something went wrong".into(),
        }
    }

    fn field_errors(&self) -> Option<BTreeMap<String, Vec<String>>> {
        let fields = match self {
            AuthError::Validation(fields) => fields.clone(),
            AuthError::DuplicateEmail => vec![FieldError::new("email", "Email already exists")],
            _ => return None,
        };
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for f in fields {
            map.entry(f.property).or_default().push(f.message);
        }
        Some(map)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<BTreeMap<String, Vec<String>>>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Internal(e) = &self {
            error!(error = ?e, "internal error");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.public_message(),
            errors: self.field_errors(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AuthError::NotFound("User".into()),
            StoreError::DuplicateEmail => AuthError::DuplicateEmail,
            StoreError::Database(e) => AuthError::Internal(anyhow::Error::new(e)),
        }
    }
}
