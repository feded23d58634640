use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{otp, service::SessionTokens};
use crate::error::FieldError;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    if !is_valid_email(email) {
        errors.push(FieldError::new("email", "email must be an email"));
    }
}

pub(crate) fn check_name(name: &str, errors: &mut Vec<FieldError>) {
    let name = name.trim();
    if name.is_empty() {
        errors.push(FieldError::new("name", "name should not be empty"));
    } else if name.chars().count() > 100 {
        errors.push(FieldError::new("name", "name is too long"));
    }
}

/// 4-20 chars with an upper-case letter, a lower-case letter and a digit or symbol.
pub(crate) fn check_password(field: &str, password: &str, errors: &mut Vec<FieldError>) {
    let len = password.chars().count();
    if len < 4 {
        errors.push(FieldError::new(field, format!("{field} is too short")));
    } else if len > 20 {
        errors.push(FieldError::new(field, format!("{field} is too long")));
    }
    let upper = password.chars().any(|c| c.is_uppercase());
    let lower = password.chars().any(|c| c.is_lowercase());
    let digit_or_symbol = password.chars().any(|c| !c.is_alphabetic());
    if !(upper && lower && digit_or_symbol) {
        errors.push(FieldError::new(field, "password too weak"));
    }
}

pub(crate) fn check_confirm(password: &str, confirm: &str, errors: &mut Vec<FieldError>) {
    if password != confirm {
        errors.push(FieldError::new("password_confirm", "passwords do not match"));
    }
}

fn check_otp(otp: &str, errors: &mut Vec<FieldError>) {
    if !otp::is_well_formed(otp) {
        errors.push(FieldError::new("otp", "otp must be 6 digits"));
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl SignupRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_name(&self.name, &mut errors);
        check_email(&self.email, &mut errors);
        check_password("password", &self.password, &mut errors);
        errors
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub email: String,
    pub otp: String,
}

impl ActivateRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        check_otp(&self.otp, &mut errors);
        errors
    }
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

impl SigninRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        if self.password.is_empty() {
            errors.push(FieldError::new("password", "password should not be empty"));
        }
        errors
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

impl ForgotPasswordRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        errors
    }
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub password: String,
    pub password_confirm: String,
}

impl ResetPasswordRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        check_otp(&self.otp, &mut errors);
        check_password("password", &self.password, &mut errors);
        check_confirm(&self.password, &self.password_confirm, &mut errors);
        errors
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub msg: String,
}

/// Response returned after activation, signin, refresh or reset.
#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl TokensResponse {
    pub fn new(tokens: SessionTokens, msg: Option<&str>) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user_id: tokens.user_id,
            msg: msg.map(str::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.property.as_str()).collect()
    }

    #[test]
    fn signup_accepts_reasonable_input() {
        let req = SignupRequest {
            name: "A".into(),
            email: "a@x.com".into(),
            password: "Passw0rd!".into(),
        };
        assert!(req.validate().is_empty());
    }

    #[test]
    fn signup_reports_every_bad_field() {
        let req = SignupRequest {
            name: "  ".into(),
            email: "not-an-email".into(),
            password: "weak".into(),
        };
        let errors = req.validate();
        assert_eq!(props(&errors), vec!["name", "email", "password"]);
    }

    #[test]
    fn password_rules() {
        let mut errors = Vec::new();
        check_password("password", "Abc1", &mut errors);
        assert!(errors.is_empty());

        check_password("password", "abcdef1", &mut errors);
        assert_eq!(errors.last().unwrap().message, "password too weak");

        errors.clear();
        check_password("password", "Abcdefghijklmnopqrst1", &mut errors);
        assert_eq!(errors[0].message, "password is too long");
    }

    #[test]
    fn reset_requires_matching_confirmation() {
        let req = ResetPasswordRequest {
            email: "a@x.com".into(),
            otp: "123456".into(),
            password: "Passw0rd!".into(),
            password_confirm: "Passw0rd?".into(),
        };
        assert_eq!(props(&req.validate()), vec!["password_confirm"]);
    }

    #[test]
    fn activate_rejects_malformed_otp() {
        let req = ActivateRequest {
            email: "a@x.com".into(),
            otp: "12ab56".into(),
        };
        assert_eq!(props(&req.validate()), vec!["otp"]);
    }

    #[test]
    fn email_is_normalized() {
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[test]
    fn tokens_response_omits_missing_message() {
        let response = TokensResponse {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            user_id: Uuid::nil(),
            msg: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("msg"));
        assert!(json.contains("access_token"));
    }
}
