use serde::{Deserialize, Serialize};

use crate::{
    auth::dto::{check_confirm, check_name, check_password},
    error::FieldError,
    store::{Role, UserProfile},
};

const MAX_TAKE: i64 = 100;

fn check_avatar(avatar: Option<&str>, errors: &mut Vec<FieldError>) {
    if avatar.is_some_and(|a| a.chars().count() > 500) {
        errors.push(FieldError::new("avatar", "avatar is too long"));
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

impl UpdateProfileRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if let Some(name) = &self.name {
            check_name(name, &mut errors);
        }
        check_avatar(self.avatar.as_deref(), &mut errors);
        errors
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub password_confirm: String,
}

impl UpdatePasswordRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.current_password.is_empty() {
            errors.push(FieldError::new(
                "current_password",
                "current_password should not be empty",
            ));
        }
        check_password("new_password", &self.new_password, &mut errors);
        check_confirm(&self.new_password, &self.password_confirm, &mut errors);
        errors
    }
}

#[derive(Debug, Deserialize)]
pub struct AdminUpdateRequest {
    pub name: Option<String>,
    pub role: Option<String>,
    pub avatar: Option<String>,
}

impl AdminUpdateRequest {
    /// Validates and parses the role in one pass.
    pub fn validate(&self) -> Result<Option<Role>, Vec<FieldError>> {
        let mut errors = Vec::new();
        if let Some(name) = &self.name {
            check_name(name, &mut errors);
        }
        check_avatar(self.avatar.as_deref(), &mut errors);
        let role = match self.role.as_deref().map(str::parse::<Role>) {
            Some(Ok(role)) => Some(role),
            Some(Err(_)) => {
                errors.push(FieldError::new(
                    "role",
                    "role must be one of CUSTOMER, MOVER, ADMIN",
                ));
                None
            }
            None => None,
        };
        if errors.is_empty() {
            Ok(role)
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub role: Option<String>,
    pub skip: Option<i64>,
    pub take: Option<i64>,
}

/// Parsed listing window.
#[derive(Debug, PartialEq, Eq)]
pub struct ListWindow {
    pub role: Option<Role>,
    pub skip: i64,
    pub take: i64,
}

impl ListQuery {
    pub fn window(&self) -> Result<ListWindow, Vec<FieldError>> {
        let mut errors = Vec::new();
        let role = match self.role.as_deref().map(str::parse::<Role>) {
            Some(Ok(role)) => Some(role),
            Some(Err(_)) => {
                errors.push(FieldError::new("role", "unknown role"));
                None
            }
            None => None,
        };
        let skip = self.skip.unwrap_or(0);
        if skip < 0 {
            errors.push(FieldError::new("skip", "skip must not be negative"));
        }
        let take = self.take.unwrap_or(20);
        if !(1..=MAX_TAKE).contains(&take) {
            errors.push(FieldError::new("take", format!("take must be 1-{MAX_TAKE}")));
        }
        if errors.is_empty() {
            Ok(ListWindow { role, skip, take })
        } else {
            Err(errors)
        }
    }
}

/// One page of users plus the size of the whole filtered set.
#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub total_count: i64,
    pub users: Vec<UserProfile>,
}
