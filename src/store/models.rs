use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Customer,
    Mover,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Mover => "MOVER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CUSTOMER" => Ok(Role::Customer),
            "MOVER" => Ok(Role::Mover),
            "ADMIN" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role {other:?}"),
        }
    }
}

/// User record as stored.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub seq: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub avatar: Option<String>,
    pub hashed_at: Option<String>,
    pub hashed_rt: Option<String>,
    pub deleted: bool,
    pub deleted_at: Option<OffsetDateTime>,
    pub deleted_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Row shape of the `users` table; `role` is kept as text in the database.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub seq: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub avatar: Option<String>,
    pub hashed_at: Option<String>,
    pub hashed_rt: Option<String>,
    pub deleted: bool,
    pub deleted_at: Option<OffsetDateTime>,
    pub deleted_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            seq: r.seq,
            name: r.name,
            email: r.email,
            password_hash: r.password_hash,
            role: r.role.parse()?,
            avatar: r.avatar,
            hashed_at: r.hashed_at,
            hashed_rt: r.hashed_rt,
            deleted: r.deleted,
            deleted_at: r.deleted_at,
            deleted_by: r.deleted_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// The fields signin needs and nothing more.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Partial update of a user; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
}

/// Signup waiting for its OTP, keyed by email.
#[derive(Debug, Clone)]
pub struct PendingActivation {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub otp_hash: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub email: String,
    pub otp_hash: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Projection of a user that is safe to return and to cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub seq: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub avatar: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&User> for UserProfile {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            seq: u.seq,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            avatar: u.avatar.clone(),
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" Mover ".parse::<Role>().unwrap(), Role::Mover);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn profile_serialization_has_no_secrets() {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            seq: 1,
            name: "A".into(),
            email: "a@x.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Customer,
            avatar: None,
            hashed_at: Some("$argon2id$at".into()),
            hashed_rt: Some("$argon2id$rt".into()),
            deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&UserProfile::from(&user)).unwrap();
        assert!(json.contains("\"CUSTOMER\""));
        assert!(!json.contains("argon2"));
    }
}
