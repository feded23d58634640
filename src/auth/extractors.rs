use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;
use uuid::Uuid;

use super::{claims::TokenKind, service::AuthEngine};
use crate::{error::AuthError, store::Role};

/// Authenticated caller as carried by a verified access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    /// Admins pass every role check.
    pub fn require(&self, role: Role) -> Result<(), AuthError> {
        if self.role == role || self.role == Role::Admin {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

fn bearer(parts: &Parts) -> Result<&str, AuthError> {
    let auth = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::AccessDenied)?;

    // Expect "Bearer <token>"
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::AccessDenied)
}

/// Access-token guard: signature, expiry and kind, then the token must match
/// the user's current session.
pub struct AuthUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AuthEngine>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let engine = Arc::<AuthEngine>::from_ref(state);
        let token = bearer(parts)?;
        let claims = engine
            .codec()
            .verify(token, TokenKind::Access)
            .map_err(|e| {
                warn!("rejected access token");
                e
            })?;
        engine.valid_access_token(claims.sub, token).await?;
        Ok(AuthUser(Principal {
            id: claims.sub,
            role: claims.role,
        }))
    }
}

/// Refresh-token guard. Only the JWT is checked here; matching against the
/// stored hash happens during rotation.
pub struct RefreshBearer {
    pub user_id: Uuid,
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for RefreshBearer
where
    Arc<AuthEngine>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let engine = Arc::<AuthEngine>::from_ref(state);
        let token = bearer(parts)?;
        let claims = engine.codec().verify(token, TokenKind::Refresh)?;
        Ok(RefreshBearer {
            user_id: claims.sub,
            token: token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn admin_passes_any_role_check() {
        let admin = Principal {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        assert!(admin.require(Role::Mover).is_ok());

        let customer = Principal {
            id: Uuid::new_v4(),
            role: Role::Customer,
        };
        assert!(customer.require(Role::Customer).is_ok());
        assert!(matches!(
            customer.require(Role::Admin),
            Err(AuthError::Forbidden)
        ));
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer(&parts_with(Some("Bearer abc"))).unwrap(), "abc");
        assert_eq!(bearer(&parts_with(Some("bearer abc"))).unwrap(), "abc");
        assert!(bearer(&parts_with(Some("Basic abc"))).is_err());
        assert!(bearer(&parts_with(Some("Bearer "))).is_err());
        assert!(bearer(&parts_with(None)).is_err());
    }
}
