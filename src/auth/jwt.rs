use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use crate::{
    config::{JwtConfig, TokenClassConfig},
    error::AuthError,
    store::Role,
};

/// Signing material and lifetime of one token class.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &TokenClassConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            ttl: Duration::minutes(cfg.ttl_minutes),
        }
    }
}

/// A freshly issued token pair. Raw tokens only exist here and in the response.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and verifies access and refresh tokens, each class with its own secret.
#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
    audience: String,
    access: JwtKeys,
    refresh: JwtKeys,
}

impl TokenCodec {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access: JwtKeys::from_config(&cfg.access),
            refresh: JwtKeys::from_config(&cfg.refresh),
        }
    }

    fn keys(&self, kind: TokenKind) -> &JwtKeys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        self.keys(kind).ttl
    }

    fn issue_with_ttl(
        &self,
        user_id: Uuid,
        role: Role,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            role,
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::default(), &claims, &self.keys(kind).encoding)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("jwt encode failed: {e}")))?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn issue(&self, user_id: Uuid, role: Role, kind: TokenKind) -> Result<String, AuthError> {
        self.issue_with_ttl(user_id, role, kind, self.ttl(kind))
    }

    /// Verifies signature, expiry, issuer, audience and token class.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.keys(kind).decoding, &validation).map_err(|e| {
            warn!(error = %e, kind = ?kind, "jwt rejected");
            AuthError::TokenInvalid
        })?;
        if data.claims.kind != kind {
            warn!(expected = ?kind, got = ?data.claims.kind, "jwt of wrong class");
            return Err(AuthError::TokenInvalid);
        }
        debug!(user_id = %data.claims.sub, kind = ?kind, "jwt verified");
        Ok(data.claims)
    }

    /// Signs an access and a refresh token for the same user. Pure signing, no storage.
    pub fn issue_session_tokens(&self, user_id: Uuid, role: Role) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issue(user_id, role, TokenKind::Access)?,
            refresh_token: self.issue(user_id, role, TokenKind::Refresh)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn make_codec() -> TokenCodec {
        TokenCodec::from_config(&test_config().jwt)
    }

    #[test]
    fn issue_and_verify_access_token() {
        let codec = make_codec();
        let user_id = Uuid::new_v4();
        let token = codec
            .issue(user_id, Role::Mover, TokenKind::Access)
            .expect("sign access");
        let claims = codec.verify(&token, TokenKind::Access).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, Role::Mover);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn payload_does_not_carry_email() {
        let codec = make_codec();
        let token = codec
            .issue(Uuid::new_v4(), Role::Customer, TokenKind::Access)
            .unwrap();
        let claims = codec.verify(&token, TokenKind::Access).unwrap();
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("email").is_none());
    }

    #[test]
    fn refresh_token_does_not_verify_as_access() {
        let codec = make_codec();
        let token = codec
            .issue(Uuid::new_v4(), Role::Customer, TokenKind::Refresh)
            .unwrap();
        assert!(codec.verify(&token, TokenKind::Refresh).is_ok());
        assert!(matches!(
            codec.verify(&token, TokenKind::Access),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn verify_rejects_other_secret() {
        let codec = make_codec();
        let mut other_cfg = test_config().jwt;
        other_cfg.access.secret = "another-secret".into();
        let other = TokenCodec::from_config(&other_cfg);

        let token = other
            .issue(Uuid::new_v4(), Role::Customer, TokenKind::Access)
            .unwrap();
        assert!(matches!(
            codec.verify(&token, TokenKind::Access),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn verify_rejects_expired_token() {
        let codec = make_codec();
        let token = codec
            .issue_with_ttl(
                Uuid::new_v4(),
                Role::Customer,
                TokenKind::Access,
                Duration::seconds(-5),
            )
            .unwrap();
        assert!(matches!(
            codec.verify(&token, TokenKind::Access),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn verify_rejects_wrong_audience() {
        let codec = make_codec();
        let mut other_cfg = test_config().jwt;
        other_cfg.audience = "someone-else".into();
        let other = TokenCodec::from_config(&other_cfg);
        let token = other
            .issue(Uuid::new_v4(), Role::Customer, TokenKind::Access)
            .unwrap();
        assert!(codec.verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn tokens_issued_back_to_back_differ() {
        let codec = make_codec();
        let user_id = Uuid::new_v4();
        let a = codec.issue(user_id, Role::Customer, TokenKind::Refresh).unwrap();
        let b = codec.issue(user_id, Role::Customer, TokenKind::Refresh).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn session_tokens_are_distinct_classes() {
        let codec = make_codec();
        let user_id = Uuid::new_v4();
        let pair = codec.issue_session_tokens(user_id, Role::Admin).unwrap();
        assert_ne!(pair.access_token, pair.refresh_token);
        assert_eq!(
            codec.verify(&pair.access_token, TokenKind::Access).unwrap().sub,
            user_id
        );
        assert_eq!(
            codec
                .verify(&pair.refresh_token, TokenKind::Refresh)
                .unwrap()
                .sub,
            user_id
        );
    }
}
