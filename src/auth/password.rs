use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

/// One-way Argon2id hashing for passwords, OTP codes and session tokens.
#[derive(Clone, Default)]
pub struct Hasher {
    argon2: Argon2<'static>,
}

impl Hasher {
    /// Minimal cost parameters for tests.
    #[cfg(test)]
    pub fn fast() -> Self {
        use argon2::{Algorithm, Params, Version};

        let params = Params::new(1024, 1, 1, None).expect("valid argon2 params");
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Parameters are read from the PHC string, so hashes made with other costs still verify.
    /// The final digest comparison is constant-time.
    pub fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(self
            .argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }

    /// A well-formed hash with this hasher's cost that no input matches.
    /// Verifying against it costs the same as a real check.
    pub fn dummy_hash(&self) -> String {
        let params = self.argon2.params();
        format!(
            "$argon2id$v=19$m={},t={},p={}${DUMMY_SALT}${DUMMY_OUTPUT}",
            params.m_cost(),
            params.t_cost(),
            params.p_cost(),
        )
    }
}

const DUMMY_SALT: &str = "c29tZXNhbHRzb21lc2FsdA";
const DUMMY_OUTPUT: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
