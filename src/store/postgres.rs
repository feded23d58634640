use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    models::UserRow, CredentialStore, Credentials, NewUser, PasswordReset, PendingActivation,
    Role, StoreError, User, UserPatch,
};

const USER_COLUMNS: &str = "id, seq, name, email, password_hash, role, avatar, hashed_at, \
     hashed_rt, deleted, deleted_at, deleted_by, created_at, updated_at";

fn map_insert_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        _ => StoreError::Database(e),
    }
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    email: String,
    name: String,
    password_hash: String,
    otp_hash: String,
    expires_at: time::OffsetDateTime,
    created_at: time::OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct ResetRow {
    email: String,
    otp_hash: String,
    expires_at: time::OffsetDateTime,
    created_at: time::OffsetDateTime,
}

/// Postgres-backed store. Expects `users`, `email_activations` and
/// `password_resets` tables; `users.email` carries a unique index restricted
/// to `deleted = false`.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted = false"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_user).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted = false"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_user).transpose()
    }

    async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Credentials>, StoreError> {
        let row: Option<(Uuid, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, email, password_hash, role
            FROM users
            WHERE email = $1 AND deleted = false
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        row.map(|(id, email, password_hash, role)| -> Result<Credentials, StoreError> {
            let role: Role = role
                .parse()
                .map_err(|e: anyhow::Error| StoreError::Database(sqlx::Error::Decode(e.into())))?;
            Ok(Credentials {
                id,
                email,
                password_hash,
                role,
            })
        })
        .transpose()
    }

    async fn list_users(
        &self,
        role: Option<Role>,
        skip: i64,
        take: i64,
    ) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE deleted = false AND ($1::text IS NULL OR role = $1) \
             ORDER BY seq ASC LIMIT $2 OFFSET $3"
        ))
        .bind(role.map(|r| r.as_str()))
        .bind(take)
        .bind(skip)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(into_user).collect()
    }

    async fn count_users(&self, role: Option<Role>) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM users \
             WHERE deleted = false AND ($1::text IS NULL OR role = $1)",
        )
        .bind(role.map(|r| r.as_str()))
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, name, email, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(map_insert_error)?;
        into_user(row)
    }

    async fn create_user_from_pending(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM email_activations WHERE email = $1")
            .bind(&user.email)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, name, email, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        tx.commit().await?;
        into_user(row)
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET \
                 name = COALESCE($2, name), \
                 avatar = COALESCE($3, avatar), \
                 password_hash = COALESCE($4, password_hash), \
                 role = COALESCE($5, role), \
                 updated_at = now() \
             WHERE id = $1 AND deleted = false \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.name)
        .bind(patch.avatar)
        .bind(patch.password_hash)
        .bind(patch.role.map(|r| r.as_str()))
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)?;
        into_user(row)
    }

    async fn set_token_hashes(
        &self,
        id: Uuid,
        hashed_at: Option<&str>,
        hashed_rt: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET hashed_at = $2, hashed_rt = $3
            WHERE id = $1 AND deleted = false
            "#,
        )
        .bind(id)
        .bind(hashed_at)
        .bind(hashed_rt)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_user(&self, id: Uuid, deleted_by: Uuid) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET \
                 deleted = true, deleted_at = now(), deleted_by = $2, \
                 hashed_at = NULL, hashed_rt = NULL, updated_at = now() \
             WHERE id = $1 AND deleted = false \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(deleted_by)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)?;
        into_user(row)
    }

    async fn replace_pending_activation(
        &self,
        pending: &PendingActivation,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM email_activations WHERE email = $1")
            .bind(&pending.email)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO email_activations (email, name, password_hash, otp_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&pending.email)
        .bind(&pending.name)
        .bind(&pending.password_hash)
        .bind(&pending.otp_hash)
        .bind(pending.expires_at)
        .bind(pending.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_pending_activation(
        &self,
        email: &str,
    ) -> Result<Option<PendingActivation>, StoreError> {
        let row = sqlx::query_as::<_, PendingRow>(
            r#"
            SELECT email, name, password_hash, otp_hash, expires_at, created_at
            FROM email_activations
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| PendingActivation {
            email: r.email,
            name: r.name,
            password_hash: r.password_hash,
            otp_hash: r.otp_hash,
            expires_at: r.expires_at,
            created_at: r.created_at,
        }))
    }

    async fn delete_pending_activation(&self, email: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM email_activations WHERE email = $1")
            .bind(email)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn replace_password_reset(&self, reset: &PasswordReset) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM password_resets WHERE email = $1")
            .bind(&reset.email)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO password_resets (email, otp_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&reset.email)
        .bind(&reset.otp_hash)
        .bind(reset.expires_at)
        .bind(reset.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_password_reset(
        &self,
        email: &str,
    ) -> Result<Option<PasswordReset>, StoreError> {
        let row = sqlx::query_as::<_, ResetRow>(
            r#"
            SELECT email, otp_hash, expires_at, created_at
            FROM password_resets
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| PasswordReset {
            email: r.email,
            otp_hash: r.otp_hash,
            expires_at: r.expires_at,
            created_at: r.created_at,
        }))
    }

    async fn delete_password_reset(&self, email: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM password_resets WHERE email = $1")
            .bind(email)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM password_resets WHERE email = $1")
            .bind(email)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET password_hash = $2, updated_at = now() \
             WHERE email = $1 AND deleted = false \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(email)
        .bind(password_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

        tx.commit().await?;
        into_user(row)
    }
}
