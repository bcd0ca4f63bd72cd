use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sqlx::PgPool;

use crate::error::{DbError, DbResult};
use crate::models::{CabinetToken, Key};

#[derive(Clone)]
pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stable cabinet token for a (user, key) pair. Generated on first
    /// request; a racing insert falls back to the winner's token.
    pub async fn get_or_create(&self, user_id: i64, key_id: i64) -> DbResult<String> {
        if let Some(existing) = self.find(user_id, key_id).await? {
            return Ok(existing);
        }

        let token = generate_token();
        sqlx::query(
            "INSERT INTO cabinet_tokens (token, user_id, key_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id, key_id) DO NOTHING",
        )
        .bind(&token)
        .bind(user_id)
        .bind(key_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::classify(e, "cabinet token insert"))?;

        self.find(user_id, key_id).await?.ok_or(DbError::NotFound)
    }

    async fn find(&self, user_id: i64, key_id: i64) -> DbResult<Option<String>> {
        let token = sqlx::query_scalar::<_, String>(
            "SELECT token FROM cabinet_tokens WHERE user_id = $1 AND key_id = $2",
        )
        .bind(user_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    pub async fn get(&self, token: &str) -> DbResult<Option<CabinetToken>> {
        let row = sqlx::query_as::<_, CabinetToken>(
            "SELECT * FROM cabinet_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Resolves a token straight to its key. Tokens outlive their key,
    /// so a valid token whose key was deleted resolves to nothing.
    pub async fn resolve_key(&self, token: &str) -> DbResult<Option<Key>> {
        let key = sqlx::query_as::<_, Key>(
            r#"
            SELECT k.* FROM cabinet_tokens t
            JOIN vpn_keys k ON k.key_id = t.key_id
            WHERE t.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
