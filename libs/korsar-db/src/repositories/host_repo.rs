use sqlx::PgPool;

use crate::error::{DbError, DbResult};
use crate::models::Host;
use crate::models::host::normalize_host_code;

#[derive(Clone)]
pub struct HostRepository {
    pool: PgPool,
}

impl HostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, host: &Host) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO xui_hosts (host_name, host_code, host_url, host_username, host_pass, host_inbound_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&host.host_name)
        .bind(normalize_host_code(&host.host_code))
        .bind(&host.host_url)
        .bind(&host.host_username)
        .bind(&host.host_pass)
        .bind(host.host_inbound_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::classify(e, "host already exists"))?;
        Ok(())
    }

    /// Updates a host in place. A rename cascades to plans and keys via
    /// the ON UPDATE CASCADE foreign keys.
    pub async fn update(&self, old_name: &str, host: &Host) -> DbResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE xui_hosts
            SET host_name = $2, host_code = $3, host_url = $4,
                host_username = $5, host_pass = $6, host_inbound_id = $7
            WHERE host_name = $1
            "#,
        )
        .bind(old_name)
        .bind(&host.host_name)
        .bind(normalize_host_code(&host.host_code))
        .bind(&host.host_url)
        .bind(&host.host_username)
        .bind(&host.host_pass)
        .bind(host.host_inbound_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::classify(e, "host rename conflict"))?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Refuses to delete a host that still has keys on it.
    pub async fn delete(&self, host_name: &str) -> DbResult<()> {
        let keys = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM vpn_keys WHERE host_name = $1",
        )
        .bind(host_name)
        .fetch_one(&self.pool)
        .await?;
        if keys > 0 {
            return Err(DbError::Conflict(format!(
                "host {host_name} still has {keys} keys"
            )));
        }

        sqlx::query("DELETE FROM plans WHERE host_name = $1")
            .bind(host_name)
            .execute(&self.pool)
            .await?;
        let res = sqlx::query("DELETE FROM xui_hosts WHERE host_name = $1")
            .bind(host_name)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn get(&self, host_name: &str) -> DbResult<Option<Host>> {
        let host = sqlx::query_as::<_, Host>("SELECT * FROM xui_hosts WHERE host_name = $1")
            .bind(host_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(host)
    }

    pub async fn get_all(&self) -> DbResult<Vec<Host>> {
        let hosts = sqlx::query_as::<_, Host>("SELECT * FROM xui_hosts ORDER BY host_name")
            .fetch_all(&self.pool)
            .await?;
        Ok(hosts)
    }
}
