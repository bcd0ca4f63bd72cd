use sqlx::PgPool;

use crate::error::{DbError, DbResult};
use crate::models::{Plan, User};

#[derive(Clone)]
pub struct PlanRepository {
    pool: PgPool,
}

impl PlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, plan: &Plan) -> DbResult<i64> {
        let plan_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO plans (host_name, plan_name, months, days, hours, price,
                               traffic_gb, key_provision_mode, display_mode, display_mode_groups)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING plan_id
            "#,
        )
        .bind(&plan.host_name)
        .bind(&plan.plan_name)
        .bind(plan.months)
        .bind(plan.days)
        .bind(plan.hours)
        .bind(plan.price)
        .bind(plan.traffic_gb)
        .bind(&plan.key_provision_mode)
        .bind(&plan.display_mode)
        .bind(&plan.display_mode_groups)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::classify(e, "plan insert"))?;
        Ok(plan_id)
    }

    pub async fn update(&self, plan: &Plan) -> DbResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE plans
            SET plan_name = $2, months = $3, days = $4, hours = $5, price = $6,
                traffic_gb = $7, key_provision_mode = $8, display_mode = $9,
                display_mode_groups = $10
            WHERE plan_id = $1
            "#,
        )
        .bind(plan.plan_id)
        .bind(&plan.plan_name)
        .bind(plan.months)
        .bind(plan.days)
        .bind(plan.hours)
        .bind(plan.price)
        .bind(plan.traffic_gb)
        .bind(&plan.key_provision_mode)
        .bind(&plan.display_mode)
        .bind(&plan.display_mode_groups)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn delete(&self, plan_id: i64) -> DbResult<()> {
        let res = sqlx::query("DELETE FROM plans WHERE plan_id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn get(&self, plan_id: i64) -> DbResult<Option<Plan>> {
        let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE plan_id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(plan)
    }

    pub async fn get_for_host(&self, host_name: &str) -> DbResult<Vec<Plan>> {
        let plans = sqlx::query_as::<_, Plan>(
            "SELECT * FROM plans WHERE host_name = $1 ORDER BY months, days, hours, plan_id",
        )
        .bind(host_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    /// Plans a given user is allowed to see on a host, storefront
    /// filtering applied.
    pub async fn get_visible_for(&self, host_name: &str, user: &User) -> DbResult<Vec<Plan>> {
        let plans = self.get_for_host(host_name).await?;
        Ok(plans.into_iter().filter(|p| p.is_visible_for(user)).collect())
    }

    /// Cheapest plan on a host, used by auto-renewal when the original
    /// plan is gone.
    pub async fn cheapest_for_host(&self, host_name: &str) -> DbResult<Option<Plan>> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT * FROM plans WHERE host_name = $1 AND price > 0
             ORDER BY price ASC LIMIT 1",
        )
        .bind(host_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(plan)
    }
}
