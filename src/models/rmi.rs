//! RMI rule model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::models::rule::{
    clamp_page_size, count_sql, list_sql, order_direction, page_offset, BaseRule, Protocol,
    RuleFilter, RulePage,
};
use crate::registry::Registry;
use crate::ruleset::{CompiledRule, RuleAction, RuleSet};

/// RMI rule: base fields only; the listener captures the call stream and has
/// no response to shape beyond the protocol ack.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct RmiRule {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub base: BaseRule,
}

impl RmiRule {
    pub const TABLE: &'static str = "rmi_rules";

    fn compile(self) -> AppResult<CompiledRule> {
        let flag = self.base.validate()?;
        Ok(CompiledRule {
            id: self.base.id,
            name: self.base.name,
            base_rank: self.base.base_rank,
            push_to_client: self.base.push_to_client,
            notice: self.base.notice,
            flag,
            action: RuleAction::Rmi,
        })
    }

    pub async fn load_set<'e, E>(executor: E) -> AppResult<RuleSet>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows: Vec<RmiRule> = sqlx::query_as("SELECT * FROM rmi_rules")
            .fetch_all(executor)
            .await?;
        let mut compiled = Vec::with_capacity(rows.len());
        for row in rows {
            compiled.push(row.compile()?);
        }
        Ok(RuleSet::new(compiled))
    }

    pub async fn create_or_update(registry: &Registry, rule: RmiRule) -> AppResult<i64> {
        rule.base.validate()?;

        let cache = registry.cache(Protocol::Rmi);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let id: i64 = if rule.base.id == 0 {
            sqlx::query_scalar(
                r#"
                INSERT INTO rmi_rules (name, flag_format, base_rank, push_to_client, notice)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(&rule.base.name)
            .bind(&rule.base.flag_format)
            .bind(rule.base.base_rank)
            .bind(rule.base.push_to_client)
            .bind(rule.base.notice)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_scalar(
                r#"
                INSERT INTO rmi_rules (id, name, flag_format, base_rank, push_to_client, notice)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    flag_format = EXCLUDED.flag_format,
                    base_rank = EXCLUDED.base_rank,
                    push_to_client = EXCLUDED.push_to_client,
                    notice = EXCLUDED.notice,
                    updated_at = NOW()
                RETURNING id
                "#,
            )
            .bind(rule.base.id)
            .bind(&rule.base.name)
            .bind(&rule.base.flag_format)
            .bind(rule.base.base_rank)
            .bind(rule.base.push_to_client)
            .bind(rule.base.notice)
            .fetch_one(&mut *tx)
            .await?
        };

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "RMI rule upserted");
        Ok(id)
    }

    pub async fn delete(registry: &Registry, id: i64) -> AppResult<()> {
        let cache = registry.cache(Protocol::Rmi);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let result = sqlx::query("DELETE FROM rmi_rules WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("rmi rule {id}")));
        }

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "RMI rule deleted");
        Ok(())
    }

    pub async fn list(pool: &PgPool, filter: RuleFilter) -> AppResult<RulePage<Self>> {
        let name = filter.name.unwrap_or_default();
        let page_size = clamp_page_size(filter.page_size);
        let offset = page_offset(filter.page, page_size);
        let direction = order_direction(filter.order.as_deref());

        let count: i64 = sqlx::query_scalar(&count_sql(Self::TABLE))
            .bind(&name)
            .fetch_one(pool)
            .await?;
        let data = sqlx::query_as::<_, Self>(&list_sql(Self::TABLE, direction))
            .bind(&name)
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        Ok(RulePage { count, data })
    }
}
