//! DNS rule model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::models::rule::{
    clamp_page_size, count_sql, list_sql, order_direction, page_offset, BaseRule, Protocol,
    RuleFilter, RulePage,
};
use crate::registry::Registry;
use crate::ruleset::{CompiledRule, RuleAction, RuleSet};

/// DNS rule: base fields plus the answer served for a matching query.
/// An empty `value` answers A queries with the server's external IP.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DnsRule {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub base: BaseRule,
    #[serde(default = "default_record_type")]
    pub record_type: String,
    #[serde(default)]
    pub value: String,
}

fn default_record_type() -> String {
    "A".to_string()
}

impl DnsRule {
    pub const TABLE: &'static str = "dns_rules";

    fn compile(self) -> AppResult<CompiledRule> {
        let flag = self.base.validate()?;
        let record_type = self.record_type.to_ascii_uppercase();
        if !matches!(record_type.as_str(), "A" | "CNAME" | "TXT") {
            return Err(AppError::Validation(format!(
                "unsupported DNS record type {:?}",
                self.record_type
            )));
        }

        Ok(CompiledRule {
            id: self.base.id,
            name: self.base.name,
            base_rank: self.base.base_rank,
            push_to_client: self.base.push_to_client,
            notice: self.base.notice,
            flag,
            action: RuleAction::Dns {
                record_type,
                value: self.value,
            },
        })
    }

    pub async fn load_set<'e, E>(executor: E) -> AppResult<RuleSet>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows: Vec<DnsRule> = sqlx::query_as("SELECT * FROM dns_rules")
            .fetch_all(executor)
            .await?;
        let mut compiled = Vec::with_capacity(rows.len());
        for row in rows {
            compiled.push(row.compile()?);
        }
        Ok(RuleSet::new(compiled))
    }

    pub async fn create_or_update(registry: &Registry, rule: DnsRule) -> AppResult<i64> {
        rule.base.validate()?;

        let cache = registry.cache(Protocol::Dns);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let id: i64 = if rule.base.id == 0 {
            sqlx::query_scalar(
                r#"
                INSERT INTO dns_rules (name, flag_format, base_rank, push_to_client, notice, record_type, value)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(&rule.base.name)
            .bind(&rule.base.flag_format)
            .bind(rule.base.base_rank)
            .bind(rule.base.push_to_client)
            .bind(rule.base.notice)
            .bind(&rule.record_type)
            .bind(&rule.value)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_scalar(
                r#"
                INSERT INTO dns_rules (id, name, flag_format, base_rank, push_to_client, notice, record_type, value)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    flag_format = EXCLUDED.flag_format,
                    base_rank = EXCLUDED.base_rank,
                    push_to_client = EXCLUDED.push_to_client,
                    notice = EXCLUDED.notice,
                    record_type = EXCLUDED.record_type,
                    value = EXCLUDED.value,
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
            .bind(&rule.record_type)
            .bind(&rule.value)
            .fetch_one(&mut *tx)
            .await?
        };

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "DNS rule upserted");
        Ok(id)
    }

    pub async fn delete(registry: &Registry, id: i64) -> AppResult<()> {
        let cache = registry.cache(Protocol::Dns);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let result = sqlx::query("DELETE FROM dns_rules WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("dns rule {id}")));
        }

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "DNS rule deleted");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_validates_record_type() {
        let ok = DnsRule {
            base: BaseRule {
                id: 1,
                name: "dns".to_string(),
                ..Default::default()
            },
            record_type: "txt".to_string(),
            value: "hello".to_string(),
        };
        assert!(ok.compile().is_ok());

        let bad = DnsRule {
            base: BaseRule {
                id: 2,
                name: "dns".to_string(),
                ..Default::default()
            },
            record_type: "MX".to_string(),
            value: String::new(),
        };
        assert!(bad.compile().is_err());
    }
}
