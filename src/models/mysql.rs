//! MySQL rule model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::models::rule::{
    clamp_page_size, count_sql, list_sql, order_direction, page_offset, BaseRule, Protocol,
    RuleFilter, RulePage,
};
use crate::registry::Registry;
use crate::ruleset::{CompiledRule, RuleAction, RuleSet};

/// MySQL rule: base fields plus a comma-separated list of client files to
/// request via the LOAD DATA LOCAL INFILE flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct MysqlRule {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub base: BaseRule,
    #[serde(default)]
    pub read_files: String,
}

impl MysqlRule {
    pub const TABLE: &'static str = "mysql_rules";

    fn compile(self) -> AppResult<CompiledRule> {
        let flag = self.base.validate()?;
        Ok(CompiledRule {
            id: self.base.id,
            name: self.base.name,
            base_rank: self.base.base_rank,
            push_to_client: self.base.push_to_client,
            notice: self.base.notice,
            flag,
            action: RuleAction::Mysql {
                read_files: split_files(&self.read_files),
            },
        })
    }

    pub async fn load_set<'e, E>(executor: E) -> AppResult<RuleSet>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows: Vec<MysqlRule> = sqlx::query_as("SELECT * FROM mysql_rules")
            .fetch_all(executor)
            .await?;
        let mut compiled = Vec::with_capacity(rows.len());
        for row in rows {
            compiled.push(row.compile()?);
        }
        Ok(RuleSet::new(compiled))
    }

    pub async fn create_or_update(registry: &Registry, rule: MysqlRule) -> AppResult<i64> {
        rule.base.validate()?;

        let cache = registry.cache(Protocol::Mysql);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let id: i64 = if rule.base.id == 0 {
            sqlx::query_scalar(
                r#"
                INSERT INTO mysql_rules (name, flag_format, base_rank, push_to_client, notice, read_files)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                "#,
            )
            .bind(&rule.base.name)
            .bind(&rule.base.flag_format)
            .bind(rule.base.base_rank)
            .bind(rule.base.push_to_client)
            .bind(rule.base.notice)
            .bind(&rule.read_files)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_scalar(
                r#"
                INSERT INTO mysql_rules (id, name, flag_format, base_rank, push_to_client, notice, read_files)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    flag_format = EXCLUDED.flag_format,
                    base_rank = EXCLUDED.base_rank,
                    push_to_client = EXCLUDED.push_to_client,
                    notice = EXCLUDED.notice,
                    read_files = EXCLUDED.read_files,
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
            .bind(&rule.read_files)
            .fetch_one(&mut *tx)
            .await?
        };

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "MySQL rule upserted");
        Ok(id)
    }

    pub async fn delete(registry: &Registry, id: i64) -> AppResult<()> {
        let cache = registry.cache(Protocol::Mysql);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let result = sqlx::query("DELETE FROM mysql_rules WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("mysql rule {id}")));
        }

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "MySQL rule deleted");
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

fn split_files(read_files: &str) -> Vec<String> {
    read_files
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_list_splitting() {
        assert!(split_files("").is_empty());
        assert_eq!(
            split_files("/etc/hosts, C:/boot.ini ,"),
            vec!["/etc/hosts".to_string(), "C:/boot.ini".to_string()]
        );
    }
}
