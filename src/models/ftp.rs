//! FTP rule model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::models::rule::{
    clamp_page_size, count_sql, list_sql, order_direction, page_offset, BaseRule, Protocol,
    RuleFilter, RulePage,
};
use crate::registry::Registry;
use crate::ruleset::{CompiledRule, RuleAction, RuleSet};

/// FTP rule: base fields plus the address advertised for passive-mode data
/// connections and an optional canned payload served for retrievals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct FtpRule {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub base: BaseRule,
    #[serde(default)]
    pub pasv_address: String,
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

impl FtpRule {
    pub const TABLE: &'static str = "ftp_rules";

    fn compile(self) -> AppResult<CompiledRule> {
        let flag = self.base.validate()?;
        Ok(CompiledRule {
            id: self.base.id,
            name: self.base.name,
            base_rank: self.base.base_rank,
            push_to_client: self.base.push_to_client,
            notice: self.base.notice,
            flag,
            action: RuleAction::Ftp {
                pasv_address: self.pasv_address,
                data: self.data.unwrap_or_default(),
            },
        })
    }

    /// Load and compile the whole table into a matchable snapshot.
    pub async fn load_set<'e, E>(executor: E) -> AppResult<RuleSet>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows: Vec<FtpRule> = sqlx::query_as("SELECT * FROM ftp_rules")
            .fetch_all(executor)
            .await?;
        let mut compiled = Vec::with_capacity(rows.len());
        for row in rows {
            compiled.push(row.compile()?);
        }
        Ok(RuleSet::new(compiled))
    }

    /// Insert (`id == 0`) or upsert-by-id, then rebuild and swap the FTP rule
    /// snapshot before reporting success. A rebuild failure rolls the write
    /// back.
    pub async fn create_or_update(registry: &Registry, rule: FtpRule) -> AppResult<i64> {
        rule.base.validate()?;

        let cache = registry.cache(Protocol::Ftp);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let id: i64 = if rule.base.id == 0 {
            sqlx::query_scalar(
                r#"
                INSERT INTO ftp_rules (name, flag_format, base_rank, push_to_client, notice, pasv_address, data)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(&rule.base.name)
            .bind(&rule.base.flag_format)
            .bind(rule.base.base_rank)
            .bind(rule.base.push_to_client)
            .bind(rule.base.notice)
            .bind(&rule.pasv_address)
            .bind(&rule.data)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_scalar(
                r#"
                INSERT INTO ftp_rules (id, name, flag_format, base_rank, push_to_client, notice, pasv_address, data)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    flag_format = EXCLUDED.flag_format,
                    base_rank = EXCLUDED.base_rank,
                    push_to_client = EXCLUDED.push_to_client,
                    notice = EXCLUDED.notice,
                    pasv_address = EXCLUDED.pasv_address,
                    data = EXCLUDED.data,
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
            .bind(&rule.pasv_address)
            .bind(&rule.data)
            .fetch_one(&mut *tx)
            .await?
        };

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "FTP rule upserted");
        Ok(id)
    }

    /// Delete a rule; the removal is visible to all future matches once this
    /// returns.
    pub async fn delete(registry: &Registry, id: i64) -> AppResult<()> {
        let cache = registry.cache(Protocol::Ftp);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let result = sqlx::query("DELETE FROM ftp_rules WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("ftp rule {id}")));
        }

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "FTP rule deleted");
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
