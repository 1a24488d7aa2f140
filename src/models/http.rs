//! HTTP rule model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::{AppError, AppResult};
use crate::models::rule::{
    clamp_page_size, count_sql, list_sql, order_direction, page_offset, BaseRule, Protocol,
    RuleFilter, RulePage,
};
use crate::registry::Registry;
use crate::ruleset::{CompiledRule, RuleAction, RuleSet};

/// HTTP rule: base fields plus the response served to a matching request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HttpRule {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub base: BaseRule,
    #[serde(default = "default_status")]
    pub response_status: i32,
    /// JSON object of header name/value pairs.
    #[serde(default)]
    pub response_headers: Option<serde_json::Value>,
    #[serde(default)]
    pub response_body: String,
}

fn default_status() -> i32 {
    200
}

impl HttpRule {
    pub const TABLE: &'static str = "http_rules";

    fn compile(self) -> AppResult<CompiledRule> {
        let flag = self.base.validate()?;
        let status = u16::try_from(self.response_status)
            .ok()
            .filter(|s| (100..=599).contains(s))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "response status {} out of range",
                    self.response_status
                ))
            })?;

        let headers = match &self.response_headers {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            Some(_) => {
                return Err(AppError::Validation(
                    "response_headers must be a JSON object".to_string(),
                ))
            }
        };

        Ok(CompiledRule {
            id: self.base.id,
            name: self.base.name,
            base_rank: self.base.base_rank,
            push_to_client: self.base.push_to_client,
            notice: self.base.notice,
            flag,
            action: RuleAction::Http {
                status,
                headers,
                body: self.response_body,
            },
        })
    }

    pub async fn load_set<'e, E>(executor: E) -> AppResult<RuleSet>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows: Vec<HttpRule> = sqlx::query_as("SELECT * FROM http_rules")
            .fetch_all(executor)
            .await?;
        let mut compiled = Vec::with_capacity(rows.len());
        for row in rows {
            compiled.push(row.compile()?);
        }
        Ok(RuleSet::new(compiled))
    }

    pub async fn create_or_update(registry: &Registry, rule: HttpRule) -> AppResult<i64> {
        rule.base.validate()?;

        let cache = registry.cache(Protocol::Http);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let id: i64 = if rule.base.id == 0 {
            sqlx::query_scalar(
                r#"
                INSERT INTO http_rules (name, flag_format, base_rank, push_to_client, notice, response_status, response_headers, response_body)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(&rule.base.name)
            .bind(&rule.base.flag_format)
            .bind(rule.base.base_rank)
            .bind(rule.base.push_to_client)
            .bind(rule.base.notice)
            .bind(rule.response_status)
            .bind(&rule.response_headers)
            .bind(&rule.response_body)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_scalar(
                r#"
                INSERT INTO http_rules (id, name, flag_format, base_rank, push_to_client, notice, response_status, response_headers, response_body)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    flag_format = EXCLUDED.flag_format,
                    base_rank = EXCLUDED.base_rank,
                    push_to_client = EXCLUDED.push_to_client,
                    notice = EXCLUDED.notice,
                    response_status = EXCLUDED.response_status,
                    response_headers = EXCLUDED.response_headers,
                    response_body = EXCLUDED.response_body,
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
            .bind(rule.response_status)
            .bind(&rule.response_headers)
            .bind(&rule.response_body)
            .fetch_one(&mut *tx)
            .await?
        };

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "HTTP rule upserted");
        Ok(id)
    }

    pub async fn delete(registry: &Registry, id: i64) -> AppResult<()> {
        let cache = registry.cache(Protocol::Http);
        let _serial = cache.write_serial().lock().await;

        let mut tx = registry.pool().begin().await?;
        let result = sqlx::query("DELETE FROM http_rules WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("http rule {id}")));
        }

        let set = Self::load_set(&mut *tx).await?;
        tx.commit().await?;
        cache.install(set);

        tracing::info!(id, "HTTP rule deleted");
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
    use crate::ruleset::RuleAction;

    fn base(name: &str, format: &str) -> BaseRule {
        BaseRule {
            id: 1,
            name: name.to_string(),
            flag_format: format.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn compile_converts_header_object() {
        let rule = HttpRule {
            base: base("hdr", "F{{}}"),
            response_status: 302,
            response_headers: Some(serde_json::json!({"Location": "https://example.com"})),
            response_body: String::new(),
        };
        let compiled = rule.compile().unwrap();
        match compiled.action {
            RuleAction::Http { status, headers, .. } => {
                assert_eq!(status, 302);
                assert_eq!(
                    headers,
                    vec![("Location".to_string(), "https://example.com".to_string())]
                );
            }
            _ => panic!("expected http action"),
        }
    }

    #[test]
    fn compile_rejects_bad_status_and_headers() {
        let rule = HttpRule {
            base: base("bad", ""),
            response_status: 99,
            response_headers: None,
            response_body: String::new(),
        };
        assert!(rule.compile().is_err());

        let rule = HttpRule {
            base: base("bad", ""),
            response_status: 200,
            response_headers: Some(serde_json::json!(["not", "an", "object"])),
            response_body: String::new(),
        };
        assert!(rule.compile().is_err());
    }
}
