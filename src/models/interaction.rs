//! Captured interactions and the drafts protocol listeners hand to the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::AppResult;
use crate::models::rule::{clamp_page_size, page_offset, Protocol, RulePage};
use crate::ruleset::MatchOutcome;

/// Payload snapshots are bounded; anything past this is dropped on capture.
pub const MAX_PAYLOAD_BYTES: usize = 4096;

/// What a protocol adapter captured from one inbound session, before
/// matching. Field order is the protocol's fixed match order.
#[derive(Debug, Clone)]
pub struct InteractionDraft {
    pub protocol: Protocol,
    pub remote_addr: String,
    pub captured_at: DateTime<Utc>,
    pub fields: Vec<(&'static str, String)>,
    pub payload: String,
    pub meta: serde_json::Value,
}

impl InteractionDraft {
    pub fn new(protocol: Protocol, remote_addr: impl Into<String>) -> Self {
        Self {
            protocol,
            remote_addr: remote_addr.into(),
            captured_at: Utc::now(),
            fields: Vec::new(),
            payload: String::new(),
            meta: serde_json::Value::Null,
        }
    }

    pub fn field(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((name, value.into()));
        self
    }

    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}

/// The durable record of one captured callback. Written exactly once by the
/// dispatcher, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Interaction {
    pub id: i64,
    pub protocol: String,
    pub rule_id: Option<i64>,
    pub rule_name: Option<String>,
    pub flag: Option<String>,
    pub remote_addr: String,
    pub payload: String,
    pub meta: Option<serde_json::Value>,
    pub captured_at: DateTime<Utc>,
}

/// Query-string filter for the interaction log.
#[derive(Debug, Default, Deserialize)]
pub struct InteractionFilter {
    pub protocol: Option<String>,
    pub page: Option<i64>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<i64>,
}

impl Interaction {
    /// Finalize a draft against the match result. `id` stays 0 until the
    /// record is persisted.
    pub fn from_capture(draft: InteractionDraft, outcome: Option<&MatchOutcome>) -> Self {
        Self {
            id: 0,
            protocol: draft.protocol.as_str().to_string(),
            rule_id: outcome.map(|o| o.rule.id),
            rule_name: outcome.map(|o| o.rule.name.clone()),
            flag: outcome.and_then(|o| o.token.clone()),
            remote_addr: draft.remote_addr,
            payload: bounded_payload(draft.payload),
            meta: match draft.meta {
                serde_json::Value::Null => None,
                meta => Some(meta),
            },
            captured_at: draft.captured_at,
        }
    }

    pub async fn insert(&mut self, pool: &PgPool) -> AppResult<()> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO interactions (protocol, rule_id, rule_name, flag, remote_addr, payload, meta, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&self.protocol)
        .bind(self.rule_id)
        .bind(&self.rule_name)
        .bind(&self.flag)
        .bind(&self.remote_addr)
        .bind(&self.payload)
        .bind(&self.meta)
        .bind(self.captured_at)
        .fetch_one(pool)
        .await?;

        self.id = id;
        Ok(())
    }

    /// Chronological interaction log, newest first.
    pub async fn list(pool: &PgPool, filter: InteractionFilter) -> AppResult<RulePage<Self>> {
        let protocol = filter.protocol.unwrap_or_default();
        let page_size = clamp_page_size(filter.page_size);
        let offset = page_offset(filter.page, page_size);

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM interactions WHERE ($1 = '' OR protocol = $1)")
                .bind(&protocol)
                .fetch_one(pool)
                .await?;

        let data = sqlx::query_as::<_, Interaction>(
            r#"
            SELECT * FROM interactions
            WHERE ($1 = '' OR protocol = $1)
            ORDER BY captured_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&protocol)
        .bind(page_size)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(RulePage { count, data })
    }
}

fn bounded_payload(mut payload: String) -> String {
    if payload.len() > MAX_PAYLOAD_BYTES {
        let mut end = MAX_PAYLOAD_BYTES;
        while !payload.is_char_boundary(end) {
            end -= 1;
        }
        payload.truncate(end);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_bounded() {
        let long = "a".repeat(MAX_PAYLOAD_BYTES + 100);
        let draft = InteractionDraft::new(Protocol::Ftp, "203.0.113.9:4021").payload(long);
        let interaction = Interaction::from_capture(draft, None);
        assert_eq!(interaction.payload.len(), MAX_PAYLOAD_BYTES);
        assert!(interaction.rule_id.is_none());
        assert!(interaction.flag.is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut long = "a".repeat(MAX_PAYLOAD_BYTES - 1);
        long.push('é');
        long.push_str("tail");
        let bounded = bounded_payload(long);
        assert!(bounded.len() <= MAX_PAYLOAD_BYTES);
        assert!(bounded.is_char_boundary(bounded.len()));
    }

    #[test]
    fn null_meta_is_dropped() {
        let draft = InteractionDraft::new(Protocol::Dns, "198.51.100.4:53");
        let interaction = Interaction::from_capture(draft, None);
        assert!(interaction.meta.is_none());
        assert_eq!(interaction.protocol, "dns");
    }
}
