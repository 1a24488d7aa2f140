//! Shared rule base shape and list-query helpers
//!
//! Every protocol family stores its rules in its own table; the columns in
//! `BaseRule` are common to all of them and protocol-specific models embed
//! it via sqlx/serde flatten.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::flag::FlagFormat;

/// Protocol families with their own rule table and listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Dns,
    Http,
    Mysql,
    Rmi,
    Ftp,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::Dns,
        Protocol::Http,
        Protocol::Mysql,
        Protocol::Rmi,
        Protocol::Ftp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Dns => "dns",
            Protocol::Http => "http",
            Protocol::Mysql => "mysql",
            Protocol::Rmi => "rmi",
            Protocol::Ftp => "ftp",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Protocol::Dns => 0,
            Protocol::Http => 1,
            Protocol::Mysql => 2,
            Protocol::Rmi => 3,
            Protocol::Ftp => 4,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dns" => Ok(Protocol::Dns),
            "http" => Ok(Protocol::Http),
            "mysql" => Ok(Protocol::Mysql),
            "rmi" => Ok(Protocol::Rmi),
            "ftp" => Ok(Protocol::Ftp),
            other => Err(AppError::Validation(format!("unknown protocol {:?}", other))),
        }
    }
}

/// Columns shared by every rule family.
///
/// `id == 0` means "not yet persisted": create_or_update inserts and lets
/// storage assign the id; nonzero ids upsert in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct BaseRule {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub flag_format: String,
    #[serde(default)]
    pub base_rank: i32,
    #[serde(default)]
    pub push_to_client: bool,
    #[serde(default)]
    pub notice: bool,
}

impl BaseRule {
    /// Validate the base fields before any write reaches storage.
    ///
    /// Returns the parsed flag format, or `None` for a catch-all rule.
    pub fn validate(&self) -> AppResult<Option<FlagFormat>> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("rule name is required".to_string()));
        }
        if self.flag_format.is_empty() {
            return Ok(None);
        }
        FlagFormat::parse(&self.flag_format).map(Some)
    }
}

/// Query-string filter for rule listing.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RuleFilter {
    pub name: Option<String>,
    pub page: Option<i64>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<i64>,
    pub order: Option<String>,
}

/// One page of rule rows plus the unpaginated total.
#[derive(Debug, Serialize)]
pub struct RulePage<T> {
    pub count: i64,
    pub data: Vec<T>,
}

pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Requested page sizes are accepted only inside the open interval (0, 100);
/// everything else resolves to the default.
pub fn clamp_page_size(requested: Option<i64>) -> i64 {
    match requested {
        Some(n) if n > 0 && n < 100 => n,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Secondary sort direction: the literal `asc` ascends, anything else
/// descends. Primary ordering is always `base_rank DESC`.
pub fn order_direction(order: Option<&str>) -> &'static str {
    match order {
        Some("asc") => "ASC",
        _ => "DESC",
    }
}

/// 1-based page to row offset.
pub fn page_offset(page: Option<i64>, page_size: i64) -> i64 {
    let page = page.unwrap_or(1).max(1);
    (page - 1) * page_size
}

/// Shared SELECT for rule listings; `table` is a compile-time constant in
/// every caller, never user input.
pub(crate) fn list_sql(table: &str, direction: &str) -> String {
    format!(
        "SELECT * FROM {table} WHERE ($1 = '' OR name = $1) \
         ORDER BY base_rank DESC, id {direction} LIMIT $2 OFFSET $3"
    )
}

pub(crate) fn count_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {table} WHERE ($1 = '' OR name = $1)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_clamping() {
        assert_eq!(clamp_page_size(None), 10);
        assert_eq!(clamp_page_size(Some(0)), 10);
        assert_eq!(clamp_page_size(Some(1)), 1);
        assert_eq!(clamp_page_size(Some(99)), 99);
        assert_eq!(clamp_page_size(Some(100)), 10);
        assert_eq!(clamp_page_size(Some(1000)), 10);
        assert_eq!(clamp_page_size(Some(-5)), 10);
    }

    #[test]
    fn order_token_handling() {
        assert_eq!(order_direction(Some("asc")), "ASC");
        assert_eq!(order_direction(Some("desc")), "DESC");
        assert_eq!(order_direction(Some("ASC")), "DESC");
        assert_eq!(order_direction(Some("bogus")), "DESC");
        assert_eq!(order_direction(None), "DESC");
    }

    #[test]
    fn offsets_are_one_based() {
        assert_eq!(page_offset(None, 10), 0);
        assert_eq!(page_offset(Some(1), 10), 0);
        assert_eq!(page_offset(Some(3), 10), 20);
        assert_eq!(page_offset(Some(0), 10), 0);
    }

    #[test]
    fn base_rule_validation() {
        let mut rule = BaseRule {
            name: "probe".to_string(),
            ..Default::default()
        };
        assert!(matches!(rule.validate(), Ok(None)));

        rule.flag_format = "FLAG{{}}".to_string();
        assert!(matches!(rule.validate(), Ok(Some(_))));

        rule.flag_format = "no placeholder".to_string();
        assert!(rule.validate().is_err());

        rule.name = " ".to_string();
        rule.flag_format = String::new();
        assert!(rule.validate().is_err());
    }
}
