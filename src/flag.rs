//! Flag codec - mints correlation tokens into flag templates and extracts
//! them back out of captured payloads.

use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Placeholder marking the token position inside a flag format.
pub const PLACEHOLDER: &str = "{}";

/// A parsed flag format: the literal text around the single `{}` placeholder.
///
/// `FLAG{{}}` parses to prefix `FLAG{` and suffix `}`, so a minted flag looks
/// like `FLAG{0c3d...}` and extraction scans payloads for that exact framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagFormat {
    prefix: String,
    suffix: String,
}

impl FlagFormat {
    /// Parse a format template. The template must contain exactly one `{}`.
    pub fn parse(format: &str) -> AppResult<Self> {
        if format.is_empty() {
            return Err(AppError::Validation("flag format is empty".to_string()));
        }
        let mut parts = format.splitn(2, PLACEHOLDER);
        let prefix = parts
            .next()
            .ok_or_else(|| AppError::Validation("flag format has no placeholder".to_string()))?;
        let suffix = match parts.next() {
            Some(s) => s,
            None => {
                return Err(AppError::Validation(format!(
                    "flag format {:?} has no {} placeholder",
                    format, PLACEHOLDER
                )))
            }
        };
        if suffix.contains(PLACEHOLDER) {
            return Err(AppError::Validation(format!(
                "flag format {:?} has more than one {} placeholder",
                format, PLACEHOLDER
            )));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Mint a fresh token and substitute it into the template.
    ///
    /// Returns `(flag, token)`: the full literal string to embed in an
    /// outbound probe, and the bare token it carries.
    pub fn mint(&self) -> (String, String) {
        let token = Uuid::new_v4().simple().to_string();
        let flag = format!("{}{}{}", self.prefix, token, self.suffix);
        (flag, token)
    }

    /// Scan `payload` for a well-formed flag occurrence and return its token.
    ///
    /// The token is a nonempty ASCII-alphanumeric run framed by the exact
    /// prefix and suffix. Malformed occurrences (empty run, missing suffix)
    /// are skipped, so noise before a valid flag does not mask it.
    pub fn extract(&self, payload: &str) -> Option<String> {
        let bytes = payload.as_bytes();

        let candidates: Vec<usize> = if self.prefix.is_empty() {
            (0..bytes.len())
                .filter(|&i| {
                    bytes[i].is_ascii_alphanumeric()
                        && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric())
                })
                .collect()
        } else {
            payload
                .match_indices(&self.prefix)
                .map(|(i, m)| i + m.len())
                .collect()
        };

        for start in candidates {
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_alphanumeric() {
                end += 1;
            }
            if end == start {
                continue;
            }
            if payload[end..].starts_with(&self.suffix) {
                return Some(payload[start..end].to_string());
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_requires_exactly_one_placeholder() {
        assert!(FlagFormat::parse("FLAG{{}}").is_ok());
        assert!(FlagFormat::parse("{}").is_ok());
        assert!(FlagFormat::parse("").is_err());
        assert!(FlagFormat::parse("FLAG{token}").is_err());
        assert!(FlagFormat::parse("{}-{}").is_err());
    }

    #[test]
    fn parse_splits_prefix_and_suffix() {
        let f = FlagFormat::parse("FLAG{{}}").unwrap();
        assert_eq!(f.prefix, "FLAG{");
        assert_eq!(f.suffix, "}");

        let f = FlagFormat::parse("probe-{}.cb").unwrap();
        assert_eq!(f.prefix, "probe-");
        assert_eq!(f.suffix, ".cb");
    }

    #[test]
    fn mint_extract_round_trip() {
        for format in ["FLAG{{}}", "x{}", "{}", "a-{}-b"] {
            let f = FlagFormat::parse(format).unwrap();
            let (flag, token) = f.mint();
            assert_eq!(f.extract(&flag), Some(token));
        }
    }

    #[test]
    fn extract_tolerates_surrounding_noise() {
        let f = FlagFormat::parse("FLAG{{}}").unwrap();
        let payload = "USER FLAG{abc123}\r\n";
        assert_eq!(f.extract(payload), Some("abc123".to_string()));

        let binaryish = "\u{1}\u{2}garbage FLAG{deadbeef} trailing";
        assert_eq!(f.extract(binaryish), Some("deadbeef".to_string()));
    }

    #[test]
    fn extract_rejects_wrong_framing() {
        let f = FlagFormat::parse("FLAG{{}}").unwrap();
        assert_eq!(f.extract("FLAG{unclosed"), None);
        assert_eq!(f.extract("FLAG{}"), None);
        assert_eq!(f.extract("LAG{abc}"), None);
        assert_eq!(f.extract("no flag here"), None);
    }

    #[test]
    fn extract_skips_malformed_occurrences() {
        let f = FlagFormat::parse("FLAG{{}}").unwrap();
        let payload = "FLAG{ } then FLAG{real1} done";
        assert_eq!(f.extract(payload), Some("real1".to_string()));
    }

    #[test]
    fn extract_with_empty_suffix() {
        let f = FlagFormat::parse("cb-{}").unwrap();
        assert_eq!(
            f.extract("lookup cb-a1b2c3.callback.test"),
            Some("a1b2c3".to_string())
        );
    }

    #[test]
    fn minted_tokens_are_distinct() {
        let f = FlagFormat::parse("FLAG{{}}").unwrap();
        let (_, t1) = f.mint();
        let (_, t2) = f.mint();
        assert_ne!(t1, t2);
        assert_eq!(t1.len(), 32);
        assert!(t1.bytes().all(|b| b.is_ascii_alphanumeric()));
    }
}
