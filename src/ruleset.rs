//! Compiled rule snapshots and the matching engine.
//!
//! Each protocol keeps a read-optimized snapshot of its active rules,
//! rebuilt from storage on every rule write and swapped in atomically so
//! in-flight matches always complete against a consistent view.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::flag::FlagFormat;
use crate::models::interaction::InteractionDraft;

/// A rule in matchable form: base fields plus the parsed flag format and the
/// protocol-specific response shaping the listener applies on a match.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: i64,
    pub name: String,
    pub base_rank: i32,
    pub push_to_client: bool,
    pub notice: bool,
    /// `None` is a catch-all: no extraction, matches unconditionally.
    pub flag: Option<FlagFormat>,
    pub action: RuleAction,
}

/// Listener-facing response shaping carried by a matched rule.
#[derive(Debug, Clone)]
pub enum RuleAction {
    Ftp {
        pasv_address: String,
        data: Vec<u8>,
    },
    Http {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    Dns {
        record_type: String,
        value: String,
    },
    Mysql {
        read_files: Vec<String>,
    },
    Rmi,
}

/// The result of matching a draft: the winning rule and the token its flag
/// format extracted (catch-alls carry no token).
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub rule: Arc<CompiledRule>,
    pub token: Option<String>,
}

/// An immutable, rank-ordered rule snapshot for one protocol.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Arc<CompiledRule>>,
}

impl RuleSet {
    /// Sort rank-descending with id ascending as the deterministic tie-break.
    pub fn new(mut rules: Vec<CompiledRule>) -> Self {
        rules.sort_by(|a, b| b.base_rank.cmp(&a.base_rank).then(a.id.cmp(&b.id)));
        Self {
            rules: rules.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledRule>> {
        self.rules.iter()
    }

    /// Find the best matching rule for a draft.
    ///
    /// Flag-bearing rules are tried in rank order, each against the draft's
    /// scannable fields in their fixed order; the first extracted token wins.
    /// Only when no flag-bearing rule yields a token does the highest-ranked
    /// catch-all apply.
    pub fn match_draft(&self, draft: &InteractionDraft) -> Option<MatchOutcome> {
        let mut catch_all: Option<&Arc<CompiledRule>> = None;

        for rule in &self.rules {
            match &rule.flag {
                Some(format) => {
                    for (_, value) in &draft.fields {
                        if let Some(token) = format.extract(value) {
                            return Some(MatchOutcome {
                                rule: rule.clone(),
                                token: Some(token),
                            });
                        }
                    }
                }
                None => {
                    // rules are already sorted, so the first catch-all seen
                    // is the highest-ranked one
                    if catch_all.is_none() {
                        catch_all = Some(rule);
                    }
                }
            }
        }

        catch_all.map(|rule| MatchOutcome {
            rule: rule.clone(),
            token: None,
        })
    }
}

/// Copy-on-write holder for one protocol's rule snapshot.
///
/// Readers take a cheap Arc clone and keep matching against it even while a
/// rebuild installs a replacement. Writers serialize on `write_serial` so
/// concurrent rule edits cannot interleave a rebuild.
#[derive(Debug, Default)]
pub struct RuleCache {
    snapshot: RwLock<Arc<RuleSet>>,
    write_serial: Mutex<()>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot; a single pointer read plus refcount bump.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.snapshot.read().clone()
    }

    /// Atomically replace the snapshot.
    pub fn install(&self, set: RuleSet) {
        *self.snapshot.write() = Arc::new(set);
    }

    /// Guard serializing store writes and rebuilds for this protocol.
    pub fn write_serial(&self) -> &Mutex<()> {
        &self.write_serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::Protocol;

    fn rule(id: i64, rank: i32, format: &str) -> CompiledRule {
        CompiledRule {
            id,
            name: format!("rule-{id}"),
            base_rank: rank,
            push_to_client: false,
            notice: false,
            flag: if format.is_empty() {
                None
            } else {
                Some(FlagFormat::parse(format).unwrap())
            },
            action: RuleAction::Rmi,
        }
    }

    fn draft(fields: &[(&'static str, &str)]) -> InteractionDraft {
        let mut d = InteractionDraft::new(Protocol::Rmi, "192.0.2.7:9999");
        for (name, value) in fields {
            d = d.field(name, *value);
        }
        d
    }

    #[test]
    fn ordering_is_rank_desc_then_id_asc() {
        let set = RuleSet::new(vec![
            rule(3, 5, "A{{}}"),
            rule(1, 5, "B{{}}"),
            rule(2, 9, "C{{}}"),
        ]);
        let ids: Vec<i64> = set.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn flag_at_lower_rank_beats_absence_at_higher_rank() {
        let set = RuleSet::new(vec![rule(1, 10, "HIGH{{}}"), rule(2, 5, "LOW{{}}")]);

        let out = set
            .match_draft(&draft(&[("raw", "noise LOW{abc123} noise")]))
            .unwrap();
        assert_eq!(out.rule.id, 2);
        assert_eq!(out.token.as_deref(), Some("abc123"));
    }

    #[test]
    fn both_flags_present_resolves_by_rank() {
        let set = RuleSet::new(vec![rule(1, 10, "HIGH{{}}"), rule(2, 5, "LOW{{}}")]);

        let out = set
            .match_draft(&draft(&[("raw", "HIGH{aaa1} LOW{bbb2}")]))
            .unwrap();
        assert_eq!(out.rule.id, 1);
        assert_eq!(out.token.as_deref(), Some("aaa1"));
    }

    #[test]
    fn rank_ties_break_by_insertion_order() {
        let set = RuleSet::new(vec![rule(7, 3, "X{{}}"), rule(4, 3, "X{{}}")]);

        let out = set.match_draft(&draft(&[("raw", "X{tok1}")])).unwrap();
        assert_eq!(out.rule.id, 4);
    }

    #[test]
    fn field_order_decides_within_one_rule() {
        let set = RuleSet::new(vec![rule(1, 1, "F{{}}")]);

        let out = set
            .match_draft(&draft(&[("user", "F{first1}"), ("password", "F{second2}")]))
            .unwrap();
        assert_eq!(out.token.as_deref(), Some("first1"));
    }

    #[test]
    fn catch_all_applies_only_when_no_flag_rule_matches() {
        let set = RuleSet::new(vec![rule(1, 10, "F{{}}"), rule(2, 0, "")]);

        let out = set.match_draft(&draft(&[("raw", "nothing here")])).unwrap();
        assert_eq!(out.rule.id, 2);
        assert!(out.token.is_none());

        let out = set.match_draft(&draft(&[("raw", "F{tok9}")])).unwrap();
        assert_eq!(out.rule.id, 1);
    }

    #[test]
    fn highest_ranked_catch_all_wins() {
        let set = RuleSet::new(vec![rule(1, 1, ""), rule(2, 5, "")]);

        let out = set.match_draft(&draft(&[("raw", "anything")])).unwrap();
        assert_eq!(out.rule.id, 2);
    }

    #[test]
    fn empty_set_matches_nothing() {
        let set = RuleSet::new(Vec::new());
        assert!(set.match_draft(&draft(&[("raw", "F{tok1}")])).is_none());
    }

    #[test]
    fn snapshots_survive_concurrent_installs() {
        let cache = Arc::new(RuleCache::new());
        cache.install(RuleSet::new(vec![rule(1, 1, "F{{}}")]));

        let before = cache.snapshot();
        cache.install(RuleSet::new(vec![rule(2, 1, "G{{}}")]));

        // the pre-swap snapshot still matches against its own consistent view
        let out = before.match_draft(&draft(&[("raw", "F{old1}")])).unwrap();
        assert_eq!(out.rule.id, 1);

        // new readers see the replacement
        assert!(cache
            .snapshot()
            .match_draft(&draft(&[("raw", "F{old1}")]))
            .is_none());
    }
}
