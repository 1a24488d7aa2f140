//! Server registry
//!
//! One explicit instance owns the database pool, the per-protocol rule
//! caches, the live-client channels, and the dispatcher. Listeners and
//! admin handlers receive it at construction; there is no process-global
//! server state, so tests can build as many independent instances as they
//! want.

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::AppResult;
use crate::models::dns::DnsRule;
use crate::models::ftp::FtpRule;
use crate::models::http::HttpRule;
use crate::models::interaction::{Interaction, InteractionDraft};
use crate::models::mysql::MysqlRule;
use crate::models::rmi::RmiRule;
use crate::models::rule::Protocol;
use crate::notify;
use crate::realtime::LiveClients;
use crate::ruleset::{MatchOutcome, RuleCache, RuleSet};

pub struct Registry {
    pool: PgPool,
    config: Config,
    caches: [RuleCache; 5],
    live: Arc<LiveClients>,
    dispatcher: Dispatcher,
}

impl Registry {
    /// Build a registry and warm every protocol's rule cache from storage.
    pub async fn bootstrap(pool: PgPool, config: Config) -> AppResult<Arc<Self>> {
        let live = Arc::new(LiveClients::new());
        let notifiers = notify::build_notifiers(&config.notice);
        let dispatcher = Dispatcher::new(
            Arc::new(pool.clone()),
            live.clone(),
            notifiers,
            config.log_unmatched,
        );

        let registry = Self {
            pool,
            config,
            caches: std::array::from_fn(|_| RuleCache::new()),
            live,
            dispatcher,
        };

        for protocol in Protocol::ALL {
            registry.rebuild(protocol).await?;
        }

        Ok(Arc::new(registry))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn live(&self) -> &Arc<LiveClients> {
        &self.live
    }

    pub fn cache(&self, protocol: Protocol) -> &RuleCache {
        &self.caches[protocol.index()]
    }

    /// Current rule snapshot for a protocol; a single pointer read.
    pub fn snapshot(&self, protocol: Protocol) -> Arc<RuleSet> {
        self.cache(protocol).snapshot()
    }

    /// Reload one protocol's rule table and swap the cache. Rule writes do
    /// this inside their own transaction; this path covers startup.
    pub async fn rebuild(&self, protocol: Protocol) -> AppResult<()> {
        let set = match protocol {
            Protocol::Dns => DnsRule::load_set(&self.pool).await?,
            Protocol::Http => HttpRule::load_set(&self.pool).await?,
            Protocol::Mysql => MysqlRule::load_set(&self.pool).await?,
            Protocol::Rmi => RmiRule::load_set(&self.pool).await?,
            Protocol::Ftp => FtpRule::load_set(&self.pool).await?,
        };
        let rules = set.len();
        self.cache(protocol).install(set);
        tracing::debug!(protocol = %protocol, rules, "rule cache rebuilt");
        Ok(())
    }

    /// Match a draft against the current snapshot without dispatching.
    /// Listeners that shape their response mid-session use this before the
    /// final capture.
    pub fn match_only(&self, draft: &InteractionDraft) -> Option<MatchOutcome> {
        self.snapshot(draft.protocol).match_draft(draft)
    }

    /// Core entry point for listeners: match and dispatch one capture.
    pub async fn capture(&self, draft: InteractionDraft) -> AppResult<Option<Interaction>> {
        let outcome = self.snapshot(draft.protocol).match_draft(&draft);
        self.dispatcher.dispatch(draft, outcome).await
    }

    /// Dispatch a capture whose match was already computed (listeners that
    /// matched early to shape their response reuse that outcome here).
    pub async fn capture_with(
        &self,
        draft: InteractionDraft,
        outcome: Option<MatchOutcome>,
    ) -> AppResult<Option<Interaction>> {
        self.dispatcher.dispatch(draft, outcome).await
    }
}
