//! Dispatcher - persists captured interactions and fans them out
//!
//! Persistence failure is fatal to a dispatch (losing the record defeats the
//! system's purpose). Live-client pushes and notifications are fail-soft and
//! never run inline on the connection-handling path.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::interaction::{Interaction, InteractionDraft};
use crate::notify::{NoticeEvent, Notifier};
use crate::realtime::LiveClients;
use crate::ruleset::MatchOutcome;

/// Durable sink for finalized interactions. The dispatcher only needs
/// append semantics, so tests can swap in an in-memory sink.
#[async_trait]
pub trait InteractionSink: Send + Sync {
    /// Store the record and assign its id. One interaction = one atomic write.
    async fn store(&self, interaction: &mut Interaction) -> AppResult<()>;
}

#[async_trait]
impl InteractionSink for PgPool {
    async fn store(&self, interaction: &mut Interaction) -> AppResult<()> {
        interaction.insert(self).await
    }
}

pub struct Dispatcher {
    sink: Arc<dyn InteractionSink>,
    live: Arc<LiveClients>,
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
    log_unmatched: bool,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn InteractionSink>,
        live: Arc<LiveClients>,
        notifiers: Vec<Arc<dyn Notifier>>,
        log_unmatched: bool,
    ) -> Self {
        Self {
            sink,
            live,
            notifiers: Arc::new(notifiers),
            log_unmatched,
        }
    }

    /// Persist one captured session and fan it out.
    ///
    /// Returns the stored interaction, or `None` when an unmatched draft is
    /// configured to be discarded.
    pub async fn dispatch(
        &self,
        draft: InteractionDraft,
        outcome: Option<MatchOutcome>,
    ) -> AppResult<Option<Interaction>> {
        let protocol = draft.protocol;

        if outcome.is_none() && !self.log_unmatched {
            tracing::debug!(protocol = %protocol, remote = %draft.remote_addr, "unmatched interaction discarded");
            return Ok(None);
        }

        let mut interaction = Interaction::from_capture(draft, outcome.as_ref());
        if let Err(err) = self.sink.store(&mut interaction).await {
            tracing::error!(protocol = %protocol, "interaction lost, persistence failed: {}", err);
            return Err(err);
        }

        if let Some(outcome) = outcome {
            tracing::info!(
                protocol = %protocol,
                rule = %outcome.rule.name,
                remote = %interaction.remote_addr,
                flag = interaction.flag.as_deref().unwrap_or("-"),
                "interaction captured"
            );

            if outcome.rule.push_to_client {
                self.live.push(protocol, &interaction);
            }

            if outcome.rule.notice {
                let event = NoticeEvent::from_interaction(&interaction);
                for notifier in self.notifiers.iter() {
                    let notifier = notifier.clone();
                    let event = event.clone();
                    // handed off, one attempt per channel per dispatch
                    tokio::spawn(async move {
                        if let Err(err) = notifier.notify(&event).await {
                            tracing::warn!(channel = notifier.channel(), "notification failed: {}", err);
                        }
                    });
                }
            }
        }

        Ok(Some(interaction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::flag::FlagFormat;
    use crate::models::rule::Protocol;
    use crate::ruleset::{CompiledRule, RuleAction, RuleSet};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct MemorySink {
        stored: Mutex<Vec<Interaction>>,
    }

    impl MemorySink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                stored: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InteractionSink for MemorySink {
        async fn store(&self, interaction: &mut Interaction) -> AppResult<()> {
            let mut stored = self.stored.lock().unwrap();
            interaction.id = stored.len() as i64 + 1;
            stored.push(interaction.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl InteractionSink for FailingSink {
        async fn store(&self, _interaction: &mut Interaction) -> AppResult<()> {
            Err(AppError::Internal("storage offline".to_string()))
        }
    }

    struct ChannelNotifier {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Notifier for ChannelNotifier {
        fn channel(&self) -> &'static str {
            "test"
        }

        async fn notify(&self, event: &NoticeEvent) -> AppResult<()> {
            self.tx.send(event.rule_name.clone()).ok();
            Ok(())
        }
    }

    fn probe_rule(push: bool, notice: bool) -> CompiledRule {
        CompiledRule {
            id: 1,
            name: "probe-1".to_string(),
            base_rank: 1,
            push_to_client: push,
            notice,
            flag: Some(FlagFormat::parse("FLAG{{}}").unwrap()),
            action: RuleAction::Ftp {
                pasv_address: String::new(),
                data: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn ftp_probe_end_to_end() {
        let sink = MemorySink::new();
        let live = Arc::new(LiveClients::new());
        let (tx, mut notified) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            sink.clone(),
            live.clone(),
            vec![Arc::new(ChannelNotifier { tx })],
            true,
        );

        let mut rx = live.subscribe(Protocol::Ftp);

        let set = RuleSet::new(vec![probe_rule(true, false)]);
        let draft = InteractionDraft::new(Protocol::Ftp, "203.0.113.9:52144")
            .field("user", "FLAG{abc123}")
            .field("password", "secret")
            .payload("USER FLAG{abc123}\r\n");

        let outcome = set.match_draft(&draft).unwrap();
        assert_eq!(outcome.rule.name, "probe-1");
        assert_eq!(outcome.token.as_deref(), Some("abc123"));

        let stored = dispatcher.dispatch(draft, Some(outcome)).await.unwrap().unwrap();
        assert_eq!(stored.id, 1);
        assert_eq!(stored.flag.as_deref(), Some("abc123"));
        assert_eq!(stored.rule_name.as_deref(), Some("probe-1"));

        // exactly one persisted record and one live push
        assert_eq!(sink.stored.lock().unwrap().len(), 1);
        let pushed = rx.try_recv().unwrap();
        assert_eq!(pushed.id, stored.id);
        assert!(rx.try_recv().is_err());

        // Notice is unset: zero notifications
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(notified.try_recv().is_err());
    }

    #[tokio::test]
    async fn notice_fans_out_off_the_capture_path() {
        let sink = MemorySink::new();
        let live = Arc::new(LiveClients::new());
        let (tx, mut notified) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            sink,
            live,
            vec![Arc::new(ChannelNotifier { tx })],
            true,
        );

        let set = RuleSet::new(vec![probe_rule(false, true)]);
        let draft =
            InteractionDraft::new(Protocol::Ftp, "203.0.113.9:52144").field("user", "FLAG{tok42}");
        let outcome = set.match_draft(&draft);

        dispatcher.dispatch(draft, outcome).await.unwrap();

        let rule_name = tokio::time::timeout(Duration::from_secs(1), notified.recv())
            .await
            .expect("notification should arrive")
            .unwrap();
        assert_eq!(rule_name, "probe-1");
    }

    #[tokio::test]
    async fn persistence_failure_is_fatal_and_pushes_nothing() {
        let live = Arc::new(LiveClients::new());
        let dispatcher = Dispatcher::new(Arc::new(FailingSink), live.clone(), Vec::new(), true);

        let mut rx = live.subscribe(Protocol::Ftp);

        let set = RuleSet::new(vec![probe_rule(true, true)]);
        let draft =
            InteractionDraft::new(Protocol::Ftp, "203.0.113.9:52144").field("user", "FLAG{tok42}");
        let outcome = set.match_draft(&draft);

        assert!(dispatcher.dispatch(draft, outcome).await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unmatched_drafts_follow_configuration() {
        let sink = MemorySink::new();
        let live = Arc::new(LiveClients::new());

        let recording = Dispatcher::new(sink.clone(), live.clone(), Vec::new(), true);
        let draft = InteractionDraft::new(Protocol::Dns, "198.51.100.4:5353");
        let stored = recording.dispatch(draft.clone(), None).await.unwrap();
        assert!(stored.is_some());
        assert_eq!(sink.stored.lock().unwrap().len(), 1);

        let discarding = Dispatcher::new(sink.clone(), live, Vec::new(), false);
        let stored = discarding.dispatch(draft, None).await.unwrap();
        assert!(stored.is_none());
        assert_eq!(sink.stored.lock().unwrap().len(), 1);
    }
}
