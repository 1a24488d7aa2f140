//! Live client push channels
//!
//! One broadcast channel per protocol. Subscribers come and go (SSE
//! connections, tests); a disconnected or lagged subscriber never affects
//! delivery to the others.

use tokio::sync::broadcast;

use crate::models::interaction::Interaction;
use crate::models::rule::Protocol;

const CHANNEL_CAPACITY: usize = 256;

pub struct LiveClients {
    channels: [broadcast::Sender<Interaction>; 5],
}

impl LiveClients {
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| broadcast::channel(CHANNEL_CAPACITY).0),
        }
    }

    pub fn subscribe(&self, protocol: Protocol) -> broadcast::Receiver<Interaction> {
        self.channels[protocol.index()].subscribe()
    }

    pub fn push(&self, protocol: Protocol, interaction: &Interaction) {
        // Err just means nobody is listening right now
        let delivered = self.channels[protocol.index()]
            .send(interaction.clone())
            .unwrap_or(0);
        tracing::debug!(protocol = %protocol, delivered, "live push");
    }

    pub fn subscriber_count(&self, protocol: Protocol) -> usize {
        self.channels[protocol.index()].receiver_count()
    }
}

impl Default for LiveClients {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::interaction::InteractionDraft;

    fn interaction(protocol: Protocol) -> Interaction {
        Interaction::from_capture(InteractionDraft::new(protocol, "192.0.2.1:4021"), None)
    }

    #[test]
    fn pushes_reach_only_the_protocol_subscribers() {
        tokio_test::block_on(async {
            let live = LiveClients::new();
            let mut ftp_rx = live.subscribe(Protocol::Ftp);
            let mut dns_rx = live.subscribe(Protocol::Dns);

            live.push(Protocol::Ftp, &interaction(Protocol::Ftp));

            assert!(ftp_rx.try_recv().is_ok());
            assert!(dns_rx.try_recv().is_err());
        });
    }

    #[test]
    fn dropped_subscriber_does_not_affect_the_rest() {
        tokio_test::block_on(async {
            let live = LiveClients::new();
            let gone = live.subscribe(Protocol::Ftp);
            let mut kept = live.subscribe(Protocol::Ftp);
            drop(gone);

            live.push(Protocol::Ftp, &interaction(Protocol::Ftp));

            assert!(kept.try_recv().is_ok());
            assert_eq!(live.subscriber_count(Protocol::Ftp), 1);
        });
    }
}
