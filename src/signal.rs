//! Cross-view highlight signaling.
//!
//! One process-wide bus replaces the storage-key-plus-ambient-event scheme:
//! three independent channels, each with at most one live pending target.
//! A request stores the target, announces the tab to switch to, waits a
//! short delay so the receiving view can mount the right tab, then fires
//! the highlight event. Consumption is at-most-once: the target slot is
//! taken only when a receiver actually finds the element; a lookup miss
//! leaves the slot in place.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// The three highlight channels. A target posted on one channel is never
/// visible to receivers of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HighlightChannel {
    /// A freshly listed (or priority/expiring) donation.
    NewDonation,
    /// A tracking-status update on an in-progress donation.
    DonationStatus,
    /// A request the bakery accepted.
    AcceptedRequest,
}

impl HighlightChannel {
    /// Prefix of the element id a receiver resolves, e.g. `received-42`.
    pub fn element_prefix(&self) -> &'static str {
        match self {
            HighlightChannel::NewDonation => "received",
            HighlightChannel::DonationStatus => "accepted",
            HighlightChannel::AcceptedRequest => "accepted",
        }
    }
}

#[derive(Debug)]
pub struct SignalBus {
    pending: Mutex<HashMap<HighlightChannel, i64>>,
    tab_tx: broadcast::Sender<HighlightChannel>,
    highlight_tx: broadcast::Sender<HighlightChannel>,
    tab_switch_delay: Duration,
}

impl SignalBus {
    pub fn new(tab_switch_delay: Duration) -> Self {
        let (tab_tx, _) = broadcast::channel(16);
        let (highlight_tx, _) = broadcast::channel(16);
        Self {
            pending: Mutex::new(HashMap::new()),
            tab_tx,
            highlight_tx,
            tab_switch_delay,
        }
    }

    pub fn subscribe_tabs(&self) -> broadcast::Receiver<HighlightChannel> {
        self.tab_tx.subscribe()
    }

    pub fn subscribe_highlights(&self) -> broadcast::Receiver<HighlightChannel> {
        self.highlight_tx.subscribe()
    }

    /// Post a highlight target and notify receivers. A previous unconsumed
    /// target on the same channel is replaced; other channels are untouched.
    pub async fn request_highlight(&self, channel: HighlightChannel, entity_id: i64) {
        self.pending
            .lock()
            .expect("signal bus poisoned")
            .insert(channel, entity_id);

        // Give the receiving view time to mount the right tab before the
        // highlight lookup runs.
        let _ = self.tab_tx.send(channel);
        tokio::time::sleep(self.tab_switch_delay).await;
        let _ = self.highlight_tx.send(channel);
    }

    /// Read the pending target without consuming it.
    pub fn peek(&self, channel: HighlightChannel) -> Option<i64> {
        self.pending
            .lock()
            .expect("signal bus poisoned")
            .get(&channel)
            .copied()
    }

    /// Take the pending target. Returns `None` if it was already consumed,
    /// which is what makes delivery at-most-once.
    pub fn consume(&self, channel: HighlightChannel) -> Option<i64> {
        self.pending
            .lock()
            .expect("signal bus poisoned")
            .remove(&channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> SignalBus {
        SignalBus::new(Duration::from_millis(0))
    }

    #[tokio::test]
    async fn consume_is_at_most_once() {
        let bus = bus();
        bus.request_highlight(HighlightChannel::NewDonation, 99).await;
        assert_eq!(bus.consume(HighlightChannel::NewDonation), Some(99));
        assert_eq!(bus.consume(HighlightChannel::NewDonation), None);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let bus = bus();
        bus.request_highlight(HighlightChannel::DonationStatus, 7).await;
        assert_eq!(bus.peek(HighlightChannel::DonationStatus), Some(7));
        assert_eq!(bus.peek(HighlightChannel::DonationStatus), Some(7));
        assert_eq!(bus.consume(HighlightChannel::DonationStatus), Some(7));
    }

    #[tokio::test]
    async fn channels_do_not_cross_trigger() {
        let bus = bus();
        bus.request_highlight(HighlightChannel::AcceptedRequest, 5).await;
        assert_eq!(bus.peek(HighlightChannel::NewDonation), None);
        assert_eq!(bus.peek(HighlightChannel::DonationStatus), None);
        assert_eq!(bus.consume(HighlightChannel::AcceptedRequest), Some(5));
    }

    #[tokio::test]
    async fn new_request_replaces_unconsumed_target() {
        let bus = bus();
        bus.request_highlight(HighlightChannel::NewDonation, 1).await;
        bus.request_highlight(HighlightChannel::NewDonation, 2).await;
        assert_eq!(bus.consume(HighlightChannel::NewDonation), Some(2));
        assert_eq!(bus.consume(HighlightChannel::NewDonation), None);
    }

    #[tokio::test]
    async fn tab_event_precedes_highlight_event() {
        let bus = bus();
        let mut tabs = bus.subscribe_tabs();
        let mut highlights = bus.subscribe_highlights();

        bus.request_highlight(HighlightChannel::NewDonation, 3).await;

        assert_eq!(tabs.recv().await.unwrap(), HighlightChannel::NewDonation);
        assert_eq!(
            highlights.recv().await.unwrap(),
            HighlightChannel::NewDonation
        );
    }
}
