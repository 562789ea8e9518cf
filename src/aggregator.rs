//! Charity-side notification feed.
//!
//! Polls the backend on a fixed cadence, merges the four collections into
//! category feeds, and decorates every entry with its locally persisted
//! read flag. Feeds are rebuilt wholesale from the latest resolved payload;
//! a slow response landing after a newer one simply gets overwritten on the
//! next tick (accepted race, self-corrects within one interval).

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::api::{BackendApi, CharityFeed, ReceivedNotice};
use crate::model::{Notification, NotificationKind};
use crate::signal::{HighlightChannel, SignalBus};
use crate::store::ReadStateStore;

/// What a click on a feed entry should do beyond marking it read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Highlight channel to route the navigation to; `None` for messages,
    /// which open the conversation instead.
    pub channel: Option<HighlightChannel>,
    /// Donation/request id the highlight should land on.
    pub entity: i64,
    /// Backend id for the best-effort read acknowledgment.
    pub backend_id: i64,
}

pub struct NotificationAggregator {
    store: ReadStateStore,
    new_donations: Vec<Notification>,
    priority: Vec<Notification>,
    received_updates: Vec<Notification>,
    messages: Vec<Notification>,
    update_types: HashMap<String, String>,
}

impl NotificationAggregator {
    pub fn new(store: ReadStateStore) -> Self {
        Self {
            store,
            new_donations: Vec::new(),
            priority: Vec::new(),
            received_updates: Vec::new(),
            messages: Vec::new(),
            update_types: HashMap::new(),
        }
    }

    /// Replace all category feeds with the given poll payload. Read flags
    /// are recomputed from the store so a click that happened in another
    /// view is reflected here on the next tick.
    pub fn apply_poll(&mut self, feed: CharityFeed) {
        self.new_donations = dedupe_last_wins(
            feed.donations
                .iter()
                .map(|d| Notification {
                    id: format!("donation-{}", d.id),
                    kind: NotificationKind::NewDonation,
                    actor: d.bakery_name.clone(),
                    avatar: d.bakery_avatar.clone(),
                    message: format!("{} listed {}", d.bakery_name, d.name),
                    read: false,
                    backend_id: d.id,
                    entity_ref: d.id,
                    request_pending: false,
                    distance_km: None,
                    expires_on: None,
                })
                .collect(),
        );

        self.priority = dedupe_last_wins(
            feed.geofence_notifications
                .iter()
                .map(|g| Notification {
                    id: format!("geo-{}", g.id),
                    kind: NotificationKind::PriorityExpiring,
                    actor: g.bakery_name.clone(),
                    avatar: g.bakery_avatar.clone(),
                    message: format!("{} expiring soon: {}", g.bakery_name, g.name),
                    read: false,
                    backend_id: g.id,
                    entity_ref: g.request_id.unwrap_or(g.id),
                    request_pending: g.status.eq_ignore_ascii_case("pending"),
                    distance_km: g.distance_km,
                    expires_on: g.expiration_date,
                })
                .collect(),
        );

        self.update_types = feed
            .received_donations
            .iter()
            .map(|r| (format!("recv-{}", r.id), r.update_type.clone()))
            .collect();
        self.received_updates = dedupe_last_wins(
            feed.received_donations
                .iter()
                .map(|r| Notification {
                    id: format!("recv-{}", r.id),
                    kind: NotificationKind::ReceivedUpdate,
                    actor: r.bakery_name.clone(),
                    avatar: r.bakery_avatar.clone(),
                    message: received_update_message(r),
                    read: false,
                    backend_id: r.id,
                    entity_ref: r.id,
                    request_pending: false,
                    distance_km: None,
                    expires_on: None,
                })
                .collect(),
        );

        self.messages = dedupe_last_wins(
            feed.messages
                .iter()
                .map(|m| Notification {
                    id: format!("msg-{}", m.id),
                    kind: NotificationKind::Message,
                    actor: m.sender_name.clone(),
                    avatar: m.sender_avatar.clone(),
                    message: m.body.clone(),
                    read: false,
                    backend_id: m.id,
                    entity_ref: m.id,
                    request_pending: false,
                    distance_km: None,
                    expires_on: None,
                })
                .collect(),
        );

        for category in [
            &mut self.new_donations,
            &mut self.priority,
            &mut self.received_updates,
            &mut self.messages,
        ] {
            for entry in category.iter_mut() {
                entry.read = self.store.has(&entry.id);
            }
        }
    }

    pub fn new_donations(&self) -> &[Notification] {
        &self.new_donations
    }

    pub fn priority(&self) -> &[Notification] {
        &self.priority
    }

    pub fn received_updates(&self) -> &[Notification] {
        &self.received_updates
    }

    pub fn messages(&self) -> &[Notification] {
        &self.messages
    }

    /// Donation panel ordering: the priority group always renders above the
    /// plain new-donations group, regardless of poll order.
    pub fn donation_panel(&self) -> Vec<&Notification> {
        self.priority.iter().chain(self.new_donations.iter()).collect()
    }

    /// Unread badge. A donation present both as a priority alert and as a
    /// plain new-donation entry counts once. The overlap is keyed on the
    /// donation's own backend id; `entity_ref` can be a request id.
    pub fn badge_count(&self) -> usize {
        let priority_donations: HashSet<i64> =
            self.priority.iter().map(|n| n.backend_id).collect();
        let unread = |n: &&Notification| !n.read;

        let priority = self.priority.iter().filter(unread).count();
        let new = self
            .new_donations
            .iter()
            .filter(unread)
            .filter(|n| !priority_donations.contains(&n.backend_id))
            .count();
        let updates = self.received_updates.iter().filter(unread).count();
        let messages = self.messages.iter().filter(unread).count();
        priority + new + updates + messages
    }

    /// Handle a click on a feed entry: mark exactly that entry read (local
    /// store is authoritative), dismiss a still-pending priority alert, and
    /// report what else the caller should do. Unknown ids yield `None`.
    pub fn select(&mut self, id: &str) -> Result<Option<Selection>> {
        let Some(entry) = self.find_mut(id) else {
            return Ok(None);
        };
        entry.read = true;
        let kind = entry.kind;
        let entity = entry.entity_ref;
        let backend_id = entry.backend_id;
        let dismiss = kind == NotificationKind::PriorityExpiring && entry.request_pending;

        self.store.add(id)?;
        if dismiss {
            self.dismiss_priority_alert(id);
        }

        let channel = match kind {
            NotificationKind::NewDonation | NotificationKind::PriorityExpiring => {
                Some(HighlightChannel::NewDonation)
            }
            NotificationKind::ReceivedUpdate => {
                match self.update_types.get(id).map(String::as_str) {
                    Some("request") | Some("request_declined") => {
                        Some(HighlightChannel::AcceptedRequest)
                    }
                    _ => Some(HighlightChannel::DonationStatus),
                }
            }
            NotificationKind::Message => None,
        };

        Ok(Some(Selection {
            channel,
            entity,
            backend_id,
        }))
    }

    /// Select an entry and perform its side effects: best-effort server
    /// read acknowledgment (failure logged and swallowed) and the highlight
    /// request on the matching channel.
    #[instrument(skip_all)]
    pub async fn select_and_notify(
        &mut self,
        api: &dyn BackendApi,
        bus: &SignalBus,
        id: &str,
    ) -> Result<()> {
        let Some(selection) = self.select(id)? else {
            return Ok(());
        };

        if let Err(err) = api
            .mark_notification_read(&selection.backend_id.to_string())
            .await
        {
            warn!(?err, id, "read acknowledgment failed; local read state kept");
        }

        if let Some(channel) = selection.channel {
            bus.request_highlight(channel, selection.entity).await;
        }
        Ok(())
    }

    /// Drop a priority alert from the local list before any server round
    /// trip: an alert counts as handled once opened. This is the one
    /// deliberate exception to confirm-then-mutate in this subsystem; a
    /// stale poll may transiently resurrect the entry until the next
    /// successful one.
    fn dismiss_priority_alert(&mut self, id: &str) {
        self.priority.retain(|n| n.id != id);
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Notification> {
        self.new_donations
            .iter_mut()
            .chain(self.priority.iter_mut())
            .chain(self.received_updates.iter_mut())
            .chain(self.messages.iter_mut())
            .find(|n| n.id == id)
    }
}

/// Render a status-update event through its message template. Unknown
/// discriminators fall back to a generic line instead of failing.
fn received_update_message(notice: &ReceivedNotice) -> String {
    match notice.update_type.as_str() {
        "direct" => format!("{} sent you a donation", notice.bakery_name),
        "request" => format!("{} accepted your request", notice.bakery_name),
        "request_declined" => format!("{} declined your request", notice.bakery_name),
        _ => format!("update from {}", notice.bakery_name),
    }
}

/// Collapse duplicate ids within one poll cycle, keeping each entry's first
/// position but the last-seen attributes.
fn dedupe_last_wins(entries: Vec<Notification>) -> Vec<Notification> {
    let mut out: Vec<Notification> = Vec::with_capacity(entries.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        match index.get(&entry.id) {
            Some(&at) => out[at] = entry,
            None => {
                index.insert(entry.id.clone(), out.len());
                out.push(entry);
            }
        }
    }
    out
}

/// Fixed-interval poll loop. Each tick is one independent round trip;
/// failures are logged and retried on the next tick. The loop ends when the
/// shutdown flag flips; an in-flight response at that point is discarded
/// with the loop.
pub async fn run_poll_loop(
    aggregator: Arc<Mutex<NotificationAggregator>>,
    api: Arc<dyn BackendApi>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match api.charity_notifications().await {
                    Ok(feed) => {
                        let mut agg = aggregator.lock().expect("aggregator lock poisoned");
                        agg.apply_poll(feed);
                    }
                    Err(err) => {
                        warn!(?err, "notification poll failed; retrying next tick");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("notification poller stopping");
                    break;
                }
            }
        }
    }
}
