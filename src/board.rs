//! Donation status board: the receiving side of highlight requests and the
//! home of the mark-received and feedback actions.
//!
//! A board owns the donation list for one flow (request-fulfillment or
//! direct), groups it into tabs, and exposes stable element ids so a
//! highlight request from the notification feed can land on a concrete row.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::api::{BackendApi, FeedbackDraft};
use crate::model::{Donation, DonationKind, Role, Stage};
use crate::signal::{HighlightChannel, SignalBus};
use crate::status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Pending,
    Accepted,
    Received,
}

/// Tab a highlight channel lands on. Matches the channel's element prefix.
fn target_tab(channel: HighlightChannel) -> Tab {
    match channel {
        HighlightChannel::NewDonation => Tab::Received,
        HighlightChannel::DonationStatus => Tab::Accepted,
        HighlightChannel::AcceptedRequest => Tab::Accepted,
    }
}

#[derive(Debug, Clone)]
pub struct ActiveHighlight {
    pub element_id: String,
    pub expires_at: Instant,
}

pub struct StatusBoard {
    kind: DonationKind,
    channels: Vec<HighlightChannel>,
    donations: Vec<Donation>,
    active_tab: Tab,
    highlight: Option<ActiveHighlight>,
    highlight_duration: Duration,
}

impl StatusBoard {
    pub fn new(
        kind: DonationKind,
        channels: Vec<HighlightChannel>,
        highlight_duration: Duration,
    ) -> Self {
        Self {
            kind,
            channels,
            donations: Vec::new(),
            active_tab: Tab::Accepted,
            highlight: None,
            highlight_duration,
        }
    }

    pub fn kind(&self) -> DonationKind {
        self.kind
    }

    pub fn active_tab(&self) -> Tab {
        self.active_tab
    }

    pub fn set_donations(&mut self, donations: Vec<Donation>) {
        self.donations = donations;
    }

    /// Reload the board's listing from the backend.
    #[instrument(skip_all, fields(kind = self.kind.as_str()))]
    pub async fn refresh(&mut self, api: &dyn BackendApi) -> Result<()> {
        self.donations = fetch_listing(self.kind, api).await?;
        Ok(())
    }

    /// Requests awaiting acceptance.
    pub fn pending(&self) -> Vec<&Donation> {
        self.donations.iter().filter(|d| d.is_pending()).collect()
    }

    /// Accepted donations still on their way. Completed donations never
    /// appear in any active grouping.
    pub fn accepted(&self) -> Vec<&Donation> {
        self.donations
            .iter()
            .filter(|d| !d.is_pending() && d.stage() < Stage::Received)
            .collect()
    }

    /// Donations delivered but not yet closed out by feedback.
    pub fn received(&self) -> Vec<&Donation> {
        self.donations
            .iter()
            .filter(|d| d.stage() == Stage::Received)
            .collect()
    }

    /// Element ids rendered on the active tab, e.g. `accepted-42`. The id
    /// part is the stable highlight reference, not necessarily the row id.
    pub fn visible_element_ids(&self) -> Vec<String> {
        let (prefix, group) = match self.active_tab {
            Tab::Pending => ("pending", self.pending()),
            Tab::Accepted => ("accepted", self.accepted()),
            Tab::Received => ("received", self.received()),
        };
        group
            .iter()
            .map(|d| format!("{prefix}-{}", d.highlight_ref()))
            .collect()
    }

    fn serves(&self, channel: HighlightChannel) -> bool {
        self.channels.contains(&channel)
    }

    /// Switch to the tab a channel targets, if this board serves it.
    pub fn handle_tab_switch(&mut self, channel: HighlightChannel) {
        if self.serves(channel) {
            self.active_tab = target_tab(channel);
        }
    }

    /// Try to deliver a pending highlight. On a hit the bus slot is
    /// consumed and the row stays highlighted until the duration elapses.
    /// On a miss (row not rendered yet) the slot is deliberately left in
    /// place and nothing is retried here.
    pub fn handle_highlight(
        &mut self,
        bus: &SignalBus,
        channel: HighlightChannel,
        now: Instant,
    ) -> bool {
        if !self.serves(channel) {
            return false;
        }
        let Some(target) = bus.peek(channel) else {
            return false;
        };
        let element_id = format!("{}-{}", channel.element_prefix(), target);
        if !self.visible_element_ids().contains(&element_id) {
            info!(%element_id, "highlight target not rendered; leaving request pending");
            return false;
        }
        bus.consume(channel);
        self.highlight = Some(ActiveHighlight {
            element_id,
            expires_at: now + self.highlight_duration,
        });
        true
    }

    /// The currently highlighted element id, if its window is still open.
    pub fn active_highlight(&self, now: Instant) -> Option<&str> {
        self.highlight
            .as_ref()
            .filter(|h| now < h.expires_at)
            .map(|h| h.element_id.as_str())
    }

    pub fn clear_expired_highlight(&mut self, now: Instant) {
        if let Some(h) = &self.highlight {
            if now >= h.expires_at {
                self.highlight = None;
            }
        }
    }

    /// Charity-side "mark as received": server first, local stage only
    /// after the 200. A failed call leaves the donation untouched and the
    /// affordance available for retry.
    #[instrument(skip_all)]
    pub async fn mark_received(&mut self, api: &dyn BackendApi, id: i64) -> Result<()> {
        let kind = self.kind;
        let donation = self
            .donations
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("donation {id} not on this board"))?;
        let stage = donation.stage();
        if !status::shows_mark_received(stage, Role::Charity) {
            return Err(anyhow!(
                "mark-received not available at stage {}",
                stage.as_str()
            ));
        }

        api.mark_received(kind, id).await?;

        let next = status::advance(stage, Stage::Received)?;
        let donation = self
            .donations
            .iter_mut()
            .find(|d| d.id == id)
            .expect("donation vanished during mark-received");
        donation.set_stage(next);
        info!(id, "donation marked received");
        Ok(())
    }

    /// Submit feedback and close the donation out. Gated by the feedback
    /// predicate; on failure nothing changes locally and the affordance
    /// remains visible.
    #[instrument(skip_all)]
    pub async fn submit_feedback(
        &mut self,
        api: &dyn BackendApi,
        id: i64,
        draft: &FeedbackDraft,
    ) -> Result<()> {
        let kind = self.kind;
        let donation = self
            .donations
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("donation {id} not on this board"))?;
        if !status::can_submit_feedback(donation) {
            return Err(anyhow!("feedback not available for donation {id}"));
        }

        api.submit_feedback(kind, id, draft).await?;

        let next = status::advance(Stage::Received, Stage::Complete)?;
        let donation = self
            .donations
            .iter_mut()
            .find(|d| d.id == id)
            .expect("donation vanished during feedback submission");
        donation.feedback_submitted = true;
        donation.set_stage(next);
        info!(id, "feedback recorded, donation complete");
        Ok(())
    }
}

/// Fetch the listing for one flow; which endpoint depends on the kind.
async fn fetch_listing(kind: DonationKind, api: &dyn BackendApi) -> Result<Vec<Donation>> {
    match kind {
        DonationKind::Request => api.received_donations().await,
        DonationKind::Direct => api.direct_donations().await,
    }
}

/// Keep a mounted board's listing current: one fetch immediately on start
/// and one per interval after that. Fetch failures are logged and retried
/// on the next tick; the board keeps showing the last good listing. The
/// fetch happens outside the board lock so listeners stay responsive.
pub async fn run_board_refresh(
    board: Arc<Mutex<StatusBoard>>,
    api: Arc<dyn BackendApi>,
    refresh_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = board.lock().expect("board lock poisoned").kind();
    let mut ticker = tokio::time::interval(refresh_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match fetch_listing(kind, api.as_ref()).await {
                    Ok(donations) => {
                        board
                            .lock()
                            .expect("board lock poisoned")
                            .set_donations(donations);
                    }
                    Err(err) => {
                        warn!(?err, kind = kind.as_str(), "board refresh failed; retrying next tick");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(kind = kind.as_str(), "board refresh stopping");
                    break;
                }
            }
        }
    }
}

/// Event loop for one mounted board: follows tab-switch and highlight
/// events until shutdown, clearing expired highlights as their windows
/// close.
pub async fn run_board_listener(
    board: Arc<Mutex<StatusBoard>>,
    bus: Arc<SignalBus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tabs = bus.subscribe_tabs();
    let mut highlights = bus.subscribe_highlights();
    loop {
        tokio::select! {
            tab = tabs.recv() => {
                match tab {
                    Ok(channel) => {
                        board.lock().expect("board lock poisoned").handle_tab_switch(channel);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Dropped events are only stale tab switches; the
                        // pending highlight slots are still intact.
                        warn!(skipped, "tab events lagged; catching up");
                    }
                    Err(RecvError::Closed) => {
                        warn!("tab event stream closed");
                        break;
                    }
                }
            }
            event = highlights.recv() => {
                match event {
                    Ok(channel) => {
                        let applied = {
                            let mut board = board.lock().expect("board lock poisoned");
                            board.handle_highlight(&bus, channel, Instant::now())
                        };
                        if applied {
                            let board = Arc::clone(&board);
                            let duration = {
                                let guard = board.lock().expect("board lock poisoned");
                                guard.highlight_duration
                            };
                            tokio::spawn(async move {
                                tokio::time::sleep(duration).await;
                                board
                                    .lock()
                                    .expect("board lock poisoned")
                                    .clear_expired_highlight(Instant::now());
                            });
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "highlight events lagged; catching up");
                    }
                    Err(RecvError::Closed) => {
                        warn!("highlight event stream closed");
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
