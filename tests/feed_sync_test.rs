//! Cross-view flow: poll -> feed -> select -> highlight on an already
//! mounted board, with the read-state store as the durable tie-breaker.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use bakeshare::aggregator::NotificationAggregator;
use bakeshare::api::{BackendApi, CharityFeed, FeedbackDraft};
use bakeshare::board::{self, StatusBoard};
use bakeshare::model::{Donation, DonationKind};
use bakeshare::signal::{HighlightChannel, SignalBus};
use bakeshare::store::ReadStateStore;

#[derive(Clone, Default)]
struct FeedApi {
    feeds: Arc<Mutex<VecDeque<CharityFeed>>>,
    read_ack_responses: Arc<Mutex<VecDeque<Result<()>>>>,
    read_acks: Arc<Mutex<Vec<String>>>,
    request_listings: Arc<Mutex<Vec<Donation>>>,
}

impl FeedApi {
    fn with_feeds(feeds: Vec<CharityFeed>) -> Self {
        Self {
            feeds: Arc::new(Mutex::new(VecDeque::from(feeds))),
            ..Default::default()
        }
    }

    fn with_request_listings(listings: Vec<Donation>) -> Self {
        Self {
            request_listings: Arc::new(Mutex::new(listings)),
            ..Default::default()
        }
    }

    fn failing_read_acks(mut self) -> Self {
        self.read_ack_responses = Arc::new(Mutex::new(VecDeque::from(vec![Err(anyhow!(
            "backend error 503"
        ))])));
        self
    }

    async fn read_acks(&self) -> Vec<String> {
        self.read_acks.lock().await.clone()
    }
}

#[async_trait]
impl BackendApi for FeedApi {
    async fn charity_notifications(&self) -> Result<CharityFeed> {
        let mut feeds = self.feeds.lock().await;
        let feed = feeds.pop_front().unwrap_or_default();
        if feeds.is_empty() {
            // Keep serving the newest payload, like a backend would.
            feeds.push_back(feed.clone());
        }
        Ok(feed)
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        self.read_acks.lock().await.push(id.to_string());
        self.read_ack_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn received_donations(&self) -> Result<Vec<Donation>> {
        Ok(self.request_listings.lock().await.clone())
    }

    async fn direct_donations(&self) -> Result<Vec<Donation>> {
        Ok(Vec::new())
    }

    async fn mark_received(&self, _kind: DonationKind, _id: i64) -> Result<()> {
        Ok(())
    }

    async fn submit_feedback(
        &self,
        _kind: DonationKind,
        _id: i64,
        _draft: &FeedbackDraft,
    ) -> Result<()> {
        Ok(())
    }
}

fn feed_json(value: serde_json::Value) -> CharityFeed {
    serde_json::from_value(value).unwrap()
}

fn donation(value: serde_json::Value) -> Donation {
    serde_json::from_value(value).unwrap()
}

fn aggregator(td: &tempfile::TempDir) -> NotificationAggregator {
    NotificationAggregator::new(ReadStateStore::open(td.path()).unwrap())
}

#[tokio::test]
async fn duplicate_polls_yield_single_accepted_entry() {
    let td = tempfile::tempdir().unwrap();
    let mut agg = aggregator(&td);
    let poll = || {
        feed_json(serde_json::json!({
            "received_donations": [
                { "id": 7, "type": "request", "bakery_name": "Crumb & Co" }
            ]
        }))
    };

    agg.apply_poll(poll());
    agg.apply_poll(poll());

    assert_eq!(agg.received_updates().len(), 1);
    assert_eq!(
        agg.received_updates()[0].message,
        "Crumb & Co accepted your request"
    );
}

#[tokio::test]
async fn selecting_a_feed_entry_highlights_the_mounted_board() {
    let td = tempfile::tempdir().unwrap();
    let api = FeedApi::default();
    let bus = SignalBus::new(Duration::from_millis(0));
    let mut agg = aggregator(&td);

    // The board is already mounted in another "view" with the donation
    // rendered under its stable request id.
    let mut board = StatusBoard::new(
        DonationKind::Request,
        vec![HighlightChannel::AcceptedRequest],
        Duration::from_millis(3000),
    );
    board.set_donations(vec![serde_json::from_value(serde_json::json!({
        "id": 31, "request_id": 12, "status": "accepted", "tracking_status": "preparing"
    }))
    .unwrap()]);

    agg.apply_poll(feed_json(serde_json::json!({
        "received_donations": [
            { "id": 12, "type": "request", "bakery_name": "Crumb & Co" }
        ]
    })));

    agg.select_and_notify(&api, &bus, "recv-12").await.unwrap();

    board.handle_tab_switch(HighlightChannel::AcceptedRequest);
    let now = Instant::now();
    assert!(board.handle_highlight(&bus, HighlightChannel::AcceptedRequest, now));
    assert_eq!(board.active_highlight(now), Some("accepted-12"));

    // Entry is read, the server was told, and the slot is spent.
    assert!(agg.received_updates()[0].read);
    assert_eq!(api.read_acks().await, vec!["12".to_string()]);
    assert_eq!(bus.peek(HighlightChannel::AcceptedRequest), None);
}

#[tokio::test]
async fn highlight_with_no_matching_element_is_not_consumed() {
    let td = tempfile::tempdir().unwrap();
    let api = FeedApi::default();
    let bus = SignalBus::new(Duration::from_millis(0));
    let mut agg = aggregator(&td);

    let mut board = StatusBoard::new(
        DonationKind::Request,
        vec![HighlightChannel::NewDonation],
        Duration::from_millis(3000),
    );

    agg.apply_poll(feed_json(serde_json::json!({
        "donations": [
            { "id": 99, "name": "rolls", "bakery_name": "Crumb & Co" }
        ]
    })));
    agg.select_and_notify(&api, &bus, "donation-99").await.unwrap();

    // No element `received-99` exists: no highlight, request left pending.
    board.handle_tab_switch(HighlightChannel::NewDonation);
    let now = Instant::now();
    assert!(!board.handle_highlight(&bus, HighlightChannel::NewDonation, now));
    assert_eq!(board.active_highlight(now), None);
    assert_eq!(bus.peek(HighlightChannel::NewDonation), Some(99));

    // Once the list loads, a later dispatch can still land.
    board.set_donations(vec![serde_json::from_value(serde_json::json!({
        "id": 99, "status": "accepted", "tracking_status": "received"
    }))
    .unwrap()]);
    assert!(board.handle_highlight(&bus, HighlightChannel::NewDonation, now));
    assert_eq!(bus.peek(HighlightChannel::NewDonation), None);
}

#[tokio::test]
async fn failed_read_ack_keeps_local_read_state() {
    let td = tempfile::tempdir().unwrap();
    let api = FeedApi::default().failing_read_acks();
    let bus = SignalBus::new(Duration::from_millis(0));
    let mut agg = aggregator(&td);

    let poll = || {
        feed_json(serde_json::json!({
            "messages": [
                { "id": 4, "sender_name": "Crumb & Co", "body": "any bread left?" }
            ]
        }))
    };
    agg.apply_poll(poll());

    // The PATCH fails but select still succeeds and the local flag sticks.
    agg.select_and_notify(&api, &bus, "msg-4").await.unwrap();
    assert!(agg.messages()[0].read);

    agg.apply_poll(poll());
    assert!(agg.messages()[0].read);
    assert_eq!(agg.badge_count(), 0);

    // And it survives a restart through the durable store.
    let mut agg = aggregator(&td);
    agg.apply_poll(poll());
    assert!(agg.messages()[0].read);
}

#[tokio::test]
async fn poll_loop_applies_latest_resolved_feed() {
    let td = tempfile::tempdir().unwrap();
    let api = Arc::new(FeedApi::with_feeds(vec![
        feed_json(serde_json::json!({
            "donations": [{ "id": 1, "name": "rolls", "bakery_name": "Crumb & Co" }]
        })),
        feed_json(serde_json::json!({
            "donations": [{ "id": 2, "name": "rye", "bakery_name": "Flour Power" }]
        })),
    ]));
    let agg = Arc::new(std::sync::Mutex::new(aggregator(&td)));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(bakeshare::aggregator::run_poll_loop(
        Arc::clone(&agg),
        api.clone() as Arc<dyn BackendApi>,
        Duration::from_millis(10),
        shutdown_rx,
    ));

    // Wait for both queued feeds to be consumed, then stop the loop.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let agg = agg.lock().unwrap();
    // Category state is whatever the last resolved payload said.
    assert_eq!(agg.new_donations().len(), 1);
    assert_eq!(agg.new_donations()[0].id, "donation-2");
}

#[tokio::test]
async fn refresh_loop_populates_a_mounted_board() {
    let api = Arc::new(FeedApi::with_request_listings(vec![donation(
        serde_json::json!({
            "id": 99, "status": "accepted", "tracking_status": "received"
        }),
    )]));
    let board = Arc::new(std::sync::Mutex::new(StatusBoard::new(
        DonationKind::Request,
        vec![HighlightChannel::NewDonation],
        Duration::from_millis(3000),
    )));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(board::run_board_refresh(
        Arc::clone(&board),
        api.clone() as Arc<dyn BackendApi>,
        Duration::from_millis(10),
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    // The first tick already loaded the listing, so a highlight request
    // has an element to land on.
    let mut board = board.lock().unwrap();
    board.handle_tab_switch(HighlightChannel::NewDonation);
    assert_eq!(board.visible_element_ids(), vec!["received-99".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listener_survives_event_bursts() {
    let bus = Arc::new(SignalBus::new(Duration::from_millis(0)));
    let board = Arc::new(std::sync::Mutex::new(StatusBoard::new(
        DonationKind::Request,
        vec![HighlightChannel::NewDonation],
        Duration::from_millis(3000),
    )));
    board
        .lock()
        .unwrap()
        .set_donations(vec![donation(serde_json::json!({
            "id": 99, "status": "accepted", "tracking_status": "received"
        }))]);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(board::run_board_listener(
        Arc::clone(&board),
        Arc::clone(&bus),
        shutdown_rx,
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Stall the listener on the board lock while a burst overruns the
    // bounded event channels.
    let blocker = {
        let board = Arc::clone(&board);
        std::thread::spawn(move || {
            let _guard = board.lock().unwrap();
            std::thread::sleep(Duration::from_millis(150));
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    for _ in 0..40 {
        bus.request_highlight(HighlightChannel::NewDonation, 0).await;
    }
    blocker.join().unwrap();

    // A fresh request after the burst must still be delivered.
    bus.request_highlight(HighlightChannel::NewDonation, 99).await;
    let mut landed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let board = board.lock().unwrap();
        if board.active_highlight(Instant::now()) == Some("received-99") {
            landed = true;
            break;
        }
    }
    assert!(landed, "listener stopped handling events after the burst");
    assert!(!handle.is_finished());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
