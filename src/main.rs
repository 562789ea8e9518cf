use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use bakeshare::aggregator::{self, NotificationAggregator};
use bakeshare::api::BackendClient;
use bakeshare::board::{self, StatusBoard};
use bakeshare::config;
use bakeshare::model::DonationKind;
use bakeshare::signal::{HighlightChannel, SignalBus};
use bakeshare::store::ReadStateStore;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let api = Arc::new(BackendClient::new(
        &cfg.backend.base_url,
        cfg.backend.token.clone(),
    )?);
    let store = ReadStateStore::open(Path::new(&cfg.app.data_dir))?;
    let bus = Arc::new(SignalBus::new(Duration::from_millis(
        cfg.app.tab_switch_delay_ms,
    )));
    let aggregator = Arc::new(Mutex::new(NotificationAggregator::new(store)));

    let highlight_duration = Duration::from_millis(cfg.app.highlight_duration_ms);
    let request_board = Arc::new(Mutex::new(StatusBoard::new(
        DonationKind::Request,
        vec![
            HighlightChannel::NewDonation,
            HighlightChannel::AcceptedRequest,
        ],
        highlight_duration,
    )));
    let direct_board = Arc::new(Mutex::new(StatusBoard::new(
        DonationKind::Direct,
        vec![HighlightChannel::DonationStatus],
        highlight_duration,
    )));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poll_interval = Duration::from_millis(cfg.app.poll_interval_ms);
    let poller = tokio::spawn(aggregator::run_poll_loop(
        Arc::clone(&aggregator),
        api.clone() as Arc<dyn bakeshare::api::BackendApi>,
        poll_interval,
        shutdown_rx.clone(),
    ));
    let request_refresh = tokio::spawn(board::run_board_refresh(
        Arc::clone(&request_board),
        api.clone() as Arc<dyn bakeshare::api::BackendApi>,
        poll_interval,
        shutdown_rx.clone(),
    ));
    let direct_refresh = tokio::spawn(board::run_board_refresh(
        Arc::clone(&direct_board),
        api.clone() as Arc<dyn bakeshare::api::BackendApi>,
        poll_interval,
        shutdown_rx.clone(),
    ));
    let request_listener = tokio::spawn(board::run_board_listener(
        Arc::clone(&request_board),
        Arc::clone(&bus),
        shutdown_rx.clone(),
    ));
    let direct_listener = tokio::spawn(board::run_board_listener(
        Arc::clone(&direct_board),
        Arc::clone(&bus),
        shutdown_rx,
    ));

    info!("bakeshare agent started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    let _ = poller.await;
    let _ = request_refresh.await;
    let _ = direct_refresh.await;
    let _ = request_listener.await;
    let _ = direct_listener.await;
    Ok(())
}
