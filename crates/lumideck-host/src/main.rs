//! Lumideck host application entry point.
//!
//! Wires together the infrastructure services and starts the Tokio async
//! runtime.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()        -- TOML config from the platform config dir
//!  └─ start services
//!       ├─ LinkManager        (serial/BLE connect + reconnect tick)
//!       ├─ CommandDispatcher  (inbound device command pump)
//!       └─ SyncEngine         (media events -> now-playing push)
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lumideck_host::application::dispatch::CommandDispatcher;
use lumideck_host::application::link::LinkManager;
use lumideck_host::application::now_playing::SyncEngine;
use lumideck_host::infrastructure::audio::NullAudioEndpoints;
use lumideck_host::infrastructure::locator::ble::BleLocator;
use lumideck_host::infrastructure::lyrics_service::{HttpLyricSource, LyricSource};
use lumideck_host::infrastructure::media::{MediaSource, NullMediaSource};
use lumideck_host::infrastructure::storage::config::{load_config, save_config};
use lumideck_host::infrastructure::transport::SharedLink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config is loaded before logging so its log level can seed the filter.
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config, using defaults: {e}");
            Default::default()
        }
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.host.log_level.clone())),
        )
        .init();

    if std::env::args().any(|arg| arg == "--list-ble") {
        return list_ble_devices().await;
    }

    info!("Lumideck host starting");

    let lyrics_endpoint = config.lyrics.endpoint.clone();
    let config = Arc::new(tokio::sync::Mutex::new(config));

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    let link = SharedLink::new();
    let (event_tx, event_rx) = tokio::sync::mpsc::channel(256);
    let (resync_tx, resync_rx) = tokio::sync::mpsc::channel(4);

    // ── Link manager ──────────────────────────────────────────────────────────
    let manager = Arc::new(LinkManager::new(
        link.clone(),
        Arc::clone(&config),
        event_tx,
    ));
    tokio::spawn(Arc::clone(&manager).run(Arc::clone(&running)));

    // ── Command dispatcher ────────────────────────────────────────────────────
    // Platform audio backends register here; without one the device's
    // volume and endpoint commands answer with empty state.
    let audio = Arc::new(NullAudioEndpoints);
    let dispatcher = Arc::new(CommandDispatcher::new(link.clone(), audio, resync_tx));
    tokio::spawn(Arc::clone(&dispatcher).run(event_rx));

    // ── Now-playing sync engine ───────────────────────────────────────────────
    let lyrics: Arc<dyn LyricSource> = match HttpLyricSource::new(&lyrics_endpoint) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!("failed to build lyric client: {e}");
            return Err(e.into());
        }
    };

    let media = NullMediaSource::new();
    let media_rx = match media.start() {
        Ok(rx) => rx,
        Err(e) => {
            error!("failed to start media source: {e}");
            return Err(e.into());
        }
    };

    let engine = Arc::new(SyncEngine::new(link.clone(), lyrics));
    tokio::spawn(Arc::clone(&engine).run(media_rx, resync_rx));

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("Lumideck host ready.  Press Ctrl-C to exit.");

    loop {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    media.stop();
    link.close().await;

    // Remembered endpoints updated during the session are persisted here.
    let snapshot = config.lock().await.clone();
    if let Err(e) = save_config(&snapshot) {
        warn!("failed to save config: {e}");
    }

    info!("Lumideck host stopped");
    Ok(())
}

/// `--list-ble`: scans once and prints the visible peripherals, so a user
/// can pick a device id or name for the config file.
async fn list_ble_devices() -> anyhow::Result<()> {
    let locator = BleLocator::new().await?;
    let devices = locator.list_devices().await?;
    if devices.is_empty() {
        println!("no bluetooth devices visible");
        return Ok(());
    }
    for device in devices {
        let rssi = device
            .rssi
            .map_or_else(String::new, |r| format!("  {r} dBm"));
        let tag = if device.advertises_service {
            "  [lumideck]"
        } else {
            ""
        };
        println!("{}  {}{rssi}{tag}", device.display_name(), device.id);
    }
    Ok(())
}
