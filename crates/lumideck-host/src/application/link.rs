//! Link lifecycle: policy, probing, handshake, and reconnection.
//!
//! The manager runs a 1-second reconnect tick.  When the link is down it
//! probes candidates in policy order: serial ports first under `Auto`,
//! then BLE.  A serial port only counts as connected once the device
//! answers the handshake inside the probe window; a port that stays
//! silent is some other gadget and gets closed again.  A BLE bind is
//! trusted immediately because the GATT service UUID already identifies
//! the device.
//!
//! Endpoints that carry a session are persisted so the next probe (and
//! the next app start) goes straight to the known device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::infrastructure::locator::ble::BleLocator;
use crate::infrastructure::locator::serial as serial_locator;
use crate::infrastructure::storage::config::HostConfig;
use crate::infrastructure::transport::ble::BleTransport;
use crate::infrastructure::transport::serial::SerialTransport;
use crate::infrastructure::transport::{SharedLink, TransportEvent, TransportKind};
use lumideck_core::protocol::HANDSHAKE;

/// How long a probed endpoint has to answer the handshake.
pub const HANDSHAKE_WINDOW: Duration = Duration::from_millis(1200);

/// Interval between handshake pings inside the probe window.
pub const HANDSHAKE_PING_INTERVAL: Duration = Duration::from_millis(250);

/// Minimum gap between BLE connection attempts.  Back-to-back connects
/// confuse several OS Bluetooth stacks.
pub const BLE_COOLDOWN: Duration = Duration::from_millis(2000);

/// Minimum gap between full BLE scans.
pub const SCAN_RATE_LIMIT: Duration = Duration::from_secs(10);

/// Reconnect tick period.
pub const RECONNECT_TICK: Duration = Duration::from_secs(1);

/// Which media the link manager may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPolicy {
    /// Prefer serial, fall back to BLE.
    #[default]
    Auto,
    UsbOnly,
    BleOnly,
}

/// Media allowed by a policy, in probe order.
pub fn transport_plan(policy: LinkPolicy) -> (bool, bool) {
    match policy {
        LinkPolicy::Auto => (true, true),
        LinkPolicy::UsbOnly => (true, false),
        LinkPolicy::BleOnly => (false, true),
    }
}

/// Pings the device and waits for the dispatcher to mark the link ready.
///
/// Sends a handshake line every [`HANDSHAKE_PING_INTERVAL`] for up to
/// `window`, polling the ready flag between pings.  Returns whether the
/// device answered in time.
pub async fn wait_for_ready(link: &SharedLink, window: Duration) -> bool {
    // tokio's clock, so tests under a paused runtime stay deterministic
    let deadline = tokio::time::Instant::now() + window;
    loop {
        if link.is_ready() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        link.send_line_lossy(HANDSHAKE).await;

        let mut waited = Duration::ZERO;
        while waited < HANDSHAKE_PING_INTERVAL {
            let step = Duration::from_millis(25);
            tokio::time::sleep(step).await;
            waited += step;
            if link.is_ready() {
                return true;
            }
        }
    }
}

/// Owns connection policy and the reconnect loop.
pub struct LinkManager {
    link: SharedLink,
    config: Arc<Mutex<HostConfig>>,
    event_tx: mpsc::Sender<TransportEvent>,
    /// Coalesces overlapping connect attempts from the tick.
    connecting: AtomicBool,
    /// Set by a manual disconnect; the tick stays idle until resumed.
    suppress_reconnect: AtomicBool,
    last_ble_attempt: std::sync::Mutex<Option<Instant>>,
    last_scan: std::sync::Mutex<Option<Instant>>,
}

impl LinkManager {
    pub fn new(
        link: SharedLink,
        config: Arc<Mutex<HostConfig>>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            link,
            config,
            event_tx,
            connecting: AtomicBool::new(false),
            suppress_reconnect: AtomicBool::new(false),
            last_ble_attempt: std::sync::Mutex::new(None),
            last_scan: std::sync::Mutex::new(None),
        }
    }

    pub fn link(&self) -> &SharedLink {
        &self.link
    }

    /// Closes the link and holds the reconnect tick until [`resume`].
    ///
    /// [`resume`]: LinkManager::resume
    pub async fn disconnect(&self) {
        self.suppress_reconnect.store(true, Ordering::Relaxed);
        self.link.close().await;
        info!("link disconnected by request; auto-reconnect paused");
    }

    /// Re-enables the reconnect tick after a manual disconnect.
    pub fn resume(&self) {
        self.suppress_reconnect.store(false, Ordering::Relaxed);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppress_reconnect.load(Ordering::Relaxed)
    }

    /// Claims the connect slot; `false` when an attempt is in flight.
    fn try_begin_connect(&self) -> bool {
        self.connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn end_connect(&self) {
        self.connecting.store(false, Ordering::Release);
    }

    /// One reconnect tick: if the link is down and reconnection is not
    /// suppressed, probe for the device.
    pub async fn ensure_connected(&self) {
        if self.is_suppressed() || self.link.is_ready() {
            return;
        }
        if !self.try_begin_connect() {
            return;
        }

        let policy = {
            let cfg = self.config.lock().await;
            cfg.link.policy
        };
        let (allow_usb, allow_ble) = transport_plan(policy);

        if allow_usb && self.try_serial().await {
            self.end_connect();
            return;
        }
        if allow_ble {
            self.try_ble().await;
        }
        self.end_connect();
    }

    /// Probes serial candidates until one answers the handshake.
    async fn try_serial(&self) -> bool {
        let (last_port, usb_filter) = {
            let cfg = self.config.lock().await;
            (
                cfg.link.last_port.clone(),
                serial_locator::parse_usb_filter(
                    cfg.link.usb_vid.as_deref(),
                    cfg.link.usb_pid.as_deref(),
                ),
            )
        };
        let candidates = match serial_locator::probe_order(last_port.as_deref(), usb_filter) {
            Ok(c) => c,
            Err(e) => {
                warn!("serial enumeration failed: {e}");
                return false;
            }
        };

        for port in candidates {
            debug!("probing serial port {port}");
            let session = self.link.next_session();
            let transport = match SerialTransport::open(&port, session, self.event_tx.clone()) {
                Ok(t) => t,
                Err(e) => {
                    debug!("skipping {port}: {e}");
                    continue;
                }
            };
            self.link.install(Box::new(transport), session).await;

            if wait_for_ready(&self.link, HANDSHAKE_WINDOW).await {
                info!("device answered on {port}");
                self.persist_serial_endpoint(&port).await;
                return true;
            }
            // Silent port: not a Lumideck.
            debug!("no handshake on {port}, closing");
            self.link.close().await;
        }
        false
    }

    /// Scans for and connects the best BLE candidate, honoring the
    /// connect cooldown and scan rate limit.
    async fn try_ble(&self) -> bool {
        if !self.ble_gates_open() {
            return false;
        }

        let (pinned_id, name_hint) = {
            let cfg = self.config.lock().await;
            (cfg.link.last_ble_id.clone(), cfg.link.last_ble_name.clone())
        };

        let locator = match BleLocator::new().await {
            Ok(l) => l,
            Err(e) => {
                debug!("bluetooth unavailable: {e}");
                return false;
            }
        };
        let candidates = match locator
            .find_candidates(pinned_id.as_deref(), name_hint.as_deref())
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!("bluetooth scan failed: {e}");
                return false;
            }
        };

        for (peripheral, info) in candidates {
            self.note_ble_attempt();
            let name = info.display_name().to_string();
            let session = self.link.next_session();
            match BleTransport::connect(peripheral, &name, session, self.event_tx.clone()).await {
                Ok(transport) => {
                    self.link.install(Box::new(transport), session).await;
                    // Service UUID match is identification enough.
                    self.link.mark_ready();
                    // Greet anyway so the device resyncs its state.
                    self.link.send_line_lossy(HANDSHAKE).await;
                    info!("bluetooth device bound: {name}");
                    self.persist_ble_endpoint(&info.id, &name).await;
                    return true;
                }
                Err(e) => {
                    debug!("connect to {name} failed: {e}");
                }
            }
            if !self.ble_gates_open() {
                break;
            }
        }
        false
    }

    /// Checks the BLE connect cooldown and scan rate limit.
    fn ble_gates_open(&self) -> bool {
        let now = Instant::now();
        let attempt_ok = self
            .last_ble_attempt
            .lock()
            .expect("lock poisoned")
            .map_or(true, |t| now.duration_since(t) >= BLE_COOLDOWN);
        if !attempt_ok {
            return false;
        }
        let mut last_scan = self.last_scan.lock().expect("lock poisoned");
        let scan_ok = last_scan.map_or(true, |t| now.duration_since(t) >= SCAN_RATE_LIMIT);
        if scan_ok {
            *last_scan = Some(now);
        }
        scan_ok
    }

    fn note_ble_attempt(&self) {
        *self.last_ble_attempt.lock().expect("lock poisoned") = Some(Instant::now());
    }

    async fn persist_serial_endpoint(&self, port: &str) {
        let mut cfg = self.config.lock().await;
        cfg.link.last_port = Some(port.to_string());
        if let Err(e) = crate::infrastructure::storage::config::save_config(&cfg) {
            warn!("failed to persist link endpoint: {e}");
        }
    }

    async fn persist_ble_endpoint(&self, id: &str, name: &str) {
        let mut cfg = self.config.lock().await;
        cfg.link.last_ble_id = Some(id.to_string());
        cfg.link.last_ble_name = Some(name.to_string());
        if let Err(e) = crate::infrastructure::storage::config::save_config(&cfg) {
            warn!("failed to persist link endpoint: {e}");
        }
    }

    /// The reconnect loop; runs until `running` clears.
    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) {
        let mut tick = tokio::time::interval(RECONNECT_TICK);
        while running.load(Ordering::Relaxed) {
            tick.tick().await;
            self.ensure_connected().await;
        }
    }
}

/// Describes the mounted link for state display.
pub async fn link_status(link: &SharedLink) -> String {
    match link.describe().await {
        Some((TransportKind::Serial, label)) => format!("serial {label}"),
        Some((TransportKind::Ble, label)) => label,
        None => "disconnected".to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
