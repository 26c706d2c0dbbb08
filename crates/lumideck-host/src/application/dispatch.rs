//! Inbound command dispatch.
//!
//! Consumes [`TransportEvent`]s from the active link, parses each line
//! into a [`DeviceCommand`], and routes it: handshake bookkeeping, audio
//! endpoint queries and setters, and the correlated `CFG` request flow.
//!
//! # Handshake
//!
//! The device greets with `HELLO` on boot and whenever its link comes up.
//! The ack (plus a volume state push) is rate-limited so a chatty device
//! cannot flood the line, but the ready flag is set on every greeting.
//! The first greeting of a session also triggers a now-playing resync so
//! a freshly booted device repaints immediately.
//!
//! # CFG correlation
//!
//! `CFG GET` and `CFG IMPORT` each expect exactly one response line.
//! There is a single waiter slot; issuing a new request supersedes the
//! previous one, whose caller then observes `None`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::infrastructure::audio::{AudioDevice, AudioEndpoints};
use crate::infrastructure::transport::{SharedLink, TransportEvent};
use lumideck_core::protocol::HANDSHAKE_ACK;
use lumideck_core::{parse_line, sanitize_field, DeviceCommand, DeviceConfig};

/// Minimum gap between handshake acks.
const HELLO_ACK_RATE_LIMIT: Duration = Duration::from_millis(500);

/// How long a `CFG GET` waits for the device's response.
const CFG_GET_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a `CFG IMPORT` waits for its ack.  Imports trigger a flash
/// write on the device, so this is longer than the read timeout.
const CFG_IMPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settle time after `CFG SAVE` while the device writes flash.
const CFG_SAVE_SETTLE: Duration = Duration::from_millis(500);

/// Settle time after `CFG CLR`; the factory reset erases a whole page.
const CFG_CLEAR_SETTLE: Duration = Duration::from_secs(1);

/// Routes parsed inbound commands to their handlers.
pub struct CommandDispatcher {
    link: SharedLink,
    audio: Arc<dyn AudioEndpoints>,
    render_snapshot: std::sync::Mutex<Vec<AudioDevice>>,
    capture_snapshot: std::sync::Mutex<Vec<AudioDevice>>,
    cfg_waiter: std::sync::Mutex<Option<oneshot::Sender<String>>>,
    last_hello_ack: std::sync::Mutex<Option<Instant>>,
    greeted: AtomicBool,
    resync_tx: mpsc::Sender<()>,
}

impl CommandDispatcher {
    pub fn new(
        link: SharedLink,
        audio: Arc<dyn AudioEndpoints>,
        resync_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            link,
            audio,
            render_snapshot: std::sync::Mutex::new(Vec::new()),
            capture_snapshot: std::sync::Mutex::new(Vec::new()),
            cfg_waiter: std::sync::Mutex::new(None),
            last_hello_ack: std::sync::Mutex::new(None),
            greeted: AtomicBool::new(false),
            resync_tx,
        }
    }

    /// Forgets per-session state.  Called when the link drops so the next
    /// session greets and resyncs from scratch.
    pub fn reset_session(&self) {
        self.greeted.store(false, Ordering::Relaxed);
        *self.last_hello_ack.lock().expect("lock poisoned") = None;
        // A waiter from the dead session can never be answered.
        self.cfg_waiter.lock().expect("lock poisoned").take();
    }

    /// The event pump; runs until the event channel closes.
    ///
    /// Events from a session other than the currently mounted one are
    /// discarded: a replaced transport may still have traffic queued, and
    /// its late `Closed` must not tear down the replacement link.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Line { session, text } => {
                    if session != self.link.current_session() {
                        debug!("dropping line from stale session {session}");
                        continue;
                    }
                    self.handle_line(&text).await;
                }
                TransportEvent::Closed { session } => {
                    if session != self.link.current_session() {
                        debug!("ignoring close from replaced session {session}");
                        continue;
                    }
                    warn!("link lost");
                    self.reset_session();
                    self.link.close().await;
                }
            }
        }
        debug!("dispatcher event pump stopped");
    }

    /// Handles one inbound line.
    pub async fn handle_line(&self, line: &str) {
        match parse_line(line) {
            DeviceCommand::Hello => self.on_hello().await,
            DeviceCommand::VolumeGet => self.send_volume_state().await,
            DeviceCommand::VolumeSet(value) => {
                if let Err(e) = self.audio.set_volume(value) {
                    warn!("volume set failed: {e}");
                }
                self.send_volume_state().await;
            }
            DeviceCommand::MuteToggle => {
                if let Err(e) = self.audio.toggle_mute() {
                    warn!("mute toggle failed: {e}");
                }
                self.send_volume_state().await;
            }
            DeviceCommand::SpeakerList => self.send_render_list().await,
            DeviceCommand::SpeakerSet(index) => {
                self.set_default_render(index);
                self.send_current_render().await;
            }
            DeviceCommand::MicrophoneList => self.send_capture_list().await,
            DeviceCommand::MicrophoneSet(index) => {
                self.set_default_capture(index);
                self.send_current_capture().await;
            }
            DeviceCommand::ConfigResponse(full) | DeviceCommand::ConfigImportAck(full) => {
                self.complete_cfg_waiter(full);
            }
            DeviceCommand::ConfigOther(full) => debug!("config notice: {full}"),
            DeviceCommand::Debug(full) => debug!("device: {full}"),
            DeviceCommand::Unknown(full) => debug!("unrecognized line: {full}"),
        }
    }

    async fn on_hello(&self) {
        let ack_due = {
            let mut last = self.last_hello_ack.lock().expect("lock poisoned");
            if last.map_or(true, |t| t.elapsed() >= HELLO_ACK_RATE_LIMIT) {
                *last = Some(Instant::now());
                true
            } else {
                false
            }
        };

        self.link.mark_ready();
        if ack_due {
            self.link.send_line_lossy(HANDSHAKE_ACK).await;
            self.send_volume_state().await;
        }
        if !self.greeted.swap(true, Ordering::Relaxed) {
            info!("device greeted; requesting now-playing resync");
            let _ = self.resync_tx.try_send(());
        }
    }

    /// Pushes `VOL <0-100>` and `MUTE <0|1>`.
    async fn send_volume_state(&self) {
        let volume = match self.audio.volume() {
            Ok(v) => v,
            Err(e) => {
                debug!("volume state unavailable: {e}");
                return;
            }
        };
        let muted = self.audio.muted().unwrap_or(false);
        self.link.send_line_lossy(&format!("VOL {volume}")).await;
        self.link
            .send_line_lossy(&format!("MUTE {}", u8::from(muted)))
            .await;
    }

    async fn send_render_list(&self) {
        let devices = match self.audio.render_devices() {
            Ok(d) => d,
            Err(e) => {
                warn!("render enumeration failed: {e}");
                return;
            }
        };
        let lines = endpoint_list_lines("SPK", &devices);
        *self.render_snapshot.lock().expect("lock poisoned") = devices;
        for line in lines {
            self.link.send_line_lossy(&line).await;
        }
        self.send_current_render().await;
    }

    async fn send_capture_list(&self) {
        let devices = match self.audio.capture_devices() {
            Ok(d) => d,
            Err(e) => {
                warn!("capture enumeration failed: {e}");
                return;
            }
        };
        let lines = endpoint_list_lines("MIC", &devices);
        *self.capture_snapshot.lock().expect("lock poisoned") = devices;
        for line in lines {
            self.link.send_line_lossy(&line).await;
        }
        self.send_current_capture().await;
    }

    async fn send_current_render(&self) {
        if let Ok(index) = self.audio.default_render_index() {
            self.link.send_line_lossy(&format!("SPK CUR {index}")).await;
        }
    }

    async fn send_current_capture(&self) {
        if let Ok(index) = self.audio.default_capture_index() {
            self.link.send_line_lossy(&format!("MIC CUR {index}")).await;
        }
    }

    /// Switches the default render endpoint to `index` within the last
    /// snapshot the device saw.  Out-of-range indexes are a silent no-op:
    /// the device may hold a stale list.
    fn set_default_render(&self, index: usize) {
        let id = {
            let snapshot = self.render_snapshot.lock().expect("lock poisoned");
            snapshot.get(index).map(|d| d.id.clone())
        };
        let Some(id) = id else {
            debug!("render index {index} out of range, ignoring");
            return;
        };
        if let Err(e) = self.audio.set_default_render(&id) {
            warn!("default render switch failed: {e}");
        }
    }

    fn set_default_capture(&self, index: usize) {
        let id = {
            let snapshot = self.capture_snapshot.lock().expect("lock poisoned");
            snapshot.get(index).map(|d| d.id.clone())
        };
        let Some(id) = id else {
            debug!("capture index {index} out of range, ignoring");
            return;
        };
        if let Err(e) = self.audio.set_default_capture(&id) {
            warn!("default capture switch failed: {e}");
        }
    }

    /// Installs a fresh waiter for the next `CFG` response, superseding
    /// any request still in flight.
    fn install_cfg_waiter(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .cfg_waiter
            .lock()
            .expect("lock poisoned")
            .replace(tx);
        if previous.is_some() {
            debug!("superseding in-flight CFG request");
        }
        rx
    }

    fn complete_cfg_waiter(&self, full_line: String) {
        let waiter = self.cfg_waiter.lock().expect("lock poisoned").take();
        match waiter {
            Some(tx) => {
                let _ = tx.send(full_line);
            }
            None => debug!("unsolicited CFG response: {full_line}"),
        }
    }

    /// Reads the device configuration.  `None` on timeout, link failure,
    /// a superseding request, or an unparseable response.
    pub async fn request_config(&self) -> Option<DeviceConfig> {
        let rx = self.install_cfg_waiter();
        if self.link.send_line("CFG GET").await.is_err() {
            return None;
        }
        match tokio::time::timeout(CFG_GET_TIMEOUT, rx).await {
            Ok(Ok(line)) => DeviceConfig::parse_response(&line),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!("CFG GET timed out");
                None
            }
        }
    }

    /// Writes `config` to the device and waits for its ack.
    ///
    /// Invalid configs are rejected host-side without touching the link.
    pub async fn import_config(&self, config: &DeviceConfig) -> bool {
        if !config.is_valid() {
            warn!("refusing to import out-of-range config");
            return false;
        }
        let rx = self.install_cfg_waiter();
        if self.link.send_line(&config.import_payload()).await.is_err() {
            return false;
        }
        match tokio::time::timeout(CFG_IMPORT_TIMEOUT, rx).await {
            Ok(Ok(line)) => line.to_ascii_uppercase().starts_with("CFG IMPORT OK"),
            Ok(Err(_)) => false,
            Err(_) => {
                debug!("CFG IMPORT timed out");
                false
            }
        }
    }

    /// Asks the device to persist its current settings to flash.  The
    /// command has no ack; the delay gives the write time to settle
    /// before any follow-up command.
    pub async fn save_device_config(&self) -> bool {
        if self.link.send_line("CFG SAVE").await.is_err() {
            return false;
        }
        tokio::time::sleep(CFG_SAVE_SETTLE).await;
        true
    }

    /// Resets the device to factory settings.  No ack; the erase takes
    /// longer than a save.
    pub async fn clear_device_config(&self) -> bool {
        if self.link.send_line("CFG CLR").await.is_err() {
            return false;
        }
        tokio::time::sleep(CFG_CLEAR_SETTLE).await;
        true
    }
}

/// Builds the `BEGIN`/`ITEM`/`END` frame for one endpoint list.
fn endpoint_list_lines(prefix: &str, devices: &[AudioDevice]) -> Vec<String> {
    let mut lines = Vec::with_capacity(devices.len() + 2);
    lines.push(format!("{prefix} BEGIN"));
    for (i, device) in devices.iter().enumerate() {
        lines.push(format!("{prefix} ITEM {i} {}", sanitize_field(&device.name)));
    }
    lines.push(format!("{prefix} END"));
    lines
}

// ── Tests ─────────────────────────────────────────────────────────────────────
