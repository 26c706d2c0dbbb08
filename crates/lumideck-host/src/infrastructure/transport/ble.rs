//! BLE GATT transport.
//!
//! The device exposes one service with two characteristics: a notify
//! characteristic that carries device-to-host bytes and a write
//! characteristic for host-to-device bytes.  Notifications are consumed on
//! a spawned task and re-framed into lines; outbound lines go out as
//! write-without-response, serialized by a lock because the OS BLE stacks
//! reject overlapping writes on one characteristic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use lumideck_core::LineSplitter;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::{uuid, Uuid};

use super::{SessionId, Transport, TransportError, TransportEvent, TransportKind};

/// GATT service advertised by every Lumideck device.
pub const SERVICE_UUID: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef0");

/// Device-to-host notify characteristic.
pub const NOTIFY_CHAR_UUID: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef1");

/// Host-to-device write characteristic.
pub const WRITE_CHAR_UUID: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef2");

/// A BLE GATT device link.
pub struct BleTransport {
    label: String,
    peripheral: Peripheral,
    write_char: Characteristic,
    // Overlapping writes on one characteristic are rejected by the stack.
    write_lock: Mutex<()>,
    closing: Arc<AtomicBool>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BleTransport {
    /// Connects to `peripheral`, wires up the GATT characteristics, and
    /// starts the notification reader task.
    ///
    /// `name` is the resolved advertisement name used for the link label;
    /// events go out on `event_tx` tagged with `session`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Ble`] for stack failures and
    /// [`TransportError::MissingCharacteristic`] when the peripheral does
    /// not carry the expected service layout.
    pub async fn connect(
        peripheral: Peripheral,
        name: &str,
        session: SessionId,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let chars = peripheral.characteristics();
        let notify_char = chars
            .iter()
            .find(|c| c.uuid == NOTIFY_CHAR_UUID)
            .cloned()
            .ok_or(TransportError::MissingCharacteristic(NOTIFY_CHAR_UUID))?;
        let write_char = chars
            .iter()
            .find(|c| c.uuid == WRITE_CHAR_UUID)
            .cloned()
            .ok_or(TransportError::MissingCharacteristic(WRITE_CHAR_UUID))?;

        peripheral.subscribe(&notify_char).await?;

        let closing = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(notification_loop(
            peripheral.clone(),
            session,
            event_tx,
            Arc::clone(&closing),
        ));

        let label = format!("BLE:{name}");
        info!("bluetooth link established: {label}");
        Ok(Self {
            label,
            peripheral,
            write_char,
            write_lock: Mutex::new(()),
            closing,
            reader: std::sync::Mutex::new(Some(reader)),
        })
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_line(&self, line: &str) -> Result<(), TransportError> {
        if self.closing.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');

        let _guard = self.write_lock.lock().await;
        self.peripheral
            .write(&self.write_char, &payload, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.closing.store(true, Ordering::Relaxed);
        if let Ok(mut slot) = self.reader.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        if let Err(e) = self.peripheral.disconnect().await {
            debug!("disconnect after close failed: {e}");
        }
        debug!("bluetooth link {} closed", self.label);
    }
}

/// Consumes GATT notifications and re-frames them into lines.
async fn notification_loop(
    peripheral: Peripheral,
    session: SessionId,
    event_tx: mpsc::Sender<TransportEvent>,
    closing: Arc<AtomicBool>,
) {
    let mut stream = match peripheral.notifications().await {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to open notification stream: {e}");
            let _ = event_tx.send(TransportEvent::Closed { session }).await;
            return;
        }
    };

    let mut splitter = LineSplitter::new();
    while let Some(notification) = stream.next().await {
        if notification.uuid != NOTIFY_CHAR_UUID {
            continue;
        }
        for line in splitter.push(&notification.value) {
            let event = TransportEvent::Line {
                session,
                text: line,
            };
            if event_tx.send(event).await.is_err() {
                return;
            }
        }
    }

    // Stream end means the peripheral dropped off unless we closed it.
    if !closing.load(Ordering::Relaxed) {
        let _ = event_tx.send(TransportEvent::Closed { session }).await;
    }
    debug!("bluetooth notification reader stopped");
}
