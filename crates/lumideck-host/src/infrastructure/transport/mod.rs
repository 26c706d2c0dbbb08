//! Device link transports.
//!
//! A transport carries newline-delimited text between the host and the
//! device over one physical medium.  Two implementations exist: a USB
//! serial port ([`serial::SerialTransport`]) and a BLE GATT link
//! ([`ble::BleTransport`]).  Both deliver inbound traffic as
//! [`TransportEvent`]s on an `mpsc` channel and accept outbound lines
//! through the [`Transport`] trait.
//!
//! [`SharedLink`] is the single mount point for the active transport.
//! Installing a new transport closes the previous one, so at most one
//! medium carries the session at any time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod ble;
pub mod mock;
pub mod serial;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The serial port could not be opened.
    #[error("failed to open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },
    /// A serial write failed.
    #[error("serial write failed: {0}")]
    SerialWrite(#[from] std::io::Error),
    /// The Bluetooth stack reported an error.
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
    /// The expected GATT service or characteristic is missing.
    #[error("device does not expose characteristic {0}")]
    MissingCharacteristic(uuid::Uuid),
    /// The link is not connected.
    #[error("link is closed")]
    Closed,
}

/// Which physical medium a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Serial,
    Ble,
}

/// Identifies one transport mount.  0 is never allocated and means "no
/// transport mounted".
pub type SessionId = u64;

/// Events emitted by a transport to the application layer.
///
/// Every event carries the session id the transport was mounted under,
/// so consumers can discard traffic queued by a transport that has since
/// been replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound line, already split and trimmed.
    Line { session: SessionId, text: String },
    /// The transport lost its medium (unplug, read failure, BLE drop).
    Closed { session: SessionId },
}

/// One open device link.
///
/// Implementations must be safe to call from multiple tasks; writes are
/// serialized internally.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Human-readable label for logs and state display, e.g. `COM5` or
    /// `BLE:Lumideck-3F`.
    fn label(&self) -> String;

    /// Sends one line.  The terminator is appended by the transport.
    async fn send_line(&self, line: &str) -> Result<(), TransportError>;

    /// Tears the link down and stops its reader.  Idempotent.
    async fn close(&self);
}

/// The single mount point for the active transport.
///
/// The ready flag tracks whether the session handshake completed; the
/// link manager refuses to treat a serial port as usable until the
/// device has greeted the host.
#[derive(Clone, Default)]
pub struct SharedLink {
    inner: Arc<Mutex<Option<Box<dyn Transport>>>>,
    ready: Arc<AtomicBool>,
    session_counter: Arc<AtomicU64>,
    current_session: Arc<AtomicU64>,
}

impl SharedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the session id for the next transport to mount.
    ///
    /// The id is handed to the transport before [`install`] so every
    /// event it emits is tagged, including those queued before the mount
    /// completes.
    ///
    /// [`install`]: SharedLink::install
    pub fn next_session(&self) -> SessionId {
        self.session_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The session id of the mounted transport, 0 when none.
    pub fn current_session(&self) -> SessionId {
        self.current_session.load(Ordering::Relaxed)
    }

    /// Mounts a transport under `session`, closing whatever was mounted
    /// before.
    ///
    /// Clears the ready flag: every new transport starts its own
    /// handshake from scratch.
    pub async fn install(&self, transport: Box<dyn Transport>, session: SessionId) {
        let label = transport.label();
        let mut slot = self.inner.lock().await;
        if let Some(old) = slot.take() {
            debug!("replacing link {} with {label}", old.label());
            old.close().await;
        }
        self.ready.store(false, Ordering::Relaxed);
        self.current_session.store(session, Ordering::Relaxed);
        *slot = Some(transport);
        info!("link mounted: {label}");
    }

    /// Unmounts and closes the active transport, if any.
    pub async fn close(&self) {
        let mut slot = self.inner.lock().await;
        self.ready.store(false, Ordering::Relaxed);
        self.current_session.store(0, Ordering::Relaxed);
        if let Some(old) = slot.take() {
            info!("link closed: {}", old.label());
            old.close().await;
        }
    }

    /// Sends one line over the active transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when no transport is mounted.
    pub async fn send_line(&self, line: &str) -> Result<(), TransportError> {
        let slot = self.inner.lock().await;
        match slot.as_ref() {
            Some(t) => t.send_line(line).await,
            None => Err(TransportError::Closed),
        }
    }

    /// Sends a line, logging instead of failing when the link is down.
    /// Used on paths where a dropped line is acceptable (progress ticks,
    /// lyric updates).
    pub async fn send_line_lossy(&self, line: &str) {
        if let Err(e) = self.send_line(line).await {
            warn!("dropped outbound line: {e}");
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// The label and kind of the mounted transport, if any.
    pub async fn describe(&self) -> Option<(TransportKind, String)> {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|t| (t.kind(), t.label()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[tokio::test]
    async fn test_send_on_empty_link_returns_closed() {
        let link = SharedLink::new();
        let result = link.send_line("HELLO OK").await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_install_closes_previous_transport() {
        // Arrange
        let link = SharedLink::new();
        let first = MockTransport::new("first");
        let first_closed = first.closed_flag();
        let first_session = link.next_session();
        link.install(Box::new(first), first_session).await;
        link.mark_ready();

        // Act
        let second_session = link.next_session();
        link.install(Box::new(MockTransport::new("second")), second_session)
            .await;

        // Assert: old transport closed, ready flag reset, session advanced
        assert!(first_closed.load(Ordering::Relaxed));
        assert!(!link.is_ready());
        assert_eq!(link.current_session(), second_session);
        assert_ne!(first_session, second_session);
        assert_eq!(
            link.describe().await,
            Some((TransportKind::Serial, "second".to_string()))
        );
    }

    #[tokio::test]
    async fn test_sent_lines_reach_the_mounted_transport() {
        let link = SharedLink::new();
        let mock = MockTransport::new("dev");
        let sent = mock.sent_lines();
        let session = link.next_session();
        link.install(Box::new(mock), session).await;

        link.send_line("NP META\ta\tb\tc").await.unwrap();
        link.send_line_lossy("NP PROG 1 2").await;

        let lines = sent.lock().unwrap().clone();
        assert_eq!(lines, vec!["NP META\ta\tb\tc", "NP PROG 1 2"]);
    }

    #[tokio::test]
    async fn test_close_unmounts_and_clears_ready() {
        let link = SharedLink::new();
        let session = link.next_session();
        link.install(Box::new(MockTransport::new("dev")), session).await;
        link.mark_ready();

        link.close().await;

        assert!(!link.is_connected().await);
        assert!(!link.is_ready());
        assert_eq!(link.current_session(), 0);
    }
}
