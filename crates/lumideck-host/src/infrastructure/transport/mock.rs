//! In-memory transport used by unit and integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Transport, TransportError, TransportKind};

/// Records every line sent through it; never fails unless told to.
pub struct MockTransport {
    label: String,
    kind: TransportKind,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: AtomicBool,
}

impl MockTransport {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            kind: TransportKind::Serial,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn new_ble(label: &str) -> Self {
        Self {
            kind: TransportKind::Ble,
            ..Self::new(label)
        }
    }

    /// Handle onto the record of sent lines, valid after the transport
    /// has been boxed and mounted.
    pub fn sent_lines(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }

    /// Handle onto the closed flag.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Makes every subsequent send fail with [`TransportError::Closed`].
    pub fn start_failing(&self) {
        self.fail_sends.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send_line(&self, line: &str) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::Relaxed) || self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        self.sent
            .lock()
            .expect("mock sent-lines lock poisoned")
            .push(line.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}
