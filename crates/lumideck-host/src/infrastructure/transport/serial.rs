//! USB serial transport.
//!
//! The port is opened at the fixed device baud rate with a short read
//! timeout.  Reads happen on a dedicated blocking thread so synchronous
//! serial I/O never stalls the Tokio runtime; complete lines are pushed
//! into the transport event channel with `blocking_send`.
//!
//! # Read timeout
//!
//! The 200ms read timeout doubles as the shutdown poll interval: on each
//! timeout the reader checks the `running` flag and exits cleanly when the
//! transport has been closed.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lumideck_core::protocol::BAUD_RATE;
use lumideck_core::LineSplitter;
use serialport::SerialPort;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{SessionId, Transport, TransportError, TransportEvent, TransportKind};

/// Read timeout; also the shutdown poll interval for the reader thread.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Consecutive hard read errors tolerated before the link is declared dead.
/// An unplugged adapter surfaces as a burst of these.
const MAX_READ_ERRORS: u32 = 5;

/// A serial port device link.
pub struct SerialTransport {
    port_name: String,
    writer: Mutex<Box<dyn SerialPort>>,
    running: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Opens `port_name` and starts the reader thread.
    ///
    /// Inbound lines and the eventual close notification arrive on
    /// `event_tx`, tagged with `session`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SerialOpen`] when the port cannot be
    /// opened or cloned for reading.
    pub fn open(
        port_name: &str,
        session: SessionId,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| TransportError::SerialOpen {
                port: port_name.to_string(),
                source,
            })?;

        let reader = port.try_clone().map_err(|source| TransportError::SerialOpen {
            port: port_name.to_string(),
            source,
        })?;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let thread_name = format!("lumideck-serial-{port_name}");
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                reader_loop(reader, session, event_tx, running_clone);
            })
            .map_err(|source| TransportError::SerialOpen {
                port: port_name.to_string(),
                source: serialport::Error::from(source),
            })?;

        info!("serial port {port_name} opened at {BAUD_RATE} baud");
        Ok(Self {
            port_name: port_name.to_string(),
            writer: Mutex::new(port),
            running,
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn label(&self) -> String {
        self.port_name.clone()
    }

    async fn send_line(&self, line: &str) -> Result<(), TransportError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        // Writes are short; holding the lock across the syscall is fine.
        let mut writer = self.writer.lock().map_err(|_| TransportError::Closed)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    async fn close(&self) {
        self.running.store(false, Ordering::Relaxed);
        debug!("serial port {} closing", self.port_name);
    }
}

/// The blocking receive loop executed on the reader thread.
fn reader_loop(
    mut port: Box<dyn SerialPort>,
    session: SessionId,
    event_tx: mpsc::Sender<TransportEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 1024];
    let mut splitter = LineSplitter::new();
    let mut consecutive_errors = 0u32;

    while running.load(Ordering::Relaxed) {
        let n = match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                consecutive_errors = 0;
                n
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                consecutive_errors = 0;
                continue;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    "serial read error ({consecutive_errors}/{MAX_READ_ERRORS}): {e}"
                );
                if consecutive_errors >= MAX_READ_ERRORS {
                    error!("serial link lost after repeated read errors");
                    break;
                }
                continue;
            }
        };

        for line in splitter.push(&buf[..n]) {
            let event = TransportEvent::Line {
                session,
                text: line,
            };
            if event_tx.blocking_send(event).is_err() {
                // Receiver dropped, application is shutting down.
                return;
            }
        }
    }

    // Only report Closed for link death, not for a requested close.
    if running.load(Ordering::Relaxed) {
        let _ = event_tx.blocking_send(TransportEvent::Closed { session });
    }
    debug!("serial reader stopped");
}
