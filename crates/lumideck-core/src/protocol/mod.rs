//! Line protocol module: inbound command parsing and line framing.

pub mod command;
pub mod framing;

pub use command::{parse_line, sanitize_field, DeviceCommand};
pub use framing::LineSplitter;

/// Greeting token sent by either side to open a session.
pub const HANDSHAKE: &str = "HELLO";

/// Acknowledgment the host sends back when the device greets it.
pub const HANDSHAKE_ACK: &str = "HELLO OK";

/// Fixed serial line rate used by every Lumideck device.
pub const BAUD_RATE: u32 = 115_200;
