//! # lumideck-core
//!
//! Shared library for the Lumideck host bridge containing the line protocol
//! model, lyric timing structures, cover-art transcoding, and the device
//! configuration schema.
//!
//! This crate is used by the host application and by tooling.  It has zero
//! dependencies on OS APIs, serial ports, Bluetooth stacks, or HTTP clients.
//!
//! - **`protocol`** -- How text travels over the link.  Inbound lines are
//!   parsed into a closed [`protocol::DeviceCommand`] enum in a single step;
//!   outbound replies are plain UTF-8 lines terminated by `\n`.
//!
//! - **`lyrics`** -- LRC parsing and the time-indexed [`lyrics::LyricTrack`]
//!   used to map a playback position to the current/next lyric line.
//!
//! - **`cover`** -- RGB565 packing and the `BEGIN`/`DATA`/`END` hex chunk
//!   framing used to stream a 40×40 cover image over the link.
//!
//! - **`config`** -- The on-device configuration schema, its validation
//!   ranges, and the `CFG` response/import wire formats.

pub mod config;
pub mod cover;
pub mod lyrics;
pub mod protocol;

pub use config::{DeviceConfig, ExportedDeviceConfig};
pub use cover::{pack_rgb565, CoverAssembler, CoverError, COVER_PIXELS, COVER_SIZE, PIXELS_PER_CHUNK};
pub use lyrics::{LyricCursor, LyricLine, LyricTrack};
pub use protocol::{parse_line, sanitize_field, DeviceCommand, LineSplitter};
