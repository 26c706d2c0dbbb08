//! Infrastructure layer: OS and network facing services.
//!
//! Everything here hides a platform or network API behind a trait or a
//! channel so the application layer stays testable without hardware.

pub mod artwork;
pub mod audio;
pub mod locator;
pub mod lyrics_service;
pub mod media;
pub mod storage;
pub mod transport;
