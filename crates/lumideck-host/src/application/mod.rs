//! Application layer: the use-cases that drive the device link.
//!
//! - [`link`] owns connection policy, probing, and reconnection.
//! - [`dispatch`] routes parsed inbound commands to handlers.
//! - [`now_playing`] mirrors media session state out to the device.

pub mod dispatch;
pub mod link;
pub mod now_playing;
