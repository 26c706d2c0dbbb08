//! Media session infrastructure.
//!
//! Wraps the OS "now playing" session API behind a channel of
//! [`MediaEvent`]s so the sync engine never touches platform types.  On
//! Windows the production implementation sits on the system media
//! transport controls; other platforms can plug in MPRIS or similar.
//!
//! # Testability
//!
//! The [`MediaSource`] trait allows tests to inject synthetic sessions
//! without an OS media stack; see [`mock::MockMediaSource`].

use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;

/// Track metadata captured from the active media session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Stable track id from the player, when one is exposed.  Used to
    /// key lyric lookups.
    pub track_id: Option<String>,
    /// Raw encoded thumbnail bytes (PNG/JPEG), when the player provides
    /// artwork.
    pub thumbnail: Option<Vec<u8>>,
}

/// Coarse playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

/// Playback position snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimelineSnapshot {
    pub position_ms: u64,
    /// Zero when the player does not report a duration.
    pub duration_ms: u64,
}

/// Events produced by a media source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// The track (or its metadata) changed.
    MetadataChanged(MediaSnapshot),
    /// Play/pause/stop state changed.
    PlaybackChanged(PlaybackStatus),
    /// The playback position moved.
    TimelineChanged(TimelineSnapshot),
    /// The session went away (player closed).
    SessionEnded,
}

/// Error type for media source operations.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media source has already been started")]
    AlreadyStarted,
    #[error("platform not supported: {0}")]
    UnsupportedPlatform(String),
}

/// Trait abstracting media event production.
///
/// The production implementation subscribes to the OS media session;
/// tests use [`mock::MockMediaSource`].
pub trait MediaSource: Send {
    /// Starts the source and returns the receiver for its events.
    fn start(&self) -> Result<mpsc::Receiver<MediaEvent>, MediaError>;
    /// Stops the source and releases OS resources.
    fn stop(&self);
}

/// Source for platforms without a media session backend.  Produces no
/// events; the channel stays open until [`MediaSource::stop`].
#[derive(Default)]
pub struct NullMediaSource {
    tx: std::sync::Mutex<Option<mpsc::Sender<MediaEvent>>>,
}

impl NullMediaSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaSource for NullMediaSource {
    fn start(&self) -> Result<mpsc::Receiver<MediaEvent>, MediaError> {
        let mut slot = self.tx.lock().expect("lock poisoned");
        if slot.is_some() {
            return Err(MediaError::AlreadyStarted);
        }
        let (tx, rx) = mpsc::channel(16);
        *slot = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        self.tx.lock().expect("lock poisoned").take();
    }
}
