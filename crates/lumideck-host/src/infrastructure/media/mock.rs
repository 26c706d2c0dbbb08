//! Mock media source for unit testing.
//!
//! Allows tests to inject synthetic [`MediaEvent`]s without an OS media
//! session.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, Sender};

use super::{MediaError, MediaEvent, MediaSource};

/// A mock implementation of [`MediaSource`] that lets tests inject events.
pub struct MockMediaSource {
    sender: Arc<Mutex<Option<Sender<MediaEvent>>>>,
}

impl MockMediaSource {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Injects a synthetic event, as if produced by the OS session.
    ///
    /// Panics if `start()` has not been called or `stop()` has.
    pub fn inject_event(&self, event: MediaEvent) {
        let guard = self.sender.lock().expect("lock poisoned");
        match guard.as_ref() {
            Some(sender) => sender
                .try_send(event)
                .expect("event channel full or receiver dropped"),
            None => panic!("MockMediaSource::inject_event called before start()"),
        }
    }
}

impl Default for MockMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for MockMediaSource {
    fn start(&self) -> Result<mpsc::Receiver<MediaEvent>, MediaError> {
        let mut guard = self.sender.lock().expect("lock poisoned");
        if guard.is_some() {
            return Err(MediaError::AlreadyStarted);
        }
        let (tx, rx) = mpsc::channel(64);
        *guard = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        // Drop the sender to close the channel
        *self.sender.lock().expect("lock poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::{MediaSnapshot, PlaybackStatus};

    #[tokio::test]
    async fn test_mock_media_source_starts_and_receives_events() {
        // Arrange
        let source = MockMediaSource::new();
        let mut rx = source.start().expect("start should succeed");

        // Act
        source.inject_event(MediaEvent::MetadataChanged(MediaSnapshot {
            title: "Song".to_string(),
            ..Default::default()
        }));
        source.inject_event(MediaEvent::PlaybackChanged(PlaybackStatus::Playing));

        // Assert
        assert!(matches!(
            rx.recv().await.unwrap(),
            MediaEvent::MetadataChanged(m) if m.title == "Song"
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            MediaEvent::PlaybackChanged(PlaybackStatus::Playing)
        );
    }

    #[tokio::test]
    async fn test_mock_media_source_stop_closes_channel() {
        let source = MockMediaSource::new();
        let mut rx = source.start().expect("start should succeed");

        source.stop();

        assert!(rx.recv().await.is_none(), "channel should close after stop()");
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let source = MockMediaSource::new();
        let _rx = source.start().expect("first start");
        assert!(matches!(source.start(), Err(MediaError::AlreadyStarted)));
    }
}
