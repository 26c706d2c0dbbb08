//! Audio endpoint infrastructure.
//!
//! The device can list the host's speakers and microphones, switch the
//! default endpoint, and drive master volume and mute.  All of that is OS
//! specific, so it hides behind the synchronous [`AudioEndpoints`] trait;
//! calls are short property reads/writes and run fine from async context.
//!
//! [`NullAudioEndpoints`] is the fallback for platforms without a backend:
//! every list is empty and every setter reports [`AudioError::Unavailable`].

use thiserror::Error;

pub mod mock;

/// One render or capture endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// OS-stable endpoint id.
    pub id: String,
    /// Human-readable endpoint name.
    pub name: String,
}

/// Error type for audio endpoint operations.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio control unavailable: {0}")]
    Unavailable(String),
    #[error("audio endpoint not found: {0}")]
    DeviceNotFound(String),
}

/// Trait abstracting the OS audio endpoint API.
///
/// The production implementation wraps the platform mixer; tests use
/// [`mock::MockAudioEndpoints`].
pub trait AudioEndpoints: Send + Sync {
    /// Playback endpoints, default-first.
    fn render_devices(&self) -> Result<Vec<AudioDevice>, AudioError>;
    /// Recording endpoints, default-first.
    fn capture_devices(&self) -> Result<Vec<AudioDevice>, AudioError>;
    /// Index of the default render endpoint within [`render_devices`].
    ///
    /// [`render_devices`]: AudioEndpoints::render_devices
    fn default_render_index(&self) -> Result<usize, AudioError>;
    /// Index of the default capture endpoint within [`capture_devices`].
    ///
    /// [`capture_devices`]: AudioEndpoints::capture_devices
    fn default_capture_index(&self) -> Result<usize, AudioError>;
    fn set_default_render(&self, id: &str) -> Result<(), AudioError>;
    fn set_default_capture(&self, id: &str) -> Result<(), AudioError>;
    /// Master volume, 0..=100.
    fn volume(&self) -> Result<u8, AudioError>;
    fn set_volume(&self, percent: u8) -> Result<(), AudioError>;
    fn muted(&self) -> Result<bool, AudioError>;
    fn set_muted(&self, muted: bool) -> Result<(), AudioError>;

    /// Flips mute and returns the new state.
    fn toggle_mute(&self) -> Result<bool, AudioError> {
        let next = !self.muted()?;
        self.set_muted(next)?;
        Ok(next)
    }
}

/// Backend for platforms without audio control.
pub struct NullAudioEndpoints;

impl AudioEndpoints for NullAudioEndpoints {
    fn render_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        Ok(Vec::new())
    }
    fn capture_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        Ok(Vec::new())
    }
    fn default_render_index(&self) -> Result<usize, AudioError> {
        Err(AudioError::Unavailable("no audio backend".to_string()))
    }
    fn default_capture_index(&self) -> Result<usize, AudioError> {
        Err(AudioError::Unavailable("no audio backend".to_string()))
    }
    fn set_default_render(&self, _id: &str) -> Result<(), AudioError> {
        Err(AudioError::Unavailable("no audio backend".to_string()))
    }
    fn set_default_capture(&self, _id: &str) -> Result<(), AudioError> {
        Err(AudioError::Unavailable("no audio backend".to_string()))
    }
    fn volume(&self) -> Result<u8, AudioError> {
        Err(AudioError::Unavailable("no audio backend".to_string()))
    }
    fn set_volume(&self, _percent: u8) -> Result<(), AudioError> {
        Err(AudioError::Unavailable("no audio backend".to_string()))
    }
    fn muted(&self) -> Result<bool, AudioError> {
        Err(AudioError::Unavailable("no audio backend".to_string()))
    }
    fn set_muted(&self, _muted: bool) -> Result<(), AudioError> {
        Err(AudioError::Unavailable("no audio backend".to_string()))
    }
}
