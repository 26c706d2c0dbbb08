//! Mock audio backend for unit testing.

use std::sync::Mutex;

use super::{AudioDevice, AudioEndpoints, AudioError};

#[derive(Debug)]
struct MockState {
    render: Vec<AudioDevice>,
    capture: Vec<AudioDevice>,
    default_render: usize,
    default_capture: usize,
    volume: u8,
    muted: bool,
}

/// An in-memory [`AudioEndpoints`] implementation with scripted devices.
pub struct MockAudioEndpoints {
    state: Mutex<MockState>,
}

impl MockAudioEndpoints {
    /// Creates a mock with `render`/`capture` device name lists; ids are
    /// derived from the names.
    pub fn new(render: &[&str], capture: &[&str]) -> Self {
        let to_devices = |names: &[&str]| {
            names
                .iter()
                .map(|n| AudioDevice {
                    id: format!("id-{n}"),
                    name: n.to_string(),
                })
                .collect()
        };
        Self {
            state: Mutex::new(MockState {
                render: to_devices(render),
                capture: to_devices(capture),
                default_render: 0,
                default_capture: 0,
                volume: 50,
                muted: false,
            }),
        }
    }
}

impl AudioEndpoints for MockAudioEndpoints {
    fn render_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        Ok(self.state.lock().expect("lock poisoned").render.clone())
    }

    fn capture_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        Ok(self.state.lock().expect("lock poisoned").capture.clone())
    }

    fn default_render_index(&self) -> Result<usize, AudioError> {
        Ok(self.state.lock().expect("lock poisoned").default_render)
    }

    fn default_capture_index(&self) -> Result<usize, AudioError> {
        Ok(self.state.lock().expect("lock poisoned").default_capture)
    }

    fn set_default_render(&self, id: &str) -> Result<(), AudioError> {
        let mut state = self.state.lock().expect("lock poisoned");
        match state.render.iter().position(|d| d.id == id) {
            Some(i) => {
                state.default_render = i;
                Ok(())
            }
            None => Err(AudioError::DeviceNotFound(id.to_string())),
        }
    }

    fn set_default_capture(&self, id: &str) -> Result<(), AudioError> {
        let mut state = self.state.lock().expect("lock poisoned");
        match state.capture.iter().position(|d| d.id == id) {
            Some(i) => {
                state.default_capture = i;
                Ok(())
            }
            None => Err(AudioError::DeviceNotFound(id.to_string())),
        }
    }

    fn volume(&self) -> Result<u8, AudioError> {
        Ok(self.state.lock().expect("lock poisoned").volume)
    }

    fn set_volume(&self, percent: u8) -> Result<(), AudioError> {
        self.state.lock().expect("lock poisoned").volume = percent.min(100);
        Ok(())
    }

    fn muted(&self) -> Result<bool, AudioError> {
        Ok(self.state.lock().expect("lock poisoned").muted)
    }

    fn set_muted(&self, muted: bool) -> Result<(), AudioError> {
        self.state.lock().expect("lock poisoned").muted = muted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_lists_scripted_devices() {
        let audio = MockAudioEndpoints::new(&["Speakers", "HDMI"], &["Mic"]);
        assert_eq!(audio.render_devices().unwrap().len(), 2);
        assert_eq!(audio.capture_devices().unwrap().len(), 1);
    }

    #[test]
    fn test_set_default_render_by_id() {
        let audio = MockAudioEndpoints::new(&["Speakers", "HDMI"], &[]);
        audio.set_default_render("id-HDMI").unwrap();
        assert_eq!(audio.default_render_index().unwrap(), 1);
    }

    #[test]
    fn test_set_default_render_unknown_id_fails() {
        let audio = MockAudioEndpoints::new(&["Speakers"], &[]);
        assert!(matches!(
            audio.set_default_render("id-Nope"),
            Err(AudioError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_toggle_mute_flips_state() {
        let audio = MockAudioEndpoints::new(&[], &[]);
        assert!(!audio.muted().unwrap());
        assert!(audio.toggle_mute().unwrap());
        assert!(audio.muted().unwrap());
        assert!(!audio.toggle_mute().unwrap());
    }

    #[test]
    fn test_set_volume_clamps_to_100() {
        let audio = MockAudioEndpoints::new(&[], &[]);
        audio.set_volume(250).unwrap();
        assert_eq!(audio.volume().unwrap(), 100);
    }
}
