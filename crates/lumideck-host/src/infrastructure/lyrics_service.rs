//! Synced lyric lookup over HTTP.
//!
//! When a track carries a catalogue id, the host asks the lyric service
//! for its LRC text.  The response is JSON with the LRC body nested under
//! `lrc.lyric`; an absent or empty body means the track has no synced
//! lyrics, which is a normal outcome, not an error.
//!
//! Lookups run concurrently with playback and are cancelled by the sync
//! engine when the track changes, so the request timeout is kept short.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Per-request timeout.  A slow lookup is worthless once the track moves on.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(6);

/// Error type for lyric lookups.
#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("lyric request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("lyric response was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait abstracting the lyric lookup backend.
///
/// Tests implement this directly with canned responses.
#[async_trait]
pub trait LyricSource: Send + Sync {
    /// Fetches raw LRC text for a track id.  `Ok(None)` means the track
    /// has no synced lyrics.
    async fn fetch_lrc(&self, track_id: &str) -> Result<Option<String>, LyricsError>;
}

/// HTTP implementation of [`LyricSource`].
pub struct HttpLyricSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLyricSource {
    /// Creates a source against `base_url` (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns [`LyricsError::Http`] when the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, LyricsError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LyricSource for HttpLyricSource {
    async fn fetch_lrc(&self, track_id: &str) -> Result<Option<String>, LyricsError> {
        let url = format!(
            "{}/api/song/lyric?os=pc&id={track_id}&lv=-1&kv=-1&tv=-1",
            self.base_url
        );
        debug!("fetching lyrics for track {track_id}");

        let body: serde_json::Value = self.client.get(&url).send().await?.json().await?;
        Ok(extract_lrc(&body))
    }
}

/// Pulls the LRC body out of a lyric service response.
fn extract_lrc(body: &serde_json::Value) -> Option<String> {
    let text = body.get("lrc")?.get("lyric")?.as_str()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
