//! Now-playing mirroring: metadata, progress, lyrics, and cover art.
//!
//! The engine consumes [`MediaEvent`]s and keeps the device's panel in
//! step with the host's media session:
//!
//! - A track change clears the panel (`LRC CLR`, `NP CLR`), pushes fresh
//!   metadata, and kicks off the lyric lookup and cover transfer in the
//!   background.
//! - Timeline ticks drive the lyric cursor and a throttled `NP PROG`.
//! - The dispatcher's resync signal replays the last known state so a
//!   rebooted device repaints without waiting for the next track change.
//!
//! # Throttles
//!
//! Progress lines are rate-limited (the device redraws its bar on every
//! one) and suppressed entirely while a cover frame is streaming, because
//! interleaving a 16-line hex blob with progress updates starves the
//! panel.  Metadata repeats within 2 seconds are dropped.
//!
//! # Staleness
//!
//! Lyric lookups race track changes.  Every change bumps a generation
//! counter; a lookup that finishes under an old generation is discarded
//! so a slow response can never paint the previous track's lyrics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::infrastructure::artwork;
use crate::infrastructure::lyrics_service::LyricSource;
use crate::infrastructure::media::{MediaEvent, MediaSnapshot, PlaybackStatus, TimelineSnapshot};
use crate::infrastructure::transport::SharedLink;
use lumideck_core::cover::{encode_chunks, COVER_SIZE};
use lumideck_core::{sanitize_field, LyricCursor, LyricTrack};

/// Minimum position delta and interval for `NP PROG` when the duration
/// is known.
const PROG_MIN_DELTA: u64 = 250;
const PROG_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Looser gate when the player reports no duration; the bar is
/// indeterminate so precision buys nothing.
const PROG_MIN_DELTA_NO_DUR: u64 = 200;
const PROG_MIN_INTERVAL_NO_DUR: Duration = Duration::from_millis(1000);

/// Minimum interval between identical `NP META` lines.
const META_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Last progress line that went out, for gating the next one.
#[derive(Debug, Clone, Copy)]
struct ProgressMark {
    position_ms: u64,
    duration_ms: u64,
    sent_at: Instant,
}

/// Decides whether a progress line is due.
fn progress_due(last: Option<&ProgressMark>, position_ms: u64, duration_ms: u64) -> bool {
    let Some(mark) = last else {
        return true;
    };
    let (min_delta, min_interval) = if duration_ms == 0 {
        (PROG_MIN_DELTA_NO_DUR, PROG_MIN_INTERVAL_NO_DUR)
    } else {
        (PROG_MIN_DELTA, PROG_MIN_INTERVAL)
    };
    let delta = position_ms.abs_diff(mark.position_ms);
    let duration_changed = duration_ms != 0 && duration_ms != mark.duration_ms;
    duration_changed || delta >= min_delta || mark.sent_at.elapsed() >= min_interval
}

/// Builds the `NP COV` frame for one cover image.
fn cover_frame_lines(pixels: &[u16]) -> Vec<String> {
    let mut lines = Vec::with_capacity(18);
    lines.push(format!("NP COV BEGIN {COVER_SIZE} {COVER_SIZE}"));
    for chunk in encode_chunks(pixels) {
        lines.push(format!("NP COV DATA {chunk}"));
    }
    lines.push("NP COV END".to_string());
    lines
}

/// Mutable mirror state, guarded by one lock.
#[derive(Default)]
struct SyncState {
    track_key: String,
    title: String,
    artist: String,
    lyric_track: Arc<LyricTrack>,
    lyric_cursor: LyricCursor,
    /// Track id of the last lyric lookup; one id is looked up once per
    /// track, so a lyricless track does not refetch on every metadata
    /// repeat.
    lyric_fetch_id: Option<String>,
    last_position_ms: u64,
    last_progress: Option<ProgressMark>,
    last_meta: Option<(String, Instant)>,
    last_cover: Option<Arc<Vec<u16>>>,
}

/// Mirrors media session state out to the device.
pub struct SyncEngine {
    link: SharedLink,
    lyrics: Arc<dyn LyricSource>,
    state: std::sync::Mutex<SyncState>,
    /// Guards the single cover transfer slot.
    cover_slot: tokio::sync::Mutex<()>,
    /// Raised while a cover frame streams; progress lines hold off.
    cover_sending: AtomicBool,
    /// Bumped on every track change to invalidate in-flight lookups.
    fetch_generation: AtomicU64,
}

impl SyncEngine {
    pub fn new(link: SharedLink, lyrics: Arc<dyn LyricSource>) -> Self {
        Self {
            link,
            lyrics,
            state: std::sync::Mutex::new(SyncState::default()),
            cover_slot: tokio::sync::Mutex::new(()),
            cover_sending: AtomicBool::new(false),
            fetch_generation: AtomicU64::new(0),
        }
    }

    /// The event loop; consumes media events and resync signals until
    /// both channels close.
    pub async fn run(
        self: Arc<Self>,
        mut media_rx: mpsc::Receiver<MediaEvent>,
        mut resync_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = media_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                signal = resync_rx.recv() => match signal {
                    Some(()) => self.resend_now_playing().await,
                    None => break,
                },
            }
        }
        debug!("sync engine stopped");
    }

    pub async fn handle_event(self: &Arc<Self>, event: MediaEvent) {
        match event {
            MediaEvent::MetadataChanged(snapshot) => self.on_metadata(snapshot).await,
            MediaEvent::TimelineChanged(timeline) => self.on_timeline(timeline).await,
            MediaEvent::PlaybackChanged(PlaybackStatus::Stopped) | MediaEvent::SessionEnded => {
                self.clear_panel().await;
            }
            MediaEvent::PlaybackChanged(_) => {}
        }
    }

    async fn on_metadata(self: &Arc<Self>, snapshot: MediaSnapshot) {
        let track_key = format!(
            "{}|{}|{}|{}",
            snapshot.track_id.as_deref().unwrap_or_default(),
            snapshot.title,
            snapshot.artist,
            snapshot.album
        );

        let is_new_track = {
            let state = self.state.lock().expect("lock poisoned");
            state.track_key != track_key
        };

        if is_new_track {
            info!(
                "track change: {} - {}",
                snapshot.title, snapshot.artist
            );
            self.fetch_generation.fetch_add(1, Ordering::AcqRel);
            {
                let mut state = self.state.lock().expect("lock poisoned");
                state.track_key = track_key;
                state.title = snapshot.title.clone();
                state.artist = snapshot.artist.clone();
                state.lyric_track = Arc::new(LyricTrack::default());
                state.lyric_cursor = LyricCursor::Unset;
                state.lyric_fetch_id = None;
                state.last_cover = None;
            }
            self.link.send_line_lossy("LRC CLR").await;
            self.link.send_line_lossy("NP CLR").await;
            self.send_meta(&snapshot.title, &snapshot.artist).await;

            if let Some(bytes) = snapshot.thumbnail {
                self.spawn_cover_transfer(bytes);
            }
            if let Some(id) = snapshot.track_id {
                self.spawn_lyric_fetch(id);
            }
            return;
        }

        // Same track: fill in whatever arrived late.
        let (needs_lyrics, needs_cover) = {
            let state = self.state.lock().expect("lock poisoned");
            (state.lyric_track.is_empty(), state.last_cover.is_none())
        };
        if needs_lyrics {
            if let Some(id) = snapshot.track_id {
                self.spawn_lyric_fetch(id);
            }
        }
        if needs_cover {
            if let Some(bytes) = snapshot.thumbnail {
                self.spawn_cover_transfer(bytes);
            }
        }
    }

    async fn on_timeline(&self, timeline: TimelineSnapshot) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.last_position_ms = timeline.position_ms;
        }
        self.update_lyric_position(timeline.position_ms).await;

        if self.cover_sending.load(Ordering::Relaxed) {
            return;
        }
        self.maybe_send_progress(timeline.position_ms, timeline.duration_ms)
            .await;
    }

    /// Sends `NP PROG` when the gate allows it.
    async fn maybe_send_progress(&self, position_ms: u64, duration_ms: u64) {
        let due = {
            let mut state = self.state.lock().expect("lock poisoned");
            if !progress_due(state.last_progress.as_ref(), position_ms, duration_ms) {
                false
            } else {
                state.last_progress = Some(ProgressMark {
                    position_ms,
                    duration_ms,
                    sent_at: Instant::now(),
                });
                true
            }
        };
        if due {
            self.link
                .send_line_lossy(&format!("NP PROG {position_ms} {duration_ms}"))
                .await;
        }
    }

    /// Sends `NP META` unless the same line went out within the throttle
    /// window.
    async fn send_meta(&self, title: &str, artist: &str) {
        let line = format!(
            "NP META {}\t{}",
            sanitize_field(title),
            sanitize_field(artist)
        );
        let due = {
            let mut state = self.state.lock().expect("lock poisoned");
            let repeat = state
                .last_meta
                .as_ref()
                .is_some_and(|(last, at)| *last == line && at.elapsed() < META_MIN_INTERVAL);
            if repeat {
                false
            } else {
                state.last_meta = Some((line.clone(), Instant::now()));
                true
            }
        };
        if due {
            self.link.send_line_lossy(&line).await;
        }
    }

    /// Moves the lyric cursor to `position_ms` and emits the current and
    /// next lines when the cursor actually moved.
    async fn update_lyric_position(&self, position_ms: u64) {
        let lines = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.lyric_track.is_empty() {
                None
            } else {
                let cursor = state.lyric_track.index_at(position_ms);
                if cursor == state.lyric_cursor {
                    None
                } else {
                    state.lyric_cursor = cursor;
                    Some(lyric_lines(&state.lyric_track, cursor))
                }
            }
        };
        if let Some(lines) = lines {
            for line in lines {
                self.link.send_line_lossy(&line).await;
            }
        }
    }

    async fn clear_panel(&self) {
        self.link.send_line_lossy("LRC CLR").await;
        self.link.send_line_lossy("NP CLR").await;
    }

    /// Replays metadata, progress, and cover for a freshly greeted device.
    pub async fn resend_now_playing(&self) {
        let (title, artist, progress, cover) = {
            let mut state = self.state.lock().expect("lock poisoned");
            let progress = state
                .last_progress
                .filter(|m| m.duration_ms > 0)
                .map(|m| (m.position_ms, m.duration_ms));
            // The device lost this state with its reboot; drop the
            // throttles so the replay goes out unconditionally.
            state.last_meta = None;
            state.last_progress = None;
            state.lyric_cursor = LyricCursor::Unset;
            (
                state.title.clone(),
                state.artist.clone(),
                progress,
                state.last_cover.clone(),
            )
        };

        if !title.is_empty() || !artist.is_empty() {
            self.send_meta(&title, &artist).await;
        }
        if let Some((position_ms, duration_ms)) = progress {
            self.maybe_send_progress(position_ms, duration_ms).await;
        }
        if let Some(pixels) = cover {
            self.stream_cover(&pixels).await;
        }
        let position = self.state.lock().expect("lock poisoned").last_position_ms;
        self.update_lyric_position(position).await;
    }

    /// Streams one cover frame, holding off progress lines meanwhile.
    async fn stream_cover(&self, pixels: &[u16]) {
        // A transfer already in flight wins; this frame is dropped.
        let Ok(_slot) = self.cover_slot.try_lock() else {
            debug!("cover transfer already in flight, skipping");
            return;
        };
        self.cover_sending.store(true, Ordering::Relaxed);
        for line in cover_frame_lines(pixels) {
            self.link.send_line_lossy(&line).await;
        }
        self.cover_sending.store(false, Ordering::Relaxed);
    }

    /// Decodes artwork off the async runtime, then streams it.
    fn spawn_cover_transfer(self: &Arc<Self>, bytes: Vec<u8>) {
        let engine = Arc::clone(self);
        let generation = self.fetch_generation.load(Ordering::Acquire);
        tokio::spawn(async move {
            let decoded =
                tokio::task::spawn_blocking(move || artwork::transcode_thumbnail(&bytes)).await;
            let pixels = match decoded {
                Ok(Ok(p)) => Arc::new(p),
                Ok(Err(e)) => {
                    warn!("cover decode failed: {e}");
                    return;
                }
                Err(e) => {
                    warn!("cover decode task failed: {e}");
                    return;
                }
            };
            {
                let mut state = engine.state.lock().expect("lock poisoned");
                // Checked under the lock; a track change may have won it
                // while the decode ran.
                if engine.fetch_generation.load(Ordering::Acquire) != generation {
                    debug!("discarding cover for a previous track");
                    return;
                }
                state.last_cover = Some(Arc::clone(&pixels));
            }
            engine.stream_cover(&pixels).await;
        });
    }

    /// Looks up lyrics in the background; stale results are discarded,
    /// and an id already looked up for this track is not fetched again.
    fn spawn_lyric_fetch(self: &Arc<Self>, track_id: String) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.lyric_fetch_id.as_deref() == Some(track_id.as_str()) {
                return;
            }
            state.lyric_fetch_id = Some(track_id.clone());
        }
        let engine = Arc::clone(self);
        let generation = self.fetch_generation.load(Ordering::Acquire);
        tokio::spawn(async move {
            let lrc = match engine.lyrics.fetch_lrc(&track_id).await {
                Ok(Some(lrc)) => lrc,
                Ok(None) => {
                    debug!("no synced lyrics for track {track_id}");
                    return;
                }
                Err(e) => {
                    warn!("lyric lookup failed: {e}");
                    return;
                }
            };
            let track = LyricTrack::parse_lrc(&lrc);
            if track.is_empty() {
                debug!("lyrics for {track_id} parsed empty");
                return;
            }
            let position = {
                let mut state = engine.state.lock().expect("lock poisoned");
                // Checked under the lock; a track change may have won it
                // while the lookup ran.
                if engine.fetch_generation.load(Ordering::Acquire) != generation {
                    debug!("discarding lyrics for a previous track");
                    return;
                }
                info!("lyrics loaded: {} lines", track.len());
                state.lyric_track = Arc::new(track);
                state.lyric_cursor = LyricCursor::Unset;
                state.last_position_ms
            };
            engine.update_lyric_position(position).await;
        });
    }
}

/// Builds the `LRC` lines for one cursor position.
fn lyric_lines(track: &LyricTrack, cursor: LyricCursor) -> Vec<String> {
    match cursor {
        LyricCursor::Unset | LyricCursor::BeforeFirst => vec!["LRC CLR".to_string()],
        LyricCursor::At(index) => {
            let current = track.line(index).map(|l| l.text.as_str()).unwrap_or("");
            let next = track.line(index + 1).map(|l| l.text.as_str()).unwrap_or("");
            vec![format!("LRC CUR {current}"), format!("LRC NXT {next}")]
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::lyrics_service::LyricsError;
    use crate::infrastructure::transport::mock::MockTransport;
    use async_trait::async_trait;

    struct StubLyricSource {
        lrc: Option<String>,
        delay: Duration,
    }

    #[async_trait]
    impl LyricSource for StubLyricSource {
        async fn fetch_lrc(&self, _track_id: &str) -> Result<Option<String>, LyricsError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.lrc.clone())
        }
    }

    async fn make_engine(
        lrc: Option<&str>,
        delay: Duration,
    ) -> (Arc<SyncEngine>, Arc<std::sync::Mutex<Vec<String>>>) {
        let link = SharedLink::new();
        let mock = MockTransport::new("dev");
        let sent = mock.sent_lines();
        let session = link.next_session();
        link.install(Box::new(mock), session).await;

        let lyrics = Arc::new(StubLyricSource {
            lrc: lrc.map(str::to_string),
            delay,
        });
        (Arc::new(SyncEngine::new(link, lyrics)), sent)
    }

    fn snapshot(id: Option<&str>, title: &str, artist: &str) -> MediaSnapshot {
        MediaSnapshot {
            title: title.to_string(),
            artist: artist.to_string(),
            album: "Album".to_string(),
            track_id: id.map(str::to_string),
            thumbnail: None,
        }
    }

    /// Polls until `sent` satisfies `cond` or a real-time budget runs out.
    async fn wait_until(
        sent: &Arc<std::sync::Mutex<Vec<String>>>,
        cond: impl Fn(&[String]) -> bool,
    ) {
        for _ in 0..200 {
            if cond(&sent.lock().unwrap()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met; sent = {:?}", sent.lock().unwrap());
    }

    #[tokio::test]
    async fn test_track_change_clears_then_sends_meta() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(None, "Song", "Artist")))
            .await;

        let lines = sent.lock().unwrap().clone();
        assert_eq!(lines, vec!["LRC CLR", "NP CLR", "NP META Song\tArtist"]);
    }

    #[tokio::test]
    async fn test_repeated_metadata_does_not_resend() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        let snap = snapshot(None, "Song", "Artist");
        engine
            .handle_event(MediaEvent::MetadataChanged(snap.clone()))
            .await;
        engine
            .handle_event(MediaEvent::MetadataChanged(snap))
            .await;

        // Second event is the same track: no second clear, no second meta
        let lines = sent.lock().unwrap().clone();
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn test_track_change_emits_exactly_one_clear_pair() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(None, "One", "A")))
            .await;
        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(None, "Two", "B")))
            .await;

        let lines = sent.lock().unwrap().clone();
        let second_track: Vec<_> = lines[3..].to_vec();
        assert_eq!(second_track, vec!["LRC CLR", "NP CLR", "NP META Two\tB"]);
    }

    #[tokio::test]
    async fn test_progress_is_throttled() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        engine
            .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                position_ms: 1000,
                duration_ms: 200_000,
            }))
            .await;
        // 100ms later in track time, immediately in wall time: suppressed
        engine
            .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                position_ms: 1100,
                duration_ms: 200_000,
            }))
            .await;
        // Past the position delta: sent
        engine
            .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                position_ms: 1300,
                duration_ms: 200_000,
            }))
            .await;

        let progs: Vec<String> = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.starts_with("NP PROG"))
            .cloned()
            .collect();
        assert_eq!(progs, vec!["NP PROG 1000 200000", "NP PROG 1300 200000"]);
    }

    #[tokio::test]
    async fn test_duration_change_forces_progress() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        engine
            .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                position_ms: 1000,
                duration_ms: 200_000,
            }))
            .await;
        engine
            .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                position_ms: 1010,
                duration_ms: 180_000,
            }))
            .await;

        let progs = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.starts_with("NP PROG"))
            .count();
        assert_eq!(progs, 2, "new duration must bypass the delta gate");
    }

    #[tokio::test]
    async fn test_lyrics_flow_current_and_next() {
        let lrc = "[00:05.00]first\n[00:10.00]second\n[00:15.00]last\n";
        let (engine, sent) = make_engine(Some(lrc), Duration::ZERO).await;

        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(
                Some("42"),
                "Song",
                "Artist",
            )))
            .await;
        wait_until(&sent, |lines| {
            // Before the first timed line the fetch completion emits a clear
            lines.iter().filter(|l| *l == "LRC CLR").count() >= 2
        })
        .await;

        engine
            .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                position_ms: 6_000,
                duration_ms: 20_000,
            }))
            .await;
        engine
            .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                position_ms: 16_000,
                duration_ms: 20_000,
            }))
            .await;

        let lines = sent.lock().unwrap().clone();
        assert!(lines.contains(&"LRC CUR first".to_string()));
        assert!(lines.contains(&"LRC NXT second".to_string()));
        assert!(lines.contains(&"LRC CUR last".to_string()));
        // Past the final line there is no next lyric
        assert!(lines.contains(&"LRC NXT ".to_string()));
    }

    #[tokio::test]
    async fn test_unchanged_lyric_index_is_suppressed() {
        let lrc = "[00:05.00]first\n[00:10.00]second\n";
        let (engine, sent) = make_engine(Some(lrc), Duration::ZERO).await;

        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(
                Some("42"),
                "Song",
                "Artist",
            )))
            .await;
        wait_until(&sent, |lines| {
            lines.iter().filter(|l| *l == "LRC CLR").count() >= 2
        })
        .await;

        for pos in [6_000, 7_000, 8_000] {
            engine
                .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                    position_ms: pos,
                    duration_ms: 20_000,
                }))
                .await;
        }

        let curs = sent
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.starts_with("LRC CUR"))
            .count();
        assert_eq!(curs, 1, "same lyric line must not repeat");
    }

    #[tokio::test]
    async fn test_stale_lyrics_are_discarded_on_track_change() {
        // Lookup takes 50ms; the track changes before it lands
        let lrc = "[00:01.00]stale line\n";
        let (engine, sent) = make_engine(Some(lrc), Duration::from_millis(50)).await;

        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(
                Some("42"),
                "Old",
                "Artist",
            )))
            .await;
        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(None, "New", "Artist")))
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        engine
            .handle_event(MediaEvent::TimelineChanged(TimelineSnapshot {
                position_ms: 5_000,
                duration_ms: 20_000,
            }))
            .await;

        let lines = sent.lock().unwrap().clone();
        assert!(
            !lines.iter().any(|l| l.contains("stale line")),
            "stale lyrics leaked: {lines:?}"
        );
    }

    struct CountingLyricSource {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl LyricSource for CountingLyricSource {
        async fn fetch_lrc(&self, _track_id: &str) -> Result<Option<String>, LyricsError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_lyricless_track_is_looked_up_only_once() {
        // Arrange: a source that never has lyrics, counting its calls
        let link = SharedLink::new();
        let mock = MockTransport::new("dev");
        let session = link.next_session();
        link.install(Box::new(mock), session).await;
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let lyrics = Arc::new(CountingLyricSource {
            calls: Arc::clone(&calls),
        });
        let engine = Arc::new(SyncEngine::new(link, lyrics));

        // Act: the player repeats metadata for the same track
        let snap = snapshot(Some("42"), "Song", "Artist");
        engine
            .handle_event(MediaEvent::MetadataChanged(snap.clone()))
            .await;
        for _ in 0..200 {
            if calls.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        engine
            .handle_event(MediaEvent::MetadataChanged(snap.clone()))
            .await;
        engine.handle_event(MediaEvent::MetadataChanged(snap)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Assert: one lookup despite the repeats
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        // A different track id is looked up afresh
        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(
                Some("43"),
                "Other",
                "Artist",
            )))
            .await;
        for _ in 0..200 {
            if calls.load(Ordering::Relaxed) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_late_lyrics_never_install_into_state() {
        // The lookup for the old track lands after the change
        let lrc = "[00:01.00]old line\n";
        let (engine, _sent) = make_engine(Some(lrc), Duration::from_millis(50)).await;

        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(
                Some("42"),
                "Old",
                "Artist",
            )))
            .await;
        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(None, "New", "Artist")))
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let state = engine.state.lock().unwrap();
        assert!(
            state.lyric_track.is_empty(),
            "the old track's lyrics must not be installed"
        );
        assert!(state.last_cover.is_none());
    }

    #[tokio::test]
    async fn test_stop_clears_the_panel() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        engine
            .handle_event(MediaEvent::PlaybackChanged(PlaybackStatus::Stopped))
            .await;

        assert_eq!(sent.lock().unwrap().clone(), vec!["LRC CLR", "NP CLR"]);
    }

    #[tokio::test]
    async fn test_resync_replays_meta_despite_throttle() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        engine
            .handle_event(MediaEvent::MetadataChanged(snapshot(None, "Song", "Artist")))
            .await;
        sent.lock().unwrap().clear();

        // Well inside the 2s meta window, but a resync must still replay
        engine.resend_now_playing().await;

        assert!(sent
            .lock()
            .unwrap()
            .contains(&"NP META Song\tArtist".to_string()));
    }

    #[tokio::test]
    async fn test_cover_transfer_streams_full_frame() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        let img = image::RgbImage::from_pixel(64, 64, image::Rgb([0, 255, 0]));
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let mut snap = snapshot(None, "Song", "Artist");
        snap.thumbnail = Some(png);
        engine.handle_event(MediaEvent::MetadataChanged(snap)).await;

        wait_until(&sent, |lines| lines.iter().any(|l| l == "NP COV END")).await;

        let lines = sent.lock().unwrap().clone();
        assert!(lines.contains(&"NP COV BEGIN 40 40".to_string()));
        let data_lines = lines
            .iter()
            .filter(|l| l.starts_with("NP COV DATA "))
            .count();
        assert_eq!(data_lines, 16);
        // Pure green in RGB565
        assert!(lines
            .iter()
            .any(|l| l.starts_with("NP COV DATA 07E007E0")));
    }

    #[tokio::test]
    async fn test_resync_replays_cached_cover() {
        let (engine, sent) = make_engine(None, Duration::ZERO).await;

        let img = image::RgbImage::from_pixel(40, 40, image::Rgb([255, 255, 255]));
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let mut snap = snapshot(None, "Song", "Artist");
        snap.thumbnail = Some(png);
        engine.handle_event(MediaEvent::MetadataChanged(snap)).await;
        wait_until(&sent, |lines| lines.iter().any(|l| l == "NP COV END")).await;
        sent.lock().unwrap().clear();

        engine.resend_now_playing().await;

        let lines = sent.lock().unwrap().clone();
        assert!(lines.contains(&"NP COV BEGIN 40 40".to_string()));
        assert!(lines.contains(&"NP COV END".to_string()));
    }

    #[test]
    fn test_progress_gate_rules() {
        let mark = ProgressMark {
            position_ms: 10_000,
            duration_ms: 180_000,
            sent_at: Instant::now(),
        };

        // Small delta, same duration, fresh send: suppressed
        assert!(!progress_due(Some(&mark), 10_100, 180_000));
        // Delta at the threshold: due
        assert!(progress_due(Some(&mark), 10_250, 180_000));
        // Seek backwards counts as a delta too
        assert!(progress_due(Some(&mark), 9_000, 180_000));
        // Duration change: due regardless of delta
        assert!(progress_due(Some(&mark), 10_050, 181_000));
        // First ever send: due
        assert!(progress_due(None, 0, 0));
    }

    #[test]
    fn test_lyric_lines_shapes() {
        let track = LyricTrack::parse_lrc("[00:01.00]one\n[00:02.00]two\n");
        assert_eq!(lyric_lines(&track, LyricCursor::BeforeFirst), vec!["LRC CLR"]);
        assert_eq!(
            lyric_lines(&track, LyricCursor::At(0)),
            vec!["LRC CUR one", "LRC NXT two"]
        );
        assert_eq!(
            lyric_lines(&track, LyricCursor::At(1)),
            vec!["LRC CUR two", "LRC NXT "]
        );
    }
}
