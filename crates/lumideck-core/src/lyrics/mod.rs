//! LRC lyric parsing and time-indexed lookup.
//!
//! Synced lyrics arrive as LRC text: each line carries one or more
//! `[mm:ss.xx]` timestamps followed by the lyric text.  A line with several
//! timestamps repeats at each of them.  Parsing yields a [`LyricTrack`]
//! sorted by time, which the sync engine queries with the current playback
//! position to find the active and upcoming lines.

/// One timed lyric line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    /// Offset from the start of the track, in milliseconds.
    pub time_ms: u64,
    pub text: String,
}

/// The position of a playback timestamp within a lyric track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LyricCursor {
    /// No position has been evaluated yet.
    #[default]
    Unset,
    /// Playback has not reached the first timed line.
    BeforeFirst,
    /// The line at this index is active.
    At(usize),
}

/// An immutable, time-sorted list of lyric lines for one track.
#[derive(Debug, Clone, Default)]
pub struct LyricTrack {
    lines: Vec<LyricLine>,
}

impl LyricTrack {
    /// Builds a track from arbitrary-order entries.  The sort is stable so
    /// lines sharing a timestamp keep their source order.
    pub fn from_entries(mut lines: Vec<LyricLine>) -> Self {
        lines.sort_by_key(|l| l.time_ms);
        Self { lines }
    }

    /// Parses LRC text into a track.
    ///
    /// Lines without a leading timestamp tag (metadata such as `[ar:...]`,
    /// or malformed input) are skipped.  Lines whose text is empty after
    /// trimming are skipped too, since the device renders nothing for them.
    pub fn parse_lrc(lrc: &str) -> Self {
        let mut entries = Vec::new();
        for raw in lrc.lines() {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }

            // Consume every leading [..] tag; collect those that are timestamps.
            let mut rest = raw;
            let mut times = Vec::new();
            while let Some(stripped) = rest.strip_prefix('[') {
                let Some(end) = stripped.find(']') else { break };
                if let Some(ms) = parse_timestamp(&stripped[..end]) {
                    times.push(ms);
                }
                rest = &stripped[end + 1..];
            }

            let text = rest.trim();
            if text.is_empty() {
                continue;
            }
            for time_ms in times {
                entries.push(LyricLine {
                    time_ms,
                    text: text.to_string(),
                });
            }
        }
        Self::from_entries(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, index: usize) -> Option<&LyricLine> {
        self.lines.get(index)
    }

    /// Finds the cursor position for a playback timestamp: the greatest
    /// index whose time is `<= position_ms`, by binary search.
    pub fn index_at(&self, position_ms: u64) -> LyricCursor {
        if self.lines.is_empty() {
            return LyricCursor::BeforeFirst;
        }
        match self.lines.partition_point(|l| l.time_ms <= position_ms) {
            0 => LyricCursor::BeforeFirst,
            n => LyricCursor::At(n - 1),
        }
    }
}

/// Parses the inside of one `[..]` tag as `mm:ss`, `mm:ss.x`, `mm:ss.xx`,
/// or `mm:ss.xxx`.  Returns `None` for metadata tags like `ar:` / `ti:`.
fn parse_timestamp(tag: &str) -> Option<u64> {
    let (min_part, rest) = tag.split_once(':')?;
    let minutes: u64 = min_part.trim().parse().ok()?;

    let (sec_part, frac_part) = match rest.split_once('.') {
        Some((s, f)) => (s, Some(f)),
        None => (rest, None),
    };
    let seconds: u64 = sec_part.trim().parse().ok()?;
    if seconds >= 60 {
        return None;
    }

    let frac_ms = match frac_part {
        None => 0,
        Some(f) => {
            let digits = f.trim();
            let value: u64 = digits.parse().ok()?;
            match digits.len() {
                1 => value * 100,
                2 => value * 10,
                3 => value,
                _ => return None,
            }
        }
    };

    Some(minutes * 60_000 + seconds * 1_000 + frac_ms)
}
