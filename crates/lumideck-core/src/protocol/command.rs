//! Inbound verb parsing for the device link.
//!
//! The device speaks newline-delimited UTF-8 text.  Every inbound line is
//! classified in a single pass into a closed [`DeviceCommand`] variant and
//! then matched exhaustively by the dispatcher, instead of scattering string
//! prefix checks across handlers.
//!
//! Matching is case-insensitive and first-prefix-wins.  Lines that match no
//! verb become [`DeviceCommand::Unknown`]; the dispatcher logs and discards
//! them without error.

/// A fully-parsed inbound line from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `HELLO` greeting (with or without a trailing suffix).
    Hello,
    /// `VOL GET`: device asks for the current master volume + mute state.
    VolumeGet,
    /// `VOL SET <0-100>`: device sets the master volume.  Out-of-range
    /// values are clamped at parse time.
    VolumeSet(u8),
    /// `MUTE`: toggle master mute.
    MuteToggle,
    /// `SPK LIST`: device asks for the render endpoint list.
    SpeakerList,
    /// `SPK SET <index>`: device selects a render endpoint from the last
    /// snapshot it was sent.
    SpeakerSet(usize),
    /// `MIC LIST`: capture endpoint mirror of `SPK LIST`.
    MicrophoneList,
    /// `MIC SET <index>`: capture endpoint mirror of `SPK SET`.
    MicrophoneSet(usize),
    /// `CFG SET k=v ...`: device reports its configuration (the response
    /// to a host `CFG GET`).  Carries the full line for the waiter.
    ConfigResponse(String),
    /// `CFG IMPORT OK`: device acknowledges a configuration import.
    ConfigImportAck(String),
    /// Any other `CFG ...` line; logged only.
    ConfigOther(String),
    /// Firmware debug output (`DEBUG:`, `[REBUILD]`, `APP `); logged only.
    Debug(String),
    /// Anything else; logged and discarded.
    Unknown(String),
}

/// Parses one trimmed inbound line into a [`DeviceCommand`].
///
/// The line must already be stripped of terminators (see
/// [`super::LineSplitter`]).  Never fails: unmatched input is returned as
/// [`DeviceCommand::Unknown`].
pub fn parse_line(line: &str) -> DeviceCommand {
    let line = line.trim();

    if starts_with_ci(line, "DEBUG:") || starts_with_ci(line, "[REBUILD]") || starts_with_ci(line, "APP ")
    {
        return DeviceCommand::Debug(line.to_string());
    }
    if starts_with_ci(line, "HELLO") {
        return DeviceCommand::Hello;
    }
    if eq_ci(line, "VOL GET") {
        return DeviceCommand::VolumeGet;
    }
    if starts_with_ci(line, "VOL SET") {
        let value = parse_int(line, "VOL SET".len()).clamp(0, 100) as u8;
        return DeviceCommand::VolumeSet(value);
    }
    if eq_ci(line, "MUTE") {
        return DeviceCommand::MuteToggle;
    }
    if eq_ci(line, "SPK LIST") {
        return DeviceCommand::SpeakerList;
    }
    if starts_with_ci(line, "SPK SET") {
        return DeviceCommand::SpeakerSet(parse_int(line, "SPK SET".len()).max(0) as usize);
    }
    if eq_ci(line, "MIC LIST") {
        return DeviceCommand::MicrophoneList;
    }
    if starts_with_ci(line, "MIC SET") {
        return DeviceCommand::MicrophoneSet(parse_int(line, "MIC SET".len()).max(0) as usize);
    }
    if starts_with_ci(line, "CFG") {
        if starts_with_ci(line, "CFG IMPORT OK") {
            return DeviceCommand::ConfigImportAck(line.to_string());
        }
        if starts_with_ci(line, "CFG SET") {
            return DeviceCommand::ConfigResponse(line.to_string());
        }
        return DeviceCommand::ConfigOther(line.to_string());
    }

    DeviceCommand::Unknown(line.to_string())
}

/// Strips line-breaking characters from a field destined for a single
/// protocol line (device names, titles, lyric text).
///
/// `\r`, `\n`, and `\t` all collapse to a space; surrounding whitespace is
/// trimmed.  Tabs must go because `NP META` uses `\t` as its field
/// separator.
pub fn sanitize_field(text: &str) -> String {
    text.replace(['\r', '\n', '\t'], " ").trim().to_string()
}

fn eq_ci(line: &str, verb: &str) -> bool {
    line.eq_ignore_ascii_case(verb)
}

fn starts_with_ci(line: &str, prefix: &str) -> bool {
    // Byte-wise so a multibyte character at the cut cannot panic
    line.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

/// Parses the integer argument following a verb, returning 0 when absent or
/// malformed (mirrors the device's own lenient parsing).
fn parse_int(line: &str, start: usize) -> i64 {
    if line.len() <= start {
        return 0;
    }
    line[start..].trim().parse::<i64>().unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_parses_regardless_of_case_and_suffix() {
        assert_eq!(parse_line("HELLO"), DeviceCommand::Hello);
        assert_eq!(parse_line("hello"), DeviceCommand::Hello);
        assert_eq!(parse_line("HELLO v2.1"), DeviceCommand::Hello);
    }

    #[test]
    fn test_vol_get_is_exact_match() {
        assert_eq!(parse_line("VOL GET"), DeviceCommand::VolumeGet);
        assert_eq!(parse_line("vol get"), DeviceCommand::VolumeGet);
        // `VOL GETX` is not a recognized verb
        assert!(matches!(parse_line("VOL GETX"), DeviceCommand::Unknown(_)));
    }

    #[test]
    fn test_vol_set_parses_and_clamps() {
        assert_eq!(parse_line("VOL SET 42"), DeviceCommand::VolumeSet(42));
        assert_eq!(parse_line("VOL SET 250"), DeviceCommand::VolumeSet(100));
        assert_eq!(parse_line("VOL SET -5"), DeviceCommand::VolumeSet(0));
        // Missing or garbage argument falls back to 0
        assert_eq!(parse_line("VOL SET"), DeviceCommand::VolumeSet(0));
        assert_eq!(parse_line("VOL SET abc"), DeviceCommand::VolumeSet(0));
    }

    #[test]
    fn test_speaker_and_microphone_selection_parse() {
        assert_eq!(parse_line("SPK LIST"), DeviceCommand::SpeakerList);
        assert_eq!(parse_line("SPK SET 3"), DeviceCommand::SpeakerSet(3));
        assert_eq!(parse_line("MIC LIST"), DeviceCommand::MicrophoneList);
        assert_eq!(parse_line("mic set 1"), DeviceCommand::MicrophoneSet(1));
    }

    #[test]
    fn test_cfg_lines_route_by_sub_verb() {
        assert_eq!(
            parse_line("CFG SET ui_speed=13 sel_speed=25"),
            DeviceCommand::ConfigResponse("CFG SET ui_speed=13 sel_speed=25".to_string())
        );
        assert_eq!(
            parse_line("CFG IMPORT OK"),
            DeviceCommand::ConfigImportAck("CFG IMPORT OK".to_string())
        );
        assert_eq!(
            parse_line("CFG SAVE"),
            DeviceCommand::ConfigOther("CFG SAVE".to_string())
        );
    }

    #[test]
    fn test_debug_lines_win_over_other_prefixes() {
        assert!(matches!(parse_line("DEBUG: HELLO echo"), DeviceCommand::Debug(_)));
        assert!(matches!(parse_line("[REBUILD] ui"), DeviceCommand::Debug(_)));
        assert!(matches!(parse_line("APP booted"), DeviceCommand::Debug(_)));
    }

    #[test]
    fn test_unmatched_lines_become_unknown() {
        assert_eq!(
            parse_line("NOPE 1 2 3"),
            DeviceCommand::Unknown("NOPE 1 2 3".to_string())
        );
    }

    #[test]
    fn test_multibyte_lines_do_not_panic() {
        assert!(matches!(parse_line("音乐桥接已启动"), DeviceCommand::Unknown(_)));
    }

    #[test]
    fn test_sanitize_field_strips_line_breaks_and_tabs() {
        assert_eq!(sanitize_field("Speakers\r\n(USB)"), "Speakers  (USB)");
        assert_eq!(sanitize_field("\ttitle\t"), "title");
        assert_eq!(sanitize_field(""), "");
    }
}
