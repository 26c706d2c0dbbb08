//! Integration tests exercising the protocol pieces together the way the
//! host uses them: raw bytes through the splitter into the parser, and a
//! full cover frame encoded then reassembled.

use lumideck_core::{
    cover, parse_line, CoverAssembler, DeviceCommand, DeviceConfig, LineSplitter, LyricCursor,
    LyricTrack, COVER_PIXELS, COVER_SIZE,
};

#[test]
fn test_fragmented_stream_parses_into_commands() {
    // Arrange: one session's worth of bytes, fragmented mid-line
    let mut splitter = LineSplitter::new();
    let mut commands = Vec::new();

    // Act
    for chunk in [
        b"HELLO\r\nVOL ".as_slice(),
        b"SET 30\nSPK LI".as_slice(),
        b"ST\nCFG SET ui_speed=12\n".as_slice(),
    ] {
        for line in splitter.push(chunk) {
            commands.push(parse_line(&line));
        }
    }

    // Assert
    assert_eq!(
        commands,
        vec![
            DeviceCommand::Hello,
            DeviceCommand::VolumeSet(30),
            DeviceCommand::SpeakerList,
            DeviceCommand::ConfigResponse("CFG SET ui_speed=12".to_string()),
        ]
    );
}

#[test]
fn test_cover_frame_survives_encode_and_reassembly() {
    let pixels: Vec<u16> = (0..COVER_PIXELS)
        .map(|i| {
            let v = (i % 256) as u8;
            cover::pack_rgb565(v, v.wrapping_mul(3), v.wrapping_mul(7))
        })
        .collect();

    let mut asm = CoverAssembler::new();
    asm.begin(COVER_SIZE, COVER_SIZE).unwrap();
    for chunk in cover::encode_chunks(&pixels) {
        // Every DATA payload must fit a single line
        assert!(!chunk.contains('\n'));
        asm.push_data(&chunk).unwrap();
    }
    assert_eq!(asm.finish().unwrap(), pixels);
}

#[test]
fn test_lyric_lookup_matches_playback_walk() {
    let track = LyricTrack::parse_lrc(
        "[00:05.00]intro\n[00:12.30]verse one\n[00:12.30]verse echo\n[01:00.00]outro\n",
    );

    // Walking playback forward only ever moves the cursor forward
    let mut last = LyricCursor::Unset;
    for pos in (0..70_000).step_by(250) {
        let cursor = track.index_at(pos);
        if let (LyricCursor::At(prev), LyricCursor::At(next)) = (last, cursor) {
            assert!(next >= prev, "cursor went backwards at {pos}ms");
        }
        last = cursor;
    }
    assert_eq!(last, LyricCursor::At(3));
    assert_eq!(track.line(3).unwrap().text, "outro");
}

#[test]
fn test_config_get_then_import_round_trip() {
    // The device's CFG SET answer parses, edits, and re-imports cleanly
    let mut config =
        DeviceConfig::parse_response("CFG SET ui_speed=15 sel_speed=20 lyric_cps=10").unwrap();
    config.scroll_ms = 25;
    assert!(config.is_valid());

    let line = config.import_payload();
    assert!(line.starts_with("CFG IMPORT {"));
    let json = line.strip_prefix("CFG IMPORT ").unwrap();
    let round: DeviceConfig = serde_json::from_str(json).unwrap();
    assert_eq!(round, config);
}
