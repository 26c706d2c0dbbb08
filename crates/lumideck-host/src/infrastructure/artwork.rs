//! Cover artwork transcoding.
//!
//! Players hand over artwork as encoded PNG/JPEG bytes at arbitrary
//! resolution.  The device wants exactly one 40x40 RGB565 frame, so the
//! pipeline is: decode, nearest-neighbour resize to the device panel,
//! pack each pixel.

use image::imageops::FilterType;
use lumideck_core::cover::{pack_rgb565, COVER_SIZE};
use thiserror::Error;

/// Error type for artwork transcoding.
#[derive(Debug, Error)]
pub enum ArtworkError {
    #[error("failed to decode artwork: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decodes raw artwork bytes into a device-sized RGB565 frame.
///
/// The resize is exact (not aspect-preserving) with nearest-neighbour
/// sampling; players ship square covers and the panel is square, so
/// letterboxing buys nothing.
///
/// # Errors
///
/// Returns [`ArtworkError::Decode`] when the bytes are not a decodable
/// image.
pub fn transcode_thumbnail(bytes: &[u8]) -> Result<Vec<u16>, ArtworkError> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = decoded.resize_exact(COVER_SIZE, COVER_SIZE, FilterType::Nearest);
    let rgb = resized.to_rgb8();

    Ok(rgb
        .pixels()
        .map(|p| pack_rgb565(p.0[0], p.0[1], p.0[2]))
        .collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
