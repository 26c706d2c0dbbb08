//! Cover-art pixel packing and hex chunk framing.
//!
//! The device renders a fixed 40x40 cover thumbnail.  The host streams it as
//! text so it can share the line link with every other verb:
//!
//! ```text
//! NP COV BEGIN 40 40
//! NP COV DATA <100 pixels as 4-hex-digit RGB565>
//! ...            (16 DATA lines total)
//! NP COV END
//! ```
//!
//! Pixels are row-major RGB565, uppercase hex, no separators.  The
//! [`CoverAssembler`] is the receiving half, used by tests and tooling to
//! validate a stream the host produced.

use thiserror::Error;

/// Cover thumbnail edge length in pixels.
pub const COVER_SIZE: u32 = 40;

/// Total pixels in one cover frame.
pub const COVER_PIXELS: usize = (COVER_SIZE * COVER_SIZE) as usize;

/// Pixels carried per `NP COV DATA` line.
pub const PIXELS_PER_CHUNK: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoverError {
    #[error("DATA before BEGIN")]
    NotStarted,
    #[error("unsupported cover dimensions {width}x{height}")]
    BadDimensions { width: u32, height: u32 },
    #[error("chunk has invalid hex at offset {offset}")]
    BadHex { offset: usize },
    #[error("chunk length {len} is not a multiple of 4 hex digits")]
    RaggedChunk { len: usize },
    #[error("frame ended with {got} pixels, expected {expected}")]
    ShortFrame { got: usize, expected: usize },
    #[error("frame overflow: {got} pixels, expected {expected}")]
    Overflow { got: usize, expected: usize },
}

/// Packs one 8-bit RGB pixel into RGB565.
pub fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    (((r & 0xF8) as u16) << 8) | (((g & 0xFC) as u16) << 3) | ((b >> 3) as u16)
}

/// Encodes a full frame of RGB565 pixels into `DATA` line payloads of at
/// most [`PIXELS_PER_CHUNK`] pixels each.
pub fn encode_chunks(pixels: &[u16]) -> Vec<String> {
    pixels
        .chunks(PIXELS_PER_CHUNK)
        .map(|chunk| {
            let mut line = String::with_capacity(chunk.len() * 4);
            for px in chunk {
                line.push_str(&format!("{px:04X}"));
            }
            line
        })
        .collect()
}

/// Reassembles a cover frame from `BEGIN`/`DATA`/`END` payloads.
#[derive(Debug, Default)]
pub struct CoverAssembler {
    pixels: Option<Vec<u16>>,
}

impl CoverAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles `NP COV BEGIN <w> <h>`.  Any frame in progress is discarded.
    pub fn begin(&mut self, width: u32, height: u32) -> Result<(), CoverError> {
        if width != COVER_SIZE || height != COVER_SIZE {
            return Err(CoverError::BadDimensions { width, height });
        }
        self.pixels = Some(Vec::with_capacity(COVER_PIXELS));
        Ok(())
    }

    /// Handles one `NP COV DATA <hex>` payload.
    pub fn push_data(&mut self, hex: &str) -> Result<(), CoverError> {
        let pixels = self.pixels.as_mut().ok_or(CoverError::NotStarted)?;

        let hex = hex.trim();
        if hex.len() % 4 != 0 {
            return Err(CoverError::RaggedChunk { len: hex.len() });
        }
        for (i, quad) in hex.as_bytes().chunks(4).enumerate() {
            let quad = std::str::from_utf8(quad)
                .ok()
                .and_then(|q| u16::from_str_radix(q, 16).ok())
                .ok_or(CoverError::BadHex { offset: i * 4 })?;
            pixels.push(quad);
        }
        if pixels.len() > COVER_PIXELS {
            let got = pixels.len();
            self.pixels = None;
            return Err(CoverError::Overflow {
                got,
                expected: COVER_PIXELS,
            });
        }
        Ok(())
    }

    /// Handles `NP COV END`, yielding the completed frame.
    pub fn finish(&mut self) -> Result<Vec<u16>, CoverError> {
        let pixels = self.pixels.take().ok_or(CoverError::NotStarted)?;
        if pixels.len() != COVER_PIXELS {
            return Err(CoverError::ShortFrame {
                got: pixels.len(),
                expected: COVER_PIXELS,
            });
        }
        Ok(pixels)
    }
}
