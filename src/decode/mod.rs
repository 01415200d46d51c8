//! Decoder boundary: the capability this crate consumes to turn a video
//! file or capture device into raw pixel buffers.
//!
//! The engine never decodes containers or codecs itself; it drives a
//! [`Decoder`] through `read_next`/`seek` and converts whatever pixel layout
//! the backend emits into canonical straight-alpha RGBA.

use std::sync::Arc;

use crate::foundation::core::Frame;
use crate::foundation::error::{StrobeError, StrobeResult};

#[cfg(feature = "media-ffmpeg")]
pub mod ffmpeg;

/// Source metadata reported by an open decoder.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DecoderInfo {
    /// Nominal frames per second. Must be finite and `> 0`.
    pub fps: f64,
    /// Total frame count; `0` means unknown or infinite (live capture).
    pub frame_count: u64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl DecoderInfo {
    /// Duration in seconds when the frame count is known.
    pub fn duration(&self) -> Option<f64> {
        if self.frame_count > 0 && self.fps > 0.0 {
            Some(self.frame_count as f64 / self.fps)
        } else {
            None
        }
    }
}

/// Pixel layout of a decoder-native frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Straight-alpha RGBA, the canonical layout.
    Rgba8,
    /// Opaque RGB, 3 bytes per pixel.
    Rgb8,
    /// Straight-alpha BGRA (common for capture APIs).
    Bgra8,
}

impl PixelFormat {
    /// Bytes per pixel for this layout.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// One frame as produced by a decoder, before canonicalization.
#[derive(Clone, Debug)]
pub struct RawFrame {
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Tightly packed row-major pixel bytes.
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Convert into a canonical RGBA [`Frame`], validating the payload size.
    pub fn into_frame(self, width: u32, height: u32) -> StrobeResult<Frame> {
        let px = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| StrobeError::decode("raw frame dimensions overflow"))?;
        let expected = px * self.format.bytes_per_pixel();
        if self.data.len() != expected {
            return Err(StrobeError::decode(format!(
                "raw frame has {} bytes, expected {expected} for {width}x{height} {:?}",
                self.data.len(),
                self.format
            )));
        }

        let data = match self.format {
            PixelFormat::Rgba8 => self.data,
            PixelFormat::Rgb8 => {
                let mut out = Vec::with_capacity(px * 4);
                for p in self.data.chunks_exact(3) {
                    out.extend_from_slice(&[p[0], p[1], p[2], 255]);
                }
                out
            }
            PixelFormat::Bgra8 => {
                let mut out = self.data;
                for p in out.chunks_exact_mut(4) {
                    p.swap(0, 2);
                }
                out
            }
        };

        Frame::new(width, height, data)
    }
}

/// A seekable or sequential frame decoder.
///
/// `read_next` returns `Ok(None)` at end of media; `Err` is reserved for
/// genuine I/O failures. Handles release their resources on drop.
pub trait Decoder: Send {
    /// Metadata for the open source.
    fn info(&self) -> DecoderInfo;
    /// Read the frame at the current cursor and advance by one.
    fn read_next(&mut self) -> StrobeResult<Option<RawFrame>>;
    /// Position the cursor on `frame_index`. Non-seekable backends (live
    /// capture) may return a validation error; sources never seek them.
    fn seek(&mut self, frame_index: u64) -> StrobeResult<()>;
}

/// Capability to (re)open a decoder, so a stopped source can lazily restart.
pub type DecoderOpener = Arc<dyn Fn() -> StrobeResult<Box<dyn Decoder>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_gains_opaque_alpha() {
        let raw = RawFrame {
            format: PixelFormat::Rgb8,
            data: vec![1, 2, 3, 4, 5, 6],
        };
        let f = raw.into_frame(2, 1).unwrap();
        assert_eq!(f.pixel(0, 0), [1, 2, 3, 255]);
        assert_eq!(f.pixel(1, 0), [4, 5, 6, 255]);
    }

    #[test]
    fn bgra_swaps_channels_in_place() {
        let raw = RawFrame {
            format: PixelFormat::Bgra8,
            data: vec![10, 20, 30, 40],
        };
        let f = raw.into_frame(1, 1).unwrap();
        assert_eq!(f.pixel(0, 0), [30, 20, 10, 40]);
    }

    #[test]
    fn wrong_payload_size_is_a_decode_error() {
        let raw = RawFrame {
            format: PixelFormat::Rgba8,
            data: vec![0u8; 5],
        };
        assert!(matches!(
            raw.into_frame(1, 1),
            Err(StrobeError::Decode(_))
        ));
    }
}
