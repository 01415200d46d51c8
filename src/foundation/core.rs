use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::foundation::error::{StrobeError, StrobeResult};

/// Monotonically increasing identity of a produced frame.
///
/// Incremented exactly once per newly published frame of a source; never
/// decreases and never resets, so consumers detect "is this new" by comparing
/// indices instead of timestamps or pixels.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize,
    serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Lifecycle state of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PlayState {
    /// Created or stopped; underlying resources are released.
    Stopped,
    /// Stream time advances; frames are produced on request or by the loop.
    Playing,
    /// Stream time is frozen at the pause instant.
    Paused,
}

/// A produced image: straight-alpha RGBA8, row-major, tightly packed.
///
/// The pixel payload is reference-counted so the same frame can be held by
/// the producing source, dependent sources, and compositor caches without
/// copying. Cloning a `Frame` is cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA8 bytes, `width * height * 4` of them.
    pub data: Arc<Vec<u8>>,
}

impl Frame {
    /// Create a frame from raw RGBA8 bytes, validating the payload length.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> StrobeResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| StrobeError::validation("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(StrobeError::validation(format!(
                "frame payload has {} bytes, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data: Arc::new(data),
        })
    }

    /// Create a frame filled with a single RGBA color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let px = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(px * 4);
        for _ in 0..px {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data: Arc::new(data),
        }
    }

    /// Read one pixel. Out-of-bounds coordinates return transparent black.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let idx = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }

    /// Copy into an owned `image` buffer for resize/crop operations.
    ///
    /// Returns `None` when the payload length does not match the dimensions
    /// (possible only for hand-built frames that bypassed [`Frame::new`]).
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.as_ref().clone())
    }

    /// Wrap an `image` buffer as a frame.
    pub fn from_rgba_image(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: Arc::new(img.into_raw()),
        }
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Producer state must stay usable even when a consumer callback panics on
/// another thread, so poisoning is not treated as fatal anywhere in the crate.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_new_validates_payload_length() {
        assert!(Frame::new(2, 2, vec![0u8; 16]).is_ok());
        assert!(Frame::new(2, 2, vec![0u8; 15]).is_err());
    }

    #[test]
    fn solid_frame_reads_back_color() {
        let f = Frame::solid(3, 2, [9, 8, 7, 255]);
        assert_eq!(f.pixel(0, 0), [9, 8, 7, 255]);
        assert_eq!(f.pixel(2, 1), [9, 8, 7, 255]);
        assert_eq!(f.pixel(3, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn image_round_trip_preserves_pixels() {
        let f = Frame::solid(4, 4, [1, 2, 3, 4]);
        let back = Frame::from_rgba_image(f.to_rgba_image().unwrap());
        assert_eq!(f, back);
    }
}
