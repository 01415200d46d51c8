//! Shared fixtures for integration tests: a deterministic in-memory decoder
//! standing in for a real media backend.

use strobe::{Decoder, DecoderInfo, DecoderSource, DecoderSourceOpts, PixelFormat, RawFrame};

/// Decoder producing 2x2 solid frames whose red channel encodes the frame
/// index (mod 256).
pub struct SyntheticDecoder {
    info: DecoderInfo,
    cursor: u64,
}

impl SyntheticDecoder {
    pub fn new(fps: f64, frame_count: u64) -> Self {
        Self {
            info: DecoderInfo {
                fps,
                frame_count,
                width: 2,
                height: 2,
            },
            cursor: 0,
        }
    }
}

impl Decoder for SyntheticDecoder {
    fn info(&self) -> DecoderInfo {
        self.info
    }

    fn read_next(&mut self) -> strobe::StrobeResult<Option<RawFrame>> {
        if self.info.frame_count > 0 && self.cursor >= self.info.frame_count {
            return Ok(None);
        }
        let shade = (self.cursor % 256) as u8;
        let mut data = Vec::with_capacity(16);
        for _ in 0..4 {
            data.extend_from_slice(&[shade, 0, 0, 255]);
        }
        self.cursor += 1;
        Ok(Some(RawFrame {
            format: PixelFormat::Rgba8,
            data,
        }))
    }

    fn seek(&mut self, frame_index: u64) -> strobe::StrobeResult<()> {
        self.cursor = frame_index;
        Ok(())
    }
}

/// A polled decoder source over a synthetic medium.
pub fn synthetic_source(fps: f64, frame_count: u64, opts: DecoderSourceOpts) -> DecoderSource {
    DecoderSource::from_fn(
        move || Ok(Box::new(SyntheticDecoder::new(fps, frame_count)) as Box<dyn Decoder>),
        opts,
    )
}
