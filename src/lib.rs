//! Strobe is a frame streaming and compositing engine.
//!
//! Heterogeneous frame producers (decoded video, live capture, procedural
//! generators, multi-output renderers) are exposed behind one pollable
//! [`FrameSource`] contract with pause-aware stream clocks, monotone frame
//! indices for cheap change detection, and per-source notification fan-out.
//! A [`LayerCompositor`] merges any number of such sources (plus static
//! images and derived layers) into one viewport-aware output image using
//! straight-alpha "over" compositing.
//!
//! The engine orchestrates *when* a frame is produced, *what* its identity
//! and freshness are, and *how* frames merge into one image. It decodes no
//! container formats itself: decoder backends are consumed through the
//! [`decode::Decoder`] capability (an ffmpeg CLI reference backend ships
//! behind the `media-ffmpeg` feature), and rendering backends only consume
//! composited frames.
#![forbid(unsafe_code)]

pub mod clock;
pub mod compose;
pub mod decode;
mod foundation;
pub mod source;

pub use crate::foundation::core::{Frame, FrameIndex, PlayState};
pub use crate::foundation::error::{StrobeError, StrobeResult};

pub use crate::clock::StreamClock;
pub use crate::compose::compositor::{CompositorOpts, LayerCompositor};
pub use crate::compose::layer::{FrameFilter, Layer, LayerContent, LayerId, LayerOpts};
pub use crate::compose::viewport::Viewport;
pub use crate::decode::{Decoder, DecoderInfo, DecoderOpener, PixelFormat, RawFrame};
pub use crate::source::FrameSource;
pub use crate::source::decoder::{DecoderSource, DecoderSourceOpts};
pub use crate::source::hub::{FrameCallback, FrameWaiter};
pub use crate::source::live::{LiveSource, LiveSourceOpts};
pub use crate::source::multi::{MultiOutputSource, OutputTap};
pub use crate::source::procedural::ProceduralSource;
