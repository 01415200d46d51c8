//! Layer model: a positioned, z-ordered binding of frame content into a
//! composite.

use std::sync::Arc;

use crate::foundation::core::Frame;
use crate::foundation::error::StrobeResult;
use crate::source::FrameSource;

/// Stable identity of a layer within its compositor.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct LayerId(pub u64);

/// Optional per-layer image-processing capability.
///
/// Invoked per composite call; any failure is caught and the unfiltered
/// frame is used instead, never aborting the composite.
pub trait FrameFilter: Send + Sync {
    /// Transform a resolved frame.
    fn apply(&self, frame: &Frame) -> StrobeResult<Frame>;
}

/// What a layer draws. Exactly one of these per layer; sources are shared by
/// reference with their producers, never copied until composited.
#[derive(Clone)]
pub enum LayerContent {
    /// A live frame producer, polled every composite.
    Source(Arc<dyn FrameSource>),
    /// A static image used as-is.
    Image(Frame),
    /// Another layer's resolved frame (recursive, cycle-guarded).
    Derived(LayerId),
    /// Placeholder for remotely sourced content; transport lives outside
    /// this engine, so the placeholder resolves to nothing.
    Remote {
        /// Where the content would come from.
        url: String,
    },
}

impl std::fmt::Debug for LayerContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerContent::Source(_) => f.write_str("Source(..)"),
            LayerContent::Image(img) => write!(f, "Image({}x{})", img.width, img.height),
            LayerContent::Derived(id) => write!(f, "Derived({id:?})"),
            LayerContent::Remote { url } => write!(f, "Remote({url})"),
        }
    }
}

/// Placement and stacking options for a new layer.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct LayerOpts {
    /// Stacking order; lower composites first. Ties resolve by insertion.
    pub z_index: i32,
    /// `0.0` pins the layer as a fixed overlay immune to viewport zoom;
    /// anything else pans/zooms with the viewport.
    pub depth: f32,
    /// Canvas-space x of the layer's top-left corner; may be negative.
    pub x: i64,
    /// Canvas-space y of the layer's top-left corner; may be negative.
    pub y: i64,
    /// Target width; `None` fills the composite canvas.
    pub width: Option<u32>,
    /// Target height; `None` fills the composite canvas.
    pub height: Option<u32>,
}

impl Default for LayerOpts {
    fn default() -> Self {
        Self {
            z_index: 0,
            depth: 1.0,
            x: 0,
            y: 0,
            width: None,
            height: None,
        }
    }
}

/// A layer owned by a [`crate::compose::compositor::LayerCompositor`].
pub struct Layer {
    pub(crate) id: LayerId,
    pub(crate) z_index: i32,
    pub(crate) depth: f32,
    pub(crate) x: i64,
    pub(crate) y: i64,
    pub(crate) width: Option<u32>,
    pub(crate) height: Option<u32>,
    pub(crate) content: LayerContent,
    pub(crate) filter: Option<Box<dyn FrameFilter>>,
    /// Last resolved frame, papering over momentary "no new frame" polls.
    pub(crate) cached: Option<Frame>,
}

impl Layer {
    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn z_index(&self) -> i32 {
        self.z_index
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }

    pub fn content(&self) -> &LayerContent {
        &self.content
    }

    /// Placement as `(x, y, width, height)`; `None` dimensions fill the
    /// canvas.
    pub fn geometry(&self) -> (i64, i64, Option<u32>, Option<u32>) {
        (self.x, self.y, self.width, self.height)
    }
}
