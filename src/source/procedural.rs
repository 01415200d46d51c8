//! Procedural frame source: a user-supplied render function invoked per
//! request, optionally gated on an upstream source's frame index so it only
//! recomputes when its input changed.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::foundation::core::{Frame, FrameIndex, PlayState, lock};
use crate::foundation::error::StrobeResult;
use crate::source::hub::{FrameCallback, FrameWaiter};
use crate::source::{FrameSource, SourceCore};

/// Render function of a [`ProceduralSource`]: stream seconds in, frame out.
pub type RenderFn = dyn Fn(f64) -> StrobeResult<Frame> + Send + Sync;

/// Frame source that computes each frame on demand.
///
/// Without a dependency the render function runs on every request while
/// playing. With one, it runs only when the dependency has published a new
/// frame since the last render, making derived streams cheap to poll.
pub struct ProceduralSource {
    core: Arc<SourceCore>,
    render: Box<RenderFn>,
    depends_on: Option<Arc<dyn FrameSource>>,
    dep_seen: Mutex<Option<FrameIndex>>,
}

impl ProceduralSource {
    /// Create a source that renders on every request.
    pub fn new(render: impl Fn(f64) -> StrobeResult<Frame> + Send + Sync + 'static) -> Self {
        Self {
            core: Arc::new(SourceCore::new()),
            render: Box::new(render),
            depends_on: None,
            dep_seen: Mutex::new(None),
        }
    }

    /// Create a source that re-renders only when `dependency` produces a new
    /// frame.
    pub fn with_dependency(
        render: impl Fn(f64) -> StrobeResult<Frame> + Send + Sync + 'static,
        dependency: Arc<dyn FrameSource>,
    ) -> Self {
        Self {
            core: Arc::new(SourceCore::new()),
            render: Box::new(render),
            depends_on: Some(dependency),
            dep_seen: Mutex::new(None),
        }
    }
}

impl FrameSource for ProceduralSource {
    fn start(&self) -> StrobeResult<()> {
        match self.core.state() {
            PlayState::Stopped => self.core.clock_start(),
            PlayState::Paused => self.core.clock_resume(),
            PlayState::Playing => {}
        }
        Ok(())
    }

    fn stop(&self) {
        self.core.clock_stop();
    }

    fn pause(&self) {
        self.core.clock_pause();
    }

    fn resume(&self) {
        self.core.clock_resume();
    }

    fn state(&self) -> PlayState {
        self.core.state()
    }

    fn get_frame(&self, _timestamp: f64) -> (Option<Frame>, FrameIndex) {
        let index = self.core.frame_index();
        if self.core.state() != PlayState::Playing {
            return (None, index);
        }

        if let Some(dep) = &self.depends_on {
            let dep_index = dep.frame_index();
            let mut seen = lock(&self.dep_seen);
            if *seen == Some(dep_index) {
                return (None, index);
            }
            *seen = Some(dep_index);
        }

        match (self.render)(self.core.elapsed()) {
            Ok(frame) => {
                let index = self.core.publish(frame.clone());
                (Some(frame), index)
            }
            Err(e) => {
                tracing::warn!("procedural render failed: {e}");
                (None, index)
            }
        }
    }

    fn elapsed_time(&self) -> f64 {
        self.core.elapsed()
    }

    fn frame_index(&self) -> FrameIndex {
        self.core.frame_index()
    }

    fn last_frame(&self) -> Option<(Frame, Instant)> {
        self.core.last_frame()
    }

    fn subscribe(&self) -> FrameWaiter {
        self.core.hub().subscribe()
    }

    fn unsubscribe(&self, waiter: &FrameWaiter) {
        self.core.hub().unsubscribe(waiter);
    }

    fn on_frame(&self, cb: FrameCallback) -> StrobeResult<()> {
        self.core.hub().add_callback(cb)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn duration(&self) -> Option<f64> {
        None
    }

    fn seek_to(&self, secs: f64) {
        self.core.clock_seek_to(secs.max(0.0));
    }

    fn set_play_rate(&self, rate: f64) {
        self.core.clock_set_play_rate(rate);
    }
}
