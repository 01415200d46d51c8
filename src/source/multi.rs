//! Multi-output renderer source: a background loop that fills several
//! independently-addressable named outputs at a fixed cadence.
//!
//! The first output returned by the render function doubles as the source's
//! own frame so the uniform [`FrameSource`] protocol (last frame, waiters,
//! callbacks) keeps working; every other output is reachable by name or
//! through an [`OutputTap`] bound into a compositor layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::foundation::core::{Frame, FrameIndex, PlayState, lock};
use crate::foundation::error::StrobeResult;
use crate::source::hub::{FrameCallback, FrameWaiter};
use crate::source::{FrameSource, SourceCore, Worker};

/// Render function of a [`MultiOutputSource`]: stream seconds in, a batch of
/// named frames out. The first entry is treated as the primary output.
pub type MultiRenderFn = dyn Fn(f64) -> StrobeResult<Vec<(String, Frame)>> + Send + Sync;

/// Frame source whose internal loop produces a set of named outputs per tick.
pub struct MultiOutputSource {
    core: Arc<SourceCore>,
    render: Arc<MultiRenderFn>,
    outputs: Arc<Mutex<HashMap<String, Frame>>>,
    cadence_hz: f64,
    worker: Mutex<Option<Worker>>,
}

impl MultiOutputSource {
    /// Create a source ticking `cadence_hz` times per second once started.
    pub fn new(
        render: impl Fn(f64) -> StrobeResult<Vec<(String, Frame)>> + Send + Sync + 'static,
        cadence_hz: f64,
    ) -> Self {
        Self {
            core: Arc::new(SourceCore::new()),
            render: Arc::new(render),
            outputs: Arc::new(Mutex::new(HashMap::new())),
            cadence_hz: cadence_hz.max(1.0),
            worker: Mutex::new(None),
        }
    }

    /// Latest frame rendered into the named output, if any tick filled it.
    pub fn output(&self, name: &str) -> Option<Frame> {
        lock(&self.outputs).get(name).cloned()
    }

    /// Names of all outputs filled so far, sorted for determinism.
    pub fn output_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.outputs).keys().cloned().collect();
        names.sort();
        names
    }

    /// A [`FrameSource`] view of one named output, sharing this source's
    /// lifecycle, clock, and notifications.
    pub fn tap(self: &Arc<Self>, name: impl Into<String>) -> OutputTap {
        OutputTap {
            parent: Arc::clone(self),
            name: name.into(),
            seen: Mutex::new(FrameIndex(0)),
        }
    }

    fn ensure_worker(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / self.cadence_hz);
        let core = Arc::clone(&self.core);
        let render = Arc::clone(&self.render);
        let outputs = Arc::clone(&self.outputs);
        *worker = Some(Worker::spawn("strobe-multi", interval, move || {
            tick(&core, &render, &outputs);
        }));
    }
}

fn tick(core: &SourceCore, render: &Arc<MultiRenderFn>, outputs: &Mutex<HashMap<String, Frame>>) {
    if core.state() != PlayState::Playing {
        return;
    }
    match (render.as_ref())(core.elapsed()) {
        Ok(produced) => {
            let Some(primary) = produced.first().map(|(_, f)| f.clone()) else {
                return;
            };
            {
                let mut map = lock(outputs);
                for (name, frame) in produced {
                    map.insert(name, frame);
                }
            }
            core.publish(primary);
        }
        Err(e) => {
            tracing::warn!("multi-output render failed: {e}");
        }
    }
}

impl FrameSource for MultiOutputSource {
    fn start(&self) -> StrobeResult<()> {
        match self.core.state() {
            PlayState::Stopped => self.core.clock_start(),
            PlayState::Paused => self.core.clock_resume(),
            PlayState::Playing => {}
        }
        self.ensure_worker();
        Ok(())
    }

    fn stop(&self) {
        let worker = lock(&self.worker).take();
        drop(worker);
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
        self.core.take_latest()
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

impl Drop for MultiOutputSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One named output of a [`MultiOutputSource`], viewed as a [`FrameSource`].
///
/// Lifecycle and subscriptions delegate to the parent; `get_frame` reports a
/// new frame whenever the parent has completed a tick since this tap's
/// previous poll.
pub struct OutputTap {
    parent: Arc<MultiOutputSource>,
    name: String,
    seen: Mutex<FrameIndex>,
}

impl OutputTap {
    /// Name of the output this tap reads.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FrameSource for OutputTap {
    fn start(&self) -> StrobeResult<()> {
        self.parent.start()
    }

    fn stop(&self) {
        self.parent.stop();
    }

    fn pause(&self) {
        self.parent.pause();
    }

    fn resume(&self) {
        self.parent.resume();
    }

    fn state(&self) -> PlayState {
        self.parent.state()
    }

    fn get_frame(&self, _timestamp: f64) -> (Option<Frame>, FrameIndex) {
        let index = self.parent.frame_index();
        let mut seen = lock(&self.seen);
        if *seen != index {
            *seen = index;
            (self.parent.output(&self.name), index)
        } else {
            (None, index)
        }
    }

    fn elapsed_time(&self) -> f64 {
        self.parent.elapsed_time()
    }

    fn frame_index(&self) -> FrameIndex {
        self.parent.frame_index()
    }

    fn last_frame(&self) -> Option<(Frame, Instant)> {
        let (_, at) = self.parent.last_frame()?;
        let frame = self.parent.output(&self.name)?;
        Some((frame, at))
    }

    fn subscribe(&self) -> FrameWaiter {
        self.parent.subscribe()
    }

    fn unsubscribe(&self, waiter: &FrameWaiter) {
        self.parent.unsubscribe(waiter);
    }

    fn on_frame(&self, cb: FrameCallback) -> StrobeResult<()> {
        self.parent.on_frame(cb)
    }

    fn is_seekable(&self) -> bool {
        self.parent.is_seekable()
    }

    fn duration(&self) -> Option<f64> {
        self.parent.duration()
    }

    fn seek_to(&self, secs: f64) {
        self.parent.seek_to(secs);
    }

    fn set_play_rate(&self, rate: f64) {
        self.parent.set_play_rate(rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_output_source(cadence_hz: f64) -> Arc<MultiOutputSource> {
        Arc::new(MultiOutputSource::new(
            |t| {
                let shade = ((t * 100.0) as u64 % 256) as u8;
                Ok(vec![
                    ("color".to_owned(), Frame::solid(2, 2, [shade, 0, 0, 255])),
                    ("depth".to_owned(), Frame::solid(2, 2, [0, 0, shade, 255])),
                ])
            },
            cadence_hz,
        ))
    }

    #[test]
    fn loop_fills_all_named_outputs() {
        let src = two_output_source(100.0);
        let mut waiter = src.subscribe();
        src.start().unwrap();
        assert!(waiter.wait_for_frame(Duration::from_secs(2)));

        assert!(src.output("color").is_some());
        assert!(src.output("depth").is_some());
        assert!(src.output("normals").is_none());
        assert_eq!(src.output_names(), vec!["color".to_owned(), "depth".to_owned()]);
        src.stop();
    }

    #[test]
    fn primary_frame_follows_first_output() {
        let src = two_output_source(100.0);
        let mut waiter = src.subscribe();
        src.start().unwrap();
        assert!(waiter.wait_for_frame(Duration::from_secs(2)));
        src.pause();
        // Let any in-flight tick finish before comparing slot and outputs.
        std::thread::sleep(Duration::from_millis(50));

        let (primary, _) = src.last_frame().unwrap();
        assert_eq!(primary, src.output("color").unwrap());
        src.stop();
    }

    #[test]
    fn tap_reports_each_tick_once() {
        let src = two_output_source(100.0);
        let tap = src.tap("depth");
        let mut waiter = src.subscribe();
        src.start().unwrap();
        assert!(waiter.wait_for_frame(Duration::from_secs(2)));
        src.pause();
        std::thread::sleep(Duration::from_millis(50));

        let (f, idx) = tap.get_frame(0.0);
        assert!(f.is_some());
        let (again, idx2) = tap.get_frame(0.0);
        assert!(again.is_none());
        assert_eq!(idx, idx2);
        src.stop();
    }

    #[test]
    fn stop_terminates_the_loop() {
        let src = two_output_source(200.0);
        let mut waiter = src.subscribe();
        src.start().unwrap();
        assert!(waiter.wait_for_frame(Duration::from_secs(2)));
        src.stop();
        let idx = src.frame_index();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(src.frame_index(), idx);
    }
}
