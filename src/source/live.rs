//! Live-capture frame source: an infinite, non-seekable device.
//!
//! Pausing stops polling the device but leaves the last frame addressable;
//! stopping releases the device handle. By default a live source runs
//! threaded, polling at the device's reported rate.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::decode::{Decoder, DecoderInfo, DecoderOpener};
use crate::foundation::core::{Frame, FrameIndex, PlayState, lock};
use crate::foundation::error::StrobeResult;
use crate::source::hub::{FrameCallback, FrameWaiter};
use crate::source::{FrameSource, SourceCore, Worker};

/// Options for a [`LiveSource`].
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct LiveSourceOpts {
    /// Poll the device from an internal loop (the default) instead of on the
    /// caller's `get_frame` cadence.
    pub threaded: bool,
    /// Poll rate used when the device does not report one.
    pub poll_hz: f64,
}

impl Default for LiveSourceOpts {
    fn default() -> Self {
        Self {
            threaded: true,
            poll_hz: 30.0,
        }
    }
}

struct LiveState {
    handle: Option<Box<dyn Decoder>>,
    info: Option<DecoderInfo>,
}

/// Infinite, non-seekable capture-backed [`FrameSource`].
pub struct LiveSource {
    core: Arc<SourceCore>,
    state: Arc<Mutex<LiveState>>,
    opener: DecoderOpener,
    opts: LiveSourceOpts,
    worker: Mutex<Option<Worker>>,
}

impl LiveSource {
    /// Create a source around a capture-opening capability. The device is
    /// opened by `start()`.
    pub fn new(opener: DecoderOpener, opts: LiveSourceOpts) -> Self {
        Self {
            core: Arc::new(SourceCore::new()),
            state: Arc::new(Mutex::new(LiveState {
                handle: None,
                info: None,
            })),
            opener,
            opts,
            worker: Mutex::new(None),
        }
    }

    /// Convenience constructor wrapping a plain closure opener.
    pub fn from_fn(
        open: impl Fn() -> StrobeResult<Box<dyn Decoder>> + Send + Sync + 'static,
        opts: LiveSourceOpts,
    ) -> Self {
        Self::new(Arc::new(open), opts)
    }

    /// Metadata of the opened device, if any open has succeeded yet.
    pub fn info(&self) -> Option<DecoderInfo> {
        lock(&self.state).info
    }

    fn poll_interval(&self) -> Duration {
        let hz = lock(&self.state)
            .info
            .map(|i| i.fps)
            .filter(|fps| *fps > 0.0)
            .unwrap_or(self.opts.poll_hz)
            .max(1.0);
        Duration::from_secs_f64(1.0 / hz)
    }

    fn ensure_worker(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        let interval = self.poll_interval();
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        *worker = Some(Worker::spawn("strobe-live", interval, move || {
            if core.state() == PlayState::Playing {
                let _ = produce(&core, &state);
            }
        }));
    }
}

impl FrameSource for LiveSource {
    #[tracing::instrument(skip(self))]
    fn start(&self) -> StrobeResult<()> {
        {
            let mut st = lock(&self.state);
            if st.handle.is_none() {
                let handle = (self.opener.as_ref())()?;
                st.info = Some(handle.info());
                st.handle = Some(handle);
            }
        }
        match self.core.state() {
            PlayState::Stopped => self.core.clock_start(),
            PlayState::Paused => self.core.clock_resume(),
            PlayState::Playing => {}
        }
        if self.opts.threaded {
            self.ensure_worker();
        }
        Ok(())
    }

    fn stop(&self) {
        let worker = lock(&self.worker).take();
        drop(worker);
        self.core.clock_stop();
        lock(&self.state).handle = None;
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
        if self.opts.threaded {
            self.core.take_latest()
        } else {
            produce(&self.core, &self.state)
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
        false
    }

    fn duration(&self) -> Option<f64> {
        None
    }

    fn seek_to(&self, _secs: f64) {
        // Live capture has no timeline to reposition.
    }

    fn set_play_rate(&self, rate: f64) {
        self.core.clock_set_play_rate(rate);
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn produce(core: &SourceCore, state: &Mutex<LiveState>) -> (Option<Frame>, FrameIndex) {
    let index = core.frame_index();
    if core.state() != PlayState::Playing {
        return (None, index);
    }

    let mut st = lock(state);
    let Some(info) = st.info else {
        return (None, index);
    };
    let Some(handle) = st.handle.as_mut() else {
        return (None, index);
    };

    match handle.read_next() {
        Ok(Some(raw)) => match raw.into_frame(info.width, info.height) {
            Ok(frame) => {
                drop(st);
                let index = core.publish(frame.clone());
                (Some(frame), index)
            }
            Err(e) => {
                tracing::warn!("captured frame conversion failed: {e}");
                (None, index)
            }
        },
        // A device returning nothing this poll is a hiccup, not an error.
        Ok(None) => (None, index),
        Err(e) => {
            tracing::warn!("capture read failed: {e}");
            (None, index)
        }
    }
}
