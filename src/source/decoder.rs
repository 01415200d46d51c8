//! Decoder-backed frame source: maps stream time onto discrete frames of a
//! finite, seekable medium.
//!
//! The timestamp-to-frame translation picks the cheapest decoder operation
//! for every request: reading the next frame in order when already at the
//! target, a short burst of sequential reads for small forward jumps, and a
//! random-access seek only when the target is behind the cursor or further
//! ahead than [`SEEK_AHEAD_FRAMES`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::decode::{Decoder, DecoderInfo, DecoderOpener, RawFrame};
use crate::foundation::core::{Frame, FrameIndex, PlayState, lock};
use crate::foundation::error::StrobeResult;
use crate::source::hub::{FrameCallback, FrameWaiter};
use crate::source::{FrameSource, SourceCore, Worker};

/// Largest forward jump served by sequential catch-up reads instead of a
/// random-access seek. Sequential reads are materially cheaper than seeking
/// in most decoders.
pub const SEEK_AHEAD_FRAMES: u64 = 5;

const FALLBACK_POLL_INTERVAL: Duration = Duration::from_millis(33);

/// Options for a [`DecoderSource`].
#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct DecoderSourceOpts {
    /// Run an internal production loop at the source frame rate instead of
    /// relying on the caller's `get_frame` cadence.
    pub threaded: bool,
    /// Wrap around at end of media instead of reporting completion.
    pub loop_enabled: bool,
}

struct DecoderState {
    handle: Option<Box<dyn Decoder>>,
    info: Option<DecoderInfo>,
    /// Frame index the next `read_next` on the handle will return.
    cursor: u64,
    /// Frame index last read from the decoder; unchanged target means "no
    /// new frame" without touching the handle.
    last_decoded: Option<u64>,
    looping: bool,
}

/// A seekable, finite (or unknown-length) decoder-backed [`FrameSource`].
///
/// The decoder handle is opened lazily by `start()` (or frame-exact access)
/// and released by `stop()`; restarting re-opens it through the
/// [`DecoderOpener`] capability.
pub struct DecoderSource {
    core: Arc<SourceCore>,
    state: Arc<Mutex<DecoderState>>,
    opener: DecoderOpener,
    threaded: bool,
    worker: Mutex<Option<Worker>>,
}

impl DecoderSource {
    /// Create a source around a decoder-opening capability. Nothing is opened
    /// until `start()` or frame-exact access.
    pub fn new(opener: DecoderOpener, opts: DecoderSourceOpts) -> Self {
        Self {
            core: Arc::new(SourceCore::new()),
            state: Arc::new(Mutex::new(DecoderState {
                handle: None,
                info: None,
                cursor: 0,
                last_decoded: None,
                looping: opts.loop_enabled,
            })),
            opener,
            threaded: opts.threaded,
            worker: Mutex::new(None),
        }
    }

    /// Convenience constructor wrapping a plain closure opener.
    pub fn from_fn(
        open: impl Fn() -> StrobeResult<Box<dyn Decoder>> + Send + Sync + 'static,
        opts: DecoderSourceOpts,
    ) -> Self {
        Self::new(Arc::new(open), opts)
    }

    /// Metadata of the opened decoder, if any open has succeeded yet.
    pub fn info(&self) -> Option<DecoderInfo> {
        lock(&self.state).info
    }

    /// Whether end of media wraps around to the start.
    pub fn is_looping(&self) -> bool {
        lock(&self.state).looping
    }

    /// Enable or disable loop-wraparound at end of media.
    pub fn set_looping(&self, on: bool) {
        lock(&self.state).looping = on;
    }

    /// Read the exact frame `i`, bypassing the clock entirely; the
    /// direct-addressing path for offline or frame-exact consumption. The
    /// index is clamped into the finite range when the frame count is known.
    pub fn get_frame_by_index(&self, i: u64) -> (Option<Frame>, FrameIndex) {
        let index = self.core.frame_index();
        let mut st = lock(&self.state);
        if st.handle.is_none() && !try_open(&mut st, &self.opener) {
            return (None, index);
        }
        let Some(info) = st.info else {
            return (None, index);
        };
        let i = if info.frame_count > 0 {
            i.min(info.frame_count - 1)
        } else {
            i
        };
        if st.last_decoded == Some(i) {
            return (None, index);
        }

        match read_at(&mut st, i) {
            Ok(Some(raw)) => match convert(raw, info) {
                Some(frame) => {
                    st.last_decoded = Some(i);
                    drop(st);
                    let index = self.core.publish(frame.clone());
                    (Some(frame), index)
                }
                None => (None, index),
            },
            Ok(None) => (None, index),
            Err(e) => {
                tracing::warn!("frame-exact read of {i} failed: {e}");
                (None, index)
            }
        }
    }

    fn ensure_worker(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        let interval = lock(&self.state)
            .info
            .filter(|i| i.fps > 0.0)
            .map_or(FALLBACK_POLL_INTERVAL, |i| {
                Duration::from_secs_f64(1.0 / i.fps)
            });
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        *worker = Some(Worker::spawn("strobe-decoder", interval, move || {
            if core.state() == PlayState::Playing {
                let _ = produce(&core, &state);
            }
        }));
    }
}

impl FrameSource for DecoderSource {
    #[tracing::instrument(skip(self))]
    fn start(&self) -> StrobeResult<()> {
        {
            let mut st = lock(&self.state);
            if st.handle.is_none() {
                let handle = (self.opener.as_ref())()?;
                st.info = Some(handle.info());
                st.handle = Some(handle);
                st.cursor = 0;
                st.last_decoded = None;
            }
        }
        match self.core.state() {
            PlayState::Stopped => self.core.clock_start(),
            PlayState::Paused => self.core.clock_resume(),
            PlayState::Playing => {}
        }
        if self.threaded {
            self.ensure_worker();
        }
        Ok(())
    }

    fn stop(&self) {
        let worker = lock(&self.worker).take();
        drop(worker);
        self.core.clock_stop();
        let mut st = lock(&self.state);
        st.handle = None;
        st.cursor = 0;
        st.last_decoded = None;
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
        if self.threaded {
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
        true
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.state).info.and_then(|i| i.duration())
    }

    fn seek_to(&self, secs: f64) {
        // With looping enabled a target past the end is legitimate: the next
        // request folds whole loops back into the clock.
        let t = if self.is_looping() {
            secs.max(0.0)
        } else {
            match self.duration() {
                Some(d) => secs.clamp(0.0, d),
                None => secs.max(0.0),
            }
        };
        self.core.clock_seek_to(t);
    }

    fn set_play_rate(&self, rate: f64) {
        self.core.clock_set_play_rate(rate);
    }
}

impl Drop for DecoderSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn try_open(st: &mut DecoderState, opener: &DecoderOpener) -> bool {
    match (opener.as_ref())() {
        Ok(handle) => {
            st.info = Some(handle.info());
            st.handle = Some(handle);
            st.cursor = 0;
            st.last_decoded = None;
            true
        }
        Err(e) => {
            tracing::warn!("lazy decoder open failed: {e}");
            false
        }
    }
}

fn convert(raw: RawFrame, info: DecoderInfo) -> Option<Frame> {
    match raw.into_frame(info.width, info.height) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!("decoded frame conversion failed: {e}");
            None
        }
    }
}

/// Position the decoder on `target` with the cheapest access pattern and read
/// it. `Ok(None)` is end of media.
fn read_at(st: &mut DecoderState, target: u64) -> StrobeResult<Option<RawFrame>> {
    let mut cursor = st.cursor;
    let Some(handle) = st.handle.as_mut() else {
        return Ok(None);
    };

    if target < cursor || target > cursor + SEEK_AHEAD_FRAMES {
        handle.seek(target)?;
        cursor = target;
    }

    let mut raw = None;
    while cursor <= target {
        match handle.read_next()? {
            Some(r) => {
                raw = Some(r);
                cursor += 1;
            }
            None => {
                st.cursor = cursor;
                return Ok(None);
            }
        }
    }
    st.cursor = cursor;
    Ok(raw)
}

/// Reset the decoder and clock to frame zero and read one frame; the single
/// retry taken when a read fails at end of media with looping enabled.
fn loop_reset_retry(core: &SourceCore, st: &mut DecoderState) -> Option<(Frame, u64)> {
    if !st.looping {
        return None;
    }
    let info = st.info?;
    let handle = st.handle.as_mut()?;
    if let Err(e) = handle.seek(0) {
        tracing::warn!("loop reset seek failed: {e}");
        return None;
    }
    st.cursor = 0;
    st.last_decoded = None;
    match handle.read_next() {
        Ok(Some(raw)) => {
            st.cursor = 1;
            core.clock_seek_to(0.0);
            convert(raw, info).map(|frame| (frame, 0))
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("loop reset read failed: {e}");
            None
        }
    }
}

/// One production step: translate elapsed time into a target frame, decode it
/// if it is new, and publish through the source protocol.
fn produce(core: &SourceCore, state: &Mutex<DecoderState>) -> (Option<Frame>, FrameIndex) {
    let index = core.frame_index();
    if core.state() != PlayState::Playing {
        return (None, index);
    }
    let elapsed = core.elapsed();

    let mut st = lock(state);
    let Some(info) = st.info else {
        return (None, index);
    };
    if info.fps <= 0.0 {
        return (None, index);
    }

    let mut target = (elapsed * info.fps).floor().max(0.0) as u64;
    if info.frame_count > 0 && target >= info.frame_count {
        if st.looping {
            let whole_loops = target / info.frame_count;
            let fold_secs = (whole_loops * info.frame_count) as f64 / info.fps;
            core.clock_rewind_by(fold_secs);
            target %= info.frame_count;
        } else {
            // End of media is not an error; the decoder stays open.
            return (None, index);
        }
    }
    if st.last_decoded == Some(target) {
        return (None, index);
    }

    let produced = match read_at(&mut st, target) {
        Ok(Some(raw)) => convert(raw, info).map(|frame| (frame, target)),
        Ok(None) => loop_reset_retry(core, &mut st),
        Err(e) => {
            tracing::warn!("decoder read failed mid-stream: {e}");
            loop_reset_retry(core, &mut st)
        }
    };

    match produced {
        Some((frame, decoded)) => {
            st.last_decoded = Some(decoded);
            drop(st);
            let index = core.publish(frame.clone());
            (Some(frame), index)
        }
        None => (None, index),
    }
}
