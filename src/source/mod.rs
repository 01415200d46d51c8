//! Uniform, pollable frame producers.
//!
//! Every producer kind (decoder-backed, live capture, procedural,
//! multi-output) implements [`FrameSource`]: one shared contract for
//! playback control, frame retrieval, change detection via frame indices,
//! and notification fan-out. Variant-specific capabilities (seekability,
//! duration) are explicit methods, not reflection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::clock::StreamClock;
use crate::foundation::core::{Frame, FrameIndex, PlayState, lock};
use crate::foundation::error::StrobeResult;
use crate::source::hub::{FrameCallback, FrameWaiter, SubscriberHub};

pub mod decoder;
pub mod hub;
pub mod live;
pub mod multi;
pub mod procedural;

/// The uniform contract every frame producer implements.
///
/// `get_frame` is the sole way callers retrieve pixels: `(None, index)` with
/// an unchanged index means "no new frame since last poll, reuse what you
/// have" and is the expected answer while paused or stopped. Each successful
/// production atomically stores the frame and capture instant, increments the
/// index by exactly one, signals waiters, and dispatches callbacks, in that
/// order, without ever blocking the producer on a consumer.
pub trait FrameSource: Send + Sync {
    /// Begin playback, opening underlying resources if needed. The only hard
    /// failure surface: an unopenable resource leaves the source stopped.
    fn start(&self) -> StrobeResult<()>;
    /// Stop playback and release underlying resources. Safe from any thread;
    /// a threaded production loop terminates within one poll interval.
    fn stop(&self);
    /// Freeze stream time. No-op unless playing.
    fn pause(&self);
    /// Continue after a pause. No-op unless paused.
    fn resume(&self);
    /// Current lifecycle state.
    fn state(&self) -> PlayState;

    /// Retrieve the frame for `timestamp` (advisory; clock-driven sources use
    /// their own elapsed time), producing one if the stream has advanced.
    fn get_frame(&self, timestamp: f64) -> (Option<Frame>, FrameIndex);
    /// Pause-aware stream seconds since `start()`.
    fn elapsed_time(&self) -> f64;
    /// Identity of the most recently produced frame.
    fn frame_index(&self) -> FrameIndex;
    /// Thread-safe snapshot of the last produced frame and its capture
    /// instant. This is the one slot dependent sources may share.
    fn last_frame(&self) -> Option<(Frame, Instant)>;

    /// Register a blocking waiter signaled on every new frame.
    fn subscribe(&self) -> FrameWaiter;
    /// Remove a waiter registration.
    fn unsubscribe(&self, waiter: &FrameWaiter);
    /// Register an asynchronous callback invoked off the producer thread.
    /// Idempotent per callback identity; capped per source.
    fn on_frame(&self, cb: FrameCallback) -> StrobeResult<()>;

    /// Whether this variant supports random access in stream time.
    fn is_seekable(&self) -> bool;
    /// Total duration in seconds when finite and known.
    fn duration(&self) -> Option<f64>;
    /// Reposition stream time, clamped to the valid range. No-op on
    /// non-seekable variants.
    fn seek_to(&self, secs: f64);
    /// Scale how stream time advances relative to wall time. Clamped; never
    /// moves the current position.
    fn set_play_rate(&self, rate: f64);

    /// Playback-control alias for [`start`](Self::start): begins a stopped
    /// source, resumes a paused one.
    fn play(&self) -> StrobeResult<()> {
        self.start()
    }

    /// Flip between playing and paused; starts a stopped source.
    fn toggle(&self) {
        match self.state() {
            PlayState::Playing => self.pause(),
            PlayState::Paused => self.resume(),
            PlayState::Stopped => {
                if let Err(e) = self.start() {
                    tracing::warn!("toggle could not start source: {e}");
                }
            }
        }
    }

    /// Seek by a signed delta from the current position.
    fn seek_relative(&self, delta: f64) {
        self.seek_to((self.elapsed_time() + delta).max(0.0));
    }
}

struct Slot {
    clock: StreamClock,
    frame: Option<Frame>,
    captured_at: Option<Instant>,
    index: FrameIndex,
    /// Last index handed out by `take_latest`; lets threaded sources answer
    /// `get_frame` with "new since the previous poll".
    last_polled: FrameIndex,
}

/// State and publish protocol shared by every source variant: the pause-aware
/// clock, the guarded last-frame slot, the frame index, and the notification
/// hub. All slot access goes through one mutex so no consumer can observe an
/// incremented index with a stale frame.
pub(crate) struct SourceCore {
    slot: Mutex<Slot>,
    hub: SubscriberHub,
}

impl SourceCore {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                clock: StreamClock::new(),
                frame: None,
                captured_at: None,
                index: FrameIndex(0),
                last_polled: FrameIndex(0),
            }),
            hub: SubscriberHub::new(),
        }
    }

    pub(crate) fn state(&self) -> PlayState {
        lock(&self.slot).clock.state()
    }

    pub(crate) fn elapsed(&self) -> f64 {
        lock(&self.slot).clock.elapsed()
    }

    pub(crate) fn frame_index(&self) -> FrameIndex {
        lock(&self.slot).index
    }

    pub(crate) fn last_frame(&self) -> Option<(Frame, Instant)> {
        let slot = lock(&self.slot);
        match (&slot.frame, slot.captured_at) {
            (Some(frame), Some(at)) => Some((frame.clone(), at)),
            _ => None,
        }
    }

    /// Store a newly produced frame, bump the index, then fan out.
    pub(crate) fn publish(&self, frame: Frame) -> FrameIndex {
        let captured_at = Instant::now();
        let index = {
            let mut slot = lock(&self.slot);
            slot.frame = Some(frame.clone());
            slot.captured_at = Some(captured_at);
            slot.index.0 += 1;
            slot.index
        };
        self.hub.notify(&frame, captured_at);
        index
    }

    /// Snapshot the latest frame if it is newer than the previous
    /// `take_latest` call; the poll-side half of change detection for
    /// threaded sources.
    pub(crate) fn take_latest(&self) -> (Option<Frame>, FrameIndex) {
        let mut slot = lock(&self.slot);
        if slot.index != slot.last_polled {
            slot.last_polled = slot.index;
            (slot.frame.clone(), slot.index)
        } else {
            (None, slot.index)
        }
    }

    pub(crate) fn hub(&self) -> &SubscriberHub {
        &self.hub
    }

    pub(crate) fn clock_start(&self) {
        lock(&self.slot).clock.start();
    }

    pub(crate) fn clock_stop(&self) {
        lock(&self.slot).clock.stop();
    }

    pub(crate) fn clock_pause(&self) {
        lock(&self.slot).clock.pause();
    }

    pub(crate) fn clock_resume(&self) {
        lock(&self.slot).clock.resume();
    }

    pub(crate) fn clock_seek_to(&self, t: f64) {
        lock(&self.slot).clock.seek_to(t);
    }

    pub(crate) fn clock_set_play_rate(&self, rate: f64) {
        lock(&self.slot).clock.set_play_rate(rate);
    }

    pub(crate) fn clock_rewind_by(&self, d: f64) {
        lock(&self.slot).clock.rewind_by(d);
    }
}

/// Background production loop used by threaded sources: ticks at a fixed
/// interval until stopped, and joins on drop so `stop()` terminates the loop
/// within one poll interval.
pub(crate) struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        name: &str,
        interval: std::time::Duration,
        tick: impl Fn() + Send + 'static,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    tick();
                    std::thread::sleep(interval);
                }
            })
            .expect("spawning a producer loop thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
