//! The three background samplers of a session.
//!
//! None of them ever touches the session directly: they send
//! [`SessionWrite`]s with `try_send`, so a writer that falls behind costs
//! samples, never frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mb_perf_session::{BoundedRing, FpsSample, FrameRecord, RendererStatSample};
use mb_smart_channel::{Sender, SmartMessageSource};
use parking_lot::Mutex;

use crate::{
    MonitorConfig,
    host::{Clock, FrameRequestId, FrameSource, IntervalTimer, TimerHandle},
    probe::Probes,
    writer::{SessionWrite, SessionWriter},
};

/// Label of the snapshots taken by the memory sampler.
pub const CONTINUOUS_MONITORING_LABEL: &str = "continuous_monitoring";

fn try_write(writes: &Sender<SessionWrite>, write: SessionWrite) {
    if writes.try_send(write).is_err_and(|err| err.is_full()) {
        mb_log::debug_once!("Session write queue is full, dropping {} samples", writes.source());
    }
}

// ----------------------------------------------------------------------------

/// Recent FPS samples, shared by the aggregator and the monitor's readers.
#[derive(Debug)]
pub struct FpsTracker {
    samples: BoundedRing<FpsSample>,
}

impl FpsTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: BoundedRing::new(capacity),
        }
    }

    pub fn push(&mut self, sample: FpsSample) {
        self.samples.push(sample);
    }

    /// The most recent sample, zero before the first one.
    pub fn current(&self) -> f64 {
        self.samples.latest().map_or(0.0, |sample| sample.fps)
    }

    /// Arithmetic mean of the retained samples, zero when there are none.
    pub fn average(&self) -> f64 {
        mb_perf_session::average(self.samples.iter().map(|sample| sample.fps))
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<FpsSample> {
        self.samples.to_vec()
    }
}

// ----------------------------------------------------------------------------

/// Everything a sampler needs from the monitor.
#[derive(Clone)]
pub(crate) struct SamplerContext {
    pub clock: Arc<dyn Clock>,
    pub frames: Arc<dyn FrameSource>,
    pub timer: Arc<dyn IntervalTimer>,
    pub probes: Probes,
    pub fps: Arc<Mutex<FpsTracker>>,
}

/// The samplers bound to one session.
pub(crate) struct Schedulers {
    frame_loop: FrameLoop,
    memory_sampler: MemorySampler,
    fps_aggregator: FpsAggregator,
}

impl Schedulers {
    pub fn start(ctx: &SamplerContext, config: &MonitorConfig, writer: &SessionWriter) -> Self {
        let frames_counted = Arc::new(AtomicU64::new(0));

        let frame_loop = FrameLoop::new(
            ctx,
            writer.sender(SmartMessageSource::FrameLoop),
            Arc::clone(&frames_counted),
            config.renderer_stats_every_n_frames,
        );
        let memory_sampler = MemorySampler::new(
            ctx,
            writer.sender(SmartMessageSource::MemorySampler),
            config.memory_sample_interval(),
        );
        let fps_aggregator = FpsAggregator::new(
            ctx,
            writer.sender(SmartMessageSource::FpsAggregator),
            frames_counted,
            config.fps_sample_interval(),
        );

        frame_loop.start();
        memory_sampler.start();
        fps_aggregator.start();

        Self {
            frame_loop,
            memory_sampler,
            fps_aggregator,
        }
    }

    /// Once this returns none of the samplers will write again.
    pub fn stop(&self) {
        self.frame_loop.stop();
        self.memory_sampler.stop();
        self.fps_aggregator.stop();
    }
}

impl Drop for Schedulers {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Frame loop

/// Records every rendered frame, and the renderer stats every Nth one.
pub(crate) struct FrameLoop {
    inner: Arc<FrameLoopInner>,
}

struct FrameLoopInner {
    clock: Arc<dyn Clock>,
    frames: Arc<dyn FrameSource>,
    probes: Probes,
    writes: Sender<SessionWrite>,

    running: AtomicBool,
    pending: Mutex<Option<FrameRequestId>>,

    /// Held for the whole of a tick, so [`FrameLoop::stop`] can wait one out.
    tick_lock: Mutex<()>,

    last_frame_time: Mutex<f64>,
    frame_index: AtomicU64,

    /// Frames since the last FPS sample. Reset by the [`FpsAggregator`].
    frames_counted: Arc<AtomicU64>,
    renderer_stats_every: u64,
}

impl FrameLoop {
    fn new(
        ctx: &SamplerContext,
        writes: Sender<SessionWrite>,
        frames_counted: Arc<AtomicU64>,
        renderer_stats_every: u64,
    ) -> Self {
        Self {
            inner: Arc::new(FrameLoopInner {
                clock: Arc::clone(&ctx.clock),
                frames: Arc::clone(&ctx.frames),
                probes: ctx.probes.clone(),
                writes,
                running: AtomicBool::new(false),
                pending: Mutex::new(None),
                tick_lock: Mutex::new(()),
                last_frame_time: Mutex::new(0.0),
                frame_index: AtomicU64::new(0),
                frames_counted,
                renderer_stats_every: renderer_stats_every.max(1),
            }),
        }
    }

    fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.inner.last_frame_time.lock() = self.inner.clock.now_ms();
        Self::request_next(&self.inner);
    }

    fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);

        let pending = self.inner.pending.lock().take();
        if let Some(id) = pending {
            self.inner.frames.cancel_frame(id);
        }

        // Wait for a tick that already passed the running check.
        drop(self.inner.tick_lock.lock());
    }

    fn request_next(inner: &Arc<FrameLoopInner>) {
        let weak = Arc::downgrade(inner);
        let mut pending = inner.pending.lock();
        *pending = Some(inner.frames.request_frame(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self::tick(&inner);
            }
        })));
    }

    fn tick(inner: &Arc<FrameLoopInner>) {
        let _tick = inner.tick_lock.lock();
        if !inner.running.load(Ordering::Acquire) {
            return;
        }

        let now = inner.clock.now_ms();
        let duration = {
            let mut last = inner.last_frame_time.lock();
            let duration = now - *last;
            *last = now;
            duration
        };

        try_write(&inner.writes, SessionWrite::Frame(FrameRecord::new(now, duration)));
        inner.frames_counted.fetch_add(1, Ordering::Relaxed);

        let frame_index = inner.frame_index.fetch_add(1, Ordering::Relaxed) + 1;
        if frame_index % inner.renderer_stats_every == 0 {
            if let Some(stats) = inner.probes.renderer_stats() {
                try_write(
                    &inner.writes,
                    SessionWrite::RendererStats(RendererStatSample {
                        timestamp: now,
                        stats,
                    }),
                );
            }
        }

        Self::request_next(inner);
    }
}

// ----------------------------------------------------------------------------
// Repeating samplers

/// A sampler that runs a callback on a fixed interval.
struct IntervalSampler {
    timer: Arc<dyn IntervalTimer>,
    interval: std::time::Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<TimerHandle>>,
}

impl IntervalSampler {
    fn new(timer: &Arc<dyn IntervalTimer>, interval: std::time::Duration) -> Self {
        Self {
            timer: Arc::clone(timer),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Does nothing if already started.
    fn start(&self, mut sample: impl FnMut() + Send + 'static) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        *handle = Some(self.timer.schedule_repeating(
            self.interval,
            Box::new(move || {
                if running.load(Ordering::Acquire) {
                    sample();
                }
            }),
        ));
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.timer.cancel(handle);
        }
    }
}

/// Takes a labelled memory snapshot every interval.
pub(crate) struct MemorySampler {
    sampler: IntervalSampler,
    clock: Arc<dyn Clock>,
    probes: Probes,
    writes: Sender<SessionWrite>,
}

impl MemorySampler {
    fn new(
        ctx: &SamplerContext,
        writes: Sender<SessionWrite>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            sampler: IntervalSampler::new(&ctx.timer, interval),
            clock: Arc::clone(&ctx.clock),
            probes: ctx.probes.clone(),
            writes,
        }
    }

    pub fn start(&self) {
        let clock = Arc::clone(&self.clock);
        let probes = self.probes.clone();
        let writes = self.writes.clone();
        self.sampler.start(move || {
            let snapshot = probes.snapshot(clock.now_ms(), CONTINUOUS_MONITORING_LABEL);
            try_write(&writes, SessionWrite::MemorySnapshot(snapshot));
        });
    }

    pub fn stop(&self) {
        self.sampler.stop();
    }
}

/// Turns the frame count into an FPS sample every interval.
pub(crate) struct FpsAggregator {
    sampler: IntervalSampler,
    clock: Arc<dyn Clock>,
    fps: Arc<Mutex<FpsTracker>>,
    frames_counted: Arc<AtomicU64>,
    writes: Sender<SessionWrite>,
}

impl FpsAggregator {
    fn new(
        ctx: &SamplerContext,
        writes: Sender<SessionWrite>,
        frames_counted: Arc<AtomicU64>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            sampler: IntervalSampler::new(&ctx.timer, interval),
            clock: Arc::clone(&ctx.clock),
            fps: Arc::clone(&ctx.fps),
            frames_counted,
            writes,
        }
    }

    pub fn start(&self) {
        let clock = Arc::clone(&self.clock);
        let fps = Arc::clone(&self.fps);
        let frames_counted = Arc::clone(&self.frames_counted);
        let writes = self.writes.clone();
        let mut last_tick = clock.now_ms();

        self.sampler.start(move || {
            let now = clock.now_ms();
            let elapsed = now - last_tick;
            if elapsed <= 0.0 {
                return;
            }
            last_tick = now;

            let frames = frames_counted.swap(0, Ordering::Relaxed);
            let sample = FpsSample {
                timestamp: now,
                fps: frames as f64 * 1000.0 / elapsed,
            };
            fps.lock().push(sample);
            try_write(&writes, SessionWrite::Fps(sample));
        });
    }

    pub fn stop(&self) {
        self.sampler.stop();
    }
}
