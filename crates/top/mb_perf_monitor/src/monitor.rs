use std::sync::Arc;

use indexmap::IndexMap;
use mb_perf_session::{
    BlockProcessingEvent, BlockTypeAverage, ChunkProcessingEvent, ExportedSession, FpsSample,
    MemoryPoint, Metadata, OperationAverage, OperationId, RenderMode, Session, SessionId,
    TimingEvent,
};
use mb_smart_channel::SmartMessageSource;
use parking_lot::{Mutex, RwLock};

use crate::{
    MonitorConfig, PerfError,
    host::{Clock, FrameQueue, FrameSource, IntervalTimer, MonotonicClock, ThreadTimer},
    probe::{MemoryProbe, Probes, RendererProbe},
    schedulers::{FpsTracker, SamplerContext, Schedulers},
    timing_stack::TimingStack,
    writer::{SessionWrite, SessionWriter},
};

/// Label of the baseline snapshot taken when a session starts.
pub const SESSION_START_LABEL: &str = "session_start";

/// Label of the final snapshot taken when a session ends.
pub const SESSION_END_LABEL: &str = "session_end";

/// Records, samples and aggregates the performance of mesh builds.
///
/// At most one session is *current* at a time. While it is, the monitor
/// records every rendered frame, takes periodic memory snapshots and turns
/// frame counts into FPS samples, on top of whatever the caller records
/// explicitly. Ending the session stops all of that and computes its
/// [`mb_perf_session::SessionMetrics`].
///
/// All methods take `&self`, so the monitor can be shared between threads
/// behind an [`Arc`].
pub struct PerformanceMonitor {
    config: MonitorConfig,
    ctx: SamplerContext,
    state: Mutex<EngineState>,
}

#[derive(Default)]
struct EngineState {
    /// Every session, in start order.
    sessions: IndexMap<SessionId, Arc<RwLock<Session>>>,
    current: Option<ActiveSession>,
    stack: TimingStack,
}

/// The session currently being recorded, and everything recording it.
struct ActiveSession {
    id: SessionId,
    session: Arc<RwLock<Session>>,
    writer: SessionWriter,
    schedulers: Schedulers,
}

impl ActiveSession {
    /// Stops recording without ending the session.
    fn detach(self) {
        let Self {
            id,
            session: _,
            writer,
            schedulers,
        } = self;
        schedulers.stop();
        writer.shutdown();
        mb_log::debug!("Detached session {id}");
    }
}

impl PerformanceMonitor {
    pub fn builder(config: MonitorConfig) -> PerformanceMonitorBuilder {
        PerformanceMonitorBuilder {
            config,
            clock: None,
            frames: None,
            timer: None,
            memory_probe: None,
            renderer_probe: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Milliseconds on the monitor's clock. All timestamps in sessions are on this clock.
    #[inline]
    pub fn now_ms(&self) -> f64 {
        self.ctx.clock.now_ms()
    }

    // ------------------------------------------------------------------------
    // Sessions

    /// Starts recording a new session and makes it current.
    ///
    /// A session that was still current is detached: it stops recording but
    /// is not ended. It can still be ended by id later.
    pub fn start_session(&self, subject_id: &str, render_mode: RenderMode) -> SessionId {
        let mut state = self.state.lock();

        if let Some(previous) = state.current.take() {
            mb_log::warn!(
                "Starting a new session while {} is still running; it will no longer be recorded",
                previous.id
            );
            previous.detach();
        }

        let started_at_unix_ms = self.ctx.clock.unix_time_ms();
        let id = SessionId::generate(subject_id, started_at_unix_ms);
        let start_time = self.ctx.clock.now_ms();
        let session = Arc::new(RwLock::new(Session::new(
            id.clone(),
            subject_id,
            render_mode,
            started_at_unix_ms,
            start_time,
            self.config.session_limits(),
        )));

        let writer = SessionWriter::spawn(
            &id,
            Arc::clone(&session),
            self.config.write_queue_capacity,
            self.config.flush_timeout(),
        );
        writer.send(
            SmartMessageSource::Engine,
            SessionWrite::MemorySnapshot(self.ctx.probes.snapshot(start_time, SESSION_START_LABEL)),
        );

        *self.ctx.fps.lock() = FpsTracker::new(self.config.max_fps_samples);
        let schedulers = Schedulers::start(&self.ctx, &self.config, &writer);

        state.sessions.insert(id.clone(), Arc::clone(&session));
        state.current = Some(ActiveSession {
            id: id.clone(),
            session,
            writer,
            schedulers,
        });

        mb_log::info!("Started performance session {id} ({render_mode})");
        id
    }

    /// Ends the session `id`, or the current one if `None`.
    ///
    /// Returns the finished session, or `None` if there is no such session or
    /// it already ended.
    pub fn end_session(&self, id: Option<&SessionId>) -> Option<Session> {
        let mut state = self.state.lock();

        let id = match id {
            Some(id) => id.clone(),
            None => {
                let Some(current) = &state.current else {
                    mb_log::warn!("end_session called without a current session");
                    return None;
                };
                current.id.clone()
            }
        };

        let Some(session) = state.sessions.get(&id).map(Arc::clone) else {
            mb_log::warn!("Cannot end unknown session {id}");
            return None;
        };

        let end_time = if state.current.as_ref().is_some_and(|current| current.id == id) {
            let active = state.current.take()?;

            active.schedulers.stop();
            active.writer.flush();

            let end_time = self.ctx.clock.now_ms();
            active.writer.send(
                SmartMessageSource::Engine,
                SessionWrite::MemorySnapshot(self.ctx.probes.snapshot(end_time, SESSION_END_LABEL)),
            );
            active.detach();
            end_time
        } else {
            if session.read().is_ended() {
                mb_log::warn!("Session {id} already ended");
                return None;
            }

            let end_time = self.ctx.clock.now_ms();
            session
                .write()
                .push_memory_snapshot(self.ctx.probes.snapshot(end_time, SESSION_END_LABEL));
            end_time
        };

        let mut session = session.write();
        session.finish(end_time);
        let metrics = mb_perf_session::compute_metrics(&session, &self.config.analysis());
        session.metrics = Some(metrics);
        session.final_renderer_stats = self.ctx.probes.renderer_stats();

        mb_log::info!(
            "Ended performance session {id} after {:.1} ms",
            session.total_duration.unwrap_or_default()
        );
        Some(session.clone())
    }

    // ------------------------------------------------------------------------
    // Operations

    /// Opens the operation `name`, nested under whatever operation is open right now.
    ///
    /// Operations can be started without a current session. They are then
    /// only tracked on the stack, not recorded.
    pub fn start_operation(&self, name: &str, metadata: Metadata) -> OperationId {
        let now = self.ctx.clock.now_ms();
        let mut state = self.state.lock();
        let EngineState { current, stack, .. } = &mut *state;

        let open = stack.push(name, now);
        let id = open.id;
        if let Some(current) = current {
            current.writer.send(
                SmartMessageSource::Caller,
                SessionWrite::OperationStarted(TimingEvent::open(
                    id,
                    name,
                    now,
                    open.parent.clone(),
                    metadata,
                )),
            );
        }
        id
    }

    /// Closes the most recently started operation called `name`, returning its duration.
    ///
    /// Operations slower than [`MonitorConfig::slow_operation_threshold_ms`]
    /// get a memory snapshot labelled `<name>_end`.
    pub fn end_operation(&self, name: &str) -> Option<f64> {
        let now = self.ctx.clock.now_ms();
        let mut state = self.state.lock();

        let Some(open) = state.stack.remove(name) else {
            mb_log::warn!("end_operation({name:?}) without a matching start_operation");
            return None;
        };
        let duration = now - open.start_time;

        if let Some(current) = &state.current {
            current.writer.send(
                SmartMessageSource::Caller,
                SessionWrite::OperationEnded {
                    id: open.id,
                    end_time: now,
                },
            );

            if duration > self.config.slow_operation_threshold_ms {
                mb_log::debug!("Slow operation {name:?}: {duration:.1} ms");
                current.writer.send(
                    SmartMessageSource::Caller,
                    SessionWrite::MemorySnapshot(
                        self.ctx.probes.snapshot(now, format!("{name}_end")),
                    ),
                );
            }
        }

        Some(duration)
    }

    /// Merges `details` into the metadata of the most recent operation called `name`.
    pub fn record_operation_details(&self, name: &str, details: Metadata) {
        let state = self.state.lock();
        if let Some(current) = &state.current {
            current.writer.send(
                SmartMessageSource::Caller,
                SessionWrite::OperationDetails {
                    name: name.to_owned(),
                    details,
                },
            );
        } else {
            mb_log::warn!("Cannot record details of {name:?}: no session is running");
        }
    }

    /// Number of operations started but not ended yet.
    pub fn open_operations(&self) -> usize {
        self.state.lock().stack.depth()
    }

    // ------------------------------------------------------------------------
    // Domain events

    pub fn record_block_processing(&self, mut event: BlockProcessingEvent) {
        event.recorded_at = self.ctx.clock.now_ms();
        self.send_to_current(SessionWrite::Block(event));
    }

    pub fn record_chunk_processing(&self, mut event: ChunkProcessingEvent) {
        event.recorded_at = self.ctx.clock.now_ms();
        self.send_to_current(SessionWrite::Chunk(event));
    }

    fn send_to_current(&self, write: SessionWrite) {
        let state = self.state.lock();
        if let Some(current) = &state.current {
            current.writer.send(SmartMessageSource::Caller, write);
        } else {
            mb_log::debug_once!("No session is running; processing events are not recorded");
        }
    }

    // ------------------------------------------------------------------------
    // Queries

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|current| current.id.clone())
    }

    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.read_session(id, Session::clone)
    }

    /// Every session, in start order.
    pub fn all_sessions(&self) -> Vec<Session> {
        let sessions: Vec<Arc<RwLock<Session>>> = {
            let state = self.state.lock();
            if let Some(current) = &state.current {
                current.writer.flush();
            }
            state.sessions.values().map(Arc::clone).collect()
        };
        sessions.iter().map(|session| session.read().clone()).collect()
    }

    /// A copy of the session being recorded, up to date with everything sent so far.
    pub fn current_session(&self) -> Option<Session> {
        let session = {
            let state = self.state.lock();
            let current = state.current.as_ref()?;
            current.writer.flush();
            Arc::clone(&current.session)
        };
        let session = session.read();
        Some(session.clone())
    }

    pub fn memory_over_time(&self, id: &SessionId) -> Option<Vec<MemoryPoint>> {
        self.read_session(id, mb_perf_session::memory_over_time)
    }

    pub fn average_operation_times(&self, id: &SessionId) -> Option<Vec<OperationAverage>> {
        self.read_session(id, mb_perf_session::average_operation_times)
    }

    pub fn block_type_averages(&self, id: &SessionId) -> Option<Vec<BlockTypeAverage>> {
        self.read_session(id, mb_perf_session::block_type_averages)
    }

    /// The session as a pretty-printed JSON document.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn export_session_data(&self, id: &SessionId) -> Result<String, PerfError> {
        self.read_session(id, |session| ExportedSession::new(session).to_json())
            .ok_or_else(|| PerfError::UnknownSession(id.clone()))?
            .map_err(PerfError::from)
    }

    /// The most recent FPS sample of the current (or last) session.
    pub fn current_fps(&self) -> f64 {
        self.ctx.fps.lock().current()
    }

    /// Mean of the retained FPS samples of the current (or last) session.
    pub fn average_fps(&self) -> f64 {
        self.ctx.fps.lock().average()
    }

    /// FPS samples of session `id`, or of the current (or last) session if `None`.
    pub fn fps_history(&self, id: Option<&SessionId>) -> Vec<FpsSample> {
        match id {
            Some(id) => self
                .read_session(id, |session| session.fps_history.to_vec())
                .unwrap_or_default(),
            None => self.ctx.fps.lock().history(),
        }
    }

    /// Background samples of the current session dropped because its writer fell behind.
    pub fn dropped_samples(&self) -> u64 {
        self.state
            .lock()
            .current
            .as_ref()
            .map_or(0, |current| current.writer.dropped())
    }

    fn read_session<R>(&self, id: &SessionId, read: impl FnOnce(&Session) -> R) -> Option<R> {
        let session = {
            let state = self.state.lock();
            let session = state.sessions.get(id).map(Arc::clone);
            if let Some(current) = state.current.as_ref().filter(|current| &current.id == id) {
                current.writer.flush();
            }
            session
        };

        let Some(session) = session else {
            mb_log::debug!("No session with id {id}");
            return None;
        };
        let session = session.read();
        Some(read(&session))
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        if let Some(current) = self.state.get_mut().current.take() {
            current.detach();
        }
    }
}

// ----------------------------------------------------------------------------

/// Wires a [`PerformanceMonitor`] to its host.
///
/// Anything not provided falls back to: a [`MonotonicClock`], a
/// [`ThreadTimer`], no probes, and a private [`FrameQueue`] nobody presents,
/// so no frames get recorded.
pub struct PerformanceMonitorBuilder {
    config: MonitorConfig,
    clock: Option<Arc<dyn Clock>>,
    frames: Option<Arc<dyn FrameSource>>,
    timer: Option<Arc<dyn IntervalTimer>>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    renderer_probe: Option<Arc<dyn RendererProbe>>,
}

impl PerformanceMonitorBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_frame_source(mut self, frames: Arc<dyn FrameSource>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn IntervalTimer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    pub fn with_renderer_probe(mut self, probe: Arc<dyn RendererProbe>) -> Self {
        self.renderer_probe = Some(probe);
        self
    }

    pub fn build(self) -> PerformanceMonitor {
        let Self {
            config,
            clock,
            frames,
            timer,
            memory_probe,
            renderer_probe,
        } = self;

        let frames = frames.unwrap_or_else(|| {
            mb_log::debug!("No frame source given; frames will not be recorded");
            Arc::new(FrameQueue::default())
        });

        let ctx = SamplerContext {
            clock: clock.unwrap_or_else(|| Arc::new(MonotonicClock::default())),
            frames,
            timer: timer.unwrap_or_else(|| Arc::new(ThreadTimer::default())),
            probes: Probes {
                memory: memory_probe,
                renderer: renderer_probe,
            },
            fps: Arc::new(Mutex::new(FpsTracker::new(config.max_fps_samples))),
        };

        PerformanceMonitor {
            config,
            ctx,
            state: Mutex::new(EngineState::default()),
        }
    }
}
