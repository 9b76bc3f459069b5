use rand::Rng as _;

use crate::{
    BlockProcessingEvent, BoundedRing, ChunkProcessingEvent, FpsSample, FrameRecord, MemorySnapshot,
    Metadata, OperationId, RendererStatSample, RendererStats, SessionMetrics, TimingEvent,
};

// ----------------------------------------------------------------------------

/// Identifies a [`Session`]: `<subject>_<unix start ms>_<random suffix>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    const SUFFIX_LEN: usize = 9;

    /// A fresh id for a session of `subject_id` started at `started_at_unix_ms`.
    pub fn generate(subject_id: &str, started_at_unix_ms: u64) -> Self {
        let suffix: String = rand::rng()
            .sample_iter(rand::distr::Alphanumeric)
            .take(Self::SUFFIX_LEN)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect();
        Self(format!("{subject_id}_{started_at_unix_ms}_{suffix}"))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    #[inline]
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for SessionId {
    #[inline]
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ----------------------------------------------------------------------------

/// How the mesh builder turns chunks into scene geometry during a session.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RenderMode {
    /// Each chunk is added to the scene as soon as it is built.
    #[default]
    Incremental,

    /// All chunks are merged per material and added at the end.
    Batch,

    /// Identical blocks are drawn through instancing instead of merged meshes.
    Instanced,
}

// ----------------------------------------------------------------------------

/// Caps on the bounded per-session logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_frame_records: usize,
    pub max_fps_samples: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_frame_records: 1000,
            max_fps_samples: 60,
        }
    }
}

/// One capture window of telemetry.
///
/// While a session is current its logs only grow. Once [`Self::finish`] has
/// been called nothing touches it again.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub subject_id: String,
    pub render_mode: RenderMode,
    pub started_at_unix_ms: u64,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub total_duration: Option<f64>,

    pub memory_snapshots: Vec<MemorySnapshot>,
    pub timing_events: Vec<TimingEvent>,
    pub block_events: Vec<BlockProcessingEvent>,
    pub chunk_events: Vec<ChunkProcessingEvent>,
    pub frame_records: BoundedRing<FrameRecord>,
    pub renderer_stats: Vec<RendererStatSample>,
    pub fps_history: BoundedRing<FpsSample>,

    /// Mean of [`Self::fps_history`], updated on every sample.
    pub average_fps: f64,

    /// Renderer counters at the moment the session ended.
    pub final_renderer_stats: Option<RendererStats>,

    /// Filled in when the session ends.
    pub metrics: Option<SessionMetrics>,
}

impl Session {
    pub fn new(
        id: SessionId,
        subject_id: impl Into<String>,
        render_mode: RenderMode,
        started_at_unix_ms: u64,
        start_time: f64,
        limits: SessionLimits,
    ) -> Self {
        Self {
            id,
            subject_id: subject_id.into(),
            render_mode,
            started_at_unix_ms,
            start_time,
            end_time: None,
            total_duration: None,
            memory_snapshots: Vec::new(),
            timing_events: Vec::new(),
            block_events: Vec::new(),
            chunk_events: Vec::new(),
            frame_records: BoundedRing::new(limits.max_frame_records),
            renderer_stats: Vec::new(),
            fps_history: BoundedRing::new(limits.max_fps_samples),
            average_fps: 0.0,
            final_renderer_stats: None,
            metrics: None,
        }
    }

    #[inline]
    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }

    /// Snapshots come from several producers, so one may arrive slightly
    /// after a later one. The log stays ordered by timestamp regardless.
    pub fn push_memory_snapshot(&mut self, snapshot: MemorySnapshot) {
        let index = self
            .memory_snapshots
            .iter()
            .rposition(|existing| existing.timestamp <= snapshot.timestamp)
            .map_or(0, |index| index + 1);
        self.memory_snapshots.insert(index, snapshot);
    }

    /// Appends a still open operation.
    pub fn begin_operation(&mut self, event: TimingEvent) {
        self.timing_events.push(event);
    }

    /// Closes the open operation `id`, returning its duration.
    ///
    /// Returns `None` if there is no such operation or it was already closed.
    pub fn complete_operation(&mut self, id: OperationId, end_time: f64) -> Option<f64> {
        let event = self
            .timing_events
            .iter_mut()
            .rev()
            .find(|event| event.id == id)?;

        if !event.is_open() {
            return None;
        }

        let duration = end_time - event.start_time;
        event.end_time = Some(end_time);
        event.duration = Some(duration);
        Some(duration)
    }

    /// Merges `details` into the most recent operation called `name`.
    ///
    /// Returns `false` if there is no such operation.
    pub fn annotate_operation(&mut self, name: &str, details: Metadata) -> bool {
        let Some(event) = self
            .timing_events
            .iter_mut()
            .rev()
            .find(|event| event.name == name)
        else {
            return false;
        };

        event.metadata.extend(details);
        true
    }

    pub fn push_block_event(&mut self, event: BlockProcessingEvent) {
        self.block_events.push(event);
    }

    pub fn push_chunk_event(&mut self, event: ChunkProcessingEvent) {
        self.chunk_events.push(event);
    }

    pub fn push_frame(&mut self, frame: FrameRecord) {
        self.frame_records.push(frame);
    }

    pub fn push_renderer_stats(&mut self, sample: RendererStatSample) {
        self.renderer_stats.push(sample);
    }

    pub fn push_fps_sample(&mut self, sample: FpsSample) {
        self.fps_history.push(sample);
        self.average_fps = self.mean_fps();
    }

    /// Arithmetic mean of the FPS history, zero when empty.
    pub fn mean_fps(&self) -> f64 {
        if self.fps_history.is_empty() {
            0.0
        } else {
            self.fps_history.iter().map(|sample| sample.fps).sum::<f64>()
                / self.fps_history.len() as f64
        }
    }

    /// Stamps the end of the session. Does nothing if it already ended.
    pub fn finish(&mut self, end_time: f64) {
        if self.is_ended() {
            return;
        }
        self.end_time = Some(end_time);
        self.total_duration = Some(end_time - self.start_time);
    }

    /// Milliseconds since the session started.
    #[inline]
    pub fn offset(&self, timestamp: f64) -> f64 {
        timestamp - self.start_time
    }
}
