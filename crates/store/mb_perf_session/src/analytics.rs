//! Derived statistics over a finished [`Session`].
//!
//! Everything in here is a pure function of the session logs: nothing is
//! cached and nothing is written back, so a finished session can be handed to
//! any number of readers.

use crate::{FrameRecord, MemorySnapshot, Session, TimingEvent};

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Frame budget at 60 FPS, in milliseconds.
pub const FRAME_BUDGET_MS: f64 = 1000.0 / 60.0;

/// Knobs for [`compute_metrics`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// How many entries [`SessionMetrics::slowest_operations`] keeps.
    pub slowest_operations: usize,

    /// A heap increase between two adjacent snapshots larger than this is a hotspot.
    pub hotspot_threshold_bytes: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            slowest_operations: 10,
            hotspot_threshold_bytes: 5 * MIB,
        }
    }
}

// ----------------------------------------------------------------------------

/// Summary computed once when a session ends.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub average_block_time: f64,
    pub average_chunk_time: f64,
    pub slowest_operations: Vec<TimingEvent>,
    pub memory_hotspots: Vec<String>,

    /// `usedHeap` of the last snapshot minus that of the first. May be negative.
    pub estimated_leak: i64,
    pub leak_severity: LeakSeverity,

    /// Every completed operation, slowest first.
    pub breakdown: Vec<OperationTiming>,

    pub frame_times: Option<FrameTimeSummary>,
}

/// One row of [`SessionMetrics::breakdown`].
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationTiming {
    pub name: String,
    pub duration: f64,

    /// Always zero: attributing memory to a single operation needs a snapshot
    /// at both of its ends, which is not guaranteed.
    pub memory_delta: i64,
}

/// How worrying an [`SessionMetrics::estimated_leak`] is.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeakSeverity {
    #[default]
    None,
    Warning,
    Critical,
    Severe,
}

impl LeakSeverity {
    pub const WARNING_BYTES: i64 = 5 * MIB as i64;
    pub const CRITICAL_BYTES: i64 = 20 * MIB as i64;
    pub const SEVERE_BYTES: i64 = 50 * MIB as i64;

    /// Classifies a leak estimate. Shrinking memory is never a leak.
    pub fn classify(estimated_leak: i64) -> Self {
        if estimated_leak >= Self::SEVERE_BYTES {
            Self::Severe
        } else if estimated_leak >= Self::CRITICAL_BYTES {
            Self::Critical
        } else if estimated_leak >= Self::WARNING_BYTES {
            Self::Warning
        } else {
            Self::None
        }
    }
}

/// Distribution of frame durations, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTimeSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,

    /// Share of frames slower than [`FRAME_BUDGET_MS`], `0..=1`.
    pub over_budget: f64,
}

impl FrameTimeSummary {
    /// `None` if there are no frames.
    pub fn from_frames<'a>(frames: impl IntoIterator<Item = &'a FrameRecord>) -> Option<Self> {
        let mut sorted: Vec<f64> = frames.into_iter().map(|frame| frame.duration).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let variance = sorted
            .iter()
            .map(|duration| (duration - mean).powi(2))
            .sum::<f64>()
            / count as f64;
        let over_budget =
            sorted.iter().filter(|&&d| d > FRAME_BUDGET_MS).count() as f64 / count as f64;

        Some(Self {
            count,
            mean,
            min: sorted[0],
            max: sorted[count - 1],
            std_dev: variance.sqrt(),
            p50: percentile(&sorted, 0.5),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            over_budget,
        })
    }

    /// FPS implied by the median frame.
    pub fn median_fps(&self) -> f64 {
        if self.p50 > 0.0 { 1000.0 / self.p50 } else { 0.0 }
    }
}

/// Percentile of an ascending, non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let index = ((sorted.len() as f64) * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

// ----------------------------------------------------------------------------

/// Computes everything that goes into [`Session::metrics`].
#[tracing::instrument(level = "debug", skip_all)]
pub fn compute_metrics(session: &Session, config: &AnalysisConfig) -> SessionMetrics {
    let estimated_leak = estimate_leak(&session.memory_snapshots);

    SessionMetrics {
        average_block_time: average(session.block_events.iter().map(|e| e.processing_time)),
        average_chunk_time: average(session.chunk_events.iter().map(|e| e.processing_time)),
        slowest_operations: slowest_operations(&session.timing_events, config.slowest_operations),
        memory_hotspots: memory_hotspots(
            &session.memory_snapshots,
            config.hotspot_threshold_bytes,
        ),
        estimated_leak,
        leak_severity: LeakSeverity::classify(estimated_leak),
        breakdown: operation_breakdown(&session.timing_events),
        frame_times: FrameTimeSummary::from_frames(&session.frame_records),
    }
}

/// Arithmetic mean, zero for no values.
pub fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// The `n` longest completed operations, longest first.
///
/// Operations with equal durations keep their log order.
pub fn slowest_operations(events: &[TimingEvent], n: usize) -> Vec<TimingEvent> {
    let mut completed: Vec<&TimingEvent> = events.iter().filter(|e| e.duration.is_some()).collect();
    completed.sort_by(|a, b| duration_of(b).total_cmp(&duration_of(a)));
    completed.into_iter().take(n).cloned().collect()
}

/// Labels of snapshots whose heap grew by more than `threshold_bytes` since the previous one.
pub fn memory_hotspots(snapshots: &[MemorySnapshot], threshold_bytes: u64) -> Vec<String> {
    snapshots
        .windows(2)
        .filter(|pair| pair[1].used_heap.saturating_sub(pair[0].used_heap) > threshold_bytes)
        .map(|pair| pair[1].label.clone())
        .collect()
}

/// `usedHeap` of the last snapshot minus that of the first.
pub fn estimate_leak(snapshots: &[MemorySnapshot]) -> i64 {
    match (snapshots.first(), snapshots.last()) {
        (Some(first), Some(last)) => signed(last.used_heap) - signed(first.used_heap),
        _ => 0,
    }
}

/// Every completed operation, longest first.
pub fn operation_breakdown(events: &[TimingEvent]) -> Vec<OperationTiming> {
    let mut breakdown: Vec<OperationTiming> = events
        .iter()
        .filter_map(|event| {
            Some(OperationTiming {
                name: event.name.clone(),
                duration: event.duration?,
                memory_delta: 0,
            })
        })
        .collect();
    breakdown.sort_by(|a, b| b.duration.total_cmp(&a.duration));
    breakdown
}

#[inline]
fn duration_of(event: &TimingEvent) -> f64 {
    event.duration.unwrap_or(0.0)
}

#[inline]
fn signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
