//! In-memory performance telemetry of the mesh builder.
//!
//! A [`Session`] is one capture window: a handful of append-only logs
//! (memory snapshots, operations, block and chunk processing, frames, renderer
//! stats, FPS samples) plus the [`SessionMetrics`] computed when it ends.
//!
//! This crate is only the data model and the pure functions over it. Filling
//! sessions in is the job of `mb_perf_monitor`.

mod analytics;
mod events;
mod ring;
mod session;
mod views;

pub use self::{
    analytics::{
        AnalysisConfig, FRAME_BUDGET_MS, FrameTimeSummary, LeakSeverity, MIB, OperationTiming,
        SessionMetrics, average, compute_metrics, estimate_leak, memory_hotspots,
        operation_breakdown, slowest_operations,
    },
    events::{
        BYTES_PER_INDEX, BYTES_PER_VERTEX, BlockProcessingEvent, ChunkProcessingEvent, FpsSample,
        FrameRecord, MemoryBreakdown, MemoryReading, MemorySnapshot, Metadata, MetadataValue,
        OperationId, RendererStatSample, RendererStats, TimingEvent, estimate_buffer_bytes,
    },
    ring::BoundedRing,
    session::{RenderMode, Session, SessionId, SessionLimits},
    views::{
        BlockTypeAverage, ExportedSession, MemoryPoint, OperationAverage, average_operation_times,
        block_type_averages, memory_over_time,
    },
};
