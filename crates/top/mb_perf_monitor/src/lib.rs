//! The performance telemetry engine of the mesh builder.
//!
//! A [`PerformanceMonitor`] records build sessions: the caller marks
//! operation boundaries and reports per-block and per-chunk processing, while
//! three background samplers record frames, memory and FPS. When a session
//! ends its metrics are computed and it becomes read-only.
//!
//! ```
//! use std::sync::Arc;
//!
//! use mb_perf_monitor::{FrameQueue, ManualClock, ManualTimer, MonitorConfig, PerformanceMonitor};
//! use mb_perf_monitor::session::{Metadata, RenderMode};
//!
//! let clock = Arc::new(ManualClock::default());
//! let frames = Arc::new(FrameQueue::default());
//! let monitor = PerformanceMonitor::builder(MonitorConfig::default())
//!     .with_clock(clock.clone())
//!     .with_frame_source(frames.clone())
//!     .with_timer(Arc::new(ManualTimer::default()))
//!     .build();
//!
//! let id = monitor.start_session("castle", RenderMode::Incremental);
//! monitor.start_operation("build", Metadata::new());
//! clock.advance_ms(16.0);
//! frames.present();
//! monitor.end_operation("build");
//!
//! let session = monitor.end_session(Some(&id)).unwrap();
//! assert_eq!(session.total_duration, Some(16.0));
//! assert_eq!(session.frame_records.len(), 1);
//! ```

mod config;
mod error;
mod host;
mod monitor;
mod probe;
mod schedulers;
mod timing_stack;
mod writer;

pub use self::{
    config::MonitorConfig,
    error::{PerfError, Result},
    host::{
        Clock, FrameCallback, FrameQueue, FrameRequestId, FrameSource, IntervalTimer, ManualClock,
        ManualTimer, MonotonicClock, ThreadTimer, TimerCallback, TimerHandle,
    },
    monitor::{
        PerformanceMonitor, PerformanceMonitorBuilder, SESSION_END_LABEL, SESSION_START_LABEL,
    },
    probe::{MemoryProbe, ProcessMemoryProbe, RendererProbe},
    schedulers::{CONTINUOUS_MONITORING_LABEL, FpsTracker},
    timing_stack::{OpenOperation, TimingStack},
};

pub use mb_perf_session as session;
