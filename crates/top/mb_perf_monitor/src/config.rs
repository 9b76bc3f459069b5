use std::time::Duration;

use mb_perf_session::{AnalysisConfig, MIB, SessionLimits};

/// Tunables of a [`crate::PerformanceMonitor`].
///
/// Every field can be set from the command line or through the matching
/// `MB_PERF_*` environment variable.
#[derive(Clone, Debug, PartialEq, clap::Args)]
pub struct MonitorConfig {
    /// How often the memory sampler takes a snapshot, in milliseconds.
    #[clap(
        long = "memory-sample-interval-ms",
        env = "MB_PERF_MEMORY_SAMPLE_INTERVAL_MS",
        default_value_t = 100
    )]
    pub memory_sample_interval_ms: u64,

    /// How often the FPS aggregator turns frame counts into an FPS sample, in milliseconds.
    #[clap(
        long = "fps-sample-interval-ms",
        env = "MB_PERF_FPS_SAMPLE_INTERVAL_MS",
        default_value_t = 1000
    )]
    pub fps_sample_interval_ms: u64,

    /// Frame records kept per session. Older ones are evicted.
    #[clap(
        long = "max-frame-records",
        env = "MB_PERF_MAX_FRAME_RECORDS",
        default_value_t = 1000
    )]
    pub max_frame_records: usize,

    /// FPS samples kept per session. Older ones are evicted.
    #[clap(
        long = "max-fps-samples",
        env = "MB_PERF_MAX_FPS_SAMPLES",
        default_value_t = 60
    )]
    pub max_fps_samples: usize,

    /// Sample the renderer every this many frames.
    #[clap(
        long = "renderer-stats-every-n-frames",
        env = "MB_PERF_RENDERER_STATS_EVERY_N_FRAMES",
        default_value_t = 10
    )]
    pub renderer_stats_every_n_frames: u64,

    /// Operations slower than this get a memory snapshot when they end, in milliseconds.
    #[clap(
        long = "slow-operation-threshold-ms",
        env = "MB_PERF_SLOW_OPERATION_THRESHOLD_MS",
        default_value_t = 50.0
    )]
    pub slow_operation_threshold_ms: f64,

    /// A heap increase between two snapshots above this many bytes is reported as a hotspot.
    #[clap(
        long = "hotspot-threshold-bytes",
        env = "MB_PERF_HOTSPOT_THRESHOLD_BYTES",
        default_value_t = 5 * MIB
    )]
    pub hotspot_threshold_bytes: u64,

    /// How many of the slowest operations end up in the session metrics.
    #[clap(
        long = "slowest-operations",
        env = "MB_PERF_SLOWEST_OPERATIONS",
        default_value_t = 10
    )]
    pub slowest_operations: usize,

    /// How long to wait for the session writer to catch up before giving up, in milliseconds.
    #[clap(
        long = "flush-timeout-ms",
        env = "MB_PERF_FLUSH_TIMEOUT_MS",
        default_value_t = 1000
    )]
    pub flush_timeout_ms: u64,

    /// Pending writes per session before background samples get dropped.
    #[clap(
        long = "write-queue-capacity",
        env = "MB_PERF_WRITE_QUEUE_CAPACITY",
        default_value_t = 1024
    )]
    pub write_queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            memory_sample_interval_ms: 100,
            fps_sample_interval_ms: 1000,
            max_frame_records: 1000,
            max_fps_samples: 60,
            renderer_stats_every_n_frames: 10,
            slow_operation_threshold_ms: 50.0,
            hotspot_threshold_bytes: 5 * MIB,
            slowest_operations: 10,
            flush_timeout_ms: 1000,
            write_queue_capacity: 1024,
        }
    }
}

impl MonitorConfig {
    #[inline]
    pub fn memory_sample_interval(&self) -> Duration {
        Duration::from_millis(self.memory_sample_interval_ms)
    }

    #[inline]
    pub fn fps_sample_interval(&self) -> Duration {
        Duration::from_millis(self.fps_sample_interval_ms)
    }

    #[inline]
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_frame_records: self.max_frame_records,
            max_fps_samples: self.max_fps_samples,
        }
    }

    pub fn analysis(&self) -> AnalysisConfig {
        AnalysisConfig {
            slowest_operations: self.slowest_operations,
            hotspot_threshold_bytes: self.hotspot_threshold_bytes,
        }
    }
}
