//! Optional collaborators that report memory use and renderer load.
//!
//! A monitor without probes still works: every field they would fill in is zero.

use std::sync::Arc;

use mb_perf_session::{MemoryReading, MemorySnapshot, RendererStats};

pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemoryReading;
}

pub trait RendererProbe: Send + Sync {
    fn sample(&self) -> RendererStats;
}

/// Resident and virtual memory of the current process.
///
/// Reported as `usedHeap` and `totalHeap` respectively. There is no notion of
/// a heap limit or of GPU resources here, so those stay zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> MemoryReading {
        if let Some(stats) = memory_stats::memory_stats() {
            MemoryReading {
                used_heap: stats.physical_mem as u64,
                total_heap: stats.virtual_mem as u64,
                ..Default::default()
            }
        } else {
            mb_log::warn_once!("Process memory statistics are unavailable on this platform");
            MemoryReading::default()
        }
    }
}

/// The probes attached to a monitor.
#[derive(Clone, Default)]
pub(crate) struct Probes {
    pub memory: Option<Arc<dyn MemoryProbe>>,
    pub renderer: Option<Arc<dyn RendererProbe>>,
}

impl Probes {
    /// All zeros without a memory probe.
    pub fn memory_reading(&self) -> MemoryReading {
        self.memory
            .as_ref()
            .map(|probe| probe.sample())
            .unwrap_or_default()
    }

    pub fn renderer_stats(&self) -> Option<RendererStats> {
        self.renderer.as_ref().map(|probe| probe.sample())
    }

    pub fn snapshot(&self, timestamp: f64, label: impl Into<String>) -> MemorySnapshot {
        let triangles = self
            .renderer_stats()
            .map_or(0, |stats| stats.triangles);
        MemorySnapshot::new(timestamp, self.memory_reading(), triangles, label)
    }
}

#[cfg(test)]
mod tests {
    use mb_perf_session::estimate_buffer_bytes;

    use super::*;

    struct FixedRenderer(RendererStats);

    impl RendererProbe for FixedRenderer {
        fn sample(&self) -> RendererStats {
            self.0
        }
    }

    struct FixedMemory(MemoryReading);

    impl MemoryProbe for FixedMemory {
        fn sample(&self) -> MemoryReading {
            self.0
        }
    }

    #[test]
    fn test_no_probes_means_zeros() {
        let snapshot = Probes::default().snapshot(12.0, "session_start");
        assert_eq!(snapshot.timestamp, 12.0);
        assert_eq!(snapshot.used_heap, 0);
        assert_eq!(snapshot.total_heap, 0);
        assert_eq!(snapshot.heap_limit, 0);
        assert_eq!(snapshot.geometry_count, 0);
        assert_eq!(snapshot.estimated_buffer_bytes, 0);
        assert_eq!(snapshot.label, "session_start");
    }

    #[test]
    fn test_snapshot_combines_probes() {
        let probes = Probes {
            memory: Some(Arc::new(FixedMemory(MemoryReading {
                used_heap: 64,
                total_heap: 128,
                heap_limit: 256,
                geometry_count: 3,
                texture_count: 1,
            }))),
            renderer: Some(Arc::new(FixedRenderer(RendererStats {
                triangles: 10,
                ..Default::default()
            }))),
        };

        let snapshot = probes.snapshot(0.0, "build_end");
        assert_eq!(snapshot.used_heap, 64);
        assert_eq!(snapshot.geometry_count, 3);
        assert_eq!(snapshot.estimated_buffer_bytes, estimate_buffer_bytes(10));
    }

    #[test]
    fn test_process_probe_reports_something() {
        let reading = ProcessMemoryProbe.sample();
        if memory_stats::memory_stats().is_some() {
            assert!(reading.used_heap > 0);
        }
    }
}
