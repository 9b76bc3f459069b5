//! End-to-end behavior of sessions and operations, on a manual clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mb_perf_monitor::session::{
    BlockProcessingEvent, ChunkProcessingEvent, LeakSeverity, MIB, MemoryReading, Metadata,
    MetadataValue, RenderMode, RendererStats,
};
use mb_perf_monitor::{
    FrameQueue, ManualClock, ManualTimer, MemoryProbe, MonitorConfig, PerformanceMonitor,
    RendererProbe, SESSION_END_LABEL, SESSION_START_LABEL,
};

/// Reports whatever heap size the test sets.
#[derive(Default)]
struct Heap(AtomicU64);

impl Heap {
    fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for Heap {
    fn sample(&self) -> MemoryReading {
        MemoryReading {
            used_heap: self.0.load(Ordering::SeqCst),
            total_heap: 512 * MIB,
            heap_limit: 2048 * MIB,
            ..Default::default()
        }
    }
}

struct Renderer;

impl RendererProbe for Renderer {
    fn sample(&self) -> RendererStats {
        RendererStats {
            draw_calls: 7,
            triangles: 1000,
            ..Default::default()
        }
    }
}

struct Host {
    clock: Arc<ManualClock>,
    frames: Arc<FrameQueue>,
    timer: Arc<ManualTimer>,
    heap: Arc<Heap>,
    monitor: PerformanceMonitor,
}

impl Host {
    fn bare() -> Self {
        Self::new(false)
    }

    fn with_probes() -> Self {
        Self::new(true)
    }

    fn new(probes: bool) -> Self {
        let clock = Arc::new(ManualClock::default());
        let frames = Arc::new(FrameQueue::default());
        let timer = Arc::new(ManualTimer::default());
        let heap = Arc::new(Heap::default());

        let mut builder = PerformanceMonitor::builder(MonitorConfig::default())
            .with_clock(clock.clone())
            .with_frame_source(frames.clone())
            .with_timer(timer.clone());
        if probes {
            builder = builder
                .with_memory_probe(heap.clone())
                .with_renderer_probe(Arc::new(Renderer));
        }

        Self {
            clock,
            frames,
            timer,
            heap,
            monitor: builder.build(),
        }
    }

    /// Lets time pass one millisecond at a time, so timers see the right clock.
    fn elapse_ms(&self, ms: u64) {
        for _ in 0..ms {
            self.clock.advance(std::time::Duration::from_millis(1));
            self.timer.advance(std::time::Duration::from_millis(1));
        }
    }
}

#[test]
fn total_duration_is_exactly_end_minus_start() {
    let host = Host::bare();
    host.clock.advance_ms(3.25);
    let id = host.monitor.start_session("castle", RenderMode::Incremental);
    host.clock.advance_ms(1234.5);

    let session = host.monitor.end_session(Some(&id)).unwrap();
    assert_eq!(session.start_time, 3.25);
    assert_eq!(
        session.end_time.unwrap() - session.start_time,
        session.total_duration.unwrap()
    );
    assert_eq!(session.total_duration, Some(1234.5));
}

#[test]
fn slow_operation_gets_a_snapshot() {
    let host = Host::with_probes();
    let id = host.monitor.start_session("castle", RenderMode::Batch);

    host.monitor.start_operation("build", Metadata::new());
    host.clock.advance_ms(120.0);
    assert_eq!(host.monitor.end_operation("build"), Some(120.0));

    // Fast operations don't.
    host.monitor.start_operation("tiny", Metadata::new());
    host.clock.advance_ms(1.0);
    host.monitor.end_operation("tiny");

    let session = host.monitor.end_session(Some(&id)).unwrap();
    let labels: Vec<&str> = session
        .memory_snapshots
        .iter()
        .map(|s| s.label.as_str())
        .collect();
    assert_eq!(labels, vec![SESSION_START_LABEL, "build_end", SESSION_END_LABEL]);

    let build = &session.timing_events[0];
    assert_eq!(build.name, "build");
    assert_eq!(build.duration, Some(120.0));
    assert_eq!(build.end_time.unwrap() - build.start_time, 120.0);
}

#[test]
fn without_probes_everything_is_zero() {
    let host = Host::bare();
    host.monitor.start_session("castle", RenderMode::Incremental);

    host.monitor.start_operation("build", Metadata::new());
    host.monitor.record_block_processing(BlockProcessingEvent {
        block_type: "stone".to_owned(),
        processing_time: 0.5,
        ..Default::default()
    });
    host.clock.advance_ms(80.0);
    host.monitor.end_operation("build");
    for _ in 0..20 {
        host.clock.advance_ms(16.0);
        host.frames.present();
    }

    let session = host.monitor.end_session(None).unwrap();
    assert!(session.memory_snapshots.len() >= 3);
    for snapshot in &session.memory_snapshots {
        assert_eq!(snapshot.used_heap, 0);
        assert_eq!(snapshot.total_heap, 0);
        assert_eq!(snapshot.heap_limit, 0);
        assert_eq!(snapshot.estimated_buffer_bytes, 0);
    }
    assert!(session.renderer_stats.is_empty());
    assert_eq!(session.final_renderer_stats, None);
    assert_eq!(session.frame_records.len(), 20);

    let metrics = session.metrics.unwrap();
    assert_eq!(metrics.estimated_leak, 0);
    assert_eq!(metrics.average_block_time, 0.5);
}

#[test]
fn ending_twice_returns_none() {
    let host = Host::bare();
    let id = host.monitor.start_session("castle", RenderMode::Incremental);
    host.clock.advance_ms(10.0);

    let first = host.monitor.end_session(Some(&id)).unwrap();
    host.clock.advance_ms(10.0);
    assert!(host.monitor.end_session(Some(&id)).is_none());
    assert!(host.monitor.end_session(None).is_none());

    // The stored session was not touched by the second call.
    let stored = host.monitor.session(&id).unwrap();
    assert_eq!(stored.end_time, first.end_time);
    assert_eq!(stored.memory_snapshots.len(), first.memory_snapshots.len());
}

#[test]
fn dangling_end_operation_changes_nothing() {
    let host = Host::bare();
    let id = host.monitor.start_session("castle", RenderMode::Incremental);
    host.monitor.start_operation("build", Metadata::new());

    let before = host.monitor.current_session().unwrap();
    assert_eq!(host.monitor.end_operation("never_started"), None);
    let after = host.monitor.current_session().unwrap();

    assert_eq!(before.timing_events, after.timing_events);
    assert_eq!(before.memory_snapshots, after.memory_snapshots);
    assert_eq!(host.monitor.open_operations(), 1);

    host.monitor.end_session(Some(&id));
}

#[test]
fn nested_operations_record_their_parent() {
    let host = Host::bare();
    host.monitor.start_session("castle", RenderMode::Incremental);

    host.monitor.start_operation("build", Metadata::new());
    host.monitor.start_operation("chunk", Metadata::new());
    host.clock.advance_ms(4.0);
    host.monitor.start_operation("merge", Metadata::new());
    host.clock.advance_ms(2.0);
    host.monitor.end_operation("merge");
    host.monitor.end_operation("chunk");
    host.monitor.end_operation("build");

    let session = host.monitor.end_session(None).unwrap();
    let parents: Vec<(&str, Option<&str>)> = session
        .timing_events
        .iter()
        .map(|e| (e.name.as_str(), e.parent_operation.as_deref()))
        .collect();
    assert_eq!(
        parents,
        vec![
            ("build", None),
            ("chunk", Some("build")),
            ("merge", Some("chunk")),
        ]
    );
    assert!(
        session
            .timing_events
            .iter()
            .all(|e| e.duration.unwrap() >= 0.0)
    );
    assert_eq!(session.timing_events[1].duration, Some(6.0));
}

#[test]
fn operation_details_are_merged() {
    let host = Host::bare();
    host.monitor.start_session("castle", RenderMode::Instanced);

    let mut metadata = Metadata::new();
    metadata.insert("chunk".to_owned(), "0_0_0".into());
    host.monitor.start_operation("chunk", metadata);

    let mut details = Metadata::new();
    details.insert("faces".to_owned(), MetadataValue::Int(96));
    host.monitor.record_operation_details("chunk", details.clone());
    host.monitor.record_operation_details("unknown", details);
    host.monitor.end_operation("chunk");

    let session = host.monitor.end_session(None).unwrap();
    let metadata = &session.timing_events[0].metadata;
    assert_eq!(metadata["chunk"], MetadataValue::Text("0_0_0".to_owned()));
    assert_eq!(metadata["faces"], MetadataValue::Int(96));
}

#[test]
fn processing_events_are_stamped() {
    let host = Host::bare();
    let id = host.monitor.start_session("castle", RenderMode::Incremental);

    host.clock.advance_ms(7.0);
    host.monitor.record_chunk_processing(ChunkProcessingEvent {
        chunk_id: "0_0_0".to_owned(),
        processing_time: 3.0,
        recorded_at: -1.0,
        ..Default::default()
    });
    host.clock.advance_ms(1.0);
    for (block_type, time) in [("stone", 1.0), ("dirt", 2.0), ("stone", 3.0)] {
        host.monitor.record_block_processing(BlockProcessingEvent {
            block_type: block_type.to_owned(),
            processing_time: time,
            ..Default::default()
        });
    }

    let averages = host.monitor.block_type_averages(&id).unwrap();
    assert_eq!(averages.len(), 2);
    assert_eq!(averages[1].block_type, "stone");
    assert_eq!(averages[1].average_ms, 2.0);

    let session = host.monitor.end_session(None).unwrap();
    assert_eq!(session.chunk_events[0].recorded_at, 7.0);
    assert!(session.block_events.iter().all(|e| e.recorded_at == 8.0));

    let metrics = session.metrics.unwrap();
    assert_eq!(metrics.average_chunk_time, 3.0);
    assert_eq!(metrics.average_block_time, 2.0);
}

#[test]
fn a_single_memory_jump_is_one_hotspot() {
    let host = Host::with_probes();
    host.heap.set(100 * MIB);
    let id = host.monitor.start_session("castle", RenderMode::Batch);

    host.elapse_ms(300);
    host.monitor.start_operation("merge", Metadata::new());
    host.clock.advance_ms(60.0);
    host.heap.set(110 * MIB);
    host.monitor.end_operation("merge");
    host.elapse_ms(300);

    let session = host.monitor.end_session(Some(&id)).unwrap();
    let metrics = session.metrics.as_ref().unwrap();
    assert_eq!(metrics.memory_hotspots, vec!["merge_end"]);
    assert_eq!(metrics.estimated_leak, (10 * MIB) as i64);
    assert_eq!(metrics.leak_severity, LeakSeverity::Warning);

    assert_eq!(
        session.final_renderer_stats,
        Some(RendererStats {
            draw_calls: 7,
            triangles: 1000,
            ..Default::default()
        })
    );
}

#[test]
fn shrinking_memory_is_a_negative_leak() {
    let host = Host::with_probes();
    host.heap.set(100 * MIB);
    let id = host.monitor.start_session("castle", RenderMode::Batch);
    host.heap.set(40 * MIB);
    host.elapse_ms(100);

    let metrics = host.monitor.end_session(Some(&id)).unwrap().metrics.unwrap();
    assert_eq!(metrics.estimated_leak, -((60 * MIB) as i64));
    assert_eq!(metrics.leak_severity, LeakSeverity::None);
    assert!(metrics.memory_hotspots.is_empty());
}

#[test]
fn memory_over_time_is_relative_to_start() {
    let host = Host::with_probes();
    host.clock.advance_ms(500.0);
    let id = host.monitor.start_session("castle", RenderMode::Incremental);
    host.elapse_ms(250);

    let points = host.monitor.memory_over_time(&id).unwrap();
    let offsets: Vec<f64> = points.iter().map(|p| p.offset_ms).collect();
    assert_eq!(offsets, vec![0.0, 100.0, 200.0]);
    host.monitor.end_session(Some(&id));
}

#[test]
fn operation_averages_by_name() {
    let host = Host::bare();
    let id = host.monitor.start_session("castle", RenderMode::Incremental);
    for ms in [10.0, 30.0] {
        host.monitor.start_operation("chunk", Metadata::new());
        host.clock.advance_ms(ms);
        host.monitor.end_operation("chunk");
    }
    host.monitor.end_session(Some(&id));

    let averages = host.monitor.average_operation_times(&id).unwrap();
    assert_eq!(averages.len(), 1);
    assert_eq!(averages[0].count, 2);
    assert_eq!(averages[0].average_ms, 20.0);
}

#[test]
fn export_is_a_stable_json_document() {
    let host = Host::with_probes();
    let id = host.monitor.start_session("castle", RenderMode::Instanced);
    host.monitor.start_operation("build", Metadata::new());
    host.clock.advance_ms(16.0);
    host.frames.present();
    host.monitor.end_operation("build");
    host.monitor.end_session(Some(&id));

    let json = host.monitor.export_session_data(&id).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["version"], 1);
    let session = &value["session"];
    assert_eq!(session["id"], id.as_str());
    assert_eq!(session["subjectId"], "castle");
    assert_eq!(session["renderMode"], "instanced");
    assert_eq!(session["timingEvents"][0]["name"], "build");
    assert_eq!(session["frameRecords"][0]["duration"], 16.0);
    assert_eq!(session["metrics"]["leakSeverity"], "none");
    assert!(session["memorySnapshots"][0]["estimatedBufferBytes"].is_u64());
    assert_eq!(value["frameTimes"]["count"], 1);

    // Same session, same document.
    assert_eq!(host.monitor.export_session_data(&id).unwrap(), json);
}

#[test]
fn sessions_are_listed_in_start_order() {
    let host = Host::bare();
    let a = host.monitor.start_session("a", RenderMode::Incremental);
    host.monitor.end_session(None);
    let b = host.monitor.start_session("b", RenderMode::Incremental);
    host.monitor.end_session(None);
    let c = host.monitor.start_session("c", RenderMode::Incremental);

    let ids: Vec<_> = host
        .monitor
        .all_sessions()
        .into_iter()
        .map(|s| s.id)
        .collect();
    similar_asserts::assert_eq!(ids, vec![a, b, c.clone()]);
    assert_eq!(host.monitor.current_session().unwrap().id, c);
}
