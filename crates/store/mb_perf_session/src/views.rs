//! Derived, plot-ready views of a [`Session`].
//!
//! Computed on demand from the session logs. Nothing here is cached.

use std::collections::BTreeMap;

use crate::{FrameTimeSummary, LeakSeverity, Session};

/// One point of the memory-over-time series.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPoint {
    /// Milliseconds since the session started.
    pub offset_ms: f64,
    pub used_heap: u64,
}

/// Mean duration of all completed operations sharing a name.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAverage {
    pub name: String,
    pub count: usize,
    pub average_ms: f64,
    pub total_ms: f64,
}

/// Mean processing time of all blocks of one type.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTypeAverage {
    pub block_type: String,
    pub count: usize,
    pub average_ms: f64,
}

pub fn memory_over_time(session: &Session) -> Vec<MemoryPoint> {
    session
        .memory_snapshots
        .iter()
        .map(|snapshot| MemoryPoint {
            offset_ms: session.offset(snapshot.timestamp),
            used_heap: snapshot.used_heap,
        })
        .collect()
}

/// Sorted by name. Open operations are ignored.
pub fn average_operation_times(session: &Session) -> Vec<OperationAverage> {
    let mut totals: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for event in &session.timing_events {
        if let Some(duration) = event.duration {
            let (count, total) = totals.entry(event.name.as_str()).or_default();
            *count += 1;
            *total += duration;
        }
    }

    totals
        .into_iter()
        .map(|(name, (count, total_ms))| OperationAverage {
            name: name.to_owned(),
            count,
            average_ms: total_ms / count as f64,
            total_ms,
        })
        .collect()
}

/// Sorted by block type.
pub fn block_type_averages(session: &Session) -> Vec<BlockTypeAverage> {
    let mut totals: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for event in &session.block_events {
        let (count, total) = totals.entry(event.block_type.as_str()).or_default();
        *count += 1;
        *total += event.processing_time;
    }

    totals
        .into_iter()
        .map(|(block_type, (count, total))| BlockTypeAverage {
            block_type: block_type.to_owned(),
            count,
            average_ms: total / count as f64,
        })
        .collect()
}

// ----------------------------------------------------------------------------

/// The JSON document a session is exported as.
///
/// Keys are camelCase and appear in declaration order. Bump
/// [`Self::FORMAT_VERSION`] on any breaking change.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedSession<'a> {
    pub version: u32,
    pub session: &'a Session,
    pub frame_times: Option<FrameTimeSummary>,
    pub leak_severity: LeakSeverity,
    pub operation_averages: Vec<OperationAverage>,
    pub block_type_averages: Vec<BlockTypeAverage>,
    pub memory_over_time: Vec<MemoryPoint>,
}

impl<'a> ExportedSession<'a> {
    pub const FORMAT_VERSION: u32 = 1;

    pub fn new(session: &'a Session) -> Self {
        let (frame_times, leak_severity) = match &session.metrics {
            Some(metrics) => (metrics.frame_times, metrics.leak_severity),
            None => (
                FrameTimeSummary::from_frames(&session.frame_records),
                LeakSeverity::classify(crate::analytics::estimate_leak(&session.memory_snapshots)),
            ),
        };

        Self {
            version: Self::FORMAT_VERSION,
            session,
            frame_times,
            leak_severity,
            operation_averages: average_operation_times(session),
            block_type_averages: block_type_averages(session),
            memory_over_time: memory_over_time(session),
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BlockProcessingEvent, MemoryReading, MemorySnapshot, Metadata, OperationId, RenderMode,
        SessionId, SessionLimits, TimingEvent,
    };

    fn session() -> Session {
        Session::new(
            SessionId::from("views_1_abc"),
            "views",
            RenderMode::Batch,
            1,
            1000.0,
            SessionLimits::default(),
        )
    }

    fn operation(session: &mut Session, id: u64, name: &str, start: f64, end: Option<f64>) {
        session.begin_operation(TimingEvent::open(
            OperationId(id),
            name,
            start,
            None,
            Metadata::new(),
        ));
        if let Some(end) = end {
            session.complete_operation(OperationId(id), end);
        }
    }

    #[test]
    fn test_memory_offsets_from_start() {
        let mut session = session();
        for (timestamp, used_heap) in [(1000.0, 10), (1100.0, 20), (1250.0, 15)] {
            session.push_memory_snapshot(MemorySnapshot::new(
                timestamp,
                MemoryReading {
                    used_heap,
                    ..Default::default()
                },
                0,
                "continuous_monitoring",
            ));
        }

        let points = memory_over_time(&session);
        assert_eq!(
            points,
            vec![
                MemoryPoint {
                    offset_ms: 0.0,
                    used_heap: 10
                },
                MemoryPoint {
                    offset_ms: 100.0,
                    used_heap: 20
                },
                MemoryPoint {
                    offset_ms: 250.0,
                    used_heap: 15
                },
            ]
        );
    }

    #[test]
    fn test_operation_averages_skip_open() {
        let mut session = session();
        operation(&mut session, 0, "chunk", 1000.0, Some(1010.0));
        operation(&mut session, 1, "chunk", 1010.0, Some(1040.0));
        operation(&mut session, 2, "build", 1000.0, Some(1100.0));
        operation(&mut session, 3, "merge", 1100.0, None);

        similar_asserts::assert_eq!(
            average_operation_times(&session),
            vec![
                OperationAverage {
                    name: "build".to_owned(),
                    count: 1,
                    average_ms: 100.0,
                    total_ms: 100.0,
                },
                OperationAverage {
                    name: "chunk".to_owned(),
                    count: 2,
                    average_ms: 20.0,
                    total_ms: 40.0,
                },
            ]
        );
    }

    #[test]
    fn test_block_type_averages() {
        let mut session = session();
        for (block_type, time) in [("stone", 1.0), ("dirt", 4.0), ("stone", 3.0)] {
            session.push_block_event(BlockProcessingEvent {
                block_type: block_type.to_owned(),
                processing_time: time,
                ..Default::default()
            });
        }

        let averages = block_type_averages(&session);
        assert_eq!(averages.len(), 2);
        assert_eq!(averages[0].block_type, "dirt");
        assert_eq!(averages[1].block_type, "stone");
        assert_eq!(averages[1].count, 2);
        assert_eq!(averages[1].average_ms, 2.0);
    }

    #[test]
    fn test_export_key_order_is_stable() {
        let mut session = session();
        session.finish(1500.0);

        let json = ExportedSession::new(&session).to_json().unwrap();
        let keys = [
            "\"version\"",
            "\"session\"",
            "\"frameTimes\"",
            "\"leakSeverity\"",
            "\"operationAverages\"",
            "\"blockTypeAverages\"",
            "\"memoryOverTime\"",
        ];
        let positions: Vec<usize> = keys.iter().map(|key| json.find(key).unwrap()).collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["session"]["totalDuration"], 500.0);
        assert_eq!(value["session"]["renderMode"], "batch");
        assert_eq!(value["leakSeverity"], "none");
        assert_eq!(value["frameTimes"], serde_json::Value::Null);
    }
}
