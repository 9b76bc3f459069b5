//! The entries of the per-session logs.
//!
//! All timestamps and durations are milliseconds on the monitor's clock.

use std::collections::BTreeMap;

// ----------------------------------------------------------------------------
// Metadata

/// Free-form, but typed, annotations on a [`TimingEvent`].
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A metadata value: a scalar, a string, or a nested map.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Map(Metadata),
}

impl From<bool> for MetadataValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for MetadataValue {
    #[inline]
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for MetadataValue {
    #[inline]
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<usize> for MetadataValue {
    #[inline]
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MetadataValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for MetadataValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Metadata> for MetadataValue {
    #[inline]
    fn from(value: Metadata) -> Self {
        Self::Map(value)
    }
}

// ----------------------------------------------------------------------------
// Memory

/// What a memory probe reports. Fields the probe cannot provide are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReading {
    pub used_heap: u64,
    pub total_heap: u64,
    pub heap_limit: u64,
    pub geometry_count: u64,
    pub texture_count: u64,
}

/// Bytes per vertex of a merged chunk mesh: position, normal and uv as `f32`.
pub const BYTES_PER_VERTEX: u64 = (3 + 3 + 2) * 4;

/// Bytes per `u32` index.
pub const BYTES_PER_INDEX: u64 = 4;

/// GPU buffer memory for `triangles` triangles, counting three unshared vertices and three indices each.
#[inline]
pub fn estimate_buffer_bytes(triangles: u64) -> u64 {
    triangles.saturating_mul(3 * BYTES_PER_VERTEX + 3 * BYTES_PER_INDEX)
}

/// A point-in-time memory reading.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub timestamp: f64,
    pub used_heap: u64,
    pub total_heap: u64,
    pub heap_limit: u64,
    pub geometry_count: u64,
    pub texture_count: u64,

    /// See [`estimate_buffer_bytes`].
    pub estimated_buffer_bytes: u64,

    /// Why the snapshot was taken, e.g. `"session_start"`. Used for hotspot attribution.
    pub label: String,
}

impl MemorySnapshot {
    pub fn new(
        timestamp: f64,
        reading: MemoryReading,
        triangles: u64,
        label: impl Into<String>,
    ) -> Self {
        let MemoryReading {
            used_heap,
            total_heap,
            heap_limit,
            geometry_count,
            texture_count,
        } = reading;

        Self {
            timestamp,
            used_heap,
            total_heap,
            heap_limit,
            geometry_count,
            texture_count,
            estimated_buffer_bytes: estimate_buffer_bytes(triangles),
            label: label.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Operations

/// Unique (per monitor) identifier of one started operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

/// One named operation. Open while `end_time` is `None`.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingEvent {
    pub id: OperationId,
    pub name: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub duration: Option<f64>,

    /// Whatever operation was on top of the stack when this one started.
    pub parent_operation: Option<String>,

    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl TimingEvent {
    pub fn open(
        id: OperationId,
        name: impl Into<String>,
        start_time: f64,
        parent_operation: Option<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            start_time,
            end_time: None,
            duration: None,
            parent_operation,
            metadata,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

// ----------------------------------------------------------------------------
// Blocks & chunks

/// Cost of turning one block into geometry.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProcessingEvent {
    pub block_type: String,
    pub position: [i32; 3],
    pub processing_time: f64,
    pub vertex_count: u32,
    pub face_count: u32,
    pub culled_face_count: u32,

    /// Set by the monitor when the event is appended.
    pub recorded_at: f64,
}

/// Bytes attributed to one chunk, per kind of resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBreakdown {
    pub vertex_buffers: f64,
    pub index_buffers: f64,
    pub materials: f64,
    pub textures: f64,
    pub other: f64,
}

impl MemoryBreakdown {
    pub fn total(&self) -> f64 {
        let Self {
            vertex_buffers,
            index_buffers,
            materials,
            textures,
            other,
        } = self;
        vertex_buffers + index_buffers + materials + textures + other
    }
}

/// Cost of building the merged mesh of one chunk.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProcessingEvent {
    pub chunk_id: String,
    pub origin: [i32; 3],
    pub block_count: u32,
    pub processing_time: f64,
    pub vertex_count: u32,
    pub face_count: u32,

    /// Share of candidate faces removed by neighbour culling, `0..=1`.
    pub culling_efficiency: f64,

    pub memory: MemoryBreakdown,

    /// Set by the monitor when the event is appended.
    pub recorded_at: f64,
}

// ----------------------------------------------------------------------------
// Frames & renderer

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    pub timestamp: f64,
    pub duration: f64,

    /// `1000 / duration`, zero for a zero-length frame.
    pub fps: f64,
}

impl FrameRecord {
    pub fn new(timestamp: f64, duration: f64) -> Self {
        let fps = if duration > 0.0 { 1000.0 / duration } else { 0.0 };
        Self {
            timestamp,
            duration,
            fps,
        }
    }
}

/// The renderer's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererStats {
    pub draw_calls: u64,
    pub triangles: u64,
    pub points: u64,
    pub lines: u64,
    pub geometries: u64,
    pub textures: u64,
    pub programs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererStatSample {
    pub timestamp: f64,

    #[serde(flatten)]
    pub stats: RendererStats,
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FpsSample {
    pub timestamp: f64,
    pub fps: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_record_fps() {
        assert_eq!(FrameRecord::new(10.0, 20.0).fps, 50.0);
        assert_eq!(FrameRecord::new(10.0, 0.0).fps, 0.0);
    }

    #[test]
    fn test_memory_breakdown_total() {
        let memory = MemoryBreakdown {
            vertex_buffers: 1024.0,
            index_buffers: 512.0,
            materials: 256.0,
            textures: 0.0,
            other: 8.0,
        };
        assert_eq!(memory.total(), 1800.0);
    }

    #[test]
    fn test_buffer_estimate() {
        assert_eq!(estimate_buffer_bytes(0), 0);
        assert_eq!(estimate_buffer_bytes(2), 2 * (3 * 32 + 3 * 4));
        assert_eq!(estimate_buffer_bytes(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_metadata_serializes_untagged() {
        let mut nested = Metadata::new();
        nested.insert("lod".to_owned(), 2i64.into());

        let mut metadata = Metadata::new();
        metadata.insert("chunks".to_owned(), 16usize.into());
        metadata.insert("mode".to_owned(), "greedy".into());
        metadata.insert("wasm".to_owned(), true.into());
        metadata.insert("ratio".to_owned(), 0.5.into());
        metadata.insert("detail".to_owned(), nested.into());

        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(
            json,
            r#"{"chunks":16,"detail":{"lod":2},"mode":"greedy","ratio":0.5,"wasm":true}"#
        );
    }

    #[test]
    fn test_open_event_serialization_skips_empty_metadata() {
        let event = TimingEvent::open(OperationId(3), "build", 1.0, None, Metadata::new());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["parentOperation"], serde_json::Value::Null);
        assert!(json.get("metadata").is_none());
        assert!(event.is_open());
    }
}
