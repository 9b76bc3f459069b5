//! Builds a scene under the monitor, reporting every block and chunk it meshes.

use std::time::Duration;

use mb_perf_monitor::PerformanceMonitor;
use mb_perf_session::{
    BlockProcessingEvent, ChunkProcessingEvent, Metadata, MetadataValue, RenderMode,
};

use crate::renderer::SimulatedRenderer;
use crate::workload::{Chunk, ChunkMesh, PALETTE, VoxelMap};

/// Triangles of one fully visible cube, which is what every instance draws.
const TRIANGLES_PER_INSTANCE: u64 = 12;

/// Bytes of the per-instance transform.
const BYTES_PER_INSTANCE: u64 = 16 * 4;

pub struct Mesher<'a> {
    pub monitor: &'a PerformanceMonitor,
    pub renderer: &'a SimulatedRenderer,
    pub render_mode: RenderMode,

    /// Simulated cost of merging one chunk's faces into a buffer.
    pub merge_delay: Duration,
}

impl Mesher<'_> {
    pub fn build(&self, scene: &[Chunk]) {
        let mut metadata = Metadata::new();
        metadata.insert("chunks".to_owned(), scene.len().into());
        metadata.insert("renderMode".to_owned(), self.render_mode.to_string().into());
        self.monitor.start_operation("build_scene", metadata);

        let mut scene_mesh = ChunkMesh::default();
        let mut instances = [0_u64; PALETTE.len()];

        for chunk in scene {
            let mesh = self.mesh_chunk(chunk);

            match self.render_mode {
                RenderMode::Incremental => {}
                RenderMode::Batch => {
                    scene_mesh.faces.visible += mesh.faces.visible;
                    scene_mesh.faces.culled += mesh.faces.culled;
                    scene_mesh.materials.extend(&mesh.materials);
                }
                RenderMode::Instanced => {
                    for block in &chunk.blocks {
                        instances[usize::from(block.kind) % PALETTE.len()] += 1;
                    }
                }
            }
        }

        match self.render_mode {
            RenderMode::Incremental => {}
            RenderMode::Batch => self.merge_scene(&scene_mesh, scene.len()),
            RenderMode::Instanced => self.upload_instances(&instances),
        }

        let mut summary = Metadata::new();
        summary.insert(
            "geometries".to_owned(),
            MetadataValue::Int(i64::try_from(self.renderer.geometries()).unwrap_or(i64::MAX)),
        );
        self.monitor.record_operation_details("build_scene", summary);
        self.monitor.end_operation("build_scene");
    }

    fn mesh_chunk(&self, chunk: &Chunk) -> ChunkMesh {
        let chunk_start = self.monitor.now_ms();

        let mut metadata = Metadata::new();
        metadata.insert("chunkId".to_owned(), chunk.id().into());
        metadata.insert("blocks".to_owned(), chunk.blocks.len().into());
        self.monitor.start_operation("mesh_chunk", metadata);

        self.monitor.start_operation("cull_faces", Metadata::new());
        let map = VoxelMap::new(&chunk.blocks);
        let mut mesh = ChunkMesh::default();
        for block in &chunk.blocks {
            let block_start = self.monitor.now_ms();
            let kind = block.kind();
            let faces = map.cull(block.position);
            mesh.add_block(kind, faces);

            self.monitor.record_block_processing(BlockProcessingEvent {
                block_type: kind.name.to_owned(),
                position: block.position,
                processing_time: self.monitor.now_ms() - block_start,
                vertex_count: faces.vertices(),
                face_count: faces.visible,
                culled_face_count: faces.culled,
                recorded_at: 0.0,
            });
        }
        self.monitor.end_operation("cull_faces");

        if self.render_mode == RenderMode::Incremental {
            self.monitor.start_operation("merge_geometry", Metadata::new());
            std::thread::sleep(self.merge_delay);
            self.renderer.upload(&mesh);
            self.monitor.end_operation("merge_geometry");
        }

        let mut details = Metadata::new();
        details.insert("visibleFaces".to_owned(), mesh.faces.visible.into());
        details.insert("cullingEfficiency".to_owned(), mesh.culling_efficiency().into());
        self.monitor.record_operation_details("mesh_chunk", details);
        self.monitor.end_operation("mesh_chunk");

        self.monitor.record_chunk_processing(ChunkProcessingEvent {
            chunk_id: chunk.id(),
            origin: chunk.origin,
            block_count: u32::try_from(chunk.blocks.len()).unwrap_or(u32::MAX),
            processing_time: self.monitor.now_ms() - chunk_start,
            vertex_count: u32::try_from(mesh.vertex_count()).unwrap_or(u32::MAX),
            face_count: mesh.faces.visible,
            culling_efficiency: mesh.culling_efficiency(),
            memory: mesh.memory(),
            recorded_at: 0.0,
        });

        mesh
    }

    /// One merge, and one upload, for the whole scene.
    fn merge_scene(&self, mesh: &ChunkMesh, chunks: usize) {
        let mut metadata = Metadata::new();
        metadata.insert("materials".to_owned(), mesh.materials.len().into());
        self.monitor.start_operation("merge_batch", metadata);
        std::thread::sleep(self.merge_delay * u32::try_from(chunks).unwrap_or(u32::MAX) / 4);
        self.renderer.upload(mesh);
        self.monitor.end_operation("merge_batch");
    }

    /// One instanced geometry per block kind in use.
    fn upload_instances(&self, instances: &[u64; PALETTE.len()]) {
        self.monitor.start_operation("build_instances", Metadata::new());
        for (kind, &count) in PALETTE.iter().zip(instances) {
            if count == 0 {
                continue;
            }
            self.renderer.upload_geometry(
                count * TRIANGLES_PER_INSTANCE,
                1,
                count * BYTES_PER_INSTANCE,
            );

            let mut details = Metadata::new();
            details.insert(kind.name.to_owned(), MetadataValue::Int(count as i64));
            self.monitor.record_operation_details("build_instances", details);
        }
        self.monitor.end_operation("build_instances");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mb_perf_monitor::{FrameQueue, ManualClock, ManualTimer, MonitorConfig};

    use super::*;
    use crate::workload::generate_scene;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::builder(MonitorConfig::default())
            .with_clock(Arc::new(ManualClock::default()))
            .with_frame_source(Arc::new(FrameQueue::default()))
            .with_timer(Arc::new(ManualTimer::default()))
            .build()
    }

    fn build(render_mode: RenderMode) -> (mb_perf_session::Session, u64) {
        let monitor = monitor();
        let renderer = SimulatedRenderer::default();
        let scene = generate_scene(4, 4, 3);

        let id = monitor.start_session("test", render_mode);
        Mesher {
            monitor: &monitor,
            renderer: &renderer,
            render_mode,
            merge_delay: Duration::ZERO,
        }
        .build(&scene);
        let session = monitor.end_session(Some(&id)).unwrap();

        let blocks: usize = scene.iter().map(|chunk| chunk.blocks.len()).sum();
        assert_eq!(session.block_events.len(), blocks);
        assert_eq!(session.chunk_events.len(), 4);
        assert!(session.timing_events.iter().all(|e| e.duration.is_some()));

        (session, renderer.geometries())
    }

    #[test]
    fn test_incremental_uploads_every_chunk() {
        let (session, geometries) = build(RenderMode::Incremental);
        assert_eq!(geometries, 4);

        let merges = session
            .timing_events
            .iter()
            .filter(|e| e.name == "merge_geometry")
            .count();
        assert_eq!(merges, 4);
        assert!(
            session
                .timing_events
                .iter()
                .filter(|e| e.name == "mesh_chunk")
                .all(|e| e.parent_operation.as_deref() == Some("build_scene"))
        );
    }

    #[test]
    fn test_batch_uploads_once() {
        let (session, geometries) = build(RenderMode::Batch);
        assert_eq!(geometries, 1);
        assert!(session.timing_events.iter().any(|e| e.name == "merge_batch"));
    }

    #[test]
    fn test_instanced_uploads_per_block_kind() {
        let (session, geometries) = build(RenderMode::Instanced);
        assert!((1..=PALETTE.len() as u64).contains(&geometries));

        let instances = session
            .timing_events
            .iter()
            .find(|e| e.name == "build_instances")
            .unwrap();
        assert_eq!(instances.metadata.len() as u64, geometries);
    }
}
