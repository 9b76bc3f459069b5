//! Stands in for the GPU side of the mesh builder: counts what has been uploaded.

use std::sync::atomic::{AtomicU64, Ordering};

use mb_perf_monitor::{MemoryProbe, RendererProbe};
use mb_perf_session::{MIB, MemoryReading, RendererStats};

use crate::workload::ChunkMesh;

/// Resident memory of the scene before anything is uploaded.
const BASE_HEAP_BYTES: u64 = 32 * MIB;

const HEAP_LIMIT_BYTES: u64 = 2048 * MIB;

/// One shader program per material, plus one for the instanced path.
const PROGRAMS_PER_MATERIAL: u64 = 1;

#[derive(Default)]
pub struct SimulatedRenderer {
    geometries: AtomicU64,
    triangles: AtomicU64,
    materials: AtomicU64,
    buffer_bytes: AtomicU64,
}

impl SimulatedRenderer {
    /// Adds one merged chunk mesh to the scene.
    pub fn upload(&self, mesh: &ChunkMesh) {
        self.upload_geometry(
            mesh.triangle_count(),
            mesh.materials.len() as u64,
            mesh.memory().total() as u64,
        );
    }

    /// Adds one geometry of `triangles` triangles using `materials` materials.
    pub fn upload_geometry(&self, triangles: u64, materials: u64, bytes: u64) {
        self.geometries.fetch_add(1, Ordering::Relaxed);
        self.triangles.fetch_add(triangles, Ordering::Relaxed);
        self.materials.fetch_add(materials, Ordering::Relaxed);
        self.buffer_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn geometries(&self) -> u64 {
        self.geometries.load(Ordering::Relaxed)
    }
}

impl RendererProbe for SimulatedRenderer {
    fn sample(&self) -> RendererStats {
        let geometries = self.geometries.load(Ordering::Relaxed);
        let materials = self.materials.load(Ordering::Relaxed);
        RendererStats {
            draw_calls: geometries,
            triangles: self.triangles.load(Ordering::Relaxed),
            points: 0,
            lines: 0,
            geometries,
            textures: 0,
            programs: materials * PROGRAMS_PER_MATERIAL,
        }
    }
}

impl MemoryProbe for SimulatedRenderer {
    fn sample(&self) -> MemoryReading {
        let used_heap = BASE_HEAP_BYTES + self.buffer_bytes.load(Ordering::Relaxed);
        MemoryReading {
            used_heap,
            total_heap: used_heap.next_multiple_of(16 * MIB),
            heap_limit: HEAP_LIMIT_BYTES,
            geometry_count: self.geometries.load(Ordering::Relaxed),
            texture_count: 0,
        }
    }
}
