//! A synthetic voxel scene, meshed the way the mesh builder does it.
//!
//! Every chunk is a little heightmap terrain. Meshing a chunk copies its
//! blocks into a voxel map with one cell of padding on every side, then emits
//! one quad per block face whose neighbour cell does not hide it.

use std::collections::BTreeSet;

use mb_perf_session::{BYTES_PER_INDEX, BYTES_PER_VERTEX, MemoryBreakdown};
use rand::{Rng as _, SeedableRng as _, rngs::SmallRng};

/// One entry of the block palette.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockKind {
    pub name: &'static str,

    /// Blocks of one material end up in the same merged geometry.
    pub material: &'static str,

    /// Does this block hide the faces of its neighbours?
    pub occludes: bool,
}

pub const PALETTE: [BlockKind; 5] = [
    BlockKind {
        name: "stone",
        material: "solid",
        occludes: true,
    },
    BlockKind {
        name: "dirt",
        material: "solid",
        occludes: true,
    },
    BlockKind {
        name: "grass",
        material: "solid",
        occludes: true,
    },
    BlockKind {
        name: "glass",
        material: "translucent",
        occludes: false,
    },
    BlockKind {
        name: "leaves",
        material: "foliage",
        occludes: false,
    },
];

const STONE: u8 = 0;
const DIRT: u8 = 1;
const GRASS: u8 = 2;
const GLASS: u8 = 3;
const LEAVES: u8 = 4;

/// The six axis-aligned neighbour directions.
const FACES: [[i32; 3]; 6] = [
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
];

const VERTICES_PER_FACE: u64 = 4;
const INDICES_PER_FACE: u64 = 6;

/// Bytes of uniforms and pipeline state per material of a merged mesh.
const BYTES_PER_MATERIAL: f64 = 1024.0;

// ----------------------------------------------------------------------------

/// A block placed in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    pub position: [i32; 3],
    pub kind: u8,
}

impl Block {
    pub fn kind(&self) -> &'static BlockKind {
        &PALETTE[usize::from(self.kind) % PALETTE.len()]
    }
}

/// A cube of `size³` cells at `origin`, some of them filled.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub origin: [i32; 3],
    pub size: i32,
    pub blocks: Vec<Block>,
}

impl Chunk {
    /// Rolling terrain: stone, a layer of dirt, grass on top, the odd tree
    /// crown and glass pane.
    pub fn generate(origin: [i32; 3], size: i32, rng: &mut SmallRng) -> Self {
        let size = size.max(1);
        let mut blocks = Vec::new();

        for x in 0..size {
            for z in 0..size {
                let height = rng.random_range(size / 3..=size.max(2) - 1);
                for y in 0..=height {
                    let kind = if y == height {
                        GRASS
                    } else if y + 2 >= height {
                        DIRT
                    } else {
                        STONE
                    };
                    blocks.push(Block {
                        position: [origin[0] + x, origin[1] + y, origin[2] + z],
                        kind,
                    });
                }

                if height + 1 < size && rng.random_bool(0.08) {
                    let kind = if rng.random_bool(0.5) { LEAVES } else { GLASS };
                    blocks.push(Block {
                        position: [origin[0] + x, origin[1] + height + 1, origin[2] + z],
                        kind,
                    });
                }
            }
        }

        Self {
            origin,
            size,
            blocks,
        }
    }

    pub fn id(&self) -> String {
        let [x, y, z] = self.origin;
        format!("{x}_{y}_{z}")
    }
}

/// A deterministic scene of `count` chunks laid out on a square grid.
pub fn generate_scene(count: usize, chunk_size: i32, seed: u64) -> Vec<Chunk> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let side = (count as f64).sqrt().ceil().max(1.0) as usize;

    (0..count)
        .map(|i| {
            let origin = [
                (i % side) as i32 * chunk_size,
                0,
                (i / side) as i32 * chunk_size,
            ];
            Chunk::generate(origin, chunk_size, &mut rng)
        })
        .collect()
}

// ----------------------------------------------------------------------------

/// The blocks of one chunk in a dense grid with one cell of padding on every
/// side, so looking up a neighbour never needs a bounds check.
pub struct VoxelMap {
    min: [i32; 3],
    stride_y: usize,
    stride_z: usize,

    /// Palette index + 1, zero for empty.
    cells: Vec<u8>,
}

impl VoxelMap {
    const PAD: i32 = 1;

    pub fn new(blocks: &[Block]) -> Self {
        let mut min = [i32::MAX; 3];
        let mut max = [i32::MIN; 3];
        for block in blocks {
            for axis in 0..3 {
                min[axis] = min[axis].min(block.position[axis]);
                max[axis] = max[axis].max(block.position[axis]);
            }
        }
        if blocks.is_empty() {
            min = [0; 3];
            max = [0; 3];
        }

        let extent = |axis: usize| (max[axis] - min[axis] + 1 + 2 * Self::PAD) as usize;
        let stride_y = extent(0);
        let stride_z = extent(0) * extent(1);

        let mut map = Self {
            min,
            stride_y,
            stride_z,
            cells: vec![0; stride_z * extent(2)],
        };
        for block in blocks {
            if let Some(index) = map.index(block.position) {
                map.cells[index] = block.kind + 1;
            }
        }
        map
    }

    fn index(&self, [x, y, z]: [i32; 3]) -> Option<usize> {
        let local = |v: i32, axis: usize| usize::try_from(v - self.min[axis] + Self::PAD).ok();
        let index = local(x, 0)? + local(y, 1)? * self.stride_y + local(z, 2)? * self.stride_z;
        (index < self.cells.len()).then_some(index)
    }

    /// The block at `position`, if any.
    pub fn get(&self, position: [i32; 3]) -> Option<&'static BlockKind> {
        let cell = *self.cells.get(self.index(position)?)?;
        (cell > 0).then(|| &PALETTE[usize::from(cell - 1) % PALETTE.len()])
    }

    /// Faces of the block at `position` that stay visible, and those hidden by a neighbour.
    pub fn cull(&self, position: [i32; 3]) -> FaceCount {
        let [x, y, z] = position;
        let mut count = FaceCount::default();
        for [dx, dy, dz] in FACES {
            let hidden = self
                .get([x + dx, y + dy, z + dz])
                .is_some_and(|neighbour| neighbour.occludes);
            if hidden {
                count.culled += 1;
            } else {
                count.visible += 1;
            }
        }
        count
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaceCount {
    pub visible: u32,
    pub culled: u32,
}

impl FaceCount {
    pub fn vertices(&self) -> u32 {
        self.visible * VERTICES_PER_FACE as u32
    }
}

// ----------------------------------------------------------------------------

/// The merged geometry of one chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkMesh {
    pub faces: FaceCount,
    pub materials: BTreeSet<&'static str>,
}

impl ChunkMesh {
    pub fn add_block(&mut self, kind: &'static BlockKind, faces: FaceCount) {
        self.faces.visible += faces.visible;
        self.faces.culled += faces.culled;
        if faces.visible > 0 {
            self.materials.insert(kind.material);
        }
    }

    pub fn vertex_count(&self) -> u64 {
        u64::from(self.faces.visible) * VERTICES_PER_FACE
    }

    pub fn index_count(&self) -> u64 {
        u64::from(self.faces.visible) * INDICES_PER_FACE
    }

    pub fn triangle_count(&self) -> u64 {
        self.index_count() / 3
    }

    /// Share of all candidate faces that culling removed.
    pub fn culling_efficiency(&self) -> f64 {
        let total = self.faces.visible + self.faces.culled;
        if total == 0 {
            0.0
        } else {
            f64::from(self.faces.culled) / f64::from(total)
        }
    }

    pub fn memory(&self) -> MemoryBreakdown {
        MemoryBreakdown {
            vertex_buffers: (self.vertex_count() * BYTES_PER_VERTEX) as f64,
            index_buffers: (self.index_count() * BYTES_PER_INDEX) as f64,
            materials: self.materials.len() as f64 * BYTES_PER_MATERIAL,
            textures: 0.0,
            other: 0.0,
        }
    }
}
