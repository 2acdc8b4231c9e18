//! Marching Cubes over the sparse block set.
//!
//! Each allocated block produces the cells whose origin lies inside it. Cells on
//! the block's far faces read their last corner layer from the `+1` neighbours,
//! resolved once per block into a [`BlockNeighbours`] table.

use cv_hal::ComputeBackend;
use nalgebra::Point3;

use super::block_pool::BlockPool;
use super::hash_table::SpatialHash;
use super::tables::{CORNER_OFFSETS, EDGE_CONNECTIONS, EDGE_TABLE, TRI_TABLE};
use super::voxel::{voxel_index, BlockCoord, Voxel, BLOCK_SIZE};
use super::NIL;

/// Triangle soup of one block: three consecutive vertices per triangle.
#[derive(Debug, Default, Clone)]
pub struct BlockSurface {
    pub vertices: Vec<Point3<f32>>,
    pub colors: Vec<[f32; 3]>,
}

/// Indices of a block and its seven `+1` neighbours, `dx + 2 dy + 4 dz`.
#[derive(Debug, Clone, Copy)]
pub struct BlockNeighbours {
    blocks: [u32; 8],
}

impl BlockNeighbours {
    pub fn resolve(table: &SpatialHash, index: u32, coord: BlockCoord) -> Self {
        let mut blocks = table.neighbours(coord);
        blocks[0] = index;
        Self { blocks }
    }

    pub fn block(&self, dx: usize, dy: usize, dz: usize) -> u32 {
        self.blocks[dx + 2 * dy + 4 * dz]
    }

    /// Voxel at local `(x, y, z)` with each coordinate in `0..=BLOCK_SIZE`.
    /// Missing neighbours read as [`Voxel::EMPTY`].
    #[inline]
    pub fn voxel(&self, pool: &BlockPool, x: usize, y: usize, z: usize) -> Voxel {
        let (bx, by, bz) = (x / BLOCK_SIZE, y / BLOCK_SIZE, z / BLOCK_SIZE);
        match self.block(bx, by, bz) {
            NIL => Voxel::EMPTY,
            index => pool.voxel(
                index,
                voxel_index(x % BLOCK_SIZE, y % BLOCK_SIZE, z % BLOCK_SIZE),
            ),
        }
    }
}

const ISO_EPSILON: f32 = 1e-5;

/// Zero crossing between two corners. Degenerate inputs return an endpoint.
#[inline]
pub fn vertex_interp(iso: f32, p1: Point3<f32>, p2: Point3<f32>, v1: f32, v2: f32) -> Point3<f32> {
    match interp_factor(iso, v1, v2) {
        None if (v2 - iso).abs() < ISO_EPSILON && (v1 - iso).abs() >= ISO_EPSILON => p2,
        None => p1,
        Some(mu) => p1 + (p2 - p1) * mu,
    }
}

/// [`vertex_interp`] for a position and color pair sharing one parameter.
#[inline]
pub fn vertex_color_interp(
    iso: f32,
    (p1, c1): (Point3<f32>, [f32; 3]),
    (p2, c2): (Point3<f32>, [f32; 3]),
    v1: f32,
    v2: f32,
) -> (Point3<f32>, [f32; 3]) {
    match interp_factor(iso, v1, v2) {
        None if (v2 - iso).abs() < ISO_EPSILON && (v1 - iso).abs() >= ISO_EPSILON => (p2, c2),
        None => (p1, c1),
        Some(mu) => (
            p1 + (p2 - p1) * mu,
            [
                c1[0] + (c2[0] - c1[0]) * mu,
                c1[1] + (c2[1] - c1[1]) * mu,
                c1[2] + (c2[2] - c1[2]) * mu,
            ],
        ),
    }
}

/// `None` when either endpoint sits on the iso-value or both are equal.
#[inline]
fn interp_factor(iso: f32, v1: f32, v2: f32) -> Option<f32> {
    if (v1 - iso).abs() < ISO_EPSILON
        || (v2 - iso).abs() < ISO_EPSILON
        || (v1 - v2).abs() < ISO_EPSILON
    {
        return None;
    }
    Some((iso - v1) / (v2 - v1))
}

fn color_f32(c: [u8; 3]) -> [f32; 3] {
    [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0]
}

/// Triangulate one block.
pub fn extract_block(
    table: &SpatialHash,
    pool: &BlockPool,
    index: u32,
    voxel_size: f32,
    min_weight: u8,
) -> BlockSurface {
    let coord = pool.coord(index);
    let neighbours = BlockNeighbours::resolve(table, index, coord);
    let (ox, oy, oz) = coord.origin_voxel();
    let mut out = BlockSurface::default();

    let mut values = [0.0f32; 8];
    let mut corners = [(Point3::origin(), [0.0f32; 3]); 8];

    for z in 0..BLOCK_SIZE {
        for y in 0..BLOCK_SIZE {
            'cell: for x in 0..BLOCK_SIZE {
                for (c, [dx, dy, dz]) in CORNER_OFFSETS.iter().enumerate() {
                    let (lx, ly, lz) = (x + dx, y + dy, z + dz);
                    let voxel = neighbours.voxel(pool, lx, ly, lz);
                    if voxel.weight() <= min_weight {
                        continue 'cell;
                    }
                    values[c] = voxel.tsdf;
                    let p = Point3::new(
                        (ox + lx as i32) as f32,
                        (oy + ly as i32) as f32,
                        (oz + lz as i32) as f32,
                    ) * voxel_size;
                    corners[c] = (p, color_f32(voxel.color()));
                }

                let mut cube_index = 0usize;
                for (c, &v) in values.iter().enumerate() {
                    if v < 0.0 {
                        cube_index |= 1 << c;
                    }
                }
                let edges = EDGE_TABLE[cube_index];
                if edges == 0 {
                    continue;
                }

                let mut edge_points = [(Point3::origin(), [0.0f32; 3]); 12];
                for (e, &[a, b]) in EDGE_CONNECTIONS.iter().enumerate() {
                    if edges & (1 << e) != 0 {
                        edge_points[e] =
                            vertex_color_interp(0.0, corners[a], corners[b], values[a], values[b]);
                    }
                }

                for &e in TRI_TABLE[cube_index].iter().take_while(|&&e| e != -1) {
                    let (p, c) = edge_points[e as usize];
                    out.vertices.push(p);
                    out.colors.push(c);
                }
            }
        }
    }

    out
}

/// Triangulate every allocated block, one work item per block.
pub(crate) fn extract_all<B: ComputeBackend>(
    backend: &B,
    table: &SpatialHash,
    pool: &BlockPool,
    voxel_size: f32,
    min_weight: u8,
) -> Vec<BlockSurface> {
    let blocks = pool.allocated_indices();
    backend.dispatch_collect(blocks.len(), |i| {
        extract_block(table, pool, blocks[i], voxel_size, min_weight)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32) -> Point3<f32> {
        Point3::new(x, 0.0, 0.0)
    }

    #[test]
    fn test_interp_midpoint() {
        let v = vertex_interp(0.0, p(0.0), p(1.0), -0.25, 0.75);
        assert!((v.x - 0.25).abs() < 1e-6);
        let (v, c) = vertex_color_interp(
            0.0,
            (p(0.0), [0.0, 0.0, 1.0]),
            (p(2.0), [1.0, 0.0, 0.0]),
            -1.0,
            1.0,
        );
        assert!((v.x - 1.0).abs() < 1e-6);
        assert!((c[0] - 0.5).abs() < 1e-6 && (c[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_interp_degenerate_cases() {
        let c1 = [0.1, 0.2, 0.3];
        let c2 = [0.9, 0.8, 0.7];
        // first endpoint on the surface
        assert_eq!(vertex_interp(0.0, p(1.0), p(2.0), 0.0, 0.5), p(1.0));
        assert_eq!(
            vertex_color_interp(0.0, (p(1.0), c1), (p(2.0), c2), 0.0, 0.5),
            (p(1.0), c1)
        );
        // second endpoint on the surface
        assert_eq!(vertex_interp(0.0, p(1.0), p(2.0), -0.5, 0.0), p(2.0));
        assert_eq!(
            vertex_color_interp(0.0, (p(1.0), c1), (p(2.0), c2), -0.5, 0.0),
            (p(2.0), c2)
        );
        // equal values
        assert_eq!(vertex_interp(0.0, p(1.0), p(2.0), 0.3, 0.3), p(1.0));
        let (v, c) = vertex_color_interp(0.0, (p(1.0), c1), (p(2.0), c2), 0.3, 0.3);
        assert_eq!((v, c), (p(1.0), c1));
        assert!(v.x.is_finite());
    }

    #[test]
    fn test_single_block_plane() {
        let table = SpatialHash::new(31, 8);
        let pool = BlockPool::new(8);
        let coord = BlockCoord::new(0, 0, 0);
        let index = table.find_or_insert(coord, &pool, 1).index().unwrap();
        // plane at z = 3.5 voxels, observed everywhere in the block
        for i in 0..512 {
            let z = i / 64;
            pool.set_voxel(index, i, Voxel::new((3.5 - z as f32) / 4.0, 1, [255, 0, 0]));
        }
        let surface = extract_block(&table, &pool, index, 1.0, 0);
        // 7x7 cells interior to the block, two triangles each
        assert_eq!(surface.vertices.len(), 7 * 7 * 2 * 3);
        assert!(surface.vertices.iter().all(|v| (v.z - 3.5).abs() < 1e-5));
        assert!(surface.colors.iter().all(|c| *c == [1.0, 0.0, 0.0]));

        // unobserved voxels produce nothing
        let surface = extract_block(&table, &pool, index, 1.0, 1);
        assert!(surface.vertices.is_empty());
    }
}
