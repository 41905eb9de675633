//! Procedural terrain generation for the authority side.
//!
//! Cells are described as element lists: one element for every face of a
//! solid sub-cell unit that borders air, including faces on the cell border.

use lux_core::constants::CELL_SIZE;
use lux_core::{Axis, CellCoord, Element, LocalPos, MaterialId, Orientation};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;

use crate::WorldSeed;

/// Terrain generator configuration.
#[derive(Debug, Clone)]
pub struct TerrainConfig {
    /// Seed for noise generation.
    pub seed: WorldSeed,
    /// Sea level (Y coordinate).
    pub sea_level: i32,
    /// Horizontal scale of terrain features.
    pub terrain_scale: f64,
    /// Maximum terrain height variation.
    pub terrain_height: f64,
    /// Number of noise octaves for detail.
    pub octaves: usize,
    pub lacunarity: f64,
    pub persistence: f64,
    /// Depth of dirt layer below surface.
    pub dirt_depth: u32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            sea_level: 8,
            terrain_scale: 64.0,
            terrain_height: 24.0,
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            dirt_depth: 3,
        }
    }
}

/// Heightmap terrain generator using fractal noise.
pub struct TerrainGenerator {
    config: TerrainConfig,
    height_noise: Fbm<Perlin>,
}

impl TerrainGenerator {
    /// Create a new terrain generator with the given configuration.
    pub fn new(config: TerrainConfig) -> Self {
        let height_noise = Fbm::<Perlin>::new(config.seed as u32)
            .set_octaves(config.octaves)
            .set_lacunarity(config.lacunarity)
            .set_persistence(config.persistence);

        Self {
            config,
            height_noise,
        }
    }

    /// Create a terrain generator with default configuration.
    pub fn with_seed(seed: WorldSeed) -> Self {
        Self::new(TerrainConfig {
            seed,
            ..Default::default()
        })
    }

    /// Get the terrain configuration.
    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Surface Y at world XZ coordinates.
    pub fn height_at(&self, world_x: i64, world_z: i64) -> i32 {
        let nx = world_x as f64 / self.config.terrain_scale;
        let nz = world_z as f64 / self.config.terrain_scale;

        // Noise returns [-1, 1], map to [0, terrain_height] and add sea_level
        let noise_value = self.height_noise.get([nx, nz]);
        ((noise_value + 1.0) * 0.5 * self.config.terrain_height) as i32 + self.config.sea_level
    }

    fn material_at_depth(&self, world_y: i64, surface_height: i32) -> MaterialId {
        let surface = i64::from(surface_height);
        if world_y > surface {
            MaterialId::NONE
        } else if world_y == surface {
            MaterialId::GRASS
        } else if world_y > surface - i64::from(self.config.dirt_depth) {
            MaterialId::DIRT
        } else {
            MaterialId::STONE
        }
    }

    /// Generate the element list of one cell.
    pub fn generate_cell(&self, coord: CellCoord) -> Vec<Element> {
        let size = CELL_SIZE as i64;
        let base = [
            i64::from(coord.x) * size,
            i64::from(coord.y) * size,
            i64::from(coord.z) * size,
        ];

        // Column heights with a one-unit apron so border faces see their neighbors.
        let span = CELL_SIZE + 2;
        let mut heights = vec![0i32; span * span];
        for dz in 0..span {
            for dx in 0..span {
                heights[dx + dz * span] =
                    self.height_at(base[0] + dx as i64 - 1, base[2] + dz as i64 - 1);
            }
        }
        let solid = |x: i64, y: i64, z: i64| {
            let h = heights[(x + 1) as usize + (z + 1) as usize * span];
            !self.material_at_depth(base[1] + y, h).is_none()
        };

        let mut elements = Vec::new();
        for lz in 0..size {
            for ly in 0..size {
                for lx in 0..size {
                    let h = heights[(lx + 1) as usize + (lz + 1) as usize * span];
                    let material = self.material_at_depth(base[1] + ly, h);
                    if material.is_none() {
                        continue;
                    }
                    let local = LocalPos::new(lx as u8, ly as u8, lz as u8).to_index() as u16;
                    for axis in Axis::ALL {
                        for positive in [false, true] {
                            let step = if positive { 1 } else { -1 };
                            let mut n = [lx, ly, lz];
                            n[axis.index()] += step;
                            if !solid(n[0], n[1], n[2]) {
                                elements.push(Element::new(
                                    local,
                                    Orientation::new(axis, positive),
                                    material,
                                ));
                            }
                        }
                    }
                }
            }
        }
        elements
    }

    /// Generate multiple cells in parallel.
    pub fn generate_cells_parallel(&self, coords: &[CellCoord]) -> Vec<(CellCoord, Vec<Element>)> {
        coords
            .par_iter()
            .map(|&coord| (coord, self.generate_cell(coord)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_cell(generator: &TerrainGenerator) -> CellCoord {
        let h = generator.height_at(0, 0);
        CellCoord::new(0, h.div_euclid(CELL_SIZE as i32), 0)
    }

    #[test]
    fn generator_deterministic() {
        let gen1 = TerrainGenerator::with_seed(12345);
        let gen2 = TerrainGenerator::with_seed(12345);

        for x in -50..50 {
            for z in -50..50 {
                assert_eq!(gen1.height_at(x, z), gen2.height_at(x, z));
            }
        }
        let coord = surface_cell(&gen1);
        assert_eq!(gen1.generate_cell(coord), gen2.generate_cell(coord));
    }

    #[test]
    fn sky_and_bedrock_cells_have_no_faces() {
        let generator = TerrainGenerator::with_seed(42);
        assert!(generator.generate_cell(CellCoord::new(0, 20, 0)).is_empty());
        assert!(generator.generate_cell(CellCoord::new(3, -4, -2)).is_empty());
    }

    #[test]
    fn surface_cell_has_valid_faces() {
        let generator = TerrainGenerator::with_seed(42);
        let coord = surface_cell(&generator);
        let elements = generator.generate_cell(coord);

        assert!(!elements.is_empty());
        assert!(elements.iter().all(|e| e.validate().is_ok()));

        let h = generator.height_at(0, 0);
        let top = LocalPos::new(0, h.rem_euclid(CELL_SIZE as i32) as u8, 0).to_index() as u16;
        assert!(elements.contains(&Element::new(
            top,
            Orientation::new(Axis::Y, true),
            MaterialId::GRASS
        )));
    }

    #[test]
    fn parallel_generation_matches_sequential() {
        let generator = TerrainGenerator::with_seed(7);
        let base = surface_cell(&generator);
        let coords = vec![base, base.offset(1, 0, 0), base.offset(0, -1, 1)];

        for (coord, elements) in generator.generate_cells_parallel(&coords) {
            assert_eq!(elements, generator.generate_cell(coord));
        }
    }
}
