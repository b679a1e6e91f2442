use anyhow::Result;
use rust_decimal::Decimal;
use tracing::debug;

use crate::{
    engine::{System, SystemContext},
    error::SimResult,
    layers::{Layer, NamedMaps},
    rng::SystemRng,
    world::{Grid, Region, RegionId, RegionMap, World},
};

const VON_NEUMANN: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// Labels every maximal 4-connected same-facility component of `grid`.
///
/// Regions are numbered in the row-major order of their first cell. The
/// flood fill keeps its own stack, so region size never touches call depth.
pub fn detect_regions(grid: &Grid, layers: &NamedMaps) -> SimResult<RegionMap> {
    let width = grid.width();
    let mut labels: Vec<Option<RegionId>> = vec![None; width * grid.height()];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for (sx, sy, seed) in grid.occupied() {
        if labels[sy * width + sx].is_some() {
            continue;
        }
        let id = regions.len();
        labels[sy * width + sx] = Some(id);
        stack.push((sx, sy));
        let mut cells = Vec::new();

        while let Some((x, y)) = stack.pop() {
            cells.push((x, y));
            for (dx, dy) in VON_NEUMANN {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                let Some(next) = grid.neighbor(nx, ny) else {
                    continue;
                };
                let index = ny as usize * width + nx as usize;
                if next.facility == seed.facility && labels[index].is_none() {
                    labels[index] = Some(id);
                    stack.push((nx as usize, ny as usize));
                }
            }
        }

        cells.sort_unstable_by_key(|&(x, y)| (y, x));
        let mut total = Decimal::ZERO;
        for &(x, y) in &cells {
            total += layers.normalized(Layer::Topography, x, y)?;
        }
        let average_topography = total / Decimal::from(cells.len());
        regions.push(Region {
            id,
            facility: seed.facility,
            cells,
            average_topography,
        });
    }

    Ok(RegionMap::new(width, grid.height(), labels, regions))
}

pub struct RegionSystem;

impl RegionSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RegionSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for RegionSystem {
    fn name(&self) -> &str {
        "regions"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        world: &mut World,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let regions = detect_regions(world.grid(), world.layers())?;
        debug!(tick = ctx.tick, regions = regions.len(), "regions detected");
        world.cache.regions = Some(regions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        error::SimError,
        facility::{Coefficients, FacilitySet, Rgb},
        layers::Raster,
    };

    #[test]
    fn same_facility_split_by_another_forms_two_regions() {
        let mut facilities = FacilitySet::new();
        let a = facilities.add("A", Rgb(1, 0, 0), Coefficients::zeroed());
        let b = facilities.add("B", Rgb(0, 1, 0), Coefficients::zeroed());
        let grid = Grid::from_rows(
            &facilities,
            &[
                vec![Some(a), Some(b), Some(a)],
                vec![Some(a), Some(b), Some(a)],
            ],
        );
        let layers = NamedMaps::uniform(3, 2, 0);
        let map = detect_regions(&grid, &layers).unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(map.region_at(0, 0).unwrap().unwrap().cells, vec![(0, 0), (0, 1)]);
        assert_eq!(map.region_at(1, 1).unwrap().unwrap().facility, b);
        assert_ne!(
            map.region_id_at(0, 0).unwrap(),
            map.region_id_at(2, 0).unwrap()
        );
    }

    #[test]
    fn diagonal_contact_does_not_connect() {
        let mut facilities = FacilitySet::new();
        let a = facilities.add("A", Rgb(1, 0, 0), Coefficients::zeroed());
        let grid = Grid::from_rows(&facilities, &[vec![Some(a), None], vec![None, Some(a)]]);
        let map = detect_regions(&grid, &NamedMaps::uniform(2, 2, 0)).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.region_id_at(1, 0).unwrap(), None);
    }

    #[test]
    fn lookups_past_the_edge_are_out_of_bounds() {
        let mut facilities = FacilitySet::new();
        let a = facilities.add("A", Rgb(1, 0, 0), Coefficients::zeroed());
        let grid = Grid::from_rows(&facilities, &[vec![Some(a), Some(a)], vec![Some(a), Some(a)]]);
        let map = detect_regions(&grid, &NamedMaps::uniform(2, 2, 0)).unwrap();

        assert_eq!(map.region_id_at(1, 1).unwrap(), Some(0));
        assert!(matches!(
            map.region_id_at(2, 0),
            Err(SimError::OutOfBounds { x: 2, y: 0, width: 2, height: 2 })
        ));
        assert!(map.region_at(0, 2).is_err());
    }

    #[test]
    fn average_topography_is_per_region() {
        let mut facilities = FacilitySet::new();
        let a = facilities.add("A", Rgb(1, 0, 0), Coefficients::zeroed());
        let b = facilities.add("B", Rgb(0, 1, 0), Coefficients::zeroed());
        let grid = Grid::from_rows(&facilities, &[vec![Some(a), Some(a), Some(b), Some(a)]]);
        let topography = Raster::from_rows(&[vec![51, 153, 255, 255]]).unwrap();
        let layers = NamedMaps::uniform(4, 1, 0)
            .with_layer(Layer::Topography, topography)
            .unwrap();
        let map = detect_regions(&grid, &layers).unwrap();

        // 51 -> 20, 153 -> 60
        assert_eq!(map.region_at(0, 0).unwrap().unwrap().average_topography, Decimal::from(40));
        assert_eq!(map.region_at(3, 0).unwrap().unwrap().average_topography, Decimal::from(100));
    }

    #[test]
    fn regions_partition_the_occupied_cells() {
        let mut facilities = FacilitySet::new();
        let ids: Vec<_> = (0..3)
            .map(|i| facilities.add(format!("F{i}"), Rgb(i, i, i), Coefficients::zeroed()))
            .collect();
        let rows: Vec<Vec<_>> = (0..17)
            .map(|y| {
                (0..23)
                    .map(|x| {
                        let v = (x * 7 + y * 13 + x * y) % 5;
                        (v < 3).then(|| ids[v])
                    })
                    .collect()
            })
            .collect();
        let grid = Grid::from_rows(&facilities, &rows);
        let map = detect_regions(&grid, &NamedMaps::uniform(23, 17, 9)).unwrap();

        let mut seen = HashSet::new();
        for region in map.regions() {
            for &(x, y) in &region.cells {
                assert!(seen.insert((x, y)), "cell ({x}, {y}) in two regions");
                assert_eq!(map.region_id_at(x, y).unwrap(), Some(region.id));
                assert_eq!(grid.get(x, y).unwrap().unwrap().facility, region.facility);
            }
        }
        let occupied: HashSet<_> = grid.occupied().map(|(x, y, _)| (x, y)).collect();
        assert_eq!(seen, occupied);
    }

    #[test]
    fn large_uniform_region_is_labelled_without_recursion() {
        let mut facilities = FacilitySet::new();
        let a = facilities.add("A", Rgb(1, 0, 0), Coefficients::zeroed());
        let rows = vec![vec![Some(a); 400]; 400];
        let grid = Grid::from_rows(&facilities, &rows);
        let map = detect_regions(&grid, &NamedMaps::uniform(400, 400, 0)).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.regions()[0].area(), 160_000);
    }
}
