use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    economics::EconomicModel,
    error::{SimError, SimResult},
    facility::{Facility, FacilityId, FacilitySet, Rgb},
    layers::{DirectionMap, NamedMaps, Octant},
    systems::ScoreDiagnostics,
};

/// An occupied grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub facility: FacilityId,
    pub color: Rgb,
}

/// Row-major array of cells. Empty positions never become occupied after
/// initialization and occupied ones never become empty.
#[derive(Debug, Clone)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Option<Cell>>,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![None; width * height],
        }
    }

    /// Builds a grid from rows of owners; `None` marks a permanently empty cell.
    pub fn from_rows(facilities: &FacilitySet, rows: &[Vec<Option<FacilityId>>]) -> Self {
        let height = rows.len();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut grid = Grid::new(width, height);
        for (y, row) in rows.iter().enumerate() {
            for (x, owner) in row.iter().enumerate() {
                if let Some(id) = owner {
                    let facility = facilities.get(*id);
                    grid.cells[y * width + x] = Some(Cell {
                        facility: facility.id,
                        color: facility.color,
                    });
                }
            }
        }
        grid
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    fn out_of_bounds(&self, x: i64, y: i64) -> SimError {
        SimError::OutOfBounds {
            x,
            y,
            width: self.width,
            height: self.height,
        }
    }

    /// The cell at a position, or `None` when it is empty.
    pub fn get(&self, x: usize, y: usize) -> SimResult<Option<Cell>> {
        if x < self.width && y < self.height {
            Ok(self.cells[y * self.width + x])
        } else {
            Err(self.out_of_bounds(x as i64, y as i64))
        }
    }

    /// Like [`Grid::get`] but folds out-of-bounds into `None`, for neighbor
    /// scans that skip positions past the edge.
    pub fn neighbor(&self, x: i64, y: i64) -> Option<Cell> {
        if self.in_bounds(x, y) {
            self.cells[y as usize * self.width + x as usize]
        } else {
            None
        }
    }

    pub fn place(&mut self, x: usize, y: usize, facility: &Facility) -> SimResult<()> {
        if x >= self.width || y >= self.height {
            return Err(self.out_of_bounds(x as i64, y as i64));
        }
        self.cells[y * self.width + x] = Some(Cell {
            facility: facility.id,
            color: facility.color,
        });
        Ok(())
    }

    /// Hands an occupied cell to `facility`. Empty cells stay empty.
    pub(crate) fn transfer(&mut self, x: usize, y: usize, facility: &Facility) -> bool {
        match self.cells.get_mut(y * self.width + x) {
            Some(Some(cell)) => {
                cell.facility = facility.id;
                cell.color = facility.color;
                true
            }
            _ => false,
        }
    }

    /// Occupied cells in row-major order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize, Cell)> + '_ {
        let width = self.width;
        self.cells
            .iter()
            .enumerate()
            .filter_map(move |(index, cell)| cell.map(|cell| (index % width, index / width, cell)))
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }
}

pub type RegionId = usize;

/// Maximal 4-connected set of cells owned by one facility during one tick.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub facility: FacilityId,
    pub cells: Vec<(usize, usize)>,
    /// Mean normalized topography over `cells`.
    pub average_topography: Decimal,
}

impl Region {
    pub fn area(&self) -> usize {
        self.cells.len()
    }
}

/// Region labels for every occupied cell, valid for a single tick.
#[derive(Debug, Clone)]
pub struct RegionMap {
    width: usize,
    height: usize,
    labels: Vec<Option<RegionId>>,
    regions: Vec<Region>,
}

impl RegionMap {
    pub(crate) fn new(
        width: usize,
        height: usize,
        labels: Vec<Option<RegionId>>,
        regions: Vec<Region>,
    ) -> Self {
        Self {
            width,
            height,
            labels,
            regions,
        }
    }

    /// The region labelled at a position, or `None` for an empty cell.
    pub fn region_id_at(&self, x: usize, y: usize) -> SimResult<Option<RegionId>> {
        if x >= self.width || y >= self.height {
            return Err(SimError::OutOfBounds {
                x: x as i64,
                y: y as i64,
                width: self.width,
                height: self.height,
            });
        }
        Ok(self.labels[y * self.width + x])
    }

    pub fn region_at(&self, x: usize, y: usize) -> SimResult<Option<&Region>> {
        Ok(self.region_id_at(x, y)?.map(|id| &self.regions[id]))
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Engine-computed data that lives for exactly one tick.
#[derive(Debug, Default)]
pub(crate) struct TickCache {
    pub regions: Option<RegionMap>,
    pub preferred: HashMap<FacilityId, Octant>,
    pub diagnostics: Option<ScoreDiagnostics>,
    pub conversions: usize,
}

#[derive(Debug)]
pub struct World {
    facilities: FacilitySet,
    layers: NamedMaps,
    directions: DirectionMap,
    model: EconomicModel,
    grid: Grid,
    tick: u64,
    pub(crate) cache: TickCache,
}

impl World {
    pub fn new(
        facilities: FacilitySet,
        layers: NamedMaps,
        directions: DirectionMap,
        model: EconomicModel,
        grid: Grid,
    ) -> SimResult<Self> {
        let (width, height) = (grid.width(), grid.height());
        if layers.width() != width || layers.height() != height {
            return Err(SimError::GridShape {
                width,
                height,
                found_width: layers.width(),
                found_height: layers.height(),
            });
        }
        if directions.width() != width || directions.height() != height {
            return Err(SimError::DirectionCoverage {
                width,
                height,
                found_width: directions.width(),
                found_height: directions.height(),
            });
        }
        Ok(Self {
            facilities,
            layers,
            directions,
            model,
            grid,
            tick: 0,
            cache: TickCache::default(),
        })
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance_time(&mut self) {
        self.tick += 1;
    }

    /// Drops every tick-scoped cache so no stage can observe last tick's data.
    pub fn begin_tick(&mut self) {
        self.cache = TickCache::default();
    }

    pub fn facilities(&self) -> &FacilitySet {
        &self.facilities
    }

    pub fn layers(&self) -> &NamedMaps {
        &self.layers
    }

    pub fn directions(&self) -> &DirectionMap {
        &self.directions
    }

    pub fn model(&self) -> &EconomicModel {
        &self.model
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Converts the cell at a position to `facility`; returns whether the
    /// owner actually changed.
    pub(crate) fn transfer(&mut self, x: usize, y: usize, facility: FacilityId) -> bool {
        let before = self.grid.get(x, y).ok().flatten().map(|cell| cell.facility);
        match before {
            Some(owner) if owner != facility => {
                self.grid.transfer(x, y, self.facilities.get(facility))
            }
            _ => false,
        }
    }

    /// Hands the occupied cell at a position to `facility`, for seeding a
    /// layout by hand before a run. Returns whether the owner changed; empty
    /// cells stay empty.
    pub fn assign(&mut self, x: usize, y: usize, facility: FacilityId) -> SimResult<bool> {
        self.grid.get(x, y)?;
        Ok(self.transfer(x, y, facility))
    }

    pub fn regions(&self) -> Option<&RegionMap> {
        self.cache.regions.as_ref()
    }

    pub fn preferred_direction(&self, facility: FacilityId) -> Option<Octant> {
        self.cache.preferred.get(&facility).copied()
    }

    pub fn diagnostics(&self) -> Option<&ScoreDiagnostics> {
        self.cache.diagnostics.as_ref()
    }

    pub fn conversions(&self) -> usize {
        self.cache.conversions
    }

    /// Score of `facility` at a position, using the region labelled there this
    /// tick (if regions have been detected).
    pub fn score_at(&self, facility: FacilityId, x: usize, y: usize) -> SimResult<Decimal> {
        let region = match self.regions() {
            Some(map) => map.region_at(x, y)?,
            None => None,
        };
        self.model
            .score(&self.layers, self.facilities.get(facility), x, y, region)
    }

    /// Cell count per facility, in facility order.
    pub fn ownership(&self) -> Vec<(FacilityId, usize)> {
        let mut counts = vec![0usize; self.facilities.len()];
        for (_, _, cell) in self.grid.occupied() {
            counts[cell.facility.index()] += 1;
        }
        self.facilities
            .iter()
            .map(|facility| (facility.id, counts[facility.id.index()]))
            .collect()
    }

    pub fn frame(&self) -> Frame {
        Frame {
            tick: self.tick,
            width: self.grid.width(),
            height: self.grid.height(),
            legend: self
                .facilities
                .iter()
                .map(|facility| LegendEntry {
                    name: facility.name.clone(),
                    color: facility.color.hex(),
                })
                .collect(),
            cells: self
                .grid
                .occupied()
                .map(|(x, y, cell)| FrameCell {
                    x,
                    y,
                    facility: cell.facility.index(),
                    color: cell.color.hex(),
                })
                .collect(),
        }
    }
}

/// What a renderer needs to draw the current territory.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub tick: u64,
    pub width: usize,
    pub height: usize,
    pub legend: Vec<LegendEntry>,
    pub cells: Vec<FrameCell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegendEntry {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameCell {
    pub x: usize,
    pub y: usize,
    pub facility: usize,
    pub color: String,
}
