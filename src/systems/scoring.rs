use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::{
    engine::{System, SystemContext},
    error::SimResult,
    rng::SystemRng,
    world::{RegionMap, World},
};

/// Informational per-tick score summary. Nothing reads it for control flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreDiagnostics {
    pub mean_cell_score: Decimal,
    pub mean_region_score: Decimal,
    pub cells: usize,
    pub regions: usize,
}

/// Scores every cell of every region with that region.
pub fn score_regions(world: &World, regions: &RegionMap) -> SimResult<ScoreDiagnostics> {
    let mut cell_total = Decimal::ZERO;
    let mut region_total = Decimal::ZERO;
    let mut cells = 0usize;

    for region in regions.regions() {
        let facility = world.facilities().get(region.facility);
        let mut sum = Decimal::ZERO;
        for &(x, y) in &region.cells {
            sum += world
                .model()
                .score(world.layers(), facility, x, y, Some(region))?;
        }
        cell_total += sum;
        cells += region.area();
        region_total += sum / Decimal::from(region.area());
    }

    let mean = |total: Decimal, count: usize| {
        if count == 0 {
            Decimal::ZERO
        } else {
            total / Decimal::from(count)
        }
    };
    Ok(ScoreDiagnostics {
        mean_cell_score: mean(cell_total, cells),
        mean_region_score: mean(region_total, regions.len()),
        cells,
        regions: regions.len(),
    })
}

pub struct ScoringSystem;

impl ScoringSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ScoringSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for ScoringSystem {
    fn name(&self) -> &str {
        "scoring"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        world: &mut World,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let regions = world
            .regions()
            .ok_or_else(|| anyhow!("scoring needs this tick's regions"))?;
        let diagnostics = score_regions(world, regions)?;
        info!(
            tick = ctx.tick,
            scenario = ctx.scenario_name,
            mean_cell_score = %diagnostics.mean_cell_score.round_dp(4),
            mean_region_score = %diagnostics.mean_region_score.round_dp(4),
            "average score"
        );
        world.cache.diagnostics = Some(diagnostics);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        economics::{EconomicModel, ModelConstants},
        facility::{Coefficients, FacilitySet, Rgb},
        layers::{DirectionMap, NamedMaps, Octant},
        systems::detect_regions,
        world::Grid,
    };

    fn flat(revenue: i64) -> Coefficients {
        let mut c = Coefficients::zeroed();
        c.average_revenue = Decimal::from(revenue);
        c.operating_costs = Decimal::ONE;
        c
    }

    #[test]
    fn cell_and_region_means_differ_when_regions_are_uneven() {
        let mut facilities = FacilitySet::new();
        let a = facilities.add("A", Rgb(1, 0, 0), flat(10));
        let b = facilities.add("B", Rgb(0, 1, 0), flat(4));
        let grid = Grid::from_rows(&facilities, &[vec![Some(a), Some(a), Some(a), Some(b)]]);
        let constants = ModelConstants {
            minimum_area: Decimal::ONE,
            maximum_area: Decimal::from(100),
            ..ModelConstants::default()
        };
        let world = World::new(
            facilities,
            NamedMaps::uniform(4, 1, 0),
            DirectionMap::uniform(4, 1, Octant::N),
            EconomicModel::new(constants, false).unwrap(),
            grid,
        )
        .unwrap();
        let regions = detect_regions(world.grid(), world.layers()).unwrap();
        let diagnostics = score_regions(&world, &regions).unwrap();

        assert_eq!(diagnostics.cells, 4);
        assert_eq!(diagnostics.regions, 2);
        // (10 * 3 + 4) / 4 and (10 + 4) / 2
        assert_eq!(diagnostics.mean_cell_score, Decimal::new(85, 1));
        assert_eq!(diagnostics.mean_region_score, Decimal::from(7));
    }

    #[test]
    fn empty_grid_reports_zero() {
        let world = World::new(
            FacilitySet::new(),
            NamedMaps::uniform(2, 2, 0),
            DirectionMap::uniform(2, 2, Octant::S),
            EconomicModel::new(ModelConstants::default(), false).unwrap(),
            Grid::new(2, 2),
        )
        .unwrap();
        let regions = detect_regions(world.grid(), world.layers()).unwrap();
        let diagnostics = score_regions(&world, &regions).unwrap();
        assert_eq!(diagnostics.mean_cell_score, Decimal::ZERO);
        assert_eq!(diagnostics.regions, 0);
    }
}
