use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::{
    engine::{System, SystemContext},
    error::SimResult,
    facility::FacilityId,
    layers::{DirectionMap, Octant},
    rng::SystemRng,
    world::{Grid, World},
};

/// Most common octant label under each facility's cells.
///
/// Tallies are kept in first-seen order per facility and the first strict
/// maximum wins, so a tie goes to the octant met earliest in a row-major scan.
pub fn classify_directions(
    grid: &Grid,
    directions: &DirectionMap,
) -> SimResult<HashMap<FacilityId, Octant>> {
    let mut tallies: HashMap<FacilityId, Vec<(Octant, u32)>> = HashMap::new();
    for (x, y, cell) in grid.occupied() {
        let octant = directions.get(x, y)?;
        let entries = tallies.entry(cell.facility).or_default();
        match entries.iter_mut().find(|(seen, _)| *seen == octant) {
            Some((_, count)) => *count += 1,
            None => entries.push((octant, 1)),
        }
    }

    Ok(tallies
        .into_iter()
        .filter_map(|(facility, entries)| {
            let mut best: Option<(Octant, u32)> = None;
            for (octant, count) in entries {
                if best.map_or(true, |(_, top)| count > top) {
                    best = Some((octant, count));
                }
            }
            best.map(|(octant, _)| (facility, octant))
        })
        .collect())
}

pub struct DirectionSystem;

impl DirectionSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DirectionSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for DirectionSystem {
    fn name(&self) -> &str {
        "direction"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        world: &mut World,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let preferred = classify_directions(world.grid(), world.directions())?;
        for facility in world.facilities().iter() {
            if let Some(octant) = preferred.get(&facility.id) {
                debug!(tick = ctx.tick, facility = %facility.name, %octant, "preferred direction");
            }
        }
        world.cache.preferred = preferred;
        Ok(())
    }
}
