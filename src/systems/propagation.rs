//! The ownership update sweep.
//!
//! Cells are visited in row-major order and converted in place, so a cell
//! visited later in the sweep already sees the new owners of earlier cells.

use std::{collections::HashMap, fmt};

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    engine::{System, SystemContext},
    error::{SimError, SimResult},
    facility::FacilityId,
    rng::SystemRng,
    world::{Cell, World},
};

/// The four conversion rules, addressed by their codes 0 to 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PropagationStyle {
    /// Weakest by score converts to the best-scoring facility present.
    StrongestNeighbor,
    /// Weakest by score converts to the best-scoring attacker, if any.
    StrongestAttacker,
    /// Weakest by tally converts to the most numerous facility present.
    DominantNeighbor,
    /// Weakest by tally converts to the most numerous attacker, if any.
    DominantAttacker,
}

impl PropagationStyle {
    pub const ALL: [PropagationStyle; 4] = [
        PropagationStyle::StrongestNeighbor,
        PropagationStyle::StrongestAttacker,
        PropagationStyle::DominantNeighbor,
        PropagationStyle::DominantAttacker,
    ];

    pub fn code(self) -> u8 {
        match self {
            PropagationStyle::StrongestNeighbor => 0,
            PropagationStyle::StrongestAttacker => 1,
            PropagationStyle::DominantNeighbor => 2,
            PropagationStyle::DominantAttacker => 3,
        }
    }

    fn ranks_by_score(self) -> bool {
        matches!(
            self,
            PropagationStyle::StrongestNeighbor | PropagationStyle::StrongestAttacker
        )
    }

    fn attackers_only(self) -> bool {
        matches!(
            self,
            PropagationStyle::StrongestAttacker | PropagationStyle::DominantAttacker
        )
    }
}

impl TryFrom<u8> for PropagationStyle {
    type Error = SimError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        PropagationStyle::ALL
            .get(usize::from(code))
            .copied()
            .ok_or(SimError::InvalidStyle(code))
    }
}

impl From<PropagationStyle> for u8 {
    fn from(style: PropagationStyle) -> Self {
        style.code()
    }
}

impl fmt::Display for PropagationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Outcome of the ranking for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    Facility(FacilityId),
    NoChange,
}

/// One facility's share of a 3x3 neighborhood.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub facility: FacilityId,
    pub tally: u32,
    pub score_sum: Decimal,
}

impl Presence {
    pub fn average_score(&self) -> Decimal {
        self.score_sum / Decimal::from(self.tally)
    }
}

type ScoreCache = HashMap<(usize, usize, FacilityId), Decimal>;

/// The aggregated 3x3 neighborhood of an occupied cell, center included.
#[derive(Debug, Clone)]
pub struct Neighborhood {
    pub x: usize,
    pub y: usize,
    pub center: Cell,
    /// Facilities in the order the scan first met them.
    pub present: Vec<Presence>,
    /// Other facilities whose preferred direction points from a neighbor
    /// back at the center, in first-met order.
    pub can_attack: Vec<FacilityId>,
}

impl Neighborhood {
    /// Surveys the cell at `(x, y)` against the current grid. Empty cells have
    /// no neighborhood.
    pub fn survey(world: &World, x: usize, y: usize) -> SimResult<Option<Self>> {
        Self::survey_with(world, x, y, &mut ScoreCache::new())
    }

    fn survey_with(
        world: &World,
        x: usize,
        y: usize,
        scores: &mut ScoreCache,
    ) -> SimResult<Option<Self>> {
        let Some(center) = world.grid().get(x, y)? else {
            return Ok(None);
        };
        let mut present: Vec<Presence> = Vec::new();
        let mut can_attack = Vec::new();

        for dx in -1i64..=1 {
            for dy in -1i64..=1 {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                let Some(cell) = world.grid().neighbor(nx, ny) else {
                    continue;
                };
                let (nx, ny) = (nx as usize, ny as usize);
                let score = match scores.get(&(nx, ny, cell.facility)) {
                    Some(score) => *score,
                    None => {
                        let score = world.score_at(cell.facility, nx, ny)?;
                        scores.insert((nx, ny, cell.facility), score);
                        score
                    }
                };

                match present.iter_mut().find(|p| p.facility == cell.facility) {
                    Some(presence) => {
                        presence.tally += 1;
                        presence.score_sum = presence
                            .score_sum
                            .checked_add(score)
                            .ok_or(SimError::Overflow("neighborhood score sum"))?;
                    }
                    None => present.push(Presence {
                        facility: cell.facility,
                        tally: 1,
                        score_sum: score,
                    }),
                }

                if cell.facility != center.facility
                    && !can_attack.contains(&cell.facility)
                    && world
                        .preferred_direction(cell.facility)
                        .is_some_and(|octant| octant.attack_vector() == (dx, dy))
                {
                    can_attack.push(cell.facility);
                }
            }
        }

        Ok(Some(Self {
            x,
            y,
            center,
            present,
            can_attack,
        }))
    }

    pub fn presence(&self, facility: FacilityId) -> Option<&Presence> {
        self.present.iter().find(|p| p.facility == facility)
    }

    pub fn tally(&self, facility: FacilityId) -> u32 {
        self.presence(facility).map_or(0, |p| p.tally)
    }

    pub fn average_score(&self, facility: FacilityId) -> Option<Decimal> {
        self.presence(facility).map(Presence::average_score)
    }

    /// Whether the center's facility has the lowest average score here.
    /// Among equal minima the first met in the scan counts as lowest.
    pub fn weakest_by_score(&self) -> bool {
        self.present
            .iter()
            .min_by_key(|p| p.average_score())
            .is_some_and(|p| p.facility == self.center.facility)
    }

    pub fn weakest_by_tally(&self) -> bool {
        self.present
            .iter()
            .min_by_key(|p| p.tally)
            .is_some_and(|p| p.facility == self.center.facility)
    }

    fn rank(&self, style: PropagationStyle, candidate: Successor) -> Option<Decimal> {
        let Successor::Facility(facility) = candidate else {
            return None;
        };
        let presence = self.presence(facility)?;
        Some(if style.ranks_by_score() {
            presence.average_score()
        } else {
            Decimal::from(presence.tally)
        })
    }

    /// Who the center converts to under `style`.
    ///
    /// `NoChange` competes in attacker-only pools and ranks below every real
    /// candidate. Equal maxima resolve to the last candidate in scan order.
    pub fn successor(&self, style: PropagationStyle) -> Successor {
        let weakest = if style.ranks_by_score() {
            self.weakest_by_score()
        } else {
            self.weakest_by_tally()
        };
        if !weakest {
            return Successor::NoChange;
        }

        let pool: Vec<Successor> = if style.attackers_only() {
            std::iter::once(Successor::NoChange)
                .chain(self.can_attack.iter().copied().map(Successor::Facility))
                .collect()
        } else {
            self.present
                .iter()
                .map(|p| Successor::Facility(p.facility))
                .collect()
        };
        pool.into_iter()
            .max_by_key(|candidate| self.rank(style, *candidate))
            .unwrap_or(Successor::NoChange)
    }
}

/// Runs one in-place sweep and returns how many cells changed owner.
pub fn sweep(world: &mut World, style: PropagationStyle) -> SimResult<usize> {
    let (width, height) = (world.grid().width(), world.grid().height());
    let mut scores = ScoreCache::new();
    let mut conversions = 0;

    for y in 0..height {
        for x in 0..width {
            let Some(neighborhood) = Neighborhood::survey_with(world, x, y, &mut scores)? else {
                continue;
            };
            if let Successor::Facility(winner) = neighborhood.successor(style) {
                if world.transfer(x, y, winner) {
                    trace!(
                        x,
                        y,
                        from = neighborhood.center.facility.index(),
                        to = winner.index(),
                        "cell converted"
                    );
                    conversions += 1;
                }
            }
        }
    }
    Ok(conversions)
}

pub struct PropagationSystem;

impl PropagationSystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PropagationSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for PropagationSystem {
    fn name(&self) -> &str {
        "propagation"
    }

    fn run(
        &mut self,
        ctx: &SystemContext,
        world: &mut World,
        _rng: &mut SystemRng<'_>,
    ) -> Result<()> {
        let conversions = sweep(world, ctx.style)?;
        debug!(tick = ctx.tick, style = ctx.style.code(), conversions, "sweep finished");
        world.cache.conversions = conversions;
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
        systems::{classify_directions, detect_regions},
        world::Grid,
    };

    /// A world whose scores equal each facility's revenue at every cell.
    fn world(revenues: &[i64], owners: &[Vec<Option<usize>>], directions: DirectionMap) -> World {
        let mut facilities = FacilitySet::new();
        let ids: Vec<_> = revenues
            .iter()
            .enumerate()
            .map(|(i, revenue)| {
                let mut c = Coefficients::zeroed();
                c.average_revenue = Decimal::from(*revenue);
                c.operating_costs = Decimal::ONE;
                facilities.add(format!("F{i}"), Rgb(i as u8, 0, 0), c)
            })
            .collect();
        let rows: Vec<Vec<_>> = owners
            .iter()
            .map(|row| row.iter().map(|o| o.map(|i| ids[i])).collect())
            .collect();
        let grid = Grid::from_rows(&facilities, &rows);
        let constants = ModelConstants {
            minimum_area: Decimal::ONE,
            maximum_area: Decimal::from(10_000),
            ..ModelConstants::default()
        };
        let mut world = World::new(
            facilities,
            NamedMaps::uniform(grid.width(), grid.height(), 0),
            directions,
            EconomicModel::new(constants, false).unwrap(),
            grid,
        )
        .unwrap();
        prepare(&mut world);
        world
    }

    fn prepare(world: &mut World) {
        world.begin_tick();
        world.cache.regions = Some(detect_regions(world.grid(), world.layers()).unwrap());
        world.cache.preferred = classify_directions(world.grid(), world.directions()).unwrap();
    }

    fn owners(world: &World) -> Vec<Option<usize>> {
        let grid = world.grid();
        (0..grid.height())
            .flat_map(|y| (0..grid.width()).map(move |x| (x, y)))
            .map(|(x, y)| grid.get(x, y).unwrap().map(|c| c.facility.index()))
            .collect()
    }

    #[test]
    fn style_codes_round_trip_and_reject_unknown() {
        for style in PropagationStyle::ALL {
            assert_eq!(PropagationStyle::try_from(style.code()).unwrap(), style);
        }
        assert!(matches!(
            PropagationStyle::try_from(4),
            Err(SimError::InvalidStyle(4))
        ));
        let parsed: PropagationStyle = serde_yaml::from_str("2").unwrap();
        assert_eq!(parsed, PropagationStyle::DominantNeighbor);
    }

    #[test]
    fn center_counts_itself() {
        let w = world(
            &[1, 2],
            &[vec![Some(0), Some(1)], vec![Some(1), Some(1)]],
            DirectionMap::uniform(2, 2, Octant::N),
        );
        let hood = Neighborhood::survey(&w, 0, 0).unwrap().unwrap();
        assert_eq!(hood.tally(hood.center.facility), 1);
        assert_eq!(hood.tally(w.facilities().find("F1").unwrap()), 3);
        assert_eq!(hood.present[0].facility, hood.center.facility);
    }

    #[test]
    fn empty_cell_has_no_neighborhood() {
        let w = world(&[1], &[vec![Some(0), None]], DirectionMap::uniform(2, 1, Octant::N));
        assert!(Neighborhood::survey(&w, 1, 0).unwrap().is_none());
        assert!(matches!(
            Neighborhood::survey(&w, 2, 0),
            Err(SimError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn attackers_need_a_direction_pointing_back_at_the_center() {
        // F1 prefers E, so a F1 cell at offset (1, 0) attacks the center.
        let w = world(
            &[5, 1, 1],
            &[vec![Some(0), Some(1), Some(2)]],
            DirectionMap::from_rows(&[vec![Octant::N, Octant::E, Octant::W]], 3, 1).unwrap(),
        );
        let hood = Neighborhood::survey(&w, 0, 0).unwrap().unwrap();
        assert_eq!(hood.can_attack, vec![w.facilities().find("F1").unwrap()]);

        let middle = Neighborhood::survey(&w, 1, 0).unwrap().unwrap();
        assert!(middle.can_attack.is_empty());
    }

    #[test]
    fn strongest_neighbor_ignores_direction() {
        let w = world(
            &[1, 9],
            &[vec![Some(0), Some(1)]],
            DirectionMap::uniform(2, 1, Octant::S),
        );
        let hood = Neighborhood::survey(&w, 0, 0).unwrap().unwrap();
        assert!(hood.can_attack.is_empty());
        let strongest = w.facilities().find("F1").unwrap();
        assert_eq!(
            hood.successor(PropagationStyle::StrongestNeighbor),
            Successor::Facility(strongest)
        );
        assert_eq!(
            hood.successor(PropagationStyle::StrongestAttacker),
            Successor::NoChange
        );
    }

    #[test]
    fn equal_scores_pick_the_last_candidate() {
        // Both neighbors out-score the center equally; the later one wins.
        let w = world(
            &[1, 7, 7],
            &[vec![Some(1), Some(0), Some(2)]],
            DirectionMap::uniform(3, 1, Octant::N),
        );
        let hood = Neighborhood::survey(&w, 1, 0).unwrap().unwrap();
        assert_eq!(
            hood.successor(PropagationStyle::StrongestNeighbor),
            Successor::Facility(w.facilities().find("F2").unwrap())
        );
    }

    #[test]
    fn weakest_tie_goes_to_first_met() {
        // Every facility has tally 1; F1 at offset (-1, 0) is met first.
        let w = world(
            &[1, 1, 1],
            &[vec![Some(1), Some(0), Some(2)]],
            DirectionMap::uniform(3, 1, Octant::N),
        );
        let hood = Neighborhood::survey(&w, 1, 0).unwrap().unwrap();
        assert!(!hood.weakest_by_tally());
        assert!(!hood.weakest_by_score());
        assert_eq!(hood.successor(PropagationStyle::DominantNeighbor), Successor::NoChange);
    }

    #[test]
    fn attacker_pools_only_yield_attackers() {
        let owners_rows: Vec<Vec<Option<usize>>> = (0..9)
            .map(|y| (0..11).map(|x| Some((x * 3 + y * 5 + x * y) % 4)).collect())
            .collect();
        let rows: Vec<Vec<Octant>> = (0..9)
            .map(|y| (0..11).map(|x| Octant::ALL[(x + 2 * y) % 8]).collect())
            .collect();
        let w = world(
            &[3, 8, 1, 5],
            &owners_rows,
            DirectionMap::from_rows(&rows, 11, 9).unwrap(),
        );
        for y in 0..9 {
            for x in 0..11 {
                let hood = Neighborhood::survey(&w, x, y).unwrap().unwrap();
                for style in [
                    PropagationStyle::StrongestAttacker,
                    PropagationStyle::DominantAttacker,
                ] {
                    if let Successor::Facility(id) = hood.successor(style) {
                        assert!(hood.can_attack.contains(&id));
                    }
                }
                for style in PropagationStyle::ALL {
                    if let Successor::Facility(id) = hood.successor(style) {
                        assert!(hood.presence(id).is_some());
                    }
                }
            }
        }
    }

    #[test]
    fn cells_that_are_not_weakest_never_change() {
        let owners_rows: Vec<Vec<Option<usize>>> = (0..8)
            .map(|y| (0..8).map(|x| Some((x + y * 3) % 3)).collect())
            .collect();
        for style in PropagationStyle::ALL {
            let mut w = world(
                &[2, 6, 4],
                &owners_rows,
                DirectionMap::uniform(8, 8, Octant::Ne),
            );
            for y in 0..8 {
                for x in 0..8 {
                    let hood = Neighborhood::survey(&w, x, y).unwrap().unwrap();
                    let weakest = if style.ranks_by_score() {
                        hood.weakest_by_score()
                    } else {
                        hood.weakest_by_tally()
                    };
                    let before = hood.center;
                    if let Successor::Facility(id) = hood.successor(style) {
                        w.transfer(x, y, id);
                    }
                    if !weakest {
                        assert_eq!(w.grid().get(x, y).unwrap(), Some(before));
                    }
                }
            }
        }
    }

    #[test]
    fn sweep_updates_in_scan_order() {
        let mut w = world(
            &[10, 1, 5],
            &[vec![Some(0), Some(1), Some(2)]],
            DirectionMap::uniform(3, 1, Octant::N),
        );
        let conversions = sweep(&mut w, PropagationStyle::StrongestNeighbor).unwrap();
        assert_eq!(owners(&w), vec![Some(0), Some(0), Some(0)]);
        assert_eq!(conversions, 2);
    }
}
