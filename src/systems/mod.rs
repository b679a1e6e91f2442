mod direction;
mod propagation;
mod regions;
mod scoring;

pub use direction::{classify_directions, DirectionSystem};
pub use propagation::{
    sweep, Neighborhood, Presence, PropagationStyle, PropagationSystem, Successor,
};
pub use regions::{detect_regions, RegionSystem};
pub use scoring::{score_regions, ScoreDiagnostics, ScoringSystem};
