pub mod economics;
pub mod engine;
pub mod error;
pub mod facility;
pub mod layers;
pub mod rng;
pub mod scenario;
pub mod systems;
pub mod web;
pub mod world;

pub use engine::{Engine, EngineBuilder, EngineSettings, StyleSelector, TickSummary};
pub use error::{SimError, SimResult};
pub use scenario::{Scenario, ScenarioLoader};
pub use world::World;
