use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::{
    rng::{RngManager, SystemRng},
    systems::{
        DirectionSystem, PropagationStyle, RegionSystem, ScoreDiagnostics, ScoringSystem,
        PropagationSystem,
    },
    world::{RegionMap, World},
};

/// How the propagation style is chosen each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSelector {
    Fixed(PropagationStyle),
    /// Uniform draw from the `style` RNG stream.
    Random(Vec<PropagationStyle>),
}

impl StyleSelector {
    fn pick(&self, rng: &mut SystemRng<'_>) -> Result<PropagationStyle> {
        match self {
            StyleSelector::Fixed(style) => Ok(*style),
            StyleSelector::Random(choices) => choices
                .choose(rng)
                .copied()
                .ok_or_else(|| anyhow!("no propagation styles to choose from")),
        }
    }
}

pub struct EngineSettings {
    pub scenario_name: String,
    pub seed: u64,
    pub styles: StyleSelector,
}

pub struct EngineBuilder {
    settings: EngineSettings,
    systems: Vec<Box<dyn System>>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            systems: Vec::new(),
        }
    }

    /// The four tick stages in their required order.
    pub fn standard(settings: EngineSettings) -> Self {
        Self::new(settings)
            .with_system(RegionSystem::new())
            .with_system(ScoringSystem::new())
            .with_system(DirectionSystem::new())
            .with_system(PropagationSystem::new())
    }

    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn push_system(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    pub fn build(self) -> Engine {
        Engine {
            rng: RngManager::new(self.settings.seed),
            systems: self.systems,
            settings: self.settings,
        }
    }
}

pub struct Engine {
    rng: RngManager,
    systems: Vec<Box<dyn System>>,
    settings: EngineSettings,
}

impl Engine {
    /// Runs one tick: clears tick caches, picks the style, runs every system
    /// in order and advances the world clock.
    pub fn tick(&mut self, world: &mut World) -> Result<TickSummary> {
        world.begin_tick();
        let style = self.settings.styles.pick(&mut self.rng.stream("style"))?;
        let tick = world.tick() + 1;
        let ctx = SystemContext {
            tick,
            style,
            scenario_name: &self.settings.scenario_name,
        };

        let mut system_reports = Vec::with_capacity(self.systems.len());
        for system in &mut self.systems {
            let start = Instant::now();
            let mut rng_stream = self.rng.stream(system.name());
            system
                .run(&ctx, world, &mut rng_stream)
                .with_context(|| format!("system '{}' failed on tick {tick}", system.name()))?;
            let duration_ms = start.elapsed().as_secs_f64() * 1_000.0;
            debug!(tick, system = system.name(), duration_ms, "system finished");
            system_reports.push(SystemRunReport {
                name: system.name().to_string(),
                duration_ms,
            });
        }
        world.advance_time();

        let summary = TickSummary {
            tick: world.tick(),
            style,
            regions: world.regions().map_or(0, RegionMap::len),
            conversions: world.conversions(),
            diagnostics: world.diagnostics().cloned(),
            system_reports,
        };
        match &summary.diagnostics {
            Some(diagnostics) => info!(
                tick = summary.tick,
                style = style.code(),
                regions = summary.regions,
                conversions = summary.conversions,
                mean_cell_score = %diagnostics.mean_cell_score,
                mean_region_score = %diagnostics.mean_region_score,
                "tick complete"
            ),
            None => info!(
                tick = summary.tick,
                style = style.code(),
                conversions = summary.conversions,
                "tick complete"
            ),
        }
        Ok(summary)
    }

    pub fn run(&mut self, world: &mut World, ticks: u64) -> Result<()> {
        self.run_with_hook(world, ticks, |_, _| {})
    }

    /// Like [`Engine::run`], calling `hook` after every tick.
    pub fn run_with_hook<F>(&mut self, world: &mut World, ticks: u64, mut hook: F) -> Result<()>
    where
        F: FnMut(&TickSummary, &World),
    {
        for _ in 0..ticks {
            let summary = self.tick(world)?;
            hook(&summary, world);
        }
        Ok(())
    }

    pub fn scenario_name(&self) -> &str {
        &self.settings.scenario_name
    }
}

#[derive(Clone, Debug)]
pub struct SystemRunReport {
    pub name: String,
    pub duration_ms: f64,
}

#[derive(Clone, Debug)]
pub struct TickSummary {
    pub tick: u64,
    pub style: PropagationStyle,
    pub regions: usize,
    pub conversions: usize,
    pub diagnostics: Option<ScoreDiagnostics>,
    pub system_reports: Vec<SystemRunReport>,
}

pub struct SystemContext<'a> {
    pub tick: u64,
    pub style: PropagationStyle,
    pub scenario_name: &'a str,
}

pub trait System: Send {
    fn name(&self) -> &str;
    fn run(&mut self, ctx: &SystemContext, world: &mut World, rng: &mut SystemRng<'_>)
        -> Result<()>;
}
