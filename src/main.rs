use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use landuse::{
    engine::{EngineBuilder, EngineSettings},
    scenario::ScenarioLoader,
    web::{self, WebServerConfig},
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Land-use territorial propagation simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a scenario headless, logging every tick
    Run {
        /// Path to the scenario YAML file
        #[arg(long, default_value = "scenarios/meadow.yaml")]
        scenario: PathBuf,

        /// Override tick count (uses scenario default when omitted)
        #[arg(long)]
        ticks: Option<u64>,

        /// Use this propagation style (0-3) every tick instead of a random draw
        #[arg(long)]
        style: Option<u8>,
    },
    /// Serve the browser viewer
    Serve {
        #[arg(long, default_value = "scenarios/meadow.yaml")]
        scenario: PathBuf,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Milliseconds between ticks while running
        #[arg(long, default_value_t = 100)]
        frame_ms: u64,

        #[arg(long)]
        style: Option<u8>,

        /// Stop after this many ticks (runs until Ctrl+C when omitted)
        #[arg(long)]
        ticks: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("landuse=info")),
        )
        .init();

    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    match cli.command {
        Command::Run {
            scenario,
            ticks,
            style,
        } => {
            let scenario = loader.load(&scenario)?;
            let mut world = scenario.build_world()?;
            let ticks = scenario.ticks(ticks);
            let settings = EngineSettings {
                scenario_name: scenario.name.clone(),
                seed: scenario.seed,
                styles: scenario.style_selector(style)?,
            };
            let mut engine = EngineBuilder::standard(settings).build();
            engine.run(&mut world, ticks)?;

            for (id, cells) in world.ownership() {
                info!(facility = %world.facilities().get(id).name, cells, "final ownership");
            }
            info!(scenario = %scenario.name, ticks, "scenario completed");
            Ok(())
        }
        Command::Serve {
            scenario,
            host,
            port,
            frame_ms,
            style,
            ticks,
        } => {
            let scenario = loader.load(&scenario)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(web::run(WebServerConfig {
                scenario,
                ticks,
                style,
                frame_interval: Duration::from_millis(frame_ms),
                host,
                port,
            }))
        }
    }
}
