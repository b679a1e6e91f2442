mod assets;

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{error, info, warn};

use crate::{
    engine::{Engine, EngineBuilder, EngineSettings, TickSummary},
    scenario::Scenario,
    world::{Frame, World},
};

#[derive(Clone, Serialize)]
pub struct UiFrame {
    pub frame: Frame,
    pub style: Option<u8>,
    pub conversions: usize,
    pub running: bool,
    pub completed: bool,
    pub failed: bool,
}

impl UiFrame {
    fn new(world: &World, summary: Option<&TickSummary>, running: bool, completed: bool) -> Self {
        Self {
            frame: world.frame(),
            style: summary.map(|s| s.style.code()),
            conversions: summary.map_or(0, |s| s.conversions),
            running,
            completed,
            failed: false,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    scenario: String,
    tick: u64,
    total_ticks: Option<u64>,
    running: bool,
    completed: bool,
    failed: bool,
}

struct AppState {
    broadcaster: broadcast::Sender<String>,
    latest_frame: Mutex<Option<UiFrame>>,
    running: AtomicBool,
    completed: AtomicBool,
    failed: AtomicBool,
    scenario_name: String,
    total_ticks: Option<u64>,
}

impl AppState {
    fn new(scenario_name: String, total_ticks: Option<u64>) -> Self {
        let (broadcaster, _) = broadcast::channel::<String>(64);
        Self {
            broadcaster,
            latest_frame: Mutex::new(None),
            running: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            scenario_name,
            total_ticks,
        }
    }

    fn latest(&self) -> Option<UiFrame> {
        self.latest_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, frame: UiFrame) {
        match serde_json::to_string(&frame) {
            Ok(payload) => {
                let _ = self.broadcaster.send(payload);
            }
            Err(err) => warn!("failed to encode frame: {err}"),
        }
        *self
            .latest_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }

    fn status(&self) -> StatusResponse {
        StatusResponse {
            scenario: self.scenario_name.clone(),
            tick: self.latest().map_or(0, |f| f.frame.tick),
            total_ticks: self.total_ticks,
            running: self.running.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Runs one tick and publishes its frame; returns whether the run is over.
    /// A failing tick stops the run and leaves it marked as failed.
    fn step(&self, engine: &mut Engine, world: &mut World, ticks: Option<u64>) -> Result<bool> {
        let summary = match engine.tick(world) {
            Ok(summary) => summary,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                self.failed.store(true, Ordering::SeqCst);
                self.publish(UiFrame {
                    failed: true,
                    ..UiFrame::new(world, None, false, false)
                });
                return Err(err);
            }
        };
        let completed = ticks.is_some_and(|limit| world.tick() >= limit);
        if completed {
            self.running.store(false, Ordering::SeqCst);
            self.completed.store(true, Ordering::SeqCst);
            info!(tick = world.tick(), "simulation completed");
        }
        self.publish(UiFrame::new(world, Some(&summary), !completed, completed));
        Ok(completed)
    }
}

pub struct WebServerConfig {
    pub scenario: Scenario,
    /// Stop after this many ticks; `None` runs until shutdown.
    pub ticks: Option<u64>,
    pub style: Option<u8>,
    pub frame_interval: Duration,
    pub host: String,
    pub port: u16,
}

/// Serves the territory viewer. The simulation starts paused and advances one
/// tick per frame interval while running.
pub async fn run(config: WebServerConfig) -> Result<()> {
    let WebServerConfig {
        scenario,
        ticks,
        style,
        frame_interval,
        host,
        port,
    } = config;

    let mut world = scenario.build_world()?;
    let settings = EngineSettings {
        scenario_name: scenario.name.clone(),
        seed: scenario.seed,
        styles: scenario.style_selector(style)?,
    };
    let mut engine = EngineBuilder::standard(settings).build();

    let state = Arc::new(AppState::new(scenario.name.clone(), ticks));
    state.publish(UiFrame::new(&world, None, false, false));

    let shutdown = Arc::new(AtomicBool::new(false));
    let sim_state = state.clone();
    let sim_shutdown = shutdown.clone();
    let sim_handle = tokio::task::spawn_blocking(move || -> Result<()> {
        while !sim_shutdown.load(Ordering::SeqCst) {
            if !sim_state.running.load(Ordering::SeqCst) {
                std::thread::sleep(frame_interval);
                continue;
            }
            if sim_state.step(&mut engine, &mut world, ticks)? {
                break;
            }
            std::thread::sleep(frame_interval);
        }
        Ok(())
    });

    let scenario_label = scenario.name.clone();
    tokio::spawn(async move {
        match sim_handle.await {
            Ok(Ok(())) => info!("simulation for '{scenario_label}' stopped"),
            Ok(Err(err)) => error!("simulation error: {err:?}"),
            Err(err) => error!("simulation task failed: {err:?}"),
        }
    });

    let router = Router::new()
        .route("/", get(index))
        .route("/styles.css", get(styles))
        .route("/app.js", get(script))
        .route("/api/frame", get(latest_frame))
        .route("/api/status", get(status))
        .route("/api/toggle", post(toggle))
        .route("/api/events", get(stream_events))
        .with_state(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = TcpListener::bind(addr).await?;
    info!("viewer live at http://{addr} (Ctrl+C to stop)");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;
    Ok(())
}

async fn shutdown_signal(shutdown: Arc<AtomicBool>) {
    let _ = tokio::signal::ctrl_c().await;
    shutdown.store(true, Ordering::SeqCst);
    info!("shutting down viewer");
}

async fn index() -> Html<&'static str> {
    Html(assets::INDEX_HTML)
}

async fn styles() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        assets::STYLES_CSS,
    )
}

async fn script() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        assets::APP_JS,
    )
}

async fn latest_frame(State(state): State<Arc<AppState>>) -> Json<Option<UiFrame>> {
    Json(state.latest())
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(state.status())
}

/// Flips between running and paused. A completed or failed run stays paused.
async fn toggle(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    if !state.completed.load(Ordering::SeqCst) && !state.failed.load(Ordering::SeqCst) {
        let was_running = state.running.fetch_xor(true, Ordering::SeqCst);
        info!(running = !was_running, "toggled simulation");
    }
    Json(state.status())
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcaster.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(payload) => Some(Ok(Event::default().data(payload))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(2))
            .text("keep-alive"),
    )
}
