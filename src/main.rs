use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tokio::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drivetrain_server::config::VehicleConfig;
use drivetrain_server::net::start_websocket_server;
use drivetrain_server::physics::PhysicsWorld;
use drivetrain_server::state::SharedGameState;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    Gt86,
    Tank,
}

#[derive(Parser, Debug)]
#[command(name = "drivetrain-server", version, about = "Fixed-rate vehicle drivetrain simulation over WebSocket")]
struct Opts {
    /// Vehicle config JSON; missing fields fall back to the preset defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Preset used when no config file is given
    #[arg(long, value_enum, default_value_t = Preset::Gt86)]
    preset: Preset,
    /// WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:9001")]
    bind: String,
    /// Fixed simulation rate
    #[arg(long, default_value_t = 60.0)]
    tick_hz: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::parse();
    if !(opts.tick_hz.is_finite() && opts.tick_hz > 0.0) {
        bail!("--tick-hz must be positive, got {}", opts.tick_hz);
    }

    let vehicle_config = match &opts.config {
        Some(path) => VehicleConfig::from_json_file(path)
            .with_context(|| format!("loading vehicle config {}", path.display()))?,
        None => match opts.preset {
            Preset::Gt86 => VehicleConfig::gt86(),
            Preset::Tank => VehicleConfig::tank(),
        },
    };
    info!(vehicle = %vehicle_config.name, tick_hz = opts.tick_hz, "starting drivetrain server");

    let state = Arc::new(Mutex::new(SharedGameState::new(vehicle_config)));
    let physics = Arc::new(Mutex::new(PhysicsWorld::new()));

    let server = tokio::spawn(start_websocket_server(opts.bind.clone(), Arc::clone(&state), Arc::clone(&physics)));

    let dt = (1.0 / opts.tick_hz) as f32;
    let mut ticker = interval(Duration::from_secs_f64(1.0 / opts.tick_hz));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if server.is_finished() {
            return server.await?;
        }

        let mut game = state.lock().await;
        let mut phys = physics.lock().await;

        game.sync_inputs(&mut phys);
        phys.step(dt);

        game.tick += 1;
        game.broadcast_snapshot(&phys);
    }
}
