//! Vela runtime
//!
//! Two loops on two threads: the simulation owns the transform hierarchy and
//! sends deferred commands; the render loop owns the GPU and drains them once
//! per frame. A shared [`clock::ShutdownFlag`] stops both.

pub mod clock;
pub mod config;
pub mod error;
pub mod render_loop;
pub mod simulation;

pub use clock::{LoopClock, ShutdownFlag};
pub use config::{ConfigError, ConfigManager, DemoConfig, LoopConfig, LoopMode, RuntimeConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use render_loop::{run_render_loop, RenderSummary};
pub use simulation::{run_simulation_loop, Simulation, SimulationSummary};

use std::sync::mpsc;
use std::thread;

use vela_renderer::AssetStore;

/// Runs the demo on a simulation and a render thread until it finishes.
pub fn run(config: RuntimeConfig) -> RuntimeResult<(SimulationSummary, RenderSummary)> {
    let shutdown = ShutdownFlag::new();
    let assets = AssetStore::new();
    let (ready_tx, ready_rx) = mpsc::channel();

    let render = {
        let config = config.clone();
        let assets = assets.clone();
        let shutdown = shutdown.clone();
        thread::Builder::new().name("vela-render".into()).spawn(move || {
            let result = run_render_loop(&config, assets, shutdown.clone(), ready_tx);
            if let Err(err) = &result {
                tracing::error!(error = %err, "Render loop failed");
                shutdown.request();
            }
            result
        })?
    };

    let simulation = {
        let shutdown = shutdown.clone();
        thread::Builder::new().name("vela-simulation".into()).spawn(move || {
            let result = run_simulation_loop(&config, assets, shutdown.clone(), ready_rx);
            if let Err(err) = &result {
                tracing::error!(error = %err, "Simulation loop failed");
                shutdown.request();
            }
            result
        })?
    };

    let simulation = simulation
        .join()
        .map_err(|_| RuntimeError::ThreadPanicked("simulation"))?;
    shutdown.request();
    let render = render.join().map_err(|_| RuntimeError::ThreadPanicked("render"))?;
    Ok((simulation?, render?))
}
