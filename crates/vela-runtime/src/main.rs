//! Headless Vela demo.

use vela_runtime::ConfigManager;

fn main() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vela_runtime=info,vela_renderer=info,vela_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "vela.ron".into());
    let manager = ConfigManager::load(path);
    tracing::info!(config = %manager.path().display(), "Starting Vela");

    match vela_runtime::run(manager.config().clone()) {
        Ok((simulation, render)) => {
            tracing::info!(
                ticks = simulation.ticks,
                frames = render.frames,
                draws = render.stats.draw_calls,
                leaked = render.leaked.total(),
                "Vela finished"
            );
            if render.leaked.total() > 0 {
                std::process::exit(2);
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "Vela failed");
            std::process::exit(1);
        }
    }
}
