//! Vigil host: one orchestrator per configured camera

use std::path::PathBuf;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vigil::source::ReplaySource;
use vigil::{Config, Orchestrator};

#[derive(Debug, Parser)]
#[command(name = "vigil", about = "Per-camera frame processing host")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Vigil launching...");

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    if config.cameras.is_empty() {
        return Err(eyre!("No cameras configured"));
    }

    let options = config.driver.options();
    let launcher = config.driver.launcher()?;

    let mut orchestrators = Vec::with_capacity(config.cameras.len());
    for camera in &config.cameras {
        let source = ReplaySource::new(&camera.source)?;
        let orchestrator = std::sync::Arc::new(Orchestrator::start(
            camera.worker.clone(),
            options.clone(),
            launcher.clone(),
        )?);
        info!("Camera {} online", orchestrator.camera());

        // Set up tx/rx
        let (tx, rx) = flume::bounded(1);
        tokio::spawn(source.run(tx));

        let runner = orchestrator.clone();
        tokio::spawn(async move { runner.run(rx).await });

        let mut live = orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match live.recv().await {
                    Ok(item) if item.frame.motion => {
                        info!("{}: motion at {}", item.camera, item.frame.timestamp);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!("Live feed skipped {} frames", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        orchestrators.push(orchestrator);
    }

    tokio::signal::ctrl_c().await?;
    info!("Vigil shutting down");

    for orchestrator in &orchestrators {
        orchestrator.stop();
    }
    for orchestrator in &orchestrators {
        let state = orchestrator.driver().terminated().await;
        if state != vigil::DriverState::Terminated {
            error!("Camera {} ended in state {:?}", orchestrator.camera(), state);
        }
    }

    Ok(())
}
