//! Attach the local terminal to a remote project session.
//!
//! Run with: cargo run -p remote-terminal-attach -- <project-id>
//!
//! The session ends when the remote shell exits.

use std::{path::Path, path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::Parser;
use remote_terminal_core::{ClientConfig, DisplaySurface, ProjectId, SurfaceFactory};
use remote_terminal_session::{SessionEvent, SessionManager};
use remote_terminal_transport::{CrosstermSurface, WsConnector};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "rt-attach", version, about = "Attach to a remote terminal session")]
struct Args {
    /// Project whose terminal to attach to.
    project: String,
    /// Terminal server host (overrides config).
    #[arg(long)]
    host: Option<String>,
    /// Terminal server port (overrides config and build mode default).
    #[arg(long)]
    port: Option<u16>,
    /// Config file (defaults to <config dir>/remote-terminal/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Command to run once attached.
    #[arg(long)]
    run: Option<String>,
}

/// Hands the one stdout surface to the session.
struct StdoutSurfaces(Arc<CrosstermSurface>);

impl SurfaceFactory for StdoutSurfaces {
    fn create(&self, _project_id: &ProjectId) -> Arc<dyn DisplaySurface> {
        Arc::clone(&self.0) as Arc<dyn DisplaySurface>
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the remote terminal.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    let project_id = ProjectId::new(args.project).context("invalid project id")?;
    let config = load_config(args.config.as_deref())?
        .apply_env()?
        .with_overrides(args.host, args.port);

    let surface = Arc::new(CrosstermSurface::new());
    let mut resizes = surface.resize_events();
    let (manager, mut events) =
        SessionManager::new(WsConnector, StdoutSurfaces(Arc::clone(&surface)), config);

    let session = manager
        .attach(&project_id)
        .await
        .with_context(|| format!("failed to attach to project {project_id}"))?;
    session.bind("stdout");
    if let Err(e) = session.resize().await {
        tracing::warn!(error = %e, "Initial resize failed");
    }
    if let Some(command) = args.run.as_deref() {
        if let Err(e) = session.run(command).await {
            tracing::warn!(error = %e, command, "Failed to run command");
        }
    }

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                SessionEvent::Ended { reason, .. } => {
                    tracing::info!(?reason, "Session ended");
                    break;
                }
            },
            Some(_) = resizes.recv() => {
                if let Err(e) = session.resize().await {
                    tracing::warn!(error = %e, "Resize failed");
                }
            }
            else => break,
        }
    }

    session.destroy().await;
    eprintln!("\r\n[session ended]");
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    if let Some(path) = path {
        let Some(config) = ClientConfig::load(path)? else {
            bail!("config file {} not found", path.display());
        };
        return Ok(config);
    }
    match ClientConfig::default_path() {
        Some(path) => Ok(ClientConfig::load(&path)?.unwrap_or_default()),
        None => Ok(ClientConfig::default()),
    }
}
