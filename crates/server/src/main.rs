//! The `vigil` binary: load configuration, assemble the pipeline, serve the
//! stats/query API, and shut down cleanly on SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vigil_pipeline::PipelineBuilder;
use vigil_server::api::{self, AppState};
use vigil_server::config::VigilConfig;
use vigil_server::error::ServerError;
use vigil_server::factory;

#[derive(Debug, Parser)]
#[command(name = "vigil", about = "Autonomous network-defense pipeline")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Force offline mode: mocked threat intel, no credentials needed.
    #[arg(long)]
    offline: bool,

    /// Force the synthetic packet source with the given profile
    /// (benign, port_scan, exfiltration).
    #[arg(long)]
    synthetic: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => VigilConfig::load(path)?,
        None => VigilConfig::default(),
    };
    if cli.offline {
        config.intel.offline_mode = true;
    }
    if let Some(profile) = &cli.synthetic {
        config.source.kind = "synthetic".to_owned();
        config.source.profile = profile.clone();
    }

    let bus = factory::build_bus(&config)?;
    let repository = factory::build_repository(&config).await?;
    let (providers, cache) = factory::build_providers(&config);

    let mut builder = PipelineBuilder::new()
        .bus(Arc::clone(&bus))
        .repository(Arc::clone(&repository))
        .detection_config(factory::detection_config(&config))
        .intel_config(factory::intel_config(&config))
        .intel_cache(cache)
        .response_config(factory::response_config(&config))
        .safety_gate(factory::safety_gate(&config))
        .data_plane(factory::data_plane(&config));
    for handle in providers {
        builder = builder.provider(handle);
    }
    let pipeline = Arc::new(
        builder
            .build()
            .map_err(|e| ServerError::Configuration(e.to_string()))?,
    );

    let source = factory::build_source(&config).await?;
    pipeline
        .start(source)
        .await
        .map_err(|e| ServerError::Configuration(e.to_string()))?;

    let state = AppState {
        repository,
        pipeline: Arc::clone(&pipeline),
    };
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ServerError::Configuration(format!("bad bind address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Configuration(format!("cannot bind {addr}: {e}")))?;
    info!(%addr, "api listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!(error = %e, "server error");
    }

    pipeline.shutdown().await;
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
