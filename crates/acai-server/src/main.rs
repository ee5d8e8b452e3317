use acai_core::Orchestrator;
use acai_server::{
    config::{CliArgs, ServerConfig},
    echo::EchoModel,
    metrics::HttpMetrics,
    routes,
    telemetry::init_telemetry,
};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let telemetry = init_telemetry(&config.telemetry)?;
    let metrics = HttpMetrics::new(&telemetry.meter());
    let app = routes::router(Orchestrator::new(EchoModel), metrics);

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = &served {
        tracing::error!("Server exited with error: {e}");
    }

    // Flush telemetry even when the server failed, then report both.
    let flushed = telemetry.shutdown();
    served?;
    flushed?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting acai server on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting acai server on {} exporting via {:?}",
            config.server_addr,
            config.telemetry.exporter
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
