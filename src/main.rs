// Main entry point for the rmbg-server application.
// Parses configuration, initializes the segmentation engine (fail-fast),
// configures the Axum router, and starts the HTTP server.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use rmbg_server::{
    engine::{EngineConfig, ExecutionProviderChoice, ModelVariant, RemovalEngine, SessionPolicy},
    shutdown_signal::shutdown_signal,
    web,
};
use tracing::Level;

/// Command line arguments for rmbg-server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct AppConfig {
    /// Hostname/IP to bind the server to. "*" listens on all interfaces.
    #[arg(long, env = "RMBG_SERVER_HOST", default_value = "*")]
    host: String,

    /// Port number to listen on.
    #[arg(short, long, env = "RMBG_SERVER_PORT", default_value_t = 8080)]
    port: u16,

    /// Segmentation model variant to load.
    #[arg(long, env = "RMBG_SERVER_MODEL_VARIANT", value_enum, default_value_t = ModelVariant::Standard)]
    model_variant: ModelVariant,

    /// Whether the model session is created once at startup (warm) or per
    /// request (cold).
    #[arg(long, env = "RMBG_SERVER_SESSION_POLICY", value_enum, default_value_t = SessionPolicy::Warm)]
    session_policy: SessionPolicy,

    /// Execution provider passed through to the model runtime.
    #[arg(long, env = "RMBG_SERVER_EXECUTION_PROVIDER", value_enum, default_value_t = ExecutionProviderChoice::Auto)]
    execution_provider: ExecutionProviderChoice,

    /// Per-request timeout in seconds. Inference latency counts against it.
    #[arg(long, env = "RMBG_SERVER_REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    // Parse command line args and environment variables
    let config = AppConfig::parse();

    // Initialize tracing subscriber for structured logging.
    // Logs will go to stdout. Adjust level and format as needed.
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Starting rmbg-server...");
    tracing::info!(
        "Model variant: {:?}, session policy: {:?}",
        config.model_variant,
        config.session_policy
    );

    // --- Initialize the segmentation engine ---
    // Downloads the model on first run and, under the warm policy, creates
    // the model session before any request is accepted. A failure here means
    // the server cannot do its one job, so it must not start serving.
    let engine = RemovalEngine::new(EngineConfig {
        variant: config.model_variant,
        policy: config.session_policy,
        execution_provider: config.execution_provider,
    })
    .await
    .unwrap_or_else(|err| {
        tracing::error!("FATAL: Failed to initialize segmentation engine: {err}");
        eprintln!("FATAL: Segmentation engine initialization failed. See logs for details. Exiting.");
        std::process::exit(1);
    });
    tracing::info!(
        "Segmentation engine initialized ({} session(s) created).",
        engine.initializations()
    );

    // --- Build Axum Application Router ---
    let app = web::create_app(
        Arc::new(engine),
        Duration::from_secs(config.request_timeout_secs),
    );
    tracing::info!("Axum router configured.");

    // --- Start HTTP Server ---
    let listener = match web::create_listener(&config.host, config.port).await {
        Ok((addr, listener)) => {
            tracing::info!("Server successfully bound. Listening on {}", addr);
            listener
        }
        Err(e) => {
            tracing::error!("FATAL: Failed to bind server: {}", e);
            eprintln!("FATAL: Could not bind server. Error: {}. Exiting.", e);
            std::process::exit(1);
        }
    };

    // Run the server.
    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server run error: {}", e);
        eprintln!("ERROR: Server shut down unexpectedly. Error: {}", e);
    }

    tracing::info!("rmbg-server has shut down.");
}
