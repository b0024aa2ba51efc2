//! # BPM Analyzer Backend - Main Application Entry Point
//!
//! This is the main entry point for the bpm-analyzer-backend web server.
//! It sets up an Actix-web HTTP server that accepts audio uploads and answers with the
//! tempo (BPM) and beat positions of the audio.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Request handling is asynchronous; CPU-heavy analysis is pushed onto
//!   the blocking thread pool so it never stalls a worker
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Error handling using Rust's Result type
//! - **Arc**: Immutable configuration shared by every worker
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared metrics and the analysis admission pool
//! - **routes**: Route table and CORS policy
//! - **handlers**: The `/analyze-bpm/` endpoint
//! - **analysis**: Upload → decode → tempo pipeline
//! - **audio** / **tempo** / **upload**: Decoding, estimation and scoped temp files
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and metrics
//! - **error**: HTTP error type and JSON error bodies

// Module declarations - These tell Rust about our other source files
mod analysis;    // Upload → decode → estimate pipeline (analysis.rs)
mod audio;       // Audio decoding and resampling (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod routes;      // Route table and CORS policy (routes.rs)
mod state;       // Application state management (state.rs)
mod tempo;       // Tempo and beat estimation (tempo/ directory)
mod upload;      // Scoped temporary upload files (upload.rs)

#[cfg(test)]
mod test_support;

// External crate imports - These are dependencies from Cargo.toml
use actix_web::{web, App, HttpServer, middleware::Logger};  // Web framework
use anyhow::{Context, Result};  // Better error handling with context
use config::AppConfig;          // Our custom configuration struct
use state::AppState;            // Our custom application state
use tracing::{error, info, warn};  // Structured logging
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Creates shared application state** that all requests can access
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    if let Some(dir) = &config.analysis.temp_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;
    }

    info!("Starting bpm-analyzer-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        max_concurrent_analyses = config.analysis.max_concurrent_analyses,
        timeout_secs = config.analysis.timeout_secs,
        sample_rate = config.analysis.sample_rate,
        "Analysis pool configured"
    );

    // Shared by every worker: immutable config, metrics and the analysis slots
    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let cors_config = config.cors.clone();

    info!("Starting HTTP server on {}", bind_addr);

    let mut server = HttpServer::new(move || {
        App::new()
            // Share our application state with all request handlers
            .app_data(web::Data::new(app_state.clone()))
            // Add middleware in order (they execute in reverse order for responses)
            .wrap(routes::cors_policy(&cors_config))       // Handle CORS
            .wrap(Logger::default())                       // Log HTTP requests
            .wrap(middleware::MetricsMiddleware)           // Collect performance metrics
            .wrap(middleware::RequestLogging)              // Custom request logging
            .configure(routes::configure)
    })
    // Signals are handled below so shutdown is logged and graceful
    .disable_signals();

    if config.server.workers > 0 {
        server = server.workers(config.server.workers);
    }

    let server = server
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind {}", bind_addr))?
        .run();

    // Get a handle to control the server and spawn it in a separate task
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            // Graceful: in-flight analyses finish and clean up their temp files
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "bpm_analyzer_backend=trace")
/// - If not set, defaults to "bpm_analyzer_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bpm_analyzer_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

/// Resolve when SIGTERM or SIGINT (Ctrl+C) arrives.
///
/// If a handler cannot be installed the failure is logged and that signal is ignored,
/// so the server keeps running instead of exiting at startup.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let sigint = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT"),
            Err(e) => {
                warn!("Failed to install SIGINT handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = sigterm => {}
        _ = sigint => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
