//! # Transcribe Backend - Main Application Entry Point
//!
//! Sets up the Actix-web HTTP server for the transcription service.
//!
//! ## Startup Sequence:
//! 1. **Load configuration** from config.toml and environment variables
//! 2. **Set up logging** (tracing with env-filter)
//! 3. **Load the Whisper model** once; startup fails if it cannot load
//! 4. **Build shared application state** (config + recognizer + converter)
//! 5. **Serve** with CORS, logging and metrics middleware
//! 6. **Handle graceful shutdown** on SIGINT/SIGTERM
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (TOML file + environment variables)
//! - **state**: Shared application state and request metrics
//! - **health**: Health/identity and metrics endpoints
//! - **middleware**: Request logging and metrics collection
//! - **handlers**: The transcription request handler
//! - **audio**: Converter boundary, WAV loading, scratch files
//! - **transcription**: Whisper model loading and inference
//! - **error**: Error taxonomy and HTTP mapping

mod audio;          // Converter, waveform loading, scratch files (audio/ directory)
mod config;         // Configuration management (config.rs)
mod error;          // Error handling types (error.rs)
mod handlers;       // HTTP request handlers (handlers/ directory)
mod health;         // Health and metrics endpoints (health.rs)
mod middleware;     // Custom middleware (middleware/ directory)
mod state;          // Application state management (state.rs)
mod transcription;  // Whisper model and recognizer (transcription/ directory)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio::convert::FfmpegConverter;
use config::AppConfig;
use state::AppState;
use transcription::Recognizer;

/// Process-wide shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting transcribe-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, model={}",
        config.server.host, config.server.port, config.models.whisper_model
    );

    // The model loads before the server binds; a service that cannot
    // transcribe should not accept traffic
    let recognizer = Recognizer::initialize(config.model_size()?).await?;

    let app_state = AppState::new(
        config.clone(),
        Arc::new(recognizer),
        Arc::new(FfmpegConverter::new()),
    );
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // All origins/methods/headers allowed; tighten for production
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(health::health_check))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/transcribe", web::post().to(handlers::transcribe_audio))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing with env-filter control.
///
/// `RUST_LOG` overrides the default of debug for this crate and info for
/// actix itself.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag until the signal handler sets it.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
