//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment-platform environment variables (HOST, PORT, MODEL_SIZE)
//! 2. Prefixed environment variables (APP_SERVER_HOST, APP_MODELS_WHISPER_MODEL, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::transcription::model::ModelSize;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub limits: LimitsConfig,
}

/// Server bind settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any address (deployment)
/// - `port = 8000`: Default listening port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech-recognition model settings.
///
/// ## Model size trade-offs:
/// - Smaller variants: faster inference, less memory, lower accuracy
/// - Larger variants: slower inference, more memory, higher accuracy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Whisper variant to load at startup ("tiny", "base", "small", "medium", "large")
    pub whisper_model: String,
}

/// Request-level resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Upload ceiling, measured on the fully-read body
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            models: ModelsConfig {
                // Small and fast enough for CPU-only deployments
                whisper_model: "base".to_string(),
            },
            limits: LimitsConfig {
                max_upload_bytes: 25 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `APP_MODELS_WHISPER_MODEL=small`: Override the model variant
    /// - `HOST` / `PORT`: Deployment-platform conventions
    /// - `MODEL_SIZE=tiny`: Deployment-platform model selection
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(model) = env::var("MODEL_SIZE") {
            settings = settings.set_override("models.whisper_model", model)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Upload ceiling is non-zero
    /// - The configured model name is a known Whisper variant
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.limits.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Upload size limit must be greater than 0"));
        }

        self.models
            .whisper_model
            .parse::<ModelSize>()
            .map_err(|e| anyhow::anyhow!("Invalid whisper model: {}", e))?;

        Ok(())
    }

    /// The model variant as a typed value. Only valid after `validate()`.
    pub fn model_size(&self) -> Result<ModelSize> {
        self.models.whisper_model.parse::<ModelSize>()
    }
}
