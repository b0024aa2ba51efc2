//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. HOST / PORT environment variables (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_ANALYSIS__TIMEOUT_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The configuration is loaded once at startup and never mutated afterwards. It is shared
//! with every worker through an `Arc` inside `AppState`.

use anyhow::{Context, Result};        // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                         // For reading environment variables
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, cors, analysis, tempo)
/// keeps each concern small and lets environment overrides target one group at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub analysis: AnalysisConfig,
    pub tempo: TempoConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to (e.g., "127.0.0.1", "0.0.0.0")
/// - `port`: TCP port number to listen on (8000 matches what the web frontend calls)
/// - `workers`: Number of actix worker threads, 0 means "one per physical core"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

/// Cross-origin policy for browsers calling the API.
///
/// The analysis endpoint is public and stateless, so the default policy is fully open:
/// every origin is accepted (and echoed back so credentialed requests still work).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins, `"*"` accepts any origin
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: usize,
}

/// Upload handling and pipeline limits.
///
/// ## Fields:
/// - `sample_rate`: Rate every upload is resampled to before tempo analysis
/// - `upload_field`: Multipart field name that carries the audio file
/// - `default_suffix`: Temp-file suffix used when the client filename gives no usable hint
/// - `temp_dir`: Where scoped upload files live (`None` = OS temp directory)
/// - `max_upload_bytes`: Uploads larger than this are rejected while streaming
/// - `max_duration_secs`: Decoded audio longer than this is rejected
/// - `max_concurrent_analyses`: Size of the analysis admission pool
/// - `queue_timeout_secs`: How long a request may wait for an analysis slot
/// - `timeout_secs`: Upper bound on one decode + estimate run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub sample_rate: u32,
    pub upload_field: String,
    pub default_suffix: String,
    pub temp_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub max_duration_secs: f64,
    pub max_concurrent_analyses: usize,
    pub queue_timeout_secs: u64,
    pub timeout_secs: u64,
}

/// Tuning for the tempo estimator.
///
/// ## Tuning guidelines:
/// - `min_bpm` / `max_bpm`: Search range; the defaults follow common rhythm extractors (40-208)
/// - `prior_bpm`: Centre of the tempo preference used to pick between octave candidates
/// - `window_size` / `hop_size`: STFT framing (window must be a power of two)
/// - `tightness`: How strongly beat tracking sticks to the estimated period
/// - `min_duration_secs`: Shorter clips get the "no tempo" sentinel
/// - `silence_threshold`: RMS level below which audio counts as silence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoConfig {
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub prior_bpm: f64,
    pub window_size: usize,
    pub hop_size: usize,
    pub tightness: f64,
    pub min_duration_secs: f64,
    pub silence_threshold: f32,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8000,
                workers: 0,
            },
            cors: CorsConfig {
                allowed_origins: vec!["*".to_string()],
                allow_credentials: true,
                max_age_secs: 3600,             // Cache preflight results for 1 hour
            },
            analysis: AnalysisConfig {
                sample_rate: 44_100,
                upload_field: "file".to_string(),
                default_suffix: ".mp3".to_string(),
                temp_dir: None,
                max_upload_bytes: 50 * 1024 * 1024,  // 50MB
                max_duration_secs: 900.0,            // 15 minutes of audio
                max_concurrent_analyses: default_analysis_slots(),
                queue_timeout_secs: 30,
                timeout_secs: 120,
            },
            tempo: TempoConfig::default(),
        }
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: 40.0,
            max_bpm: 208.0,
            prior_bpm: 120.0,
            window_size: 1024,
            hop_size: 512,
            tightness: 100.0,
            min_duration_secs: 1.0,
            silence_threshold: 1e-4,
        }
    }
}

/// One analysis slot per available CPU, since every analysis is CPU-bound.
fn default_analysis_slots() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_ANALYSIS__MAX_CONCURRENT_ANALYSES=4`: Override the analysis pool size
    /// - `APP_TEMPO__MAX_BPM=240`: Widen the tempo search range
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    ///
    /// Nested keys use a double underscore because field names themselves contain
    /// single underscores (`max_upload_bytes`).
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        // Handle special environment variables used by deployment platforms
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings
            .build()?
            .try_deserialize()
            .context("Failed to deserialize application configuration")?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(anyhow::anyhow!("At least one CORS origin must be configured"));
        }

        let analysis = &self.analysis;
        if !(8_000..=192_000).contains(&analysis.sample_rate) {
            return Err(anyhow::anyhow!(
                "Analysis sample rate must be between 8000 and 192000 Hz, got {}",
                analysis.sample_rate
            ));
        }

        if analysis.upload_field.trim().is_empty() {
            return Err(anyhow::anyhow!("Upload field name cannot be empty"));
        }

        if analysis.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if analysis.max_duration_secs <= 0.0 {
            return Err(anyhow::anyhow!("Max audio duration must be greater than 0"));
        }

        if analysis.max_concurrent_analyses == 0 {
            return Err(anyhow::anyhow!("Max concurrent analyses must be greater than 0"));
        }

        if analysis.timeout_secs == 0 || analysis.queue_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Analysis and queue timeouts must be greater than 0"));
        }

        let tempo = &self.tempo;
        if tempo.min_bpm <= 0.0 || tempo.min_bpm >= tempo.max_bpm {
            return Err(anyhow::anyhow!(
                "Tempo range is invalid: min_bpm={} max_bpm={}",
                tempo.min_bpm, tempo.max_bpm
            ));
        }

        if tempo.max_bpm > 300.0 {
            return Err(anyhow::anyhow!("max_bpm cannot exceed 300, got {}", tempo.max_bpm));
        }

        if !tempo.window_size.is_power_of_two() || tempo.window_size < 256 {
            return Err(anyhow::anyhow!(
                "STFT window size must be a power of two >= 256, got {}",
                tempo.window_size
            ));
        }

        if tempo.hop_size == 0 || tempo.hop_size > tempo.window_size {
            return Err(anyhow::anyhow!(
                "Hop size must be in 1..={}, got {}",
                tempo.window_size, tempo.hop_size
            ));
        }

        if tempo.tightness <= 0.0 {
            return Err(anyhow::anyhow!("Beat tracking tightness must be positive"));
        }

        Ok(())  // All validation passed
    }
}
