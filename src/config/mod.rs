use std::env;
use std::time::Duration;
use anyhow::{Result, Context};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub api_prefix: String,
    pub max_file_size_mb: usize,
    pub max_concurrent_requests: usize,
    pub request_timeout_seconds: u64,
    pub worker_threads: usize,
    pub max_image_pixels: u64,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            api_prefix: "/api".to_string(),
            max_file_size_mb: 10,
            max_concurrent_requests: 100,
            request_timeout_seconds: 30,
            worker_threads: 4,
            max_image_pixels: 100_000_000,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Reads the process environment once. Unset or unparsable values fall
    /// back to the defaults; out-of-range values are rejected.
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let defaults = Config::default();

        // PORT is what most PaaS hosts inject, so it wins over SERVER_PORT.
        let server_port = match env::var("PORT") {
            Ok(_) => Self::parse_env_var("PORT", defaults.server_port),
            Err(_) => Self::parse_env_var("SERVER_PORT", defaults.server_port),
        }
        .context("Failed to parse SERVER_PORT")?;

        let config = Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| {
                info!("SERVER_HOST not set, using default: {}", defaults.server_host);
                defaults.server_host.clone()
            }),
            server_port,
            api_prefix: env::var("API_PREFIX")
                .map(|prefix| prefix.trim().to_string())
                .unwrap_or_else(|_| {
                    info!("API_PREFIX not set, using default: {}", defaults.api_prefix);
                    defaults.api_prefix.clone()
                }),
            max_file_size_mb: Self::parse_env_var("MAX_FILE_SIZE_MB", defaults.max_file_size_mb)
                .context("Failed to parse MAX_FILE_SIZE_MB")?,
            max_concurrent_requests: Self::parse_env_var(
                "MAX_CONCURRENT_REQUESTS",
                defaults.max_concurrent_requests,
            )
            .context("Failed to parse MAX_CONCURRENT_REQUESTS")?,
            request_timeout_seconds: Self::parse_env_var(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )
            .context("Failed to parse REQUEST_TIMEOUT_SECONDS")?,
            worker_threads: Self::parse_env_var("WORKER_THREADS", defaults.worker_threads)
                .context("Failed to parse WORKER_THREADS")?,
            max_image_pixels: Self::parse_env_var("MAX_IMAGE_PIXELS", defaults.max_image_pixels)
                .context("Failed to parse MAX_IMAGE_PIXELS")?,
            log_format: match env::var("LOG_FORMAT") {
                Ok(value) => Self::parse_log_format(&value),
                Err(_) => defaults.log_format,
            },
        };

        config.validate()?;

        info!("Configuration loaded successfully: {:?}", config);
        Ok(config)
    }

    pub fn parse_env_var<T>(var_name: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr + Copy + std::fmt::Debug,
        T::Err: std::fmt::Display,
    {
        match env::var(var_name) {
            Ok(val) => match val.trim().parse() {
                Ok(parsed) => Ok(parsed),
                Err(e) => {
                    warn!("Failed to parse {}: {} (using default: {:?})", var_name, e, default);
                    Ok(default)
                }
            },
            Err(_) => {
                info!("{} not set, using default: {:?}", var_name, default);
                Ok(default)
            }
        }
    }

    fn parse_log_format(value: &str) -> LogFormat {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" | "" => LogFormat::Pretty,
            other => {
                warn!("Unknown LOG_FORMAT {:?} (using default: pretty)", other);
                LogFormat::Pretty
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            return Err(anyhow::anyhow!("SERVER_PORT must be greater than 0"));
        }
        if self.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE_MB must be greater than 0"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(anyhow::anyhow!("MAX_CONCURRENT_REQUESTS must be greater than 0"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("REQUEST_TIMEOUT_SECONDS must be greater than 0"));
        }
        if self.worker_threads == 0 {
            return Err(anyhow::anyhow!("WORKER_THREADS must be greater than 0"));
        }
        if self.max_image_pixels == 0 {
            return Err(anyhow::anyhow!("MAX_IMAGE_PIXELS must be greater than 0"));
        }
        if !self.api_prefix.is_empty()
            && (!self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/'))
        {
            return Err(anyhow::anyhow!(
                "API_PREFIX must start with '/' and must not end with '/' (got {:?})",
                self.api_prefix
            ));
        }
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Joins the configured API prefix with a route path.
    pub fn route(&self, path: &str) -> String {
        format!("{}{}", self.api_prefix, path)
    }
}
