//! Server configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use annolab_inference::InferenceConfig;

/// Server configuration.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Inference worker / compute stream count (default: `2`).
    pub inference_workers: usize,
    /// Total accelerator memory in MiB (default: `24576`).
    pub device_memory_mb: u64,
    /// Memory held back from batch planning in MiB (default: `2048`).
    pub reserved_memory_mb: u64,
    /// Upper bound on one forward pass in seconds (default: `60`).
    pub inference_timeout_secs: u64,
    /// Dispatcher poll interval in milliseconds (default: `250`).
    pub dispatch_poll_ms: u64,
    /// Root directory for export working dirs and archives
    /// (default: `./exports`).
    pub export_root: PathBuf,
    /// Root directory holding stored images as `<id>.png`
    /// (default: `./images`).
    pub image_root: PathBuf,
    /// Project ownership seed, `project:owner` pairs (default: `1:1`).
    ///
    /// Stands in for the external authorization service during local
    /// development.
    pub project_owners: Vec<(i64, i64)>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `HOST`                   | `0.0.0.0`               |
    /// | `PORT`                   | `3000`                  |
    /// | `CORS_ORIGINS`           | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                    |
    /// | `INFERENCE_WORKERS`      | `2`                     |
    /// | `DEVICE_MEMORY_MB`       | `24576`                 |
    /// | `RESERVED_MEMORY_MB`     | `2048`                  |
    /// | `INFERENCE_TIMEOUT_SECS` | `60`                    |
    /// | `DISPATCH_POLL_MS`       | `250`                   |
    /// | `EXPORT_ROOT`            | `./exports`             |
    /// | `IMAGE_ROOT`             | `./images`              |
    /// | `PROJECT_OWNERS`         | `1:1`                   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = env_parsed("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let project_owners = std::env::var("PROJECT_OWNERS")
            .unwrap_or_else(|_| "1:1".into())
            .split(',')
            .filter_map(|pair| {
                let (project, owner) = pair.split_once(':')?;
                Some((project.trim().parse().ok()?, owner.trim().parse().ok()?))
            })
            .collect();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_parsed("REQUEST_TIMEOUT_SECS", 30),
            inference_workers: env_parsed("INFERENCE_WORKERS", 2),
            device_memory_mb: env_parsed("DEVICE_MEMORY_MB", 24_576),
            reserved_memory_mb: env_parsed("RESERVED_MEMORY_MB", 2_048),
            inference_timeout_secs: env_parsed("INFERENCE_TIMEOUT_SECS", 60),
            dispatch_poll_ms: env_parsed("DISPATCH_POLL_MS", 250),
            export_root: std::env::var("EXPORT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./exports")),
            image_root: std::env::var("IMAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./images")),
            project_owners,
        }
    }

    /// The inference pool configuration derived from this server config.
    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            workers: self.inference_workers,
            device_memory_mb: self.device_memory_mb,
            reserved_memory_mb: self.reserved_memory_mb,
            inference_timeout: Duration::from_secs(self.inference_timeout_secs),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid value")),
        Err(_) => default,
    }
}
