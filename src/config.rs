//! Configuration management

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub limits: LimitConfig,
    pub preview: PreviewConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Root directories of the content store. Each holds one subdirectory
/// per session.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub upload_root: PathBuf,
    pub thumbnail_root: PathBuf,
    pub merged_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitConfig {
    /// Maximum size of a single uploaded PDF in bytes
    pub max_file_size: u64,
    /// Maximum number of files accepted in one upload request
    pub max_files_per_request: usize,
    /// Maximum number of pages in one batch thumbnail request
    pub max_batch_pages: usize,
    /// Global cap on concurrent page renders
    pub render_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    /// Bounding box (long edge) for generated thumbnails, in pixels
    pub thumbnail_size: u32,
    /// JPEG quality (1-100)
    pub thumbnail_quality: u8,
    /// Rasterization DPI. Low on purpose: previews favor latency over fidelity.
    pub thumbnail_dpi: u32,
    /// Resampling filter name: nearest, triangle, catmullrom, gaussian, lanczos3
    pub resample_filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sessions older than this are swept, in seconds
    pub session_max_age_secs: u64,
    /// Interval between background sweeps, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
            },
            storage: StorageConfig {
                upload_root: PathBuf::from("temp/uploads"),
                thumbnail_root: PathBuf::from("temp/thumbnails"),
                merged_root: PathBuf::from("temp/merged"),
            },
            limits: LimitConfig {
                max_file_size: 50 * 1024 * 1024,
                max_files_per_request: 20,
                max_batch_pages: 100,
                render_concurrency: 4,
            },
            preview: PreviewConfig {
                thumbnail_size: 200,
                thumbnail_quality: 85,
                thumbnail_dpi: 72,
                resample_filter: "lanczos3".to_string(),
            },
            cleanup: CleanupConfig {
                session_max_age_secs: 3600,
                sweep_interval_secs: 1800,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
            },
            storage: StorageConfig {
                upload_root: env::var("UPLOAD_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.upload_root),
                thumbnail_root: env::var("THUMBNAIL_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.thumbnail_root),
                merged_root: env::var("MERGED_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.merged_root),
            },
            limits: LimitConfig {
                max_file_size: parse_var("MAX_FILE_SIZE", defaults.limits.max_file_size),
                max_files_per_request: parse_var(
                    "MAX_FILES_PER_REQUEST",
                    defaults.limits.max_files_per_request,
                ),
                max_batch_pages: parse_var("MAX_BATCH_PAGES", defaults.limits.max_batch_pages),
                render_concurrency: parse_var(
                    "RENDER_CONCURRENCY",
                    defaults.limits.render_concurrency,
                ),
            },
            preview: PreviewConfig {
                thumbnail_size: parse_var("THUMBNAIL_SIZE", defaults.preview.thumbnail_size),
                thumbnail_quality: parse_var(
                    "THUMBNAIL_QUALITY",
                    defaults.preview.thumbnail_quality,
                ),
                thumbnail_dpi: parse_var("THUMBNAIL_DPI", defaults.preview.thumbnail_dpi),
                resample_filter: env::var("RESAMPLE_FILTER")
                    .unwrap_or(defaults.preview.resample_filter),
            },
            cleanup: CleanupConfig {
                session_max_age_secs: parse_var(
                    "SESSION_TIMEOUT",
                    defaults.cleanup.session_max_age_secs,
                ),
                sweep_interval_secs: parse_var(
                    "CLEANUP_INTERVAL",
                    defaults.cleanup.sweep_interval_secs,
                ),
            },
        }
    }

    /// Create the content store roots if they do not exist yet
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.storage.upload_root)?;
        std::fs::create_dir_all(&self.storage.thumbnail_root)?;
        std::fs::create_dir_all(&self.storage.merged_root)?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
