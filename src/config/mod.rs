use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Shared directory holding completed downloads.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Number of jobs allowed to run at the same time.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Upper bound on a single job's run time.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Optional cap on waiting jobs; submissions beyond it are refused.
    #[serde(default)]
    pub max_queue_len: Option<usize>,

    /// Largest number of URLs accepted in one submission.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// yt-dlp executable
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: PathBuf,

    /// ffmpeg executable, used for the minivan re-encode
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Download rate passed to yt-dlp, in bytes per second.
    #[serde(default = "default_rate_limit_bytes")]
    pub rate_limit_bytes: u64,

    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_worker_count() -> usize {
    2
}

fn default_job_timeout_secs() -> u64 {
    30 * 60
}

fn default_max_batch_size() -> usize {
    100
}

fn default_ytdlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_rate_limit_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_socket_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("WORKER_COUNT must be at least 1"));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid("JOB_TIMEOUT_SECS must be at least 1"));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("MAX_BATCH_SIZE must be at least 1"));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, envy::Error> {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_queue_len, None);
        assert_eq!(config.rate_limit_bytes, 2_097_152);
        assert_eq!(config.job_timeout(), Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("WORKER_COUNT", "4"),
            ("MAX_QUEUE_LEN", "50"),
            ("DOWNLOAD_DIR", "/srv/media"),
        ])
        .unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_queue_len, Some(50));
        assert_eq!(config.download_dir, PathBuf::from("/srv/media"));
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        let config = from_pairs(&[("WORKER_COUNT", "0")]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
