use crate::config::env::{self, EnvKey};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("{0} must be at least 1")]
    NotPositive(&'static str),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub storage: StorageConfig,
    pub jwt_secret: String,
    pub public_media_url: String,
    pub upload_max_size: u64,
    pub storage_max_per_user: i64,
    pub ffmpeg: FfmpegConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub workers: usize,
    pub max_jobs: usize,
    pub use_gpu: bool,
    pub encoder: Option<String>,
    pub hwaccel: Option<String>,
    pub job_timeout_secs: u64,
    pub progress_ttl_secs: u64,
}

fn required(key: EnvKey) -> Result<String, ConfigError> {
    let name = key.as_str();
    env::get(key).map_err(|_| ConfigError::Missing(name))
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: required(EnvKey::DatabaseUrl)?,
            redis_url: required(EnvKey::RedisUrl)?,
            storage: StorageConfig {
                endpoint: required(EnvKey::S3Endpoint)?,
                region: env::get_or(EnvKey::S3Region, "us-east-1"),
                bucket: required(EnvKey::S3Bucket)?,
                access_key: required(EnvKey::S3AccessKey)?,
                secret_key: required(EnvKey::S3SecretKey)?,
            },
            jwt_secret: required(EnvKey::JwtSecret)?,
            public_media_url: env::get_or(EnvKey::PublicMediaUrl, "http://localhost:9000/videos/"),
            upload_max_size: env::get_parsed(EnvKey::UploadMaxSize, 100 * 1024 * 1024),
            storage_max_per_user: env::get_parsed(EnvKey::StorageMaxPerUser, 2 * 1024 * 1024 * 1024),
            ffmpeg: FfmpegConfig::from_env()?,
        })
    }
}

impl FfmpegConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            ffprobe_path: env::get_or(EnvKey::FfprobePath, "ffprobe"),
            workers: env::get_parsed(EnvKey::FfmpegWorkers, 2),
            max_jobs: env::get_parsed(EnvKey::FfmpegMaxJobs, 4),
            use_gpu: env::get_parsed(EnvKey::FfmpegUseGpu, false),
            encoder: env::get_opt(EnvKey::FfmpegEncoder),
            hwaccel: env::get_opt(EnvKey::FfmpegHwaccel),
            job_timeout_secs: env::get_parsed(EnvKey::FfmpegJobTimeoutSecs, 120),
            progress_ttl_secs: env::get_parsed(EnvKey::ProgressTtlSecs, 180),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NotPositive(EnvKey::FfmpegWorkers.as_str()));
        }
        if self.max_jobs == 0 {
            return Err(ConfigError::NotPositive(EnvKey::FfmpegMaxJobs.as_str()));
        }
        Ok(())
    }
}
