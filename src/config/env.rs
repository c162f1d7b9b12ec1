use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RedisUrl,
    S3Endpoint,
    S3Region,
    S3Bucket,
    S3AccessKey,
    S3SecretKey,
    JwtSecret,
    PublicMediaUrl,
    UploadMaxSize,
    StorageMaxPerUser,
    FfmpegPath,
    FfprobePath,
    FfmpegWorkers,
    FfmpegMaxJobs,
    FfmpegUseGpu,
    FfmpegEncoder,
    FfmpegHwaccel,
    FfmpegJobTimeoutSecs,
    ProgressTtlSecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::S3Region => "S3_REGION",
            EnvKey::S3Bucket => "S3_BUCKET",
            EnvKey::S3AccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::S3SecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::JwtSecret => "JWT_SECRET",
            EnvKey::PublicMediaUrl => "PUBLIC_MEDIA_URL",
            EnvKey::UploadMaxSize => "UPLOAD_MAX_SIZE",
            EnvKey::StorageMaxPerUser => "STORAGE_MAX_PER_USER",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::FfmpegWorkers => "FFMPEG_WORKERS",
            EnvKey::FfmpegMaxJobs => "FFMPEG_MAX_JOBS",
            EnvKey::FfmpegUseGpu => "FFMPEG_USE_GPU",
            EnvKey::FfmpegEncoder => "FFMPEG_ENCODER",
            EnvKey::FfmpegHwaccel => "FFMPEG_HWACCEL",
            EnvKey::FfmpegJobTimeoutSecs => "FFMPEG_JOB_TIMEOUT_SECS",
            EnvKey::ProgressTtlSecs => "PROGRESS_TTL_SECS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
