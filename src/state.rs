use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::DbPool;
use crate::infrastructure::redis::client::RedisService;
use crate::infrastructure::storage::s3::StorageService;
use crate::workers::progress::ProgressStore;
use crate::workers::queue::JobQueue;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub redis: RedisService,
    pub storage: StorageService,
    pub jobs: JobQueue,
    pub progress: ProgressStore,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        redis: RedisService,
        storage: StorageService,
        jobs: JobQueue,
    ) -> Self {
        let progress = jobs.transcoder().progress().clone();
        Self {
            config,
            db,
            redis,
            storage,
            jobs,
            progress,
        }
    }
}
