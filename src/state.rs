use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::storage::Storage;
use crate::modules::intake::validator::IntakeValidator;
use crate::modules::jobs::repository::JobStore;
use crate::workers::TranscodeQueue;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub storage: Arc<dyn Storage>,
    pub validator: Arc<IntakeValidator>,
    pub queue: TranscodeQueue,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        validator: IntakeValidator,
        queue: TranscodeQueue,
    ) -> Self {
        Self {
            config: Arc::new(config),
            jobs,
            storage,
            validator: Arc::new(validator),
            queue,
        }
    }
}
