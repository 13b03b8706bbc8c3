use std::sync::Arc;

use synergia_core::Config;
use synergia_refresh::{RefreshPipeline, RefreshScheduler};

pub struct AppState {
    pub config: Config,
    pub scheduler: Arc<RefreshScheduler>,
}

impl AppState {
    pub fn new(config: Config, scheduler: Arc<RefreshScheduler>) -> Self {
        Self { config, scheduler }
    }

    pub fn pipeline(&self) -> &RefreshPipeline {
        self.scheduler.pipeline()
    }
}
