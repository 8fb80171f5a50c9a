use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use crate::{analysis::AnalysisEngine, config::AppConfig};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub engine: AnalysisEngine,
    pub stats: Arc<Mutex<ServiceStats>>,
    pub started_at: Instant,
}

/// Contadores del proceso desde el arranque.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStats {
    pub analyses_completed: u64,
    pub analyses_failed: u64,
    pub files_processed: u64,
}

impl AppState {
    pub fn new(config: AppConfig, engine: AnalysisEngine) -> Self {
        Self {
            config,
            engine,
            stats: Arc::new(Mutex::new(ServiceStats::default())),
            started_at: Instant::now(),
        }
    }

    pub fn record(&self, update: impl FnOnce(&mut ServiceStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut stats);
    }

    pub fn stats_snapshot(&self) -> ServiceStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
