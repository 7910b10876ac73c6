//! Application state management

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::merge::MergeJobRegistry;
use crate::metrics::Metrics;
use crate::pdf::PdfEngine;
use crate::session::SessionRegistry;
use crate::thumbnail::ThumbnailService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    engine: Arc<dyn PdfEngine>,
    sessions: SessionRegistry,
    jobs: MergeJobRegistry,
    thumbnails: ThumbnailService,
    metrics: Metrics,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<dyn PdfEngine>) -> Self {
        let metrics = Metrics::new();
        let sessions = SessionRegistry::new(&config.storage, engine.clone());
        let jobs = MergeJobRegistry::new(
            config.storage.merged_root.clone(),
            engine.clone(),
            sessions.clone(),
        );
        let thumbnails = ThumbnailService::new(
            engine.clone(),
            metrics.clone(),
            &config.preview,
            &config.limits,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                engine,
                sessions,
                jobs,
                thumbnails,
                metrics,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn engine(&self) -> &Arc<dyn PdfEngine> {
        &self.inner.engine
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn jobs(&self) -> &MergeJobRegistry {
        &self.inner.jobs
    }

    pub fn thumbnails(&self) -> &ThumbnailService {
        &self.inner.thumbnails
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}
