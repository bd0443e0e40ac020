use anyhow::Result;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::settings::PipelineConfig;

/// Bounded worker pools for every remote-adapter call site and the
/// document-level concurrency cap (§5, §4.8). One process-wide instance,
/// shared via `AppState`.
#[derive(Clone)]
pub struct Limiters {
    /// Per-document page-level OCR concurrency (W in §4.8, default 5).
    pub ocr_pages: Arc<Semaphore>,
    /// Global cap on documents processed by the orchestrator at once —
    /// the strengthening suggested by §9 ("a portable implementation
    /// SHOULD add one").
    pub documents: Arc<Semaphore>,
    pub acquire_timeout: Duration,
}

impl Limiters {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            ocr_pages: Arc::new(Semaphore::new(cfg.ocr_worker_pool_size.max(1))),
            documents: Arc::new(Semaphore::new(cfg.max_concurrent_documents.max(1))),
            acquire_timeout: Duration::from_secs(cfg.adapter_acquire_timeout_seconds.max(1)),
        }
    }

    pub async fn acquire_timed(
        sem: Arc<Semaphore>,
        acquire_timeout: Duration,
        op: &'static str,
    ) -> Result<(OwnedSemaphorePermit, Duration)> {
        let start = Instant::now();

        let permit = tokio::time::timeout(acquire_timeout, sem.acquire_owned())
            .await
            .map_err(|_| anyhow::anyhow!("limiter acquire timeout for op={}", op))??;

        Ok((permit, start.elapsed()))
    }
}
