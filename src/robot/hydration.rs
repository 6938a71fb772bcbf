//! Asynchronous historical-bar hydration
//!
//! Backfill runs on a bounded worker pool, fully asynchronous from the
//! processing lane. The lane sees only the pending/completed latch and
//! the outcome channel; bars never flow into shared range state behind
//! its back.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::types::{Bar, ExecutionInstrument};

/// Capability interface to whatever can serve historical bars.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn fetch(
        &self,
        instrument: &ExecutionInstrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;
}

/// Source for deployments with no history service: every request
/// fails, which degrades streams to live-data-only operation.
pub struct UnavailableBarSource;

#[async_trait]
impl BarSource for UnavailableBarSource {
    async fn fetch(
        &self,
        _instrument: &ExecutionInstrument,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        anyhow::bail!("no historical bar source configured")
    }
}

/// Per-stream hydration latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationState {
    Idle,
    Pending,
    Completed,
    Failed,
}

/// Delivered on the engine's lane when a request finishes.
#[derive(Debug)]
pub struct HydrationOutcome {
    pub stream_id: String,
    pub result: Result<Vec<Bar>, String>,
}

/// Bounded background fetcher.
pub struct HydrationPool {
    source: Arc<dyn BarSource>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    tx: mpsc::Sender<HydrationOutcome>,
}

impl HydrationPool {
    pub fn new(
        source: Arc<dyn BarSource>,
        workers: usize,
        timeout: Duration,
    ) -> (Self, mpsc::Receiver<HydrationOutcome>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                source,
                semaphore: Arc::new(Semaphore::new(workers.max(1))),
                timeout,
                tx,
            },
            rx,
        )
    }

    /// Dispatch one request. The caller marks its latch Pending before
    /// calling; exactly one outcome per request comes back on the
    /// channel, success, failure or timeout alike.
    pub fn request(
        &self,
        stream_id: &str,
        instrument: &ExecutionInstrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) {
        let source = self.source.clone();
        let semaphore = self.semaphore.clone();
        let tx = self.tx.clone();
        let timeout = self.timeout;
        let stream_id = stream_id.to_string();
        let instrument = instrument.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // pool shut down
            };

            debug!("hydration fetch {} [{} .. {}]", stream_id, from, to);
            let result =
                match tokio::time::timeout(timeout, source.fetch(&instrument, from, to)).await {
                    Ok(Ok(bars)) => Ok(bars),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("hydration timed out after {:?}", timeout)),
                };

            if tx.send(HydrationOutcome { stream_id, result }).await.is_err() {
                warn!("hydration outcome dropped: engine gone");
            }
        });
    }
}
