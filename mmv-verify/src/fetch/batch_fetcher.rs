//! Parallel multi-source batch fetcher
//!
//! **Shape of a batch:**
//! 1. Validate input, load any checkpoint, skip records it lists
//! 2. Worker pool: `buffer_unordered(concurrency)` over record ids; each
//!    record fans out to every source concurrently and joins them
//! 3. Each source attempt: rate-limiter token → per-request timeout →
//!    retry policy
//! 4. Workers send finished records to a single coordinator task, which
//!    owns `BatchProgress` and the checkpoint, persists after every record,
//!    and forwards results to the caller's stream
//!
//! Cancellation is cooperative: records already in flight finish, records
//! not yet started are dropped, and the checkpoint reflects exactly the
//! records that completed.

use crate::config::FetchConfig;
use crate::error::{FetchError, VerifyError, VerifyResult};
use crate::fetch::checkpoint::CheckpointStore;
use crate::fetch::rate_limiter::RateLimiterSet;
use crate::fetch::retry::{RetryOutcome, RetryPolicy};
use crate::resolve::Normalizer;
use crate::sources::{SourceAdapter, SourcePayload};
use crate::types::{
    AbsentSource, BatchProgress, Checkpoint, RecordFetchResult, SourceData, SourceId,
    UnverifiableReason, UnverifiableRecord,
};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use mmv_common::{EventBus, VerifyEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Final accounting of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub progress: BatchProgress,
    /// Cancellation stopped the batch before every record was processed
    pub cancelled: bool,
    pub unverifiable: Vec<UnverifiableRecord>,
}

/// Stream of per-record results
pub type RecordStream = Pin<Box<dyn Stream<Item = RecordFetchResult> + Send>>;

/// Handle to a running batch
pub struct FetchRun {
    /// Results in completion order; ends when the batch ends
    pub results: RecordStream,
    /// Latest progress, updated by the coordinator after every record
    pub progress: watch::Receiver<BatchProgress>,
    /// Resolves once the batch is finished and its checkpoint settled
    pub coordinator: JoinHandle<VerifyResult<BatchSummary>>,
}

impl FetchRun {
    /// Drain the stream and wait for the coordinator
    pub async fn collect(self) -> VerifyResult<(Vec<RecordFetchResult>, BatchSummary)> {
        let results: Vec<RecordFetchResult> = self.results.collect().await;
        let summary = self
            .coordinator
            .await
            .map_err(|e| VerifyError::Task(format!("batch coordinator failed: {}", e)))??;
        Ok((results, summary))
    }
}

/// Everything a record task needs, shared by all tasks of a batch
struct FetchContext {
    sources: Vec<Arc<dyn SourceAdapter>>,
    normalizer: Arc<Normalizer>,
    limiters: RateLimiterSet,
    retry: RetryPolicy,
    timeout: Duration,
}

impl FetchContext {
    /// Fetch one source for one record: token, timeout, retry
    async fn fetch_source(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        record_id: &str,
    ) -> RetryOutcome<SourcePayload> {
        let source = adapter.source_id();
        let limiter = self.limiters.get(source);
        let timeout = self.timeout;
        let label = format!("{}:{}", source, record_id);

        self.retry
            .run(&label, || async {
                if let Some(limiter) = &limiter {
                    limiter.acquire().await;
                }
                match tokio::time::timeout(timeout, adapter.fetch(record_id)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        after_ms: timeout.as_millis() as u64,
                    }),
                }
            })
            .await
    }

    /// Fetch every source for one record and join them
    async fn fetch_record(&self, record_id: String) -> RecordFetchResult {
        let outcomes = futures::future::join_all(
            self.sources
                .iter()
                .map(|adapter| self.fetch_source(adapter, &record_id)),
        )
        .await;

        let mut data = SourceData::new(record_id.clone());
        for (adapter, outcome) in self.sources.iter().zip(outcomes) {
            let source = adapter.source_id().clone();
            data.attempted_sources.push(source.clone());

            match outcome.result {
                Ok(payload) if !payload.is_empty() => {
                    let fetched_at = Utc::now();
                    for (field, raw) in &payload.fields {
                        if raw.trim().is_empty() {
                            continue;
                        }
                        data.values
                            .push(self.normalizer.observe(&source, field, raw, fetched_at));
                    }
                }
                Ok(_) => {
                    debug!(record_id = %record_id, source = %source, "Source returned no fields");
                    data.absent_sources.push(AbsentSource {
                        source,
                        error_kind: "empty".to_string(),
                        message: "source returned no fields".to_string(),
                        attempts: outcome.attempts,
                    });
                }
                Err(err) => {
                    debug!(
                        record_id = %record_id,
                        source = %source,
                        error = %err,
                        attempts = outcome.attempts,
                        "Source absent for record"
                    );
                    data.absent_sources.push(AbsentSource {
                        source,
                        error_kind: err.kind().to_string(),
                        message: err.to_string(),
                        attempts: outcome.attempts,
                    });
                }
            }
        }

        if data.values.is_empty() {
            warn!(
                record_id = %record_id,
                attempted = data.attempted_sources.len(),
                "All sources failed, record is unverifiable"
            );
            RecordFetchResult::Unverifiable(UnverifiableRecord {
                record_id,
                reason: UnverifiableReason::AllSourcesFailed,
                source_failures: data.absent_sources,
            })
        } else {
            RecordFetchResult::Fetched(data)
        }
    }
}

/// Concurrent, rate-limited, resumable fetcher over a fixed set of sources
pub struct BatchFetcher {
    sources: Vec<Arc<dyn SourceAdapter>>,
    normalizer: Arc<Normalizer>,
    limiters: RateLimiterSet,
    retry: RetryPolicy,
    timeout: Duration,
    concurrency: usize,
    checkpoints: Arc<dyn CheckpointStore>,
    event_bus: Option<EventBus>,
}

impl BatchFetcher {
    /// Validate configuration and build one rate limiter per source.
    ///
    /// Fails with [`VerifyError::Config`] before any work starts.
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        normalizer: Arc<Normalizer>,
        config: &FetchConfig,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> VerifyResult<Self> {
        config.validate()?;

        if sources.is_empty() {
            return Err(VerifyError::Config("at least one source adapter is required".to_string()));
        }
        let mut seen = HashSet::new();
        for adapter in &sources {
            if !seen.insert(adapter.source_id().clone()) {
                return Err(VerifyError::Config(format!(
                    "source '{}' registered twice",
                    adapter.source_id()
                )));
            }
        }

        let ids: Vec<SourceId> = sources.iter().map(|s| s.source_id().clone()).collect();
        let limiters = RateLimiterSet::from_config(config, ids.iter())?;

        Ok(Self {
            sources,
            normalizer,
            limiters,
            retry: RetryPolicy::from_config(config),
            timeout: config.timeout(),
            concurrency: config.concurrency,
            checkpoints,
            event_bus: None,
        })
    }

    /// Replace the retry policy derived from the config
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish batch events on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Limiters shared by every batch this fetcher runs
    pub fn rate_limiters(&self) -> &RateLimiterSet {
        &self.limiters
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources
            .iter()
            .map(|s| s.source_id().clone())
            .collect()
    }

    /// Start a batch.
    ///
    /// Loads the checkpoint for `batch_id` first; ids it lists are skipped,
    /// whatever their earlier outcome. Returns once work has been scheduled.
    pub async fn fetch_all(
        &self,
        batch_id: &str,
        record_ids: Vec<String>,
        cancel: CancellationToken,
    ) -> VerifyResult<FetchRun> {
        if batch_id.trim().is_empty() {
            return Err(VerifyError::Config("batch id must not be empty".to_string()));
        }
        if record_ids.is_empty() {
            return Err(VerifyError::Config("record id list must not be empty".to_string()));
        }

        let mut unique = HashSet::new();
        let record_ids: Vec<String> = record_ids
            .into_iter()
            .filter(|id| unique.insert(id.clone()))
            .collect();

        let checkpoint = self
            .checkpoints
            .load(batch_id)
            .await?
            .unwrap_or_else(|| Checkpoint::new(batch_id));

        let total = record_ids.len();
        let (skipped, pending): (Vec<String>, Vec<String>) = record_ids
            .into_iter()
            .partition(|id| checkpoint.contains(id));

        let mut progress = BatchProgress::new(total, checkpoint);
        progress.skipped = skipped.len();

        info!(
            batch_id = %batch_id,
            total,
            resumed_skipped = skipped.len(),
            concurrency = self.concurrency,
            sources = self.sources.len(),
            "Starting batch fetch"
        );
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(VerifyEvent::BatchStarted {
                batch_id: batch_id.to_string(),
                total,
                resumed_skipped: skipped.len(),
                timestamp: Utc::now(),
            });
        }

        let (progress_tx, progress_rx) = watch::channel(progress.clone());
        let (done_tx, done_rx) = mpsc::unbounded_channel::<RecordFetchResult>();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RecordFetchResult>();

        // Workers: bounded pool over pending record ids
        let context = Arc::new(FetchContext {
            sources: self.sources.clone(),
            normalizer: Arc::clone(&self.normalizer),
            limiters: self.limiters.clone(),
            retry: self.retry.clone(),
            timeout: self.timeout,
        });
        let concurrency = self.concurrency;
        let worker_cancel = cancel.clone();
        let workers = tokio::spawn(async move {
            let gate = worker_cancel.clone();
            stream::iter(pending)
                .take_while(move |_| futures::future::ready(!gate.is_cancelled()))
                .map(|record_id| {
                    let context = Arc::clone(&context);
                    let cancel = worker_cancel.clone();
                    async move {
                        // Queued but not started when cancellation arrived
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some(context.fetch_record(record_id).await)
                    }
                })
                .buffer_unordered(concurrency)
                .for_each(|result| {
                    if let Some(result) = result {
                        // Coordinator gone means the batch is being torn down
                        let _ = done_tx.send(result);
                    }
                    futures::future::ready(())
                })
                .await;
        });

        let coordinator = Coordinator {
            batch_id: batch_id.to_string(),
            progress,
            progress_tx,
            checkpoints: Arc::clone(&self.checkpoints),
            event_bus: self.event_bus.clone(),
            unverifiable: Vec::new(),
        };
        let coordinator = tokio::spawn(coordinator.run(done_rx, out_tx, workers, cancel));

        let results = async_stream::stream! {
            while let Some(result) = out_rx.recv().await {
                yield result;
            }
        };

        Ok(FetchRun {
            results: Box::pin(results),
            progress: progress_rx,
            coordinator,
        })
    }
}

/// Single owner of batch progress and the checkpoint
struct Coordinator {
    batch_id: String,
    progress: BatchProgress,
    progress_tx: watch::Sender<BatchProgress>,
    checkpoints: Arc<dyn CheckpointStore>,
    event_bus: Option<EventBus>,
    unverifiable: Vec<UnverifiableRecord>,
}

impl Coordinator {
    fn emit(&self, event: VerifyEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }

    async fn run(
        mut self,
        mut done_rx: mpsc::UnboundedReceiver<RecordFetchResult>,
        out_tx: mpsc::UnboundedSender<RecordFetchResult>,
        workers: JoinHandle<()>,
        cancel: CancellationToken,
    ) -> VerifyResult<BatchSummary> {
        while let Some(result) = done_rx.recv().await {
            self.record_completed(&result).await;
            // Caller may have dropped the stream; keep checkpointing anyway
            let _ = out_tx.send(result);
        }
        drop(out_tx);

        workers
            .await
            .map_err(|e| VerifyError::Task(format!("fetch workers failed: {}", e)))?;

        let cancelled = cancel.is_cancelled() && self.progress.remaining() > 0;
        if cancelled {
            self.checkpoints.save(&self.progress.checkpoint).await?;
            info!(
                batch_id = %self.batch_id,
                completed = self.progress.completed,
                remaining = self.progress.remaining(),
                "Batch cancelled, checkpoint saved"
            );
            self.emit(VerifyEvent::BatchCancelled {
                batch_id: self.batch_id.clone(),
                completed: self.progress.completed,
                remaining: self.progress.remaining(),
                timestamp: Utc::now(),
            });
        } else {
            if let Err(e) = self.checkpoints.discard(&self.batch_id).await {
                warn!(batch_id = %self.batch_id, error = %e, "Failed to discard checkpoint");
            }
            info!(
                batch_id = %self.batch_id,
                completed = self.progress.completed,
                failed = self.progress.failed,
                skipped = self.progress.skipped,
                "Batch fetch completed"
            );
            self.emit(VerifyEvent::BatchCompleted {
                batch_id: self.batch_id.clone(),
                completed: self.progress.completed,
                failed: self.progress.failed,
                timestamp: Utc::now(),
            });
        }

        Ok(BatchSummary {
            batch_id: self.batch_id,
            progress: self.progress,
            cancelled,
            unverifiable: self.unverifiable,
        })
    }

    async fn record_completed(&mut self, result: &RecordFetchResult) {
        let record_id = result.record_id().to_string();
        self.progress.completed += 1;

        match result {
            RecordFetchResult::Fetched(data) => {
                self.emit(VerifyEvent::RecordFetched {
                    batch_id: self.batch_id.clone(),
                    record_id: record_id.clone(),
                    sources_ok: data.responding_sources().len(),
                    sources_absent: data.absent_sources.len(),
                });
            }
            RecordFetchResult::Unverifiable(record) => {
                self.progress.failed += 1;
                self.unverifiable.push(record.clone());
                self.emit(VerifyEvent::RecordUnverifiable {
                    batch_id: self.batch_id.clone(),
                    record_id: record_id.clone(),
                    reason: record.reason.to_string(),
                });
            }
        }

        self.progress.checkpoint.mark_processed(&record_id);
        if let Err(e) = self.checkpoints.save(&self.progress.checkpoint).await {
            warn!(
                batch_id = %self.batch_id,
                record_id = %record_id,
                error = %e,
                "Checkpoint save failed, continuing batch"
            );
        }

        self.progress_tx.send_replace(self.progress.clone());
        self.emit(VerifyEvent::ProgressUpdated {
            batch_id: self.batch_id.clone(),
            total: self.progress.total,
            completed: self.progress.completed,
            failed: self.progress.failed,
            skipped: self.progress.skipped,
        });
        debug!(
            batch_id = %self.batch_id,
            record_id = %record_id,
            completed = self.progress.completed,
            remaining = self.progress.remaining(),
            "Record fetch set completed"
        );
    }
}
