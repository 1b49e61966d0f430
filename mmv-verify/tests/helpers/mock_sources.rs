//! Scripted Source Adapters
//!
//! In-memory catalogs with per-record scripted responses, so fetch tests
//! run without network access.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mmv_verify::resolve::Normalizer;
use mmv_verify::{
    FetchConfig, FetchError, SourceAdapter, SourceData, SourceId, SourcePayload,
    VerificationConfig,
};
use mmv_verify::fetch::RetryPolicy;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Response = Result<SourcePayload, FetchError>;

/// Catalog whose answers are scripted per record.
///
/// A scripted sequence is consumed one response per call; its last
/// response repeats. Unscripted records answer `NotFound`.
pub struct ScriptedSource {
    id: SourceId,
    scripts: Mutex<HashMap<String, VecDeque<Response>>>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new(id: &str) -> Self {
        Self {
            id: SourceId::from(id),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long inside every fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Always answer `record_id` with `payload`
    pub fn respond(self, record_id: &str, payload: SourcePayload) -> Self {
        self.script(record_id, vec![Ok(payload)])
    }

    /// Always fail `record_id` with `err`
    pub fn fail(self, record_id: &str, err: FetchError) -> Self {
        self.script(record_id, vec![Err(err)])
    }

    /// Answer `record_id` with `responses` in order, repeating the last
    pub fn script(self, record_id: &str, responses: Vec<Response>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(record_id.to_string(), responses.into());
        self
    }

    pub fn calls_for(&self, record_id: &str) -> u32 {
        self.calls.lock().unwrap().get(record_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// Records this source was asked about at least once
    pub fn records_called(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.calls.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn next_response(&self, record_id: &str) -> Response {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(record_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap(),
            None => Err(FetchError::NotFound(format!("{} unknown to {}", record_id, self.id))),
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn source_id(&self) -> &SourceId {
        &self.id
    }

    async fn fetch(&self, record_id: &str) -> Result<SourcePayload, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(record_id.to_string())
            .or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next_response(record_id)
    }
}

/// Upcast scripted sources for the fetcher
pub fn adapters(sources: &[Arc<ScriptedSource>]) -> Vec<Arc<dyn SourceAdapter>> {
    sources
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn SourceAdapter>)
        .collect()
}

pub fn payload(fields: &[(&str, &str)]) -> SourcePayload {
    fields.iter().copied().collect()
}

/// Fetch settings with no meaningful throttling or backoff
pub fn fast_fetch_config() -> FetchConfig {
    FetchConfig {
        concurrency: 4,
        default_rps: 1000.0,
        max_retries: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        jitter_ratio: 0.0,
        timeout_ms: 500,
        ..Default::default()
    }
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_ratio: 0.0,
        is_retryable: FetchError::is_retryable,
    }
}

/// Build `SourceData` the way the fetcher would, with a fixed timestamp
pub fn observe_record(
    config: &VerificationConfig,
    record_id: &str,
    observations: &[(&str, &str, &str)],
) -> SourceData {
    let normalizer = Normalizer::new(config);
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut data = SourceData::new(record_id);
    for (source, field, raw) in observations {
        let source = SourceId::from(*source);
        if !data.attempted_sources.contains(&source) {
            data.attempted_sources.push(source.clone());
        }
        data.values.push(normalizer.observe(&source, field, raw, at));
    }
    data
}
