//! At-least-once delivery of backend mutations.
//!
//! A job is written to the store as pending before the first delivery
//! attempt and removed only after the backend acknowledged it. Transient
//! failures are retried with exponential backoff; whatever is still pending
//! afterwards waits for [`SyncOutbox::flush`]. A chain operation never fails
//! because its sync failed: callers get a [`SyncStatus`] instead.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::{
    backend::{BackendApi, BackendError, SyncJob},
    config::Outbox as OutboxConfig,
    metrics::{Metrics, NoopMetrics},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Delivered,
    /// Kept for a later flush.
    Pending { reason: String },
    /// Backend refused the job; it stays in the store for inspection.
    Rejected { reason: String },
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Delivered => "delivered",
            SyncStatus::Pending { .. } => "pending",
            SyncStatus::Rejected { .. } => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub key: String,
    pub job: SyncJob,
    pub state: EntryState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    fn new(job: SyncJob) -> Self {
        Self {
            key: job.idempotency_key(),
            job,
            state: EntryState::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("outbox io: {0}")]
    Io(#[from] std::io::Error),
    #[error("outbox encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait OutboxStore: Send + Sync + 'static {
    async fn put(&self, entry: OutboxEntry) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<OutboxEntry>, StoreError>;
}

#[derive(Default)]
pub struct MemoryOutboxStore {
    inner: Mutex<BTreeMap<String, OutboxEntry>>,
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn put(&self, entry: OutboxEntry) -> Result<(), StoreError> {
        self.inner.lock().insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(self.inner.lock().values().cloned().collect())
    }
}

/// JSON file, rewritten through a temp file and rename on every change.
pub struct FileOutboxStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<BTreeMap<String, OutboxEntry>>,
}

impl FileOutboxStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<OutboxEntry>>(&bytes)?
                .into_iter()
                .map(|e| (e.key.clone(), e))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries: tokio::sync::Mutex::new(entries) })
    }

    async fn persist(&self, entries: &BTreeMap<String, OutboxEntry>) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(&entries.values().collect::<Vec<_>>())?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for FileOutboxStore {
    async fn put(&self, entry: OutboxEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(entry.key.clone(), entry);
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl From<&OutboxConfig> for RetryPolicy {
    fn from(c: &OutboxConfig) -> Self {
        Self {
            initial_interval: c.initial_interval,
            max_interval: c.max_interval,
            max_elapsed: c.max_elapsed,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..ExponentialBackoff::default()
        }
    }
}

pub struct SyncOutbox {
    backend: Arc<dyn BackendApi>,
    store: Arc<dyn OutboxStore>,
    metrics: Arc<dyn Metrics>,
    policy: RetryPolicy,
}

impl SyncOutbox {
    pub fn new(backend: Arc<dyn BackendApi>, store: Arc<dyn OutboxStore>, policy: RetryPolicy) -> Self {
        Self { backend, store, metrics: Arc::new(NoopMetrics), policy }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Persist `job`, then deliver it.
    #[instrument(skip_all, fields(kind = job.kind()))]
    pub async fn submit(&self, job: SyncJob) -> SyncStatus {
        let entry = OutboxEntry::new(job);
        if let Err(e) = self.store.put(entry.clone()).await {
            // Delivery is still attempted; only crash safety is lost.
            error!(target: "outbox", key = %entry.key, error = %e, "failed to persist sync job");
        }
        self.deliver_entry(entry).await
    }

    /// Retry every pending entry. Rejected entries are left alone.
    pub async fn flush(&self) -> Result<Vec<(String, SyncStatus)>, StoreError> {
        let mut out = Vec::new();
        for entry in self.pending().await? {
            let key = entry.key.clone();
            out.push((key, self.deliver_entry(entry).await));
        }
        Ok(out)
    }

    pub async fn pending(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        self.entries_in(EntryState::Pending).await
    }

    pub async fn rejected(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        self.entries_in(EntryState::Rejected).await
    }

    /// Drop a rejected entry. Pending entries are never discarded; returns
    /// whether anything was removed.
    pub async fn discard(&self, key: &str) -> Result<bool, StoreError> {
        let rejected = self.store.list().await?.into_iter().any(|e| e.key == key && e.state == EntryState::Rejected);
        if rejected {
            self.store.remove(key).await?;
            info!(target: "outbox", %key, "rejected sync job discarded");
        }
        Ok(rejected)
    }

    /// Drop every rejected entry and return their keys.
    pub async fn purge_rejected(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in self.rejected().await? {
            self.store.remove(&entry.key).await?;
            keys.push(entry.key);
        }
        if !keys.is_empty() {
            info!(target: "outbox", count = keys.len(), "rejected sync jobs purged");
        }
        Ok(keys)
    }

    async fn entries_in(&self, state: EntryState) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut entries = self.store.list().await?;
        entries.retain(|e| e.state == state);
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn deliver_entry(&self, mut entry: OutboxEntry) -> SyncStatus {
        let (result, attempts) = self.deliver_with_retry(&entry.job).await;
        entry.attempts += attempts;

        let status = match result {
            Ok(()) => {
                info!(target: "outbox", key = %entry.key, attempts = entry.attempts, "sync job delivered");
                if let Err(e) = self.store.remove(&entry.key).await {
                    error!(target: "outbox", key = %entry.key, error = %e, "failed to drop delivered job");
                }
                SyncStatus::Delivered
            }
            Err(err) => {
                let reason = err.to_string();
                entry.last_error = Some(reason.clone());
                let status = if err.is_transient() {
                    warn!(target: "outbox", key = %entry.key, error = %reason, "sync job left pending");
                    SyncStatus::Pending { reason }
                } else {
                    error!(target: "outbox", key = %entry.key, error = %reason, "sync job rejected by backend");
                    entry.state = EntryState::Rejected;
                    SyncStatus::Rejected { reason }
                };
                if let Err(e) = self.store.put(entry).await {
                    error!(target: "outbox", error = %e, "failed to record sync failure");
                }
                status
            }
        };
        self.metrics.sync_result(status.label());
        status
    }

    async fn deliver_with_retry(&self, job: &SyncJob) -> (Result<(), BackendError>, u32) {
        let mut attempts = 0u32;
        let backend = &self.backend;
        let result = retry(self.policy.backoff(), || {
            attempts += 1;
            async move {
                backend.deliver(job).await.map_err(|e| {
                    if e.is_transient() {
                        warn!(target: "outbox", kind = job.kind(), error = %e, "backend delivery failed; retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await;
        (result, attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;
    use std::collections::VecDeque;

    /// Plays back scripted results, then succeeds.
    #[derive(Default)]
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<(), BackendError>>>,
        delivered: Mutex<Vec<SyncJob>>,
        calls: Mutex<u32>,
    }

    impl ScriptedBackend {
        fn with(script: Vec<Result<(), BackendError>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into()), ..Default::default() })
        }
    }

    #[async_trait]
    impl BackendApi for ScriptedBackend {
        async fn deliver(&self, job: &SyncJob) -> Result<(), BackendError> {
            *self.calls.lock() += 1;
            let next = self.script.lock().pop_front().unwrap_or(Ok(()));
            if next.is_ok() {
                self.delivered.lock().push(job.clone());
            }
            next
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed: Duration::from_millis(30),
        }
    }

    fn job(n: u8) -> SyncJob {
        SyncJob::LockerFinalized { allocation_id: format!("a{n}"), transaction_hash: H256::repeat_byte(n) }
    }

    fn server_error() -> BackendError {
        BackendError::Server { status: 503, body: "busy".into() }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_delivered() {
        let backend = ScriptedBackend::with(vec![Err(server_error()), Err(server_error())]);
        let store = Arc::new(MemoryOutboxStore::default());
        let outbox = SyncOutbox::new(backend.clone(), store.clone(), fast_policy());

        assert_eq!(outbox.submit(job(1)).await, SyncStatus::Delivered);
        assert_eq!(*backend.calls.lock(), 3);
        assert_eq!(backend.delivered.lock().len(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let backend = ScriptedBackend::with(vec![Err(BackendError::Rejected { status: 422, body: "bad".into() })]);
        let store = Arc::new(MemoryOutboxStore::default());
        let outbox = SyncOutbox::new(backend.clone(), store.clone(), fast_policy());

        assert!(matches!(outbox.submit(job(2)).await, SyncStatus::Rejected { .. }));
        assert_eq!(*backend.calls.lock(), 1);
        assert!(outbox.pending().await.unwrap().is_empty());
        let rejected = outbox.rejected().await.unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].attempts, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_stay_pending_until_flush() {
        let script = (0..1000).map(|_| Err(server_error())).collect();
        let backend = ScriptedBackend::with(script);
        let store = Arc::new(MemoryOutboxStore::default());
        let outbox = SyncOutbox::new(backend.clone(), store, fast_policy());

        assert!(matches!(outbox.submit(job(3)).await, SyncStatus::Pending { .. }));
        let pending = outbox.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].attempts >= 1);
        assert!(pending[0].last_error.as_deref().unwrap().contains("503"));

        backend.script.lock().clear();
        let flushed = outbox.flush().await.unwrap();
        assert_eq!(flushed, vec![(job(3).idempotency_key(), SyncStatus::Delivered)]);
        assert!(outbox.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_entries_can_be_discarded() {
        let rejected = || Err(BackendError::Rejected { status: 422, body: "bad".into() });
        let mut script = vec![rejected(), rejected()];
        script.extend((0..1000).map(|_| Err(server_error())));
        let backend = ScriptedBackend::with(script);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outbox.json");
        let outbox = SyncOutbox::new(backend, Arc::new(FileOutboxStore::open(&path).await.unwrap()), fast_policy());

        outbox.submit(job(6)).await;
        outbox.submit(job(7)).await;
        assert!(matches!(outbox.submit(job(8)).await, SyncStatus::Pending { .. }));
        assert_eq!(outbox.rejected().await.unwrap().len(), 2);

        // pending work is never dropped
        assert!(!outbox.discard(&job(8).idempotency_key()).await.unwrap());
        assert!(!outbox.discard("unknown").await.unwrap());
        assert!(outbox.discard(&job(6).idempotency_key()).await.unwrap());

        assert_eq!(outbox.purge_rejected().await.unwrap(), vec![job(7).idempotency_key()]);
        assert!(outbox.rejected().await.unwrap().is_empty());
        assert_eq!(outbox.pending().await.unwrap().len(), 1);

        let reopened = FileOutboxStore::open(&path).await.unwrap();
        let left = reopened.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].job, job(8));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.json");

        let store = FileOutboxStore::open(&path).await.unwrap();
        store.put(OutboxEntry::new(job(4))).await.unwrap();
        store.put(OutboxEntry::new(job(5))).await.unwrap();
        drop(store);

        let store = FileOutboxStore::open(&path).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
        store.remove(&job(4).idempotency_key()).await.unwrap();
        drop(store);

        let store = FileOutboxStore::open(&path).await.unwrap();
        let left = store.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].job, job(5));
    }
}
