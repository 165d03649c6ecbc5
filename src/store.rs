use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::MindmapError;

const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    #[default]
    None,
    Generating,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::None => "none",
            GenerationStatus::Generating => "generating",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: GenerationStatus,
    pub data: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(status: GenerationStatus, data: Option<Value>, updated_at: DateTime<Utc>) -> Self {
        Self {
            status,
            data,
            updated_at,
        }
    }
}

/// System of record for generation status. Reads and subscriptions may
/// deliver the same change in either order.
#[async_trait::async_trait]
pub trait StatusStore: Send + Sync {
    async fn fetch(&self, notebook_id: &str) -> Result<StatusRecord, MindmapError>;

    /// Write `status`. `None` for `data` keeps whatever is stored.
    async fn update(
        &self,
        notebook_id: &str,
        status: GenerationStatus,
        data: Option<Value>,
    ) -> Result<StatusRecord, MindmapError>;

    async fn subscribe(
        &self,
        notebook_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<StatusRecord>, MindmapError>;
}

#[async_trait::async_trait]
impl<T: StatusStore + ?Sized> StatusStore for Arc<T> {
    async fn fetch(&self, notebook_id: &str) -> Result<StatusRecord, MindmapError> {
        (**self).fetch(notebook_id).await
    }

    async fn update(
        &self,
        notebook_id: &str,
        status: GenerationStatus,
        data: Option<Value>,
    ) -> Result<StatusRecord, MindmapError> {
        (**self).update(notebook_id, status, data).await
    }

    async fn subscribe(
        &self,
        notebook_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<StatusRecord>, MindmapError> {
        (**self).subscribe(notebook_id).await
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, StatusRecord>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<StatusRecord>>>,
    history: HashMap<String, Vec<StatusRecord>>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Inner {
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn notify(&mut self, notebook_id: &str, record: &StatusRecord) {
        if let Some(subscribers) = self.subscribers.get_mut(notebook_id) {
            subscribers.retain(|tx| tx.send(record.clone()).is_ok());
        }
    }
}

/// Process-local store with push notifications. Each write gets a strictly
/// newer `updated_at` than the one before it. Only the last 64 writes per
/// notebook are kept in `history`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // No stamp, no notification.
    pub fn seed(&self, notebook_id: &str, record: StatusRecord) {
        self.inner.lock().records.insert(notebook_id.to_string(), record);
    }

    /// Deliver `record` to subscribers without storing it.
    pub fn push(&self, notebook_id: &str, record: StatusRecord) {
        self.inner.lock().notify(notebook_id, &record);
    }

    pub fn history(&self, notebook_id: &str) -> Vec<StatusRecord> {
        self.inner
            .lock()
            .history
            .get(notebook_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, notebook_id: &str) -> Option<StatusRecord> {
        self.inner.lock().records.get(notebook_id).cloned()
    }
}

#[async_trait::async_trait]
impl StatusStore for InMemoryStore {
    async fn fetch(&self, notebook_id: &str) -> Result<StatusRecord, MindmapError> {
        Ok(self.get(notebook_id).unwrap_or_default())
    }

    async fn update(
        &self,
        notebook_id: &str,
        status: GenerationStatus,
        data: Option<Value>,
    ) -> Result<StatusRecord, MindmapError> {
        let mut inner = self.inner.lock();
        let updated_at = inner.next_stamp();
        let data = match data {
            Some(data) => Some(data),
            None => inner.records.get(notebook_id).and_then(|r| r.data.clone()),
        };
        let record = StatusRecord::new(status, data, updated_at);

        inner.records.insert(notebook_id.to_string(), record.clone());
        let history = inner.history.entry(notebook_id.to_string()).or_default();
        if history.len() == HISTORY_LIMIT {
            history.remove(0);
        }
        history.push(record.clone());
        inner.notify(notebook_id, &record);
        Ok(record)
    }

    async fn subscribe(
        &self,
        notebook_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<StatusRecord>, MindmapError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .subscribers
            .entry(notebook_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
