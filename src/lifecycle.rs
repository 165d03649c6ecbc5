use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tracing::{debug, info, warn};

use crate::error::MindmapError;
use crate::graph_ast::Graph;
use crate::normalize;
use crate::service::{GenerationContext, GenerationRequest, GenerationService};
use crate::store::{GenerationStatus, StatusRecord, StatusStore};

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub failure_timeout: Duration,
    pub status_watchdog: Duration,
    pub callback_url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            failure_timeout: Duration::from_secs(120),
            status_watchdog: Duration::from_secs(300),
            callback_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationSnapshot {
    pub cycle: u64,
    pub status: GenerationStatus,
    pub graph: Option<Graph>,
    pub error: Option<MindmapError>,
    /// `updated_at` of the newest record applied so far.
    pub observed_at: Option<DateTime<Utc>>,
}

struct Shared {
    notebook_id: String,
    store: Arc<dyn StatusStore>,
    service: Arc<dyn GenerationService>,
    config: GenerationConfig,
    snapshot: watch::Sender<GenerationSnapshot>,
    cycle: AtomicU64,
    // Cycle whose own `generating` write has not landed yet; zero when none.
    baseline_pending: AtomicU64,
}

/// Drives one notebook's mindmap from request to a settled status. Only the
/// latest `generate` call is live; earlier cycles are cancelled and their
/// late results ignored.
pub struct GenerationController {
    shared: Arc<Shared>,
    // Cycles start only while this is held, so the live task is always the
    // one for the current cycle.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GenerationController {
    pub fn new(
        notebook_id: impl Into<String>,
        store: Arc<dyn StatusStore>,
        service: Arc<dyn GenerationService>,
        config: GenerationConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(GenerationSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                notebook_id: notebook_id.into(),
                store,
                service,
                config,
                snapshot,
                cycle: AtomicU64::new(0),
                baseline_pending: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn notebook_id(&self) -> &str {
        &self.shared.notebook_id
    }

    pub fn snapshot(&self) -> GenerationSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GenerationSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Read the stored record. A record still marked `generating` resumes
    /// the timers without issuing a new request. While a cycle is running
    /// the record only counts as one more status update.
    pub async fn load(&self) -> Result<GenerationSnapshot, MindmapError> {
        let record = self.shared.store.fetch(&self.shared.notebook_id).await?;

        let mut task = self.task.lock();
        let cycle = self.shared.cycle.load(Ordering::SeqCst);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            drop(task);
            self.shared.apply(cycle, record);
            return Ok(self.snapshot());
        }

        self.shared.snapshot.send_modify(|snap| {
            snap.status = record.status;
            snap.observed_at = Some(record.updated_at);
            snap.error = None;
            snap.graph = None;
            if let Some(data) = &record.data {
                match usable_graph(data) {
                    Ok(graph) => snap.graph = Some(graph),
                    Err(err) if record.status == GenerationStatus::Completed => snap.error = Some(err),
                    Err(_) => {}
                }
            }
        });

        if record.status == GenerationStatus::Generating {
            self.start(&mut task, None)?;
        }
        drop(task);
        Ok(self.snapshot())
    }

    /// Start a new generation, superseding any in flight. Returns its cycle.
    /// Must be called from within a tokio runtime.
    pub fn generate(&self, context: GenerationContext) -> Result<u64, MindmapError> {
        if self.shared.notebook_id.trim().is_empty() {
            return Err(MindmapError::MissingNotebookId);
        }
        let mut request = GenerationRequest::new(self.shared.notebook_id.clone(), context);
        if let Some(url) = &self.shared.config.callback_url {
            request = request.with_callback_url(url.clone());
        }

        let mut task = self.task.lock();
        let cycle = self.start(&mut task, Some(request))?;
        debug!(notebook_id = %self.shared.notebook_id, cycle, "generation started");
        Ok(cycle)
    }

    pub async fn refresh(&self) -> GenerationSnapshot {
        let cycle = self.shared.cycle.load(Ordering::SeqCst);
        self.shared.poll(cycle).await;
        self.snapshot()
    }

    pub async fn settled(&self) -> GenerationSnapshot {
        let mut rx = self.subscribe();
        loop {
            {
                let snap = rx.borrow_and_update();
                if snap.status != GenerationStatus::Generating {
                    return snap.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    fn start(
        &self,
        slot: &mut Option<JoinHandle<()>>,
        request: Option<GenerationRequest>,
    ) -> Result<u64, MindmapError> {
        let runtime = Handle::try_current().map_err(|_| MindmapError::NoRuntime)?;

        let cycle = self.shared.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        if request.is_some() {
            self.shared.baseline_pending.store(cycle, Ordering::SeqCst);
        }
        self.shared.snapshot.send_modify(|snap| {
            snap.cycle = cycle;
            snap.status = GenerationStatus::Generating;
            snap.error = None;
        });

        let task = runtime.spawn(run_cycle(self.shared.clone(), cycle, request));
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        Ok(cycle)
    }
}

impl Drop for GenerationController {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn run_cycle(shared: Arc<Shared>, cycle: u64, request: Option<GenerationRequest>) {
    let deadline = Instant::now() + shared.config.failure_timeout;
    let id = shared.notebook_id.as_str();

    let mut updates = match shared.store.subscribe(id).await {
        Ok(rx) => Some(rx),
        Err(err) => {
            warn!(%err, "status subscription unavailable, relying on polling");
            None
        }
    };

    if let Some(request) = request {
        // Anything stamped at or before this write belongs to an older cycle.
        match shared.store.update(id, GenerationStatus::Generating, None).await {
            Ok(record) => shared.observe(cycle, record.updated_at),
            Err(err) => warn!(%err, "could not record generating status"),
        }
        let _ = shared
            .baseline_pending
            .compare_exchange(cycle, 0, Ordering::SeqCst, Ordering::SeqCst);

        match timeout_at(deadline, shared.service.request(&request)).await {
            Err(_) => return shared.time_out(cycle).await,
            Ok(Err(failure)) => {
                warn!(%failure, cycle, "generation request failed");
                if shared.fail(cycle, MindmapError::from(failure)) {
                    shared.write_back_failed(cycle).await;
                }
                return;
            }
            Ok(Ok(Some(payload))) => match usable_graph(&payload) {
                Ok(graph) => return shared.complete_directly(cycle, graph).await,
                Err(err) => debug!(%err, "direct answer held no mindmap, waiting for callback"),
            },
            Ok(Ok(None)) => {}
        }
    }

    let watchdog = sleep(shared.config.status_watchdog);
    tokio::pin!(watchdog);

    loop {
        tokio::select! {
            record = next_update(&mut updates) => {
                if shared.apply(cycle, record) {
                    return;
                }
            }
            _ = sleep_until(deadline) => return shared.time_out(cycle).await,
            _ = &mut watchdog => {
                debug!(cycle, "watchdog fired, re-fetching status");
                if shared.poll(cycle).await {
                    return;
                }
                watchdog.as_mut().reset(Instant::now() + shared.config.status_watchdog);
            }
        }
    }
}

// Pends forever once the subscription is gone so the timers take over.
async fn next_update(updates: &mut Option<mpsc::UnboundedReceiver<StatusRecord>>) -> StatusRecord {
    if let Some(rx) = updates.as_mut() {
        if let Some(record) = rx.recv().await {
            return record;
        }
        warn!("status subscription closed");
        *updates = None;
    }
    std::future::pending().await
}

impl Shared {
    fn is_current(&self, cycle: u64) -> bool {
        self.cycle.load(Ordering::SeqCst) == cycle
    }

    fn observe(&self, cycle: u64, at: DateTime<Utc>) {
        self.snapshot.send_if_modified(|snap| {
            if snap.cycle != cycle || snap.observed_at.is_some_and(|seen| at <= seen) {
                return false;
            }
            snap.observed_at = Some(at);
            true
        });
    }

    /// Returns true once the cycle is settled.
    fn apply(&self, cycle: u64, record: StatusRecord) -> bool {
        let mut settled = false;
        self.snapshot.send_if_modified(|snap| {
            if !self.is_current(cycle) || snap.cycle != cycle {
                debug!(cycle, "dropping update for superseded cycle");
                return false;
            }
            if self.baseline_pending.load(Ordering::SeqCst) == cycle {
                debug!(cycle, "ignoring status read before this cycle's baseline");
                return false;
            }
            if snap.status.is_terminal() {
                settled = true;
                return false;
            }
            if let Some(seen) = snap.observed_at {
                if record.updated_at <= seen {
                    debug!(cycle, status = %record.status, "ignoring stale status update");
                    return false;
                }
            }
            snap.observed_at = Some(record.updated_at);

            match record.status {
                GenerationStatus::Completed => match record.data.as_ref().map(usable_graph) {
                    Some(Ok(graph)) => {
                        info!(cycle, nodes = graph.nodes.len(), "mindmap generation completed");
                        snap.status = GenerationStatus::Completed;
                        snap.graph = Some(graph);
                        snap.error = None;
                        settled = true;
                    }
                    Some(Err(err)) => warn!(%err, cycle, "completed status carried unusable data"),
                    None => debug!(cycle, "completed status arrived before its data"),
                },
                GenerationStatus::Failed => {
                    warn!(cycle, "generation service reported failure");
                    snap.status = GenerationStatus::Failed;
                    snap.error = Some(MindmapError::GenerationFailedRemote(
                        "the generation service reported a failure".to_string(),
                    ));
                    settled = true;
                }
                GenerationStatus::Generating | GenerationStatus::None => {}
            }
            true
        });
        settled
    }

    async fn poll(&self, cycle: u64) -> bool {
        match self.store.fetch(&self.notebook_id).await {
            Ok(record) => self.apply(cycle, record),
            Err(err) => {
                warn!(%err, cycle, "status poll failed");
                false
            }
        }
    }

    fn fail(&self, cycle: u64, error: MindmapError) -> bool {
        self.snapshot.send_if_modified(|snap| {
            if !self.is_current(cycle) || snap.cycle != cycle || snap.status.is_terminal() {
                return false;
            }
            snap.status = GenerationStatus::Failed;
            snap.error = Some(error);
            true
        })
    }

    async fn time_out(&self, cycle: u64) {
        let after_secs = self.config.failure_timeout.as_secs();
        if self.fail(cycle, MindmapError::GenerationTimedOut { after_secs }) {
            warn!(cycle, after_secs, "mindmap generation timed out");
            self.write_back_failed(cycle).await;
        }
    }

    // A stale `generating` would block the next attempt.
    async fn write_back_failed(&self, cycle: u64) {
        if !self.is_current(cycle) {
            return;
        }
        match self
            .store
            .update(&self.notebook_id, GenerationStatus::Failed, None)
            .await
        {
            Ok(record) => self.observe(cycle, record.updated_at),
            Err(err) => warn!(%err, cycle, "could not write failed status back"),
        }
    }

    async fn complete_directly(&self, cycle: u64, graph: Graph) {
        let stored = self
            .store
            .update(
                &self.notebook_id,
                GenerationStatus::Completed,
                Some(graph.to_canonical_json()),
            )
            .await;
        let observed_at = match stored {
            Ok(record) => Some(record.updated_at),
            Err(err) => {
                warn!(%err, cycle, "could not persist generated mindmap");
                None
            }
        };

        self.snapshot.send_if_modified(|snap| {
            if !self.is_current(cycle) || snap.cycle != cycle || snap.status.is_terminal() {
                return false;
            }
            info!(cycle, nodes = graph.nodes.len(), "mindmap returned directly by service");
            snap.status = GenerationStatus::Completed;
            snap.graph = Some(graph);
            snap.error = None;
            if observed_at.is_some() {
                snap.observed_at = observed_at;
            }
            true
        });
    }
}

fn usable_graph(data: &serde_json::Value) -> Result<Graph, MindmapError> {
    let graph = normalize::normalize(data)?;
    if graph.is_empty() {
        return Err(MindmapError::EmptyGraph);
    }
    Ok(graph)
}
