//! Per-entity coalescing publication queue.
//!
//! Local mutations arrive far faster than remote round trips resolve. The
//! queue keeps one single-concurrency lane per entity (a context field or a
//! turn), collapses bursts of updates into a single publish of the latest
//! state, and caps total remote call volume, so the call's real-time path
//! never waits on the mirror.
//!
//! # Coalescing
//!
//! Every coalescable enqueue bumps the lane's pending counter. When a task
//! executes it inspects the counter *before* decrementing: a count above one
//! means a newer task for the same lane is queued behind it and will carry
//! the latest state, so the task decrements and does no remote work.
//! Otherwise it clears the counter, reads the *current* local state (not a
//! snapshot captured at enqueue time) and publishes. The physical write is
//! therefore always performed by the most recently enqueued task.
//!
//! Turn creations never coalesce and run at a higher priority than updates
//! so a turn becomes visible remotely before its edits. Deletions never
//! coalesce either; a target already absent remotely counts as success.

use crate::SyncStore;
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchboard_core::{CallId, StructuredValue, SyncError, TurnId, TurnRecord};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

// ============================================================================
// CONSTANTS
// ============================================================================

const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 100;
const DEFAULT_TASK_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// LOCAL STATE SEAM
// ============================================================================

/// Read access to the live local session state.
///
/// Queue tasks read through this seam at execution time so a publish always
/// reflects the state after the burst that scheduled it, never a stale
/// snapshot.
pub trait LocalStateSource: Send + Sync {
    /// Current value of one context field, `None` when removed.
    fn context_value(&self, key: &str) -> Option<Value>;

    /// Current state of one turn, `None` when deleted.
    fn turn(&self, id: TurnId) -> Option<TurnRecord>;
}

// ============================================================================
// ENTITY KEY
// ============================================================================

/// Identity of one publication lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    ContextField { call_id: CallId, key: String },
    Turn { call_id: CallId, id: TurnId },
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::ContextField { call_id, key } => {
                write!(f, "{call_id}:context:{key}")
            }
            EntityKey::Turn { call_id, id } => write!(f, "{call_id}:turn:{id}"),
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the publication queue.
#[derive(Debug, Clone)]
pub struct SyncQueueConfig {
    /// Remote operations admitted per rolling second, shared across all
    /// lanes of this publisher.
    pub rate_limit_per_second: u32,

    /// Budget for one remote round trip; tasks past it are dropped (the
    /// next coalesced update catches up).
    pub task_timeout: Duration,
}

impl Default for SyncQueueConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_second: DEFAULT_RATE_LIMIT_PER_SECOND,
            task_timeout: Duration::from_millis(DEFAULT_TASK_TIMEOUT_MS),
        }
    }
}

impl SyncQueueConfig {
    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `SWITCHBOARD_SYNC_RATE_PER_SEC`: remote ops per second (default: 100)
    /// - `SWITCHBOARD_SYNC_TASK_TIMEOUT_MS`: per-task timeout (default: 10000)
    pub fn from_env() -> Self {
        let rate_limit_per_second = std::env::var("SWITCHBOARD_SYNC_RATE_PER_SEC")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_SECOND);

        let task_timeout = Duration::from_millis(
            std::env::var("SWITCHBOARD_SYNC_TASK_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TASK_TIMEOUT_MS),
        );

        Self {
            rate_limit_per_second,
            task_timeout,
        }
    }

    /// Short timeouts for development/testing.
    pub fn development() -> Self {
        Self {
            rate_limit_per_second: 1_000,
            task_timeout: Duration::from_millis(250),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters tracking publication activity.
#[derive(Debug, Default)]
pub struct SyncQueueMetrics {
    /// Remote writes/removals that completed (including benign not-found).
    pub published: AtomicU64,
    /// Tasks skipped because a newer update was already queued.
    pub coalesced: AtomicU64,
    /// Tasks dropped on timeout, rate limiting, or remote failure.
    pub dropped: AtomicU64,
    /// Context values skipped for failing the structured-value contract.
    pub ineligible: AtomicU64,
}

impl SyncQueueMetrics {
    pub fn snapshot(&self) -> SyncQueueSnapshot {
        SyncQueueSnapshot {
            published: self.published.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ineligible: self.ineligible.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of queue metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueSnapshot {
    pub published: u64,
    pub coalesced: u64,
    pub dropped: u64,
    pub ineligible: u64,
}

// ============================================================================
// TASKS & LANES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueTask {
    /// Publish a newly created turn. High priority, never coalesced.
    Create,
    /// Publish the current state of the entity. Coalesced per lane.
    Update,
    /// Remove the entity remotely. Never coalesced.
    Delete,
}

fn relock<'a, T>(
    guard: Result<std::sync::MutexGuard<'a, T>, std::sync::PoisonError<std::sync::MutexGuard<'a, T>>>,
) -> std::sync::MutexGuard<'a, T> {
    guard.unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One publication lane: ordered tasks plus the coalescing counter.
struct Lane {
    high: Mutex<VecDeque<QueueTask>>,
    normal: Mutex<VecDeque<QueueTask>>,
    /// Coalescable tasks queued or executing for this lane.
    pending_updates: AtomicU32,
    /// All tasks queued or executing; teardown requires zero.
    queued: AtomicU32,
    notify: Notify,
}

impl Lane {
    fn new() -> Self {
        Self {
            high: Mutex::new(VecDeque::new()),
            normal: Mutex::new(VecDeque::new()),
            pending_updates: AtomicU32::new(0),
            queued: AtomicU32::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, task: QueueTask) {
        match task {
            QueueTask::Create => relock(self.high.lock()).push_back(task),
            QueueTask::Update | QueueTask::Delete => relock(self.normal.lock()).push_back(task),
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueueTask> {
        if let Some(task) = relock(self.high.lock()).pop_front() {
            return Some(task);
        }
        relock(self.normal.lock()).pop_front()
    }

    fn has_tasks(&self) -> bool {
        !relock(self.high.lock()).is_empty() || !relock(self.normal.lock()).is_empty()
    }
}

#[derive(Clone)]
struct LaneHandle {
    lane: Arc<Lane>,
}

// ============================================================================
// SERVICE
// ============================================================================

struct QueueRuntime {
    call_id: CallId,
    store: Arc<dyn SyncStore>,
    source: Arc<dyn LocalStateSource>,
    lanes: DashMap<EntityKey, LaneHandle>,
    limiter: DefaultDirectRateLimiter,
    config: SyncQueueConfig,
    metrics: SyncQueueMetrics,
}

/// Per-entity coalescing, rate-limited, prioritized publisher of local
/// state into the remote synchronized store.
///
/// Enqueue operations are synchronous and never fail; all remote I/O runs
/// on detached lane workers. Idle lanes are torn down immediately and
/// recreated lazily on the next mutation.
pub struct SyncQueueService {
    runtime: Arc<QueueRuntime>,
}

impl SyncQueueService {
    pub fn new(
        call_id: CallId,
        store: Arc<dyn SyncStore>,
        source: Arc<dyn LocalStateSource>,
    ) -> Self {
        Self::with_config(call_id, store, source, SyncQueueConfig::default())
    }

    pub fn with_config(
        call_id: CallId,
        store: Arc<dyn SyncStore>,
        source: Arc<dyn LocalStateSource>,
        config: SyncQueueConfig,
    ) -> Self {
        let rate = NonZeroU32::new(config.rate_limit_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_second(rate));

        Self {
            runtime: Arc::new(QueueRuntime {
                call_id,
                store,
                source,
                lanes: DashMap::new(),
                limiter,
                config,
                metrics: SyncQueueMetrics::default(),
            }),
        }
    }

    /// Queue the initial publication of a freshly added turn.
    pub fn add_turn(&self, turn: &TurnRecord) {
        let key = EntityKey::Turn {
            call_id: self.runtime.call_id.clone(),
            id: turn.id(),
        };
        self.enqueue(key, QueueTask::Create);
    }

    /// Queue publication of a turn's current state.
    pub fn update_turn(&self, id: TurnId) {
        let key = EntityKey::Turn {
            call_id: self.runtime.call_id.clone(),
            id,
        };
        self.enqueue(key, QueueTask::Update);
    }

    /// Queue remote removal of a turn.
    pub fn delete_turn(&self, id: TurnId) {
        let key = EntityKey::Turn {
            call_id: self.runtime.call_id.clone(),
            id,
        };
        self.enqueue(key, QueueTask::Delete);
    }

    /// Queue publication of one context field's current value. A field
    /// that reads back as `None` publishes a removal.
    pub fn update_context(&self, key: impl Into<String>) {
        let key = EntityKey::ContextField {
            call_id: self.runtime.call_id.clone(),
            key: key.into(),
        };
        self.enqueue(key, QueueTask::Update);
    }

    /// Publish the one-per-session creation notification.
    pub async fn announce(&self) -> Result<(), SyncError> {
        self.runtime
            .store
            .announce_session(crate::SessionAnnouncement::new(
                self.runtime.call_id.clone(),
            ))
            .await
    }

    pub fn metrics(&self) -> SyncQueueSnapshot {
        self.runtime.metrics.snapshot()
    }

    /// Number of live lanes. Zero once every pending task has drained.
    pub fn active_lanes(&self) -> usize {
        self.runtime.lanes.len()
    }

    /// Wait until all lanes have drained and been torn down. Intended for
    /// tests and orderly shutdown.
    pub async fn quiesce(&self) {
        while !self.runtime.lanes.is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn enqueue(&self, key: EntityKey, task: QueueTask) {
        let runtime = Arc::clone(&self.runtime);

        // The bookkeeping increments happen while the map entry is held so
        // the lane worker's teardown check (`queued == 0` under the same
        // shard lock) can never race an enqueue into a dead lane.
        let handle = {
            let entry = self.runtime.lanes.entry(key.clone()).or_insert_with(|| {
                let handle = LaneHandle {
                    lane: Arc::new(Lane::new()),
                };
                tokio::spawn(lane_worker(
                    runtime,
                    key.clone(),
                    Arc::clone(&handle.lane),
                ));
                handle
            });
            entry.lane.queued.fetch_add(1, Ordering::SeqCst);
            if task == QueueTask::Update {
                entry.lane.pending_updates.fetch_add(1, Ordering::SeqCst);
            }
            entry.clone()
        };

        handle.lane.push(task);
    }
}

// ============================================================================
// LANE WORKER
// ============================================================================

async fn lane_worker(runtime: Arc<QueueRuntime>, key: EntityKey, lane: Arc<Lane>) {
    loop {
        let Some(task) = lane.pop() else {
            // Teardown only when nothing is queued or executing; the check
            // runs under the shard lock, serialized against enqueues.
            let removed = runtime
                .lanes
                .remove_if(&key, |_, handle| {
                    handle.lane.queued.load(Ordering::SeqCst) == 0
                })
                .is_some();
            if removed {
                trace!(lane = %key, "idle lane torn down");
                break;
            }
            let notified = lane.notify.notified();
            if lane.has_tasks() {
                continue;
            }
            notified.await;
            continue;
        };

        run_task(&runtime, &key, &lane, task).await;
        lane.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_task(runtime: &QueueRuntime, key: &EntityKey, lane: &Lane, task: QueueTask) {
    match task {
        QueueTask::Update => {
            let count = lane.pending_updates.load(Ordering::SeqCst);
            if count > 1 {
                // A newer update for this lane is queued behind us and will
                // carry the latest state.
                lane.pending_updates.fetch_sub(1, Ordering::SeqCst);
                runtime.metrics.coalesced.fetch_add(1, Ordering::Relaxed);
                trace!(lane = %key, queued_behind = count - 1, "update coalesced");
                return;
            }
            lane.pending_updates.store(0, Ordering::SeqCst);

            match key {
                EntityKey::ContextField { key: field, .. } => {
                    publish_context(runtime, key, field).await;
                }
                EntityKey::Turn { id, .. } => {
                    publish_turn(runtime, key, *id).await;
                }
            }
        }
        QueueTask::Create => {
            if let EntityKey::Turn { id, .. } = key {
                publish_turn(runtime, key, *id).await;
            }
        }
        QueueTask::Delete => {
            if let EntityKey::Turn { id, .. } = key {
                runtime.limiter.until_ready().await;
                let op = runtime.store.remove_turn(*id);
                classify(runtime, key, op).await;
            }
        }
    }
}

async fn publish_context(runtime: &QueueRuntime, key: &EntityKey, field: &str) {
    runtime.limiter.until_ready().await;

    match runtime.source.context_value(field) {
        None => {
            // Field removed locally; mirror the removal.
            let op = runtime.store.remove_context_item(field);
            classify(runtime, key, op).await;
        }
        Some(value) => match StructuredValue::new(value) {
            Ok(structured) => {
                let op = runtime.store.set_context_item(field, structured);
                classify(runtime, key, op).await;
            }
            Err(_) => {
                warn!(
                    lane = %key,
                    "context value is not structured and cannot be mirrored"
                );
                runtime.metrics.ineligible.fetch_add(1, Ordering::Relaxed);
            }
        },
    }
}

async fn publish_turn(runtime: &QueueRuntime, key: &EntityKey, id: TurnId) {
    runtime.limiter.until_ready().await;

    // The turn may have been deleted by the time this task runs.
    let Some(turn) = runtime.source.turn(id) else {
        debug!(lane = %key, "turn deleted before publication");
        return;
    };

    let op = runtime.store.set_turn(&turn);
    classify(runtime, key, op).await;
}

/// Apply the per-task timeout and error classification. Nothing here can
/// fail the local mutation that scheduled the task or block later tasks.
async fn classify<F>(runtime: &QueueRuntime, key: &EntityKey, op: F)
where
    F: std::future::Future<Output = Result<(), SyncError>>,
{
    match timeout(runtime.config.task_timeout, op).await {
        Err(_) => {
            error!(
                lane = %key,
                timeout_ms = runtime.config.task_timeout.as_millis() as u64,
                "sync task timed out; dropped"
            );
            runtime.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Ok(())) => {
            trace!(lane = %key, "published");
            runtime.metrics.published.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(SyncError::EntityNotFound { .. })) => {
            // Already absent remotely; success from our perspective.
            warn!(lane = %key, "remote entity already absent");
            runtime.metrics.published.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(SyncError::RateLimited { reason })) => {
            error!(lane = %key, reason = %reason, "remote rate limit; task dropped");
            runtime.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(err)) => {
            error!(lane = %key, error = %err, "sync task failed");
            runtime.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemorySyncStore;
    use serde_json::json;
    use std::collections::BTreeMap;
    use switchboard_core::{HumanTextParams, TurnMeta};

    /// Mutable state standing in for the live session stores.
    #[derive(Default)]
    pub(crate) struct MapSource {
        context: Mutex<BTreeMap<String, Value>>,
        turns: Mutex<BTreeMap<TurnId, TurnRecord>>,
    }

    impl MapSource {
        pub(crate) fn set_context(&self, key: &str, value: Value) {
            relock(self.context.lock()).insert(key.to_string(), value);
        }

        fn remove_context(&self, key: &str) {
            relock(self.context.lock()).remove(key);
        }

        fn put_turn(&self, turn: TurnRecord) {
            relock(self.turns.lock()).insert(turn.id(), turn);
        }

        fn drop_turn(&self, id: TurnId) {
            relock(self.turns.lock()).remove(&id);
        }
    }

    impl LocalStateSource for MapSource {
        fn context_value(&self, key: &str) -> Option<Value> {
            relock(self.context.lock()).get(key).cloned()
        }

        fn turn(&self, id: TurnId) -> Option<TurnRecord> {
            relock(self.turns.lock()).get(&id).cloned()
        }
    }

    fn human_turn(content: &str) -> TurnRecord {
        let params = HumanTextParams::new(content).unwrap();
        TurnRecord::HumanText {
            meta: TurnMeta::new(params.id),
            content: params.content,
            redacted: false,
        }
    }

    fn service(
        store: Arc<InMemorySyncStore>,
        source: Arc<MapSource>,
    ) -> SyncQueueService {
        SyncQueueService::with_config(
            CallId::new("CA-test"),
            store,
            source,
            SyncQueueConfig::development(),
        )
    }

    #[tokio::test]
    async fn test_add_turn_publishes_current_state() {
        let store = Arc::new(InMemorySyncStore::new());
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        let turn = human_turn("I need a ticket");
        source.put_turn(turn.clone());
        queue.add_turn(&turn);
        queue.quiesce().await;

        assert_eq!(store.turn_write_count(turn.id()), 1);
        assert_eq!(
            store.turn_snapshot().get(&turn.id().to_string()),
            Some(&turn)
        );
        assert_eq!(queue.metrics().published, 1);
        assert_eq!(queue.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_burst_of_updates_publishes_once_with_latest_state() {
        let store = Arc::new(InMemorySyncStore::new());
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        // Three rapid local mutations before the lane worker gets polled:
        // the single-threaded test runtime guarantees nothing executes
        // between these synchronous enqueues.
        source.set_context("profile", json!({"rev": 1}));
        queue.update_context("profile");
        source.set_context("profile", json!({"rev": 2}));
        queue.update_context("profile");
        source.set_context("profile", json!({"rev": 3}));
        queue.update_context("profile");

        queue.quiesce().await;

        assert_eq!(store.context_write_count("profile"), 1);
        assert_eq!(store.context_snapshot()["profile"], json!({"rev": 3}));
        let metrics = queue.metrics();
        assert_eq!(metrics.published, 1);
        assert_eq!(metrics.coalesced, 2);
    }

    #[tokio::test]
    async fn test_updates_behind_an_in_flight_task_still_produce_a_final_write() {
        // Validates the counter's inspect-before-decrement semantics when
        // the first task is already executing as new updates arrive: the
        // last queued task must perform the real write.
        let (store, gate) = InMemorySyncStore::gated();
        let store = Arc::new(store);
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        source.set_context("profile", json!({"rev": 1}));
        queue.update_context("profile");

        // Let the worker read rev 1 and park inside the remote write.
        tokio::time::sleep(Duration::from_millis(5)).await;

        source.set_context("profile", json!({"rev": 2}));
        queue.update_context("profile");

        gate.release(2);
        queue.quiesce().await;

        assert_eq!(store.context_write_count("profile"), 2);
        assert_eq!(store.context_snapshot()["profile"], json!({"rev": 2}));
        assert_eq!(queue.metrics().coalesced, 0);
    }

    #[tokio::test]
    async fn test_delete_is_never_coalesced_and_tolerates_missing() {
        let store = Arc::new(InMemorySyncStore::new());
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        let turn = human_turn("hello");
        source.put_turn(turn.clone());
        queue.add_turn(&turn);
        queue.quiesce().await;
        assert_eq!(store.turn_write_count(turn.id()), 1);

        source.drop_turn(turn.id());
        queue.delete_turn(turn.id());
        queue.quiesce().await;
        assert!(store.turn_snapshot().is_empty());

        // Deleting again: already absent remotely, treated as success.
        queue.delete_turn(turn.id());
        queue.quiesce().await;
        assert_eq!(queue.metrics().dropped, 0);
    }

    #[tokio::test]
    async fn test_scalar_context_value_is_skipped_with_warning() {
        let store = Arc::new(InMemorySyncStore::new());
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        source.set_context("greeting", json!("hello"));
        queue.update_context("greeting");
        queue.quiesce().await;

        assert_eq!(store.context_write_count("greeting"), 0);
        assert_eq!(queue.metrics().ineligible, 1);
    }

    #[tokio::test]
    async fn test_removed_context_field_publishes_removal() {
        let store = Arc::new(InMemorySyncStore::new());
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        source.set_context("profile", json!({"rev": 1}));
        queue.update_context("profile");
        queue.quiesce().await;
        assert!(store.context_snapshot().contains_key("profile"));

        source.remove_context("profile");
        queue.update_context("profile");
        queue.quiesce().await;
        assert!(!store.context_snapshot().contains_key("profile"));
    }

    #[tokio::test]
    async fn test_remote_failure_never_blocks_later_tasks() {
        let store = Arc::new(InMemorySyncStore::new());
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        store.fail_next(SyncError::Other {
            reason: "remote hiccup".to_string(),
        });

        source.set_context("a", json!({"n": 1}));
        queue.update_context("a");
        queue.quiesce().await;
        assert_eq!(queue.metrics().dropped, 1);

        source.set_context("a", json!({"n": 2}));
        queue.update_context("a");
        queue.quiesce().await;
        assert_eq!(store.context_snapshot()["a"], json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_lanes_are_torn_down_and_recreated() {
        let store = Arc::new(InMemorySyncStore::new());
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        source.set_context("a", json!({"n": 1}));
        queue.update_context("a");
        queue.quiesce().await;
        assert_eq!(queue.active_lanes(), 0);

        source.set_context("a", json!({"n": 2}));
        queue.update_context("a");
        queue.quiesce().await;
        assert_eq!(store.context_write_count("a"), 2);
    }

    #[tokio::test]
    async fn test_announce_reaches_the_shared_stream() {
        let store = Arc::new(InMemorySyncStore::new());
        let source = Arc::new(MapSource::default());
        let queue = service(Arc::clone(&store), Arc::clone(&source));

        queue.announce().await.unwrap();
        let announcements = store.announcements();
        assert_eq!(announcements.len(), 1);
        assert_eq!(announcements[0].call_id, CallId::new("CA-test"));
    }

    #[test]
    fn test_lane_pop_prefers_high_priority() {
        let lane = Lane::new();
        lane.push(QueueTask::Update);
        lane.push(QueueTask::Delete);
        lane.push(QueueTask::Create);

        assert_eq!(lane.pop(), Some(QueueTask::Create));
        assert_eq!(lane.pop(), Some(QueueTask::Update));
        assert_eq!(lane.pop(), Some(QueueTask::Delete));
        assert_eq!(lane.pop(), None);
    }

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::ContextField {
            call_id: CallId::new("CA9"),
            key: "call".to_string(),
        };
        assert_eq!(key.to_string(), "CA9:context:call");
    }

    #[test]
    fn test_config_from_env_defaults() {
        let config = SyncQueueConfig::from_env();
        assert_eq!(config.rate_limit_per_second, DEFAULT_RATE_LIMIT_PER_SECOND);
        assert_eq!(
            config.task_timeout,
            Duration::from_millis(DEFAULT_TASK_TIMEOUT_MS)
        );
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
