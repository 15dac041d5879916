//! Session registry: bridges call setup and session start.
//!
//! The webhook layer creates the remote-store client before the relay
//! stream handshake arrives, so the ready client has to be parked somewhere
//! in between. The registry owns that handoff explicitly: `register` parks
//! a client, `claim` hands it out exactly once, and a background sweep
//! evicts entries whose session never started, shutting the abandoned
//! client down so nothing leaks when a caller hangs up before connecting.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use switchboard_core::{CallId, RegistryError};
use switchboard_sync::SyncStore;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

// ============================================================================
// CONFIGURATION
// ============================================================================

const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Configuration for the session registry.
#[derive(Debug, Clone)]
pub struct SessionRegistryConfig {
    /// How long an unclaimed entry may wait before eviction
    /// (default: 5 minutes).
    pub ttl: Duration,

    /// How often the sweep runs (default: 30 seconds).
    pub sweep_interval: Duration,
}

impl Default for SessionRegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl SessionRegistryConfig {
    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `SWITCHBOARD_REGISTRY_TTL_SECS`: unclaimed-entry TTL (default: 300)
    /// - `SWITCHBOARD_REGISTRY_SWEEP_SECS`: sweep interval (default: 30)
    pub fn from_env() -> Self {
        let ttl = Duration::from_secs(
            std::env::var("SWITCHBOARD_REGISTRY_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TTL_SECS),
        );
        let sweep_interval = Duration::from_secs(
            std::env::var("SWITCHBOARD_REGISTRY_SWEEP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );
        Self { ttl, sweep_interval }
    }

    /// Short timeouts for development/testing.
    pub fn development() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters tracking registry activity.
#[derive(Debug, Default)]
pub struct SessionRegistryMetrics {
    pub registrations: AtomicU64,
    pub claims: AtomicU64,
    pub expirations: AtomicU64,
}

impl SessionRegistryMetrics {
    pub fn snapshot(&self) -> SessionRegistrySnapshot {
        SessionRegistrySnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            claims: self.claims.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of registry metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRegistrySnapshot {
    pub registrations: u64,
    pub claims: u64,
    pub expirations: u64,
}

// ============================================================================
// REGISTRY
// ============================================================================

struct RegistryEntry {
    client: Arc<dyn SyncStore>,
    registered_at: Instant,
}

pub struct SessionRegistry {
    entries: DashMap<CallId, RegistryEntry>,
    config: SessionRegistryConfig,
    metrics: SessionRegistryMetrics,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionRegistry {
    /// Create the registry and start its background sweep. The sweep holds
    /// only a weak handle; dropping the registry (or calling
    /// [`shutdown`](Self::shutdown)) ends it.
    pub fn new(config: SessionRegistryConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(Self {
            entries: DashMap::new(),
            config,
            metrics: SessionRegistryMetrics::default(),
            shutdown_tx,
        });
        spawn_sweeper(
            Arc::downgrade(&registry),
            shutdown_rx,
            registry.config.sweep_interval,
        );
        registry
    }

    /// Park a ready remote-store client for a session about to start.
    /// A second registration for the same call replaces the first.
    pub fn register(&self, call_id: CallId, client: Arc<dyn SyncStore>) {
        debug!(call_id = %call_id, "remote client registered for handoff");
        self.metrics.registrations.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            call_id,
            RegistryEntry {
                client,
                registered_at: Instant::now(),
            },
        );
    }

    /// Retrieve and remove the parked client for a call.
    ///
    /// The entry is consumed on first retrieval; a second claim (or a claim
    /// for a call that was never registered or already swept) reports
    /// [`RegistryError::NotFound`] so session start can fail fast.
    pub fn claim(&self, call_id: &CallId) -> Result<Arc<dyn SyncStore>, RegistryError> {
        match self.entries.remove(call_id) {
            Some((_, entry)) => {
                self.metrics.claims.fetch_add(1, Ordering::Relaxed);
                info!(call_id = %call_id, "remote client claimed");
                Ok(entry.client)
            }
            None => Err(RegistryError::NotFound {
                call_id: call_id.to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> SessionRegistrySnapshot {
        self.metrics.snapshot()
    }

    /// Stop the background sweep.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Evict entries past the TTL and shut their clients down.
    async fn sweep(&self) {
        let ttl = self.config.ttl;
        let expired: Vec<CallId> = self
            .entries
            .iter()
            .filter(|entry| entry.registered_at.elapsed() >= ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for call_id in expired {
            // Re-check under the shard lock; the entry may have been
            // claimed since the scan.
            let removed = self
                .entries
                .remove_if(&call_id, |_, entry| entry.registered_at.elapsed() >= ttl);
            if let Some((_, entry)) = removed {
                warn!(call_id = %call_id, "unclaimed session expired; shutting client down");
                entry.client.shutdown().await;
                self.metrics.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn spawn_sweeper(
    registry: Weak<SessionRegistry>,
    mut shutdown_rx: watch::Receiver<bool>,
    sweep_interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let Some(registry) = registry.upgrade() else {
                        break;
                    };
                    registry.sweep().await;
                }
            }
        }
        debug!("session registry sweep stopped");
    });
}

// ============================================================================
// TESTS
// ============================================================================
