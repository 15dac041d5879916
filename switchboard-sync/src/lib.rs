//! Switchboard Sync - Remote Mirroring
//!
//! This crate owns the one-way bridge between local session state and the
//! remote synchronized store observed by dashboards and handoff tooling.
//!
//! # Architecture
//!
//! ```text
//! TurnStore/ContextStore mutations
//!         │  (session events)
//!         ▼
//! SyncQueueService ── per-entity queues, coalescing, rate cap ──► SyncStore
//!         ▲                                                          │
//!         └── LocalStateSource (reads live state at publish time)    │
//!                                                                    ▼
//!                                        subscription feed (is_local tagged)
//! ```
//!
//! Local state is always the source of truth; the remote store is
//! eventually consistent with it. No publication failure may block or fail
//! the local mutation that triggered it.

mod memory;
mod queue;
mod remote;

pub use memory::InMemorySyncStore;
pub use queue::{
    EntityKey, LocalStateSource, SyncQueueConfig, SyncQueueMetrics, SyncQueueService,
    SyncQueueSnapshot,
};
pub use remote::{SessionAnnouncement, SyncMapEvent, SyncMapKind, SyncStore};
