//! Switchboard Session - State Engine & Turn-Taking Orchestrator
//!
//! The authoritative in-process state of a single phone call, and the loop
//! that converses over it.
//!
//! # Architecture
//!
//! ```text
//!  relay events ──► SessionDriver ──► SessionStore ─┬─► TurnStore
//!                        │                          ├─► ContextStore
//!                        │                          └─► ParkingLot
//!                        │                               │ events
//!                        ▼                               ▼
//!                  ConsciousLoop ◄── CompletionRequested / run()
//!                        │ streams text, dtmf, tool calls
//!                        ▼
//!                  loop events ──► SpeechRelay (back to the caller)
//!
//!  store events ──► SyncQueueService ──► remote synchronized store
//! ```
//!
//! Each call session is an independent unit of concurrency: one logical
//! thread of control, suspended only inside the publication queue and the
//! provider stream. Mutations are synchronous and atomic relative to their
//! events; cancellation is cooperative.

mod context_store;
mod conscious_loop;
mod driver;
mod events;
mod parking_lot;
mod registry;
mod store;
mod turn_store;

pub use context_store::ContextStore;
pub use conscious_loop::{ConsciousLoop, RunOutcome, RunState};
pub use driver::{SessionDriver, SpeechRelay};
pub use events::{LoopEvents, SessionEvents};
pub use parking_lot::{ParkingLot, ParkingLotItems};
pub use registry::{
    SessionRegistry, SessionRegistryConfig, SessionRegistryMetrics, SessionRegistrySnapshot,
};
pub use store::SessionStore;
pub use turn_store::TurnStore;
