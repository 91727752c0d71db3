//! Persisted resilience stores for the tool-invocation hook pipeline.
//!
//! Three stores, each owning one state file and following the same shape:
//! take an advisory lock, load the whole file, apply a pure mutation for the
//! incoming event, save atomically, and report a [`toolgate_protocol::Verdict`].
//!
//! - [`circuit`]: per-tool CLOSED / OPEN / HALF_OPEN failure isolation — the
//!   only store that can block a call.
//! - [`throttle`]: nested burst/medium/long rate windows with adaptive limit
//!   tightening; advisory only.
//! - [`checkpoint`]: append-only task checkpoints plus a latest pointer.
//!
//! Stores never talk to each other, and nothing here retries: a decision is a
//! pure function of the loaded state and the event, and the next activation
//! re-attempts with fresh state.

pub mod checkpoint;
pub mod circuit;
pub mod config;
pub mod error;
mod lock;
mod persistence;
pub mod state_dir;
pub mod throttle;

pub use checkpoint::CheckpointStore;
pub use circuit::CircuitStore;
pub use config::GovernorConfig;
pub use error::Result;
pub use error::StoreError;
pub use state_dir::StateDir;
pub use throttle::ThrottleStore;
