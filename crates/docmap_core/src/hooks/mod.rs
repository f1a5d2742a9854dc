//! Named before/after hook pipeline.
//!
//! # Responsibility
//! - Register listeners per event name and phase (`registry`).
//! - Dispatch grouped event names synchronously or asynchronously, with
//!   early cancellation (`dispatch`).
//!
//! # Invariants
//! - Listeners run in registration order within a name; names run in the
//!   caller's order; names never interleave.
//! - A `Cancel` stops the remaining listeners and the wrapped action.
//! - Registries are mutated only during setup and shared read-only after
//!   `freeze`.

pub mod dispatch;
pub mod event;
pub mod registry;

pub use dispatch::PendingDispatch;
pub use event::{HookAction, HookEvent, HookFuture, HookPhase, HookResponse, HookResult, Scratch};
pub use registry::{HookRegistry, Listener, Plugin};
