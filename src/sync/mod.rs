//! Replay of the offline queue against remote services.
//!
//! - [`HandlerRegistry`] maps each mutation kind to the code that applies it
//! - [`SyncCoordinator`] runs one guarded, sequential pass over the queue
//! - [`SyncScheduler`] decides when a pass happens

mod coordinator;
mod handlers;
mod scheduler;

pub use coordinator::{SyncCoordinator, SyncOutcome, SyncReport, SyncStatus, DEFAULT_PACING};
pub use handlers::{handler_fn, FnHandler, HandlerRegistry, MutationHandler};
pub use scheduler::{ScheduleSettings, SyncScheduler, DEFAULT_PENDING_REFRESH};
