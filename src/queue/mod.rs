//! Durable queue of mutations attempted while offline.
//!
//! Items are replayed oldest first by the sync coordinator. Each carries its
//! own retry counter; once it runs out the item is dropped for good.

mod store;
mod types;

pub use store::{OfflineQueue, DEFAULT_MAX_RETRIES, QUEUE_KEY};
pub use types::{MutationKind, MutationOperation, PendingMutation, RetryVerdict};
