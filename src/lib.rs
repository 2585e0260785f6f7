//! Offline-first data layer for the outfit recommender: a TTL cache, a
//! durable queue of pending mutations, a connectivity monitor and the sync
//! coordinator that replays the queue once the device is back online.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod kv;
pub mod logging;
pub mod network;
pub mod queue;
pub mod remote;
pub mod runtime;
pub mod sync;

pub use cache::{CacheKey, CacheStatus, CacheStore};
pub use config::Config;
pub use error::{ApplyError, NetworkError, StorageError};
pub use network::{NetworkMonitor, NetworkState};
pub use queue::{MutationKind, MutationOperation, OfflineQueue, PendingMutation};
pub use runtime::OfflineRuntime;
pub use sync::{SyncCoordinator, SyncOutcome, SyncStatus};
