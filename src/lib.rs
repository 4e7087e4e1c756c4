// Sync provider — server-side engine for CSN-ordered incremental
// replication.

pub mod error;
pub mod sync_provider;

pub use error::{Result, SyncProviderError};
pub use sync_provider::config::SyncProviderConfig;
pub use sync_provider::control::{
    SyncDoneControl, SyncInfo, SyncRequestControl, SyncRequestMode, SyncState, SyncStateControl,
};
pub use sync_provider::provider::{SyncProvider, WriteKind};
pub use sync_provider::scope::Filter;
pub use sync_provider::store::{EntryStore, InMemoryEntryStore};
pub use sync_provider::types::{
    Csn, Dn, EntrySnapshot, EntryUuid, EventMode, Ndn, OpTag, Scope,
};
