//! Wire-adjacent control and message types. BER encoding of the actual
//! LDAP controls belongs to the (out-of-scope) protocol layer; these are
//! the typed values the core hands that layer to serialize.

use super::cookie::Cookie;
use super::types::EntryUuid;

/// Default ID-set batch size (configurable).
pub const UUID_SET_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequestMode {
    RefreshOnly,
    RefreshAndPersist,
}

/// The sync control carried on a search request.
#[derive(Debug, Clone)]
pub struct SyncRequestControl {
    pub mode: SyncRequestMode,
    pub cookie: Option<Cookie>,
    pub reload_hint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Present,
    Add,
    Modify,
    Delete,
}

/// Attached to every streamed entry.
#[derive(Debug, Clone)]
pub struct SyncStateControl {
    pub state: SyncState,
    pub entry_uuid: EntryUuid,
    pub cookie: Option<Cookie>,
}

/// Refresh terminator for `refresh-only` requests.
#[derive(Debug, Clone)]
pub struct SyncDoneControl {
    pub cookie: Option<Cookie>,
    pub refresh_deletes: bool,
}

/// Intermediate messages, distinguished by tag in the wire protocol.
#[derive(Debug, Clone)]
pub enum SyncInfo {
    NewCookie {
        cookie: Cookie,
    },
    RefreshDelete {
        cookie: Option<Cookie>,
        refresh_done: bool,
    },
    RefreshPresent {
        cookie: Option<Cookie>,
        refresh_done: bool,
    },
    SyncIdSet {
        cookie: Option<Cookie>,
        refresh_deletes: bool,
        uuids: Vec<EntryUuid>,
    },
}
