//! CSN-ordered incremental replication engine: write-path matching,
//! refresh-and-persist searches, checkpointing, and the wire-adjacent
//! cookie/control types, each split into its own submodule below.

pub mod base_tracker;
pub mod checkpoint;
pub mod config;
pub mod control;
pub mod cookie;
pub mod csn;
pub mod matcher;
pub mod mod_serializer;
pub mod persistent_search;
pub mod provider;
pub mod queue;
pub mod refresh;
pub mod scope;
pub mod session_log;
pub mod store;
pub mod types;
