//! Runtime configuration.
//!
//! TOML + serde + a hand-written `Default`, the shape `aspy`'s
//! configuration takes rather than `aifocal-akidb`'s layered `config::Config`
//! builder — this subsystem is single-process, single-file-config scale.

use crate::error::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncProviderConfig {
    /// `checkpoint <ops>`: write back after this many committed writes.
    pub checkpoint_ops: u64,
    /// `checkpoint <minutes>`, stored here as seconds.
    pub checkpoint_interval_secs: u64,
    /// `sessionlog`: capacity in records; 0 disables the session log.
    pub sessionlog_capacity: usize,
    /// `nopresent`: skip the present-phase scan entirely.
    pub nopresent: bool,
    /// `reloadhint`: honor the request's `reloadHint` before refresh-required.
    pub reloadhint: bool,
    /// ID-set batch size; the implementation picks a small constant.
    pub uuid_set_batch_size: usize,
    /// Replica id this provider mints CSNs under.
    pub replica_id: u16,
}

impl Default for SyncProviderConfig {
    fn default() -> Self {
        Self {
            checkpoint_ops: 100,
            checkpoint_interval_secs: 300,
            sessionlog_capacity: 0,
            nopresent: false,
            reloadhint: false,
            uuid_set_batch_size: super::control::UUID_SET_BATCH_SIZE,
            replica_id: 0,
        }
    }
}

impl SyncProviderConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let c = SyncProviderConfig::default();
        assert_eq!(c.checkpoint_ops, 100);
        assert_eq!(c.sessionlog_capacity, 0);
        assert!(!c.nopresent);
        assert_eq!(c.uuid_set_batch_size, 64);
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let c = SyncProviderConfig::from_toml_str(
            r#"
            sessionlog_capacity = 500
            nopresent = true
            "#,
        )
        .unwrap();
        assert_eq!(c.sessionlog_capacity, 500);
        assert!(c.nopresent);
        assert_eq!(c.checkpoint_ops, 100);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(SyncProviderConfig::from_toml_str("not = [valid").is_err());
    }

    #[test]
    fn from_file_reads_and_parses_a_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        write!(file, "checkpoint_ops = 42\nnopresent = true\n").unwrap();
        let c = SyncProviderConfig::from_file(file.path()).unwrap();
        assert_eq!(c.checkpoint_ops, 42);
        assert!(c.nopresent);
        assert_eq!(c.sessionlog_capacity, 0);
    }

    #[test]
    fn from_file_surfaces_io_error_for_missing_path() {
        let result = SyncProviderConfig::from_file("/nonexistent/path/does-not-exist.toml");
        assert!(result.is_err());
    }
}
