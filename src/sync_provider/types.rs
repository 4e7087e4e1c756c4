//! Shared data types: CSNs, DNs, scope, and the wire-adjacent enums the
//! rest of the engine is built from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Change Sequence Number: an opaque, lexicographically comparable string.
/// Two CSNs are totally ordered by byte comparison (`Ord` on `String`
/// already compares by Unicode scalar value, which coincides with byte
/// order for the ASCII CSN alphabet this crate mints).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Csn(pub String);

impl Csn {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Csn {
    fn from(s: String) -> Self {
        Csn(s)
    }
}

impl From<&str> for Csn {
    fn from(s: &str) -> Self {
        Csn(s.to_string())
    }
}

/// An entry's distinguished name, as presented to consumers.
pub type Dn = String;

/// A normalized DN, used for scope comparisons and as a map key. Normalized
/// in this crate means: ASCII-lowercased and whitespace-collapsed around
/// RDN separators, matching the cheap normalization the backend already
/// performs before entries reach the sync provider (the real normalization
/// rules live in the directory's schema layer, out of scope here).
pub type Ndn = String;

/// Normalize a DN the way the (out-of-scope) backend is assumed to: lower
/// the case and strip incidental whitespace around commas. This crate does
/// not implement full RFC 4514 DN normalization; it only needs enough
/// consistency for scope comparisons over already-normalized store output.
pub fn normalize_dn(dn: &str) -> Ndn {
    dn.split(',')
        .map(|rdn| rdn.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

pub type EntryUuid = Uuid;

/// Search scope, tested purely on normalized DN strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
    Subordinate,
}

/// Operation tag recorded in the session log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpTag {
    Add,
    Modify,
    ModRdn,
    Delete,
}

/// The classification a matched write produces for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventMode {
    Add,
    Modify,
    Delete,
}

/// A queued event for one subscriber.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub dn: Dn,
    pub ndn: Ndn,
    pub uuid: EntryUuid,
    pub csn: Csn,
    pub mode: EventMode,
    pub is_reference: bool,
}

/// A minimal entry snapshot as the event matcher and refresh engine see it.
/// `entry_csn` and `uuid` are always-present operational attributes;
/// `attrs` carries whatever else the filter evaluator needs to
/// test (the real store exposes the full attribute set; the core only
/// ever needs to test presence/equality/ordering over a handful of them).
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub dn: Dn,
    pub ndn: Ndn,
    pub uuid: EntryUuid,
    pub entry_csn: Csn,
    pub attrs: HashMap<String, Vec<String>>,
}

impl EntrySnapshot {
    pub fn attr_values(&self, name: &str) -> Option<&[String]> {
        if name.eq_ignore_ascii_case("entrycsn") {
            return None; // handled specially by Filter::evaluate
        }
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}
