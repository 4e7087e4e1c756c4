//! Scope tests and filter evaluation.
//!
//! Scope tests operate purely on normalized DN strings. Filter evaluation
//! covers the small subset of LDAP filter semantics the sync provider
//! itself needs to reason about (presence, equality, ordering on
//! `entryCSN`, and boolean composition); full filter parsing belongs to
//! the (out-of-scope) backend's search path.

use super::types::{EntrySnapshot, Ndn, Scope};
use std::fmt;

/// Whether `candidate` falls within `scope` rooted at `base`.
pub fn in_scope(scope: Scope, base: &Ndn, candidate: &Ndn) -> bool {
    match scope {
        Scope::Base => candidate == base,
        Scope::OneLevel => parent_of(candidate).map(|p| p == base).unwrap_or(false),
        Scope::Subtree => candidate == base || is_descendant(candidate, base),
        Scope::Subordinate => is_descendant(candidate, base),
    }
}

fn parent_of(ndn: &Ndn) -> Option<Ndn> {
    let comma = ndn.find(',')?;
    Some(ndn[comma + 1..].to_string())
}

/// `candidate` is a strict descendant of `base`: it ends with `,base` (and
/// is not equal to `base`).
fn is_descendant(candidate: &Ndn, base: &Ndn) -> bool {
    if candidate == base {
        return false;
    }
    candidate
        .len()
        .checked_sub(base.len())
        .map(|suffix_start| {
            candidate.ends_with(base.as_str()) && candidate.as_bytes()[suffix_start - 1] == b','
        })
        .unwrap_or(false)
}

/// A minimal filter AST: presence, equality, and ordered comparison over a
/// named attribute, composed with the three boolean connectives. The
/// provider's default filter for a persistent search with no filter text of
/// its own is `Filter::present_objectclass()`, i.e. `(objectclass=*)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Present(String),
    Equality(String, String),
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn present_objectclass() -> Filter {
        Filter::Present("objectClass".to_string())
    }

    pub fn entry_csn_ge(csn: &str) -> Filter {
        Filter::GreaterOrEqual("entryCSN".to_string(), csn.to_string())
    }

    pub fn entry_csn_le(csn: &str) -> Filter {
        Filter::LessOrEqual("entryCSN".to_string(), csn.to_string())
    }

    pub fn entry_csn_eq(csn: &str) -> Filter {
        Filter::Equality("entryCSN".to_string(), csn.to_string())
    }

    pub fn and(self, other: Filter) -> Filter {
        Filter::And(vec![self, other])
    }

    pub fn evaluate(&self, entry: &EntrySnapshot) -> bool {
        match self {
            Filter::Present(attr) => {
                if attr.eq_ignore_ascii_case("objectclass") {
                    true
                } else if attr.eq_ignore_ascii_case("entrycsn") {
                    true
                } else {
                    entry.attr_values(attr).is_some_and(|v| !v.is_empty())
                }
            }
            Filter::Equality(attr, val) => {
                if attr.eq_ignore_ascii_case("entrycsn") {
                    entry.entry_csn.as_str() == val
                } else {
                    entry
                        .attr_values(attr)
                        .is_some_and(|vs| vs.iter().any(|v| v == val))
                }
            }
            Filter::GreaterOrEqual(attr, val) => {
                if attr.eq_ignore_ascii_case("entrycsn") {
                    entry.entry_csn.as_str() >= val.as_str()
                } else {
                    entry
                        .attr_values(attr)
                        .is_some_and(|vs| vs.iter().any(|v| v.as_str() >= val.as_str()))
                }
            }
            Filter::LessOrEqual(attr, val) => {
                if attr.eq_ignore_ascii_case("entrycsn") {
                    entry.entry_csn.as_str() <= val.as_str()
                } else {
                    entry
                        .attr_values(attr)
                        .is_some_and(|vs| vs.iter().any(|v| v.as_str() <= val.as_str()))
                }
            }
            Filter::And(fs) => fs.iter().all(|f| f.evaluate(entry)),
            Filter::Or(fs) => fs.iter().any(|f| f.evaluate(entry)),
            Filter::Not(f) => !f.evaluate(entry),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Present(a) => write!(f, "({a}=*)"),
            Filter::Equality(a, v) => write!(f, "({a}={v})"),
            Filter::GreaterOrEqual(a, v) => write!(f, "({a}>={v})"),
            Filter::LessOrEqual(a, v) => write!(f, "({a}<={v})"),
            Filter::And(fs) => {
                write!(f, "(&")?;
                for x in fs {
                    write!(f, "{x}")?;
                }
                write!(f, ")")
            }
            Filter::Or(fs) => {
                write!(f, "(|")?;
                for x in fs {
                    write!(f, "{x}")?;
                }
                write!(f, ")")
            }
            Filter::Not(x) => write!(f, "(!{x})"),
        }
    }
}

/// Convenience matching both scope and filter, as the event matcher and
/// refresh engine need.
pub fn matches(scope: Scope, base: &Ndn, filter: &Filter, entry: &EntrySnapshot) -> bool {
    in_scope(scope, base, &entry.ndn) && filter.evaluate(entry)
}
