//! Interned SSA identifiers and their naming conventions.
//!
//! The symbolic executor hands the tracker strings like
//! `main::1::x!0@1#3`: a base name, an optional `!level`/`@thread`
//! marker and a `#` SSA counter. Two naming conventions are
//! load-bearing: guard variables (`::\guard`) and return-value
//! temporaries (`::return_value` and friends). Classification happens
//! once, at creation, and is carried as a [`VarKind`] tag so nothing
//! downstream rescans the string.

use internment::Intern;
use std::cmp::Ordering;
use std::fmt;

/// What role an identifier plays, decided by whoever created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    Plain,
    Guard,
    ReturnValue,
}

/// An interned variable name at a specific SSA version.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarName {
    name: Intern<String>,
    kind: VarKind,
}

/// An interned function identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(Intern<String>);

fn classify(raw: &str) -> VarKind {
    if raw.contains("::\\guard") {
        VarKind::Guard
    } else if raw.contains("::return_value")
        || raw.contains("::$tmp::return_value")
        || base_of(raw).ends_with("#return_value")
    {
        VarKind::ReturnValue
    } else {
        VarKind::Plain
    }
}

/// Cut at the SSA counter separator. `#return_value` is not a counter,
/// so a non-numeric suffix stays part of the base.
fn base_of(raw: &str) -> &str {
    match raw.find('#') {
        Some(idx) if raw[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &raw[..idx],
        _ => raw,
    }
}

impl VarName {
    /// Intern `raw`, classifying it by the executor's naming
    /// conventions.
    pub fn new(raw: &str) -> Self {
        Self {
            name: Intern::new(raw.to_owned()),
            kind: classify(raw),
        }
    }

    /// Intern `raw` with a producer-supplied role, bypassing substring
    /// classification. Identifier producers that know what they emit
    /// should prefer this over [`VarName::new`].
    pub fn with_kind(raw: &str, kind: VarKind) -> Self {
        Self {
            name: Intern::new(raw.to_owned()),
            kind,
        }
    }

    pub fn as_str(&self) -> &str {
        self.name.as_str()
    }

    pub fn kind(&self) -> VarKind {
        self.kind
    }

    pub fn is_guard(&self) -> bool {
        self.kind == VarKind::Guard
    }

    pub fn is_return_value(&self) -> bool {
        self.kind == VarKind::ReturnValue
    }

    /// A global is anything without a function qualifier that is not a
    /// return-value temporary.
    pub fn is_global(&self) -> bool {
        !self.as_str().contains("::") && !self.is_return_value()
    }

    /// Over-approximation constants are pre-constrained inputs and
    /// count as assigned-before-the-loop even at SSA version 0.
    pub fn is_oa_constant(&self) -> bool {
        self.as_str().contains("oa_constant::")
    }

    /// The name without its SSA counter.
    pub fn base(&self) -> VarName {
        VarName {
            name: Intern::new(base_of(self.as_str()).to_owned()),
            kind: self.kind,
        }
    }

    /// The SSA version, if the name carries one.
    pub fn version(&self) -> Option<usize> {
        let raw = self.as_str();
        let idx = raw.find('#')?;
        raw[idx + 1..].parse().ok()
    }

    /// Base plus version; names without a counter report version 0.
    pub fn split(&self) -> (VarName, usize) {
        (self.base(), self.version().unwrap_or(0))
    }

    /// The level-0 name: everything before the `!` renaming marker.
    pub fn l0(&self) -> VarName {
        match self.as_str().find('!') {
            Some(idx) => VarName {
                name: Intern::new(self.as_str()[..idx].to_owned()),
                kind: self.kind,
            },
            None => *self,
        }
    }

    /// The base name with all renaming decoration stripped; used to
    /// match pre-loop variables against in-loop ones (best effort).
    pub fn normalized_base(&self) -> VarName {
        let raw = self.as_str();
        let end = raw
            .find(['!', '@', '#'])
            .unwrap_or(raw.len());
        VarName {
            name: Intern::new(raw[..end].to_owned()),
            kind: self.kind,
        }
    }

    /// Reattach an SSA counter to this base.
    pub fn with_version(&self, version: usize) -> VarName {
        VarName {
            name: Intern::new(format!("{}#{}", base_of(self.as_str()), version)),
            kind: self.kind,
        }
    }
}

impl FuncId {
    pub fn new(raw: &str) -> Self {
        Self(Intern::new(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for VarName {
    fn from(raw: &str) -> Self {
        VarName::new(raw)
    }
}

impl From<&str> for FuncId {
    fn from(raw: &str) -> Self {
        FuncId::new(raw)
    }
}

// Interning compares by pointer; order by string value so that every
// emitted record is deterministic.
impl Ord for VarName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for VarName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FuncId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for FuncId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarName({:?}, {:?})", self.as_str(), self.kind)
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncId({:?})", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_base_and_version() {
        let v = VarName::new("main::1::x!0@1#3");
        assert_eq!(v.base().as_str(), "main::1::x!0@1");
        assert_eq!(v.version(), Some(3));
        assert_eq!(v.split().1, 3);
        assert_eq!(v.l0().as_str(), "main::1::x");
        assert_eq!(v.normalized_base().as_str(), "main::1::x");
    }

    #[test]
    fn classifies_guards_and_return_values() {
        assert!(VarName::new(r"main::\guard#2").is_guard());
        assert!(VarName::new("fib::return_value!0#1").is_return_value());
        assert!(VarName::new("fib#return_value").is_return_value());
        assert!(VarName::new("f::$tmp::return_value_g#2").is_return_value());
        assert!(!VarName::new("x#1").is_guard());
    }

    #[test]
    fn producer_tag_wins_over_substrings() {
        // a legitimate variable that happens to contain the marker
        let v = VarName::with_kind("log::return_value_count#1", VarKind::Plain);
        assert!(!v.is_return_value());
    }

    #[test]
    fn globals_have_no_qualifier() {
        assert!(VarName::new("g#4").is_global());
        assert!(!VarName::new("main::x#4").is_global());
        assert!(!VarName::new("fib#return_value").is_global());
    }

    #[test]
    fn with_version_rebuilds_the_counter() {
        let v = VarName::new("x#3");
        assert_eq!(v.with_version(7).as_str(), "x#7");
    }
}
