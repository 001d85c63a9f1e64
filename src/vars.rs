//! Multimap from variable base names to the SSA versions they took.

use crate::varname::VarName;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// The set of variables (and their versions) seen in some region of the
/// exploration, keyed by base name.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    versions: BTreeMap<VarName, BTreeSet<usize>>,
    members: HashSet<VarName>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter<I: IntoIterator<Item = VarName>>(vars: I) -> Self {
        let mut set = Self::new();
        for var in vars {
            set.insert(var);
        }
        set
    }

    pub fn insert(&mut self, var: VarName) {
        let (base, version) = var.split();
        self.versions.entry(base).or_default().insert(version);
        self.members.insert(var);
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn contains_base(&self, base: &VarName) -> bool {
        self.versions.contains_key(base) || self.members.contains(base)
    }

    /// Earliest recorded version per base; the canonical pre-region
    /// value of each variable.
    pub fn get_first(&self) -> BTreeMap<VarName, usize> {
        self.versions
            .iter()
            .filter_map(|(base, vs)| vs.first().map(|v| (*base, *v)))
            .collect()
    }

    /// Latest recorded version per base; the canonical post-region
    /// value of each variable.
    pub fn get_last(&self) -> BTreeMap<VarName, usize> {
        self.versions
            .iter()
            .filter_map(|(base, vs)| vs.last().map(|v| (*base, *v)))
            .collect()
    }

    /// Keep only the bases present in `other`, retaining this set's own
    /// versions.
    pub fn restrict_to(&self, other: &VariableSet) -> VariableSet {
        let mut out = VariableSet::new();
        for (base, vs) in &self.versions {
            if other.versions.contains_key(base) {
                out.versions.insert(*base, vs.clone());
            }
        }
        out.members = self
            .members
            .iter()
            .filter(|m| out.versions.contains_key(&m.base()))
            .copied()
            .collect();
        out
    }

    pub fn var_bases(&self) -> Vec<VarName> {
        self.versions.keys().copied().collect()
    }

    /// Bases whose recorded versions do not include the snapshot value
    /// in `vars` (or that are absent from it entirely). Identifies
    /// variables read at a version nothing in `vars` wrote.
    pub fn get_var_bases_not_in(&self, vars: &BTreeMap<VarName, usize>) -> Vec<VarName> {
        self.versions
            .iter()
            .filter(|(base, versions)| match vars.get(base) {
                Some(v) => !versions.contains(v),
                None => true,
            })
            .map(|(base, _)| *base)
            .collect()
    }
}

impl fmt::Display for VariableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VariableSet({})",
            self.versions
                .iter()
                .map(|(base, vs)| format!("{}: {}", base, vs.iter().join(" ")))
                .join(" ")
        )
    }
}
