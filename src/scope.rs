//! One lexical frame of the exploration.

use crate::error::TrackerError;
use crate::varname::VarName;
use std::collections::HashSet;
use tracing::trace;

/// A scope opened at function entry, loop-iteration entry or a
/// post-loop join point. Records what was assigned and accessed in it,
/// plus the single guard variable (if any) introduced in it. Scopes are
/// retained for the whole run; backward range queries over them drive
/// the loop classification.
#[derive(Debug, Clone)]
pub struct Scope {
    pub id: usize,
    guard: Option<VarName>,
    assigned: HashSet<VarName>,
    accessed: HashSet<VarName>,
}

impl Scope {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            guard: None,
            assigned: HashSet::new(),
            accessed: HashSet::new(),
        }
    }

    /// Would assigning `var` introduce a second guard into this scope?
    /// If so the caller must open a fresh scope first.
    pub fn split_before(&self, var: VarName) -> bool {
        var.is_guard() && self.guard.is_some()
    }

    pub fn assign(&mut self, var: VarName) -> Result<(), TrackerError> {
        if self.split_before(var) {
            return Err(TrackerError::GuardAlreadySet {
                scope: self.id,
                guard: self.guard.expect("split_before checked the guard"),
                var,
            });
        }
        if var.is_guard() {
            self.guard = Some(var);
        }
        self.assigned.insert(var);
        // not every read reaches the tracker; writes count as reads too
        self.access(var);
        Ok(())
    }

    pub fn access(&mut self, var: VarName) {
        trace!(scope = self.id, var = %var, "access");
        self.accessed.insert(var);
    }

    pub fn matches_guard(&self, guard_var: VarName) -> bool {
        self.guard == Some(guard_var)
    }

    pub fn guard(&self) -> Option<VarName> {
        self.guard
    }

    pub fn assigned(&self) -> &HashSet<VarName> {
        &self.assigned
    }

    pub fn accessed(&self) -> &HashSet<VarName> {
        &self.accessed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_guard_assignment_sticks() {
        let mut scope = Scope::new(0);
        let g = VarName::new(r"main::\guard#1");
        assert!(!scope.split_before(g));
        scope.assign(g).unwrap();
        assert!(scope.matches_guard(g));
        assert!(scope.accessed().contains(&g));
    }

    #[test]
    fn second_guard_requires_a_new_scope() {
        let mut scope = Scope::new(0);
        let g1 = VarName::new(r"main::\guard#1");
        let g2 = VarName::new(r"main::\guard#2");
        scope.assign(g1).unwrap();
        assert!(scope.split_before(g2));
        assert_eq!(
            scope.assign(g2),
            Err(TrackerError::GuardAlreadySet {
                scope: 0,
                guard: g1,
                var: g2,
            })
        );
        // data writes are still fine
        scope.assign(VarName::new("x#3")).unwrap();
    }
}
