//! Path conditions as conjunctions of signed guard atoms.

use crate::varname::VarName;
use itertools::Itertools;
use std::fmt;

/// One guard variable together with the polarity it is assumed to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardAtom {
    pub var: VarName,
    pub polarity: bool,
}

impl GuardAtom {
    pub fn pos(var: VarName) -> Self {
        Self { var, polarity: true }
    }

    pub fn neg(var: VarName) -> Self {
        Self {
            var,
            polarity: false,
        }
    }
}

impl fmt::Display for GuardAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.polarity {
            write!(f, "-")?;
        }
        write!(f, "{}", self.var)
    }
}

/// A path condition: the conjunction of the guard atoms on the way to a
/// program point, outermost first. The empty conjunction is `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardExpr {
    atoms: Vec<GuardAtom>,
}

impl GuardExpr {
    /// The trivially-true guard.
    pub fn top() -> Self {
        Self::default()
    }

    pub fn from_atoms<I: IntoIterator<Item = GuardAtom>>(atoms: I) -> Self {
        Self {
            atoms: atoms.into_iter().collect(),
        }
    }

    pub fn is_trivial(&self) -> bool {
        self.atoms.is_empty()
    }

    /// The innermost atom: the condition introduced last.
    pub fn last(&self) -> Option<GuardAtom> {
        self.atoms.last().copied()
    }

    /// All atoms except the trailing `omit_last` ones.
    pub fn atoms(&self, omit_last: usize) -> &[GuardAtom] {
        &self.atoms[..self.atoms.len().saturating_sub(omit_last)]
    }

}

impl fmt::Display for GuardExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.atoms.iter().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_negated_atoms_with_dash() {
        let g = GuardExpr::from_atoms([
            GuardAtom::pos(VarName::new(r"main::\guard#1")),
            GuardAtom::neg(VarName::new(r"main::\guard#2")),
        ]);
        assert_eq!(g.to_string(), r"main::\guard#1 -main::\guard#2");
    }

    #[test]
    fn omit_last_drops_the_innermost_atoms() {
        let g = GuardExpr::from_atoms([
            GuardAtom::pos(VarName::new(r"f::\guard#1")),
            GuardAtom::pos(VarName::new(r"f::\guard#2")),
        ]);
        assert_eq!(g.atoms(1).len(), 1);
        assert_eq!(g.last().unwrap().var, VarName::new(r"f::\guard#2"));
        assert!(GuardExpr::top().is_trivial());
    }
}
