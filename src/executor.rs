//! The narrow contract the symbolic executor provides back to the
//! tracker.

use crate::guard::GuardExpr;
use crate::varname::VarName;

/// Callbacks into the symbolic executor. The tracker calls these when
/// it abstracts a loop iteration or a recursive call: resolving a base
/// name to its current SSA version, binding a fresh nondeterministic
/// value to a variable's next version, and overwriting the current path
/// guard.
pub trait Executor {
    /// Map a (level-0) base name to its current SSA identifier.
    fn resolve(&self, var: VarName) -> VarName;

    /// Bind a fresh unconstrained value to `var`'s next SSA version.
    fn assign_unknown(&mut self, var: VarName);

    /// Replace the executor's current path guard.
    fn set_guard(&mut self, guard: GuardExpr);
}
