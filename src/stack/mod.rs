//! The loop/recursion abstraction tracker.
//!
//! A [`LoopStack`] observes the symbolic executor's variable-write and
//! variable-read events, correlates them with a growing arena of
//! lexical scopes, and models loops and cut-off recursive calls on top
//! of that arena. When exploration completes, [`LoopStack::finalize`]
//! serializes every summary record; that report is the tracker's entire
//! externally visible product.

pub mod loops;
pub mod recursion;


use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::executor::Executor;
use crate::footprint::FootprintAnalysis;
use crate::guard::GuardExpr;
use crate::program::Program;
use crate::scope::Scope;
use crate::varname::{FuncId, VarName};
use loops::Loop;
use recursion::{AbortedRecursion, ParentId, RecursionNodeDb};
use std::collections::HashMap;
use std::io;
use tracing::{debug, error, trace};

/// Nested loops, scopes and recursion bookkeeping for one exploration
/// path. All cross-references are arena indices; the footprint analysis
/// is computed once up front and read-only afterwards.
#[derive(Debug, Clone)]
pub struct LoopStack {
    config: TrackerConfig,
    footprint: FootprintAnalysis,
    scopes: Vec<Scope>,
    loops: Vec<Loop>,
    /// ids of the currently open loops, innermost last
    open_loops: Vec<usize>,
    /// guard variable -> the loop it belongs to
    guard_index: HashMap<VarName, usize>,
    /// normalized base written in a closed loop -> that loop's id
    used_after_index: HashMap<VarName, Vec<usize>>,
    aborted: Option<AbortedRecursion>,
    finished_aborts: Vec<AbortedRecursion>,
    next_abort_id: usize,
    recursion: RecursionNodeDb,
}

impl LoopStack {
    pub fn new(config: TrackerConfig, footprint: FootprintAnalysis) -> Self {
        let mut stack = Self {
            recursion: RecursionNodeDb::new(&config),
            config,
            footprint,
            scopes: Vec::new(),
            loops: Vec::new(),
            open_loops: Vec::new(),
            guard_index: HashMap::new(),
            used_after_index: HashMap::new(),
            aborted: None,
            finished_aborts: Vec::new(),
            next_abort_id: 0,
        };
        stack.push_scope();
        stack
    }

    /// Run the footprint analysis over `program` and build a tracker on
    /// top of it.
    pub fn for_program(config: TrackerConfig, program: &Program) -> Self {
        Self::new(config, FootprintAnalysis::analyze(program))
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn footprint(&self) -> &FootprintAnalysis {
        &self.footprint
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub fn abstract_recursion(&self) -> &RecursionNodeDb {
        &self.recursion
    }

    pub fn abstract_recursion_mut(&mut self) -> &mut RecursionNodeDb {
        &mut self.recursion
    }

    pub fn current_aborted_recursion(&self) -> Option<&AbortedRecursion> {
        self.aborted.as_ref()
    }

    pub fn is_in_loop(&self) -> bool {
        !self.open_loops.is_empty()
    }

    fn push_scope(&mut self) {
        self.scopes.push(Scope::new(self.scopes.len()));
    }

    fn current_scope(&self) -> &Scope {
        self.scopes.last().expect("a scope is pushed at construction")
    }

    fn current_loop_id(&self) -> Result<usize, TrackerError> {
        self.open_loops.last().copied().ok_or(TrackerError::NoOpenLoop)
    }

    /// Record a variable write. While an aborted recursion is in flight
    /// and has not produced its return value, writes route into that
    /// record instead of the scope arena.
    pub fn assign(&mut self, var: VarName) -> Result<(), TrackerError> {
        if var.as_str().is_empty() {
            return Err(TrackerError::EmptyIdentifier);
        }
        trace!(var = %var, "assign");
        if let Some(rec) = self.aborted.as_mut() {
            if !rec.past_return() {
                if var.is_return_value() {
                    rec.set_return(var);
                } else if self
                    .footprint
                    .get(rec.func_id)?
                    .parameters()
                    .contains(&var.normalized_base())
                {
                    rec.assign_parameter(var);
                } else {
                    trace!(var = %var, func = %rec.func_id, "ignoring write to aborted callee local");
                }
                return Ok(());
            }
        }
        if self.current_scope().split_before(var) {
            self.push_scope();
        }
        let scope = self
            .scopes
            .last_mut()
            .expect("a scope is pushed at construction");
        scope.assign(var)?;
        if var.is_guard() {
            if let Ok(id) = self.current_loop_id() {
                self.loops[id].process_assigned_guard_var(var);
            }
        }
        Ok(())
    }

    /// Record a variable read.
    pub fn access(&mut self, var: VarName) -> Result<(), TrackerError> {
        if var.as_str().is_empty() {
            return Err(TrackerError::EmptyIdentifier);
        }
        if let Some(rec) = &self.aborted {
            if !rec.past_return() {
                trace!(var = %var, func = %rec.func_id, "ignoring read inside aborted recursion");
                return Ok(());
            }
        }
        if let Some(ids) = self.used_after_index.get(&var.normalized_base()) {
            for &id in ids {
                self.loops[id].record_used_after(var);
            }
        }
        let scope = self
            .scopes
            .last_mut()
            .expect("a scope is pushed at construction");
        scope.access(var);
        Ok(())
    }

    /// Register the accumulated path guard for the currently open loop
    /// iteration. Trivial guards carry no information and are dropped.
    pub fn set_iter_guard(&mut self, guard: GuardExpr) {
        if let Some(&id) = self.open_loops.last() {
            if !guard.is_trivial() {
                if let Some(atom) = guard.last() {
                    self.guard_index.insert(atom.var, id);
                }
                self.loops[id].add_guard(guard);
            }
        }
    }

    /// The loop a guard variable belongs to, if any.
    pub fn get_loop_for_guard_symbol(&self, guard_var: VarName) -> Option<&Loop> {
        self.guard_index.get(&guard_var).map(|&id| &self.loops[id])
    }

    /// Enter a loop: open a fresh scope and push a new loop whose
    /// parent is the currently innermost open loop.
    pub fn push_back_loop(&mut self, func_id: FuncId, loop_nr: usize, context_guard: GuardExpr) {
        let before = self.current_scope().id;
        self.push_scope();
        let id = self.loops.len();
        let parent = self.open_loops.last().copied();
        debug!(loop_id = id, func = %func_id, nr = loop_nr, "start loop");
        self.loops.push(Loop::new(
            id,
            func_id,
            loop_nr,
            parent,
            self.open_loops.len(),
            context_guard,
            before,
            func_id.as_str().is_empty(),
            self.config.carry_misc_inputs,
        ));
        self.open_loops.push(id);
    }

    /// Open the next iteration of the innermost loop. When `is_last` is
    /// set this is the abstract final iteration: the loop's inputs are
    /// classified and havocked before the executor resumes the body.
    pub fn push_loop_iteration<E: Executor>(
        &mut self,
        is_second_to_last: bool,
        is_last: bool,
        exec: &mut E,
    ) -> Result<(), TrackerError> {
        let id = self.current_loop_id()?;
        if is_second_to_last && is_last {
            return Err(TrackerError::ConflictingIterationFlags { loop_id: id });
        }
        self.push_scope();
        let start = self.current_scope().id;
        debug!(loop_id = id, start_scope = start, is_last, "push iteration");
        let lp = &mut self.loops[id];
        lp.push_iteration(start - 1, start, is_second_to_last, is_last)?;
        if is_last {
            lp.begin_last_iteration(&self.scopes, exec)?;
        }
        Ok(())
    }

    /// Close the innermost loop: pop its trailing fixed-point
    /// iteration, resolve and havoc its outputs, and open the post-loop
    /// join scope.
    pub fn end_current_loop<E: Executor>(&mut self, exec: &mut E) -> Result<(), TrackerError> {
        let id = self.current_loop_id()?;
        let end = self.current_scope().id;
        debug!(loop_id = id, end_scope = end, "end loop");
        let lp = &mut self.loops[id];
        lp.structural_end(end, &self.scopes)?;
        lp.finish(&self.scopes, exec)?;
        for base in lp.loop_iter_output(&self.scopes)? {
            self.used_after_index
                .entry(base.normalized_base())
                .or_default()
                .push(id);
        }
        self.open_loops.pop();
        self.push_scope();
        Ok(())
    }

    /// A recursive call exceeded its unwinding bound: start an aborted
    /// recursion record, eagerly resolving the callee's read footprint.
    pub fn push_aborted_recursion<E: Executor>(
        &mut self,
        func_id: FuncId,
        guard: GuardExpr,
        exec: &E,
    ) -> Result<(), TrackerError> {
        if let Some(rec) = &self.aborted {
            return Err(TrackerError::RecursionAlreadyInFlight { func: rec.func_id });
        }
        let footprint = self.footprint.get(func_id)?;
        let parent = if let Some(node_id) = self.recursion.unfinished_node_id() {
            ParentId::Recursion(node_id)
        } else if let Some(&loop_id) = self.open_loops.last() {
            ParentId::Loop(loop_id)
        } else {
            ParentId::None
        };
        debug!(func = %func_id, ?parent, "abort recursion");
        self.aborted = Some(AbortedRecursion::new(
            self.next_abort_id,
            func_id,
            parent,
            guard,
            footprint,
            exec,
        ));
        self.next_abort_id += 1;
        Ok(())
    }

    /// The aborted call completed textually: havoc its written globals
    /// and retire the record.
    pub fn pop_aborted_recursion<E: Executor>(&mut self, exec: &mut E) -> Result<(), TrackerError> {
        let mut rec = self.aborted.take().ok_or(TrackerError::NoRecursionInFlight)?;
        let footprint = self.footprint.get(rec.func_id)?;
        rec.finalize_written(footprint, exec);
        debug!(func = %rec.func_id, "end aborted recursion");
        self.finished_aborts.push(rec);
        Ok(())
    }

    /// Should the executor suppress a write to `lhs`? True for writes
    /// into the return temporary of an aborted call whose abstraction
    /// is already finalized.
    pub fn should_discard_assignments_to(&self, lhs: VarName) -> bool {
        self.aborted.as_ref().is_some_and(|rec| rec.discards(lhs))
    }

    pub fn finished_aborted_recursions(&self) -> &[AbortedRecursion] {
        &self.finished_aborts
    }

    /// Serialize every closed loop, aborted recursion and recursion
    /// node/child. Loops that never reached their abstract last
    /// iteration are skipped; an unfinished recursion node is reported
    /// and skipped.
    pub fn report(&self) -> String {
        if let Some(func) = self.recursion.unfinished() {
            error!(func = %func, "unfinished recursion node at finalize");
        }
        let mut out = String::new();
        for lp in &self.loops {
            if let Some(line) = lp.render(&self.scopes) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        for rec in &self.finished_aborts {
            out.push_str(&rec.render());
            out.push('\n');
        }
        self.recursion.render(&mut out);
        out
    }

    /// Write the report to `w`.
    pub fn emit<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.report().as_bytes())
    }

    /// Consume the tracker and return its report. Emission is explicit;
    /// dropping a tracker (for example for an infeasible path) emits
    /// nothing.
    pub fn finalize(self) -> String {
        self.report()
    }
}
