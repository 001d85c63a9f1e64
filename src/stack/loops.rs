//! Loops and their unwound iterations.
//!
//! A loop is a contiguous range of scopes per iteration. The tracker
//! never unrolls indefinitely: after the next-to-last unrolled copy it
//! keeps only an abstract last iteration whose inputs are havocked and
//! whose outputs are resolved when the loop closes.

use crate::error::TrackerError;
use crate::executor::Executor;
use crate::guard::GuardExpr;
use crate::scope::Scope;
use crate::varname::{FuncId, VarName};
use crate::vars::VariableSet;
use itertools::Itertools;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

/// Base name to resolved SSA name.
pub type NameMapping = BTreeMap<VarName, VarName>;

pub fn create_mapping<I, F>(vars: I, mut f: F) -> NameMapping
where
    I: IntoIterator<Item = VarName>,
    F: FnMut(VarName) -> VarName,
{
    vars.into_iter().map(|var| (var, f(var))).collect()
}

fn render_mapping(mapping: &NameMapping) -> String {
    mapping
        .iter()
        .flat_map(|(base, resolved)| [base, resolved])
        .join(" ")
}

/// Collect variables over an inclusive scope range through an accessor.
pub(crate) fn collect_vars(
    scopes: &[Scope],
    start: usize,
    end: usize,
    accessor: impl Fn(&Scope) -> &HashSet<VarName>,
) -> Vec<VarName> {
    scopes[start..=end]
        .iter()
        .flat_map(|scope| accessor(scope).iter().copied())
        .collect()
}

/// One unwound copy of a loop body.
#[derive(Debug, Clone)]
pub struct LoopIteration {
    pub id: usize,
    pub start_scope: usize,
    end_scope: Option<usize>,
    guard: Option<VarName>,
    pub is_second_to_last: bool,
    pub is_last: bool,
}

impl LoopIteration {
    fn new(id: usize, start_scope: usize, is_second_to_last: bool, is_last: bool) -> Self {
        Self {
            id,
            start_scope,
            end_scope: None,
            guard: None,
            is_second_to_last,
            is_last,
        }
    }

    pub fn end_scope(&self) -> Option<usize> {
        self.end_scope
    }

    pub fn guard(&self) -> Option<VarName> {
        self.guard
    }
}

/// Accessed/written variables of one closed iteration.
#[derive(Debug)]
pub struct IterationVariables {
    accessed: VariableSet,
    written: VariableSet,
}

impl IterationVariables {
    pub fn accessed(&self) -> &VariableSet {
        &self.accessed
    }

    pub fn written(&self) -> &VariableSet {
        &self.written
    }

    /// Bases read at a version this iteration never wrote.
    pub fn read_bases(&self) -> Vec<VarName> {
        self.accessed.get_var_bases_not_in(&self.written.get_first())
    }
}

/// The abstract representation of the final iteration: the name
/// mappings relating pre-loop values, havocked inner values and
/// resolved outputs.
#[derive(Debug, Default, Clone)]
pub struct LastIteration {
    guard: Option<VarName>,
    input: NameMapping,
    inner_input: NameMapping,
    misc_input: NameMapping,
    inner_output: NameMapping,
    output: NameMapping,
}

impl LastIteration {
    pub fn input(&self) -> &NameMapping {
        &self.input
    }

    pub fn inner_input(&self) -> &NameMapping {
        &self.inner_input
    }

    pub fn misc_input(&self) -> &NameMapping {
        &self.misc_input
    }

    pub fn inner_output(&self) -> &NameMapping {
        &self.inner_output
    }

    pub fn output(&self) -> &NameMapping {
        &self.output
    }
}

/// A loop under unwinding, plus its summary once abstracted.
#[derive(Debug, Clone)]
pub struct Loop {
    pub id: usize,
    pub func_id: FuncId,
    /// index of the loop within its function
    pub nr: usize,
    pub parent: Option<usize>,
    pub depth: usize,
    pub context_guard: GuardExpr,
    /// the scope active just before the loop was entered
    pub before_end_scope: usize,
    fully_over_approximate: bool,
    carry_misc_inputs: bool,
    iterations: Vec<LoopIteration>,
    guards: Vec<GuardExpr>,
    last_iter: Option<LastIteration>,
    used_after: VariableSet,
}

impl Loop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        func_id: FuncId,
        nr: usize,
        parent: Option<usize>,
        depth: usize,
        context_guard: GuardExpr,
        before_end_scope: usize,
        fully_over_approximate: bool,
        carry_misc_inputs: bool,
    ) -> Self {
        Self {
            id,
            func_id,
            nr,
            parent,
            depth,
            context_guard,
            before_end_scope,
            fully_over_approximate,
            carry_misc_inputs,
            iterations: Vec::new(),
            guards: Vec::new(),
            last_iter: None,
            used_after: VariableSet::new(),
        }
    }

    pub fn iterations(&self) -> &[LoopIteration] {
        &self.iterations
    }

    pub fn guards(&self) -> &[GuardExpr] {
        &self.guards
    }

    pub fn last_iteration(&self) -> Option<&LastIteration> {
        self.last_iter.as_ref()
    }

    pub fn in_last_iteration(&self) -> bool {
        self.last_iter.is_some()
    }

    pub fn used_after(&self) -> &VariableSet {
        &self.used_after
    }

    pub(crate) fn record_used_after(&mut self, var: VarName) {
        self.used_after.insert(var);
    }

    /// Close the previous iteration (if any) at `end_of_previous` and
    /// open a new one starting at `start_scope`.
    pub(crate) fn push_iteration(
        &mut self,
        end_of_previous: usize,
        start_scope: usize,
        is_second_to_last: bool,
        is_last: bool,
    ) -> Result<(), TrackerError> {
        if let Some(previous) = self.iterations.last_mut() {
            if previous.end_scope.is_some() {
                return Err(TrackerError::IterationAlreadyClosed {
                    loop_id: self.id,
                    iteration: previous.id,
                });
            }
            previous.end_scope = Some(end_of_previous);
        }
        self.iterations.push(LoopIteration::new(
            self.iterations.len(),
            start_scope,
            is_second_to_last,
            is_last,
        ));
        Ok(())
    }

    /// Close the trailing fixed-point iteration. It must contain no
    /// assignments: by the time unrolling stops, the loop body has
    /// converged and one extra no-op copy remains.
    pub(crate) fn structural_end(
        &mut self,
        end_scope: usize,
        scopes: &[Scope],
    ) -> Result<(), TrackerError> {
        let loop_id = self.id;
        let Some(last) = self.iterations.last_mut() else {
            return Err(TrackerError::IterationAlreadyClosed {
                loop_id,
                iteration: 0,
            });
        };
        if last.end_scope.is_some() {
            return Err(TrackerError::IterationAlreadyClosed {
                loop_id,
                iteration: last.id,
            });
        }
        last.end_scope = Some(end_scope);
        let has_effects = scopes[last.start_scope..=end_scope]
            .iter()
            .any(|scope| !scope.assigned().is_empty());
        if has_effects {
            return Err(TrackerError::IterationHasEffects {
                loop_id,
                iteration: last.id,
            });
        }
        self.iterations.pop();
        Ok(())
    }

    pub(crate) fn add_guard(&mut self, guard: GuardExpr) {
        self.guards.push(guard);
    }

    /// Record `var` as the guard of the currently open iteration, if it
    /// does not have one yet.
    pub(crate) fn process_assigned_guard_var(&mut self, var: VarName) {
        if let Some(iteration) = self.iterations.last_mut() {
            if iteration.guard.is_none() {
                iteration.guard = Some(var);
            }
        }
    }

    /// The loop-condition variable of the first processed iteration.
    pub fn first_guard(&self) -> Option<VarName> {
        self.guards.first().and_then(|g| g.last()).map(|a| a.var)
    }

    /// The pre-loop end scope that excludes the structurally special
    /// first iteration: walk backward from `before_end_scope` until the
    /// following scope introduces the first-iteration guard.
    pub fn adjusted_end_scope(&self, scopes: &[Scope]) -> usize {
        let mut end = self.before_end_scope;
        if let Some(first_guard) = self.first_guard() {
            while end > 0 && !scopes[end + 1].matches_guard(first_guard) {
                end -= 1;
            }
        }
        end
    }

    fn first_iteration(&self) -> Result<&LoopIteration, TrackerError> {
        self.iterations
            .first()
            .ok_or(TrackerError::NotEnoughIterations { loop_id: self.id })
    }

    pub(crate) fn iteration_variables(
        &self,
        iteration: &LoopIteration,
        scopes: &[Scope],
    ) -> IterationVariables {
        let end = iteration.end_scope.unwrap_or(iteration.start_scope);
        IterationVariables {
            accessed: VariableSet::from_iter(collect_vars(
                scopes,
                iteration.start_scope,
                end,
                Scope::accessed,
            )),
            written: VariableSet::from_iter(collect_vars(
                scopes,
                iteration.start_scope,
                end,
                Scope::assigned,
            )),
        }
    }

    /// Classify the first iteration's variables: a loop input is read
    /// and written in the same iteration; variables read at a version
    /// the iteration never wrote are misc inputs. Deliberately
    /// over-approximate: a write counts as a read, so every written
    /// variable classifies as an input.
    pub fn loop_iter_input(&self, scopes: &[Scope]) -> Result<(Vec<VarName>, Vec<VarName>), TrackerError> {
        let vars = self.iteration_variables(self.first_iteration()?, scopes);
        let misc = vars.read_bases();
        let input = vars
            .accessed()
            .var_bases()
            .into_iter()
            .filter(|base| !misc.contains(base))
            .collect();
        Ok((input, misc))
    }

    /// A loop output is any variable written in the first iteration.
    pub fn loop_iter_output(&self, scopes: &[Scope]) -> Result<Vec<VarName>, TrackerError> {
        Ok(self
            .iteration_variables(self.first_iteration()?, scopes)
            .written()
            .var_bases())
    }

    /// Enter the abstract last iteration: classify the loop-carried
    /// inputs, snapshot their current values, then havoc them so the
    /// final body executes on unconstrained state.
    ///
    /// Inputs that are guard-shaped, or whose pre-loop value was never
    /// actually assigned (SSA version 0 and not an over-approximation
    /// constant), demote to misc inputs.
    pub(crate) fn begin_last_iteration<E: Executor>(
        &mut self,
        scopes: &[Scope],
        exec: &mut E,
    ) -> Result<(), TrackerError> {
        if self.iterations.len() < 2 {
            return Err(TrackerError::NotEnoughIterations { loop_id: self.id });
        }
        if self.last_iter.is_some() {
            return Err(TrackerError::LastIterationAlreadyBegun { loop_id: self.id });
        }
        let (candidates, mut misc) = self.loop_iter_input(scopes)?;
        let mut input = Vec::new();
        for var in candidates {
            let resolved = exec.resolve(var.l0());
            let assigned_before = resolved.version().unwrap_or(0) > 0 || resolved.is_oa_constant();
            if !var.is_guard() && assigned_before {
                input.push(var);
            } else {
                misc.push(var);
            }
        }
        if self.carry_misc_inputs {
            // the "to be safe" variant: havoc read-only variables too
            let (carried, kept): (Vec<_>, Vec<_>) = misc.into_iter().partition(|v| !v.is_guard());
            input.extend(carried);
            misc = kept;
        }
        let outer_input = create_mapping(input.iter().copied(), |var| exec.resolve(var.l0()));
        let misc_input = create_mapping(misc, |var| exec.resolve(var.l0()));
        let inner_input = create_mapping(input, |var| {
            exec.assign_unknown(var.l0());
            exec.resolve(var.l0())
        });
        self.last_iter = Some(LastIteration {
            guard: None,
            input: outer_input,
            inner_input,
            misc_input,
            inner_output: NameMapping::new(),
            output: NameMapping::new(),
        });
        Ok(())
    }

    /// Resolve the abstract iteration's outputs and havoc them so
    /// execution past the loop continues on unconstrained values.
    pub(crate) fn finish<E: Executor>(
        &mut self,
        scopes: &[Scope],
        exec: &mut E,
    ) -> Result<(), TrackerError> {
        if self.last_iter.is_none() {
            return Err(TrackerError::LastIterationNotBegun { loop_id: self.id });
        }
        let guard = self.iterations.last().and_then(|it| it.guard);
        let output = self.loop_iter_output(scopes)?;
        let inner_output = create_mapping(output.iter().copied(), |var| exec.resolve(var.l0()));
        let outer_output = create_mapping(output, |var| {
            exec.assign_unknown(var.l0());
            exec.resolve(var.l0())
        });
        if let Some(last) = self.last_iter.as_mut() {
            last.guard = guard;
            last.inner_output = inner_output;
            last.output = outer_output;
        }
        Ok(())
    }

    /// Variables assigned before the loop whose normalized base is also
    /// written inside it: the candidates for loop-carried state. Name
    /// matching is best effort by design.
    pub fn outer_variables(&self, scopes: &[Scope]) -> Result<Vec<VarName>, TrackerError> {
        let inner: HashSet<VarName> = self
            .loop_iter_output(scopes)?
            .into_iter()
            .map(|v| v.normalized_base())
            .collect();
        Ok(collect_vars(scopes, 0, self.adjusted_end_scope(scopes), Scope::assigned)
            .into_iter()
            .filter(|v| inner.contains(&v.normalized_base()))
            .sorted()
            .dedup()
            .collect())
    }

    /// The `c loop` record, or `None` for loops that never reached
    /// their abstract last iteration.
    pub(crate) fn render(&self, scopes: &[Scope]) -> Option<String> {
        let last = self.last_iter.as_ref()?;
        let mut out = String::new();
        let parent = self
            .parent
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-1".into());
        write!(
            out,
            "c loop {} {} {} {}",
            self.id, self.func_id, self.nr, parent
        )
        .ok()?;
        write!(out, " | sfoa {}", u8::from(self.fully_over_approximate)).ok()?;
        write!(out, " | guards").ok()?;
        if let Some(final_guard) = self.guards.last() {
            let atoms = final_guard.atoms(1);
            if !atoms.is_empty() {
                write!(out, " {}", atoms.iter().join(" ")).ok()?;
            } else if let Some(atom) = final_guard.last() {
                // a single-atom guard is not a conjunction; print it whole
                write!(out, " {atom}").ok()?;
            }
        }
        write!(out, " | lguard").ok()?;
        if let Some(atom) = self.guards.last().and_then(|g| g.last()) {
            write!(out, " {atom}").ok()?;
        }
        write!(out, " | linput {}", render_mapping(&last.input)).ok()?;
        write!(out, " | lmisc_input {}", render_mapping(&last.misc_input)).ok()?;
        write!(out, " | linner_input {}", render_mapping(&last.inner_input)).ok()?;
        write!(out, " | linner_output {}", render_mapping(&last.inner_output)).ok()?;
        write!(out, " | loutput {}", render_mapping(&last.output)).ok()?;
        let outer = self.outer_variables(scopes).unwrap_or_default();
        write!(out, " | outer {}", outer.iter().join(" ")).ok()?;
        write!(
            out,
            " | used_after {}",
            self.used_after.var_bases().iter().join(" ")
        )
        .ok()?;
        Some(out)
    }
}
