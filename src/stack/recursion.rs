//! Abstraction of recursive calls whose unwinding was cut off.
//!
//! Two strengths. Simple mode records one [`AbortedRecursion`] per
//! call site: the call's guard, its parameter bindings, the globals its
//! footprint may read, and havocked values for everything it may write.
//! Abstract mode additionally summarizes each function once as a
//! [`RecursionNode`] and relates every call site to that summary
//! through a [`RecursionChild`].

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::executor::Executor;
use crate::footprint::{FootprintAnalysis, FunctionFootprint};
use crate::guard::GuardExpr;
use crate::stack::loops::{NameMapping, create_mapping};
use crate::varname::{FuncId, VarName};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::fmt::Write;
use tracing::debug;

/// The lexical container an aborted recursion occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentId {
    None,
    Loop(usize),
    Recursion(usize),
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentId::None => write!(f, "none"),
            ParentId::Loop(id) => write!(f, "loop:{id}"),
            ParentId::Recursion(id) => write!(f, "rec:{id}"),
        }
    }
}

fn render_mapping(mapping: &NameMapping) -> String {
    mapping
        .iter()
        .flat_map(|(base, resolved)| [base, resolved])
        .join(" ")
}

/// A recursive call cut off at the unwinding bound, in simple mode.
///
/// Created when the bound is exceeded; the record is "past its return"
/// once the callee's return-value temporary has been written, and
/// immutable after [`AbortedRecursion::finalize_written`] runs at the
/// call's textual completion.
#[derive(Debug, Clone)]
pub struct AbortedRecursion {
    pub id: usize,
    pub func_id: FuncId,
    pub parent: ParentId,
    guard: GuardExpr,
    parameters: BTreeSet<VarName>,
    read_globals: BTreeSet<VarName>,
    return_var: Option<VarName>,
    written_globals: BTreeSet<VarName>,
}

impl AbortedRecursion {
    pub(crate) fn new<E: Executor>(
        id: usize,
        func_id: FuncId,
        parent: ParentId,
        guard: GuardExpr,
        footprint: &FunctionFootprint,
        exec: &E,
    ) -> Self {
        // the read footprint is resolved eagerly, before the aborted
        // body gets a chance to move any SSA counters
        let read_globals = footprint
            .read_globals()
            .into_iter()
            .map(|var| exec.resolve(var))
            .collect();
        Self {
            id,
            func_id,
            parent,
            guard,
            parameters: BTreeSet::new(),
            read_globals,
            return_var: None,
            written_globals: BTreeSet::new(),
        }
    }

    pub(crate) fn assign_parameter(&mut self, var: VarName) {
        self.parameters.insert(var);
    }

    pub(crate) fn set_return(&mut self, var: VarName) {
        self.return_var = Some(var);
    }

    /// The return-value temporary has been written; nothing further
    /// routes into this record.
    pub fn past_return(&self) -> bool {
        self.return_var.is_some()
    }

    /// Should a write to `lhs` be suppressed? True for further writes
    /// to the already-finalized return temporary; the executor treats
    /// them as harmless self-assignments.
    pub fn discards(&self, lhs: VarName) -> bool {
        self.return_var
            .is_some_and(|ret| ret.normalized_base() == lhs.normalized_base())
    }

    /// Havoc and resolve every global the footprint says the call may
    /// write.
    pub(crate) fn finalize_written<E: Executor>(
        &mut self,
        footprint: &FunctionFootprint,
        exec: &mut E,
    ) {
        self.written_globals = footprint
            .assigned_globals()
            .into_iter()
            .map(|var| {
                exec.assign_unknown(var);
                exec.resolve(var)
            })
            .collect();
    }

    pub fn parameters(&self) -> &BTreeSet<VarName> {
        &self.parameters
    }

    pub fn read_globals(&self) -> &BTreeSet<VarName> {
        &self.read_globals
    }

    pub fn written_globals(&self) -> &BTreeSet<VarName> {
        &self.written_globals
    }

    pub fn return_var(&self) -> Option<VarName> {
        self.return_var
    }

    pub fn guard(&self) -> &GuardExpr {
        &self.guard
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "c recursion {} {} {} | constraint {} | parameters {} | input {} | output {} | return",
            self.id,
            self.func_id,
            self.parent,
            self.guard,
            self.parameters.iter().join(" "),
            self.read_globals.iter().join(" "),
            self.written_globals.iter().join(" "),
        );
        if let Some(ret) = self.return_var {
            let _ = write!(out, " {ret}");
        }
        out
    }
}

/// One concrete call site related to a function's summary node.
#[derive(Debug, Clone)]
pub struct RecursionChild {
    pub id: usize,
    pub func_name: FuncId,
    guard: GuardExpr,
    input: NameMapping,
    output: NameMapping,
    /// the summary node being built when this call site was seen
    parent: Option<FuncId>,
}

impl RecursionChild {
    fn create(
        id: usize,
        footprint: &FunctionFootprint,
        guard: GuardExpr,
        mut initial_resolve: impl FnMut(VarName) -> VarName,
        parent: Option<FuncId>,
    ) -> Self {
        Self {
            id,
            func_name: footprint.function_id,
            guard,
            input: create_mapping(footprint.parameters_and_read_globals(), &mut initial_resolve),
            output: NameMapping::new(),
            parent,
        }
    }

    /// Havoc a fresh unknown for every written global and the return
    /// value of this call site.
    fn assign_written<E: Executor>(&mut self, footprint: &FunctionFootprint, exec: &mut E) {
        self.output = create_mapping(footprint.assigned_globals_and_return(), |var| {
            exec.assign_unknown(var);
            exec.resolve(var)
        });
    }

    pub fn input(&self) -> &NameMapping {
        &self.input
    }

    pub fn output(&self) -> &NameMapping {
        &self.output
    }

    pub fn guard(&self) -> &GuardExpr {
        &self.guard
    }

    pub fn parent(&self) -> Option<FuncId> {
        self.parent
    }

    pub(crate) fn render(&self) -> String {
        format!(
            "c rec child {} {} | input {} | output {} | constraint {}",
            self.id,
            self.func_name,
            render_mapping(&self.input),
            render_mapping(&self.output),
            self.guard,
        )
    }
}

/// The single reusable summary of one recursive function.
#[derive(Debug, Clone)]
pub struct RecursionNode {
    pub id: usize,
    pub func_name: FuncId,
    /// havocked parameters and read globals the body was evaluated on
    input: NameMapping,
    output: NameMapping,
    /// the caller's guard, restored when the node finishes
    prev_guard: GuardExpr,
    /// the call site's actual input values before the havoc
    prev_input: NameMapping,
}

impl RecursionNode {
    fn create<E: Executor>(
        id: usize,
        footprint: &FunctionFootprint,
        prev_guard: GuardExpr,
        exec: &mut E,
    ) -> Self {
        let inputs = footprint.parameters_and_read_globals();
        let prev_input = create_mapping(inputs.iter().copied(), |var| exec.resolve(var));
        let input = create_mapping(inputs, |var| {
            exec.assign_unknown(var);
            exec.resolve(var)
        });
        Self {
            id,
            func_name: footprint.function_id,
            input,
            output: NameMapping::new(),
            prev_guard,
            prev_input,
        }
    }

    pub fn input(&self) -> &NameMapping {
        &self.input
    }

    pub fn output(&self) -> &NameMapping {
        &self.output
    }

    pub fn prev_input(&self) -> &NameMapping {
        &self.prev_input
    }

    pub(crate) fn render(&self) -> String {
        format!(
            "c rec node {} | input {} | output {}",
            self.func_name,
            render_mapping(&self.input),
            render_mapping(&self.output),
        )
    }
}

/// All recursion nodes and the call sites that reference them.
#[derive(Debug, Clone)]
pub struct RecursionNodeDb {
    enabled: bool,
    inlining_depth: u32,
    nodes: BTreeMap<FuncId, RecursionNode>,
    unfinished: Option<FuncId>,
    children: Vec<RecursionChild>,
    requested: VecDeque<FuncId>,
    next_node_id: usize,
}

impl RecursionNodeDb {
    pub(crate) fn new(config: &TrackerConfig) -> Self {
        Self {
            enabled: config.abstract_recursion,
            inlining_depth: config.inlining_depth,
            nodes: BTreeMap::new(),
            unfinished: None,
            children: Vec::new(),
            requested: VecDeque::new(),
            next_node_id: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn inlining_depth(&self) -> u32 {
        self.inlining_depth
    }

    pub fn in_abstract_recursion(&self) -> bool {
        self.unfinished.is_some()
    }

    pub(crate) fn unfinished_node_id(&self) -> Option<usize> {
        self.unfinished
            .and_then(|func| self.nodes.get(&func))
            .map(|node| node.id)
    }

    /// Does a usable (finished, or currently being built for this very
    /// function) summary exist?
    pub fn contains(&self, func: FuncId) -> bool {
        self.nodes.contains_key(&func)
            && self.unfinished.is_none_or(|pending| pending == func)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RecursionNode> {
        self.nodes.values()
    }

    pub fn children(&self) -> &[RecursionChild] {
        &self.children
    }

    /// Record a call site against the (existing or in-flight) summary
    /// of `func`, havocking the site's outputs.
    pub fn create_rec_child<E: Executor>(
        &mut self,
        func: FuncId,
        guard: GuardExpr,
        footprints: &FootprintAnalysis,
        exec: &mut E,
    ) -> Result<(), TrackerError> {
        if !self.enabled {
            return Err(TrackerError::AbstractRecursionDisabled);
        }
        let footprint = footprints.get(func)?;
        let mut child = RecursionChild::create(
            self.children.len(),
            footprint,
            guard,
            |var| exec.resolve(var),
            self.unfinished,
        );
        child.assign_written(footprint, exec);
        debug!(func = %func, id = child.id, "recorded rec child");
        self.children.push(child);
        Ok(())
    }

    /// Start summarizing `func`: havoc its parameters and read globals,
    /// clear the path guard, and let the executor evaluate the body.
    /// Protocol errors: an unfinished node exists, a node for `func`
    /// already exists, or `func` is unknown.
    pub fn begin_node<E: Executor>(
        &mut self,
        func: FuncId,
        current_guard: GuardExpr,
        footprints: &FootprintAnalysis,
        exec: &mut E,
    ) -> Result<(), TrackerError> {
        if !self.enabled {
            return Err(TrackerError::AbstractRecursionDisabled);
        }
        if let Some(pending) = self.unfinished {
            return Err(TrackerError::UnfinishedNodeExists {
                pending,
                requested: func,
            });
        }
        if self.nodes.contains_key(&func) {
            return Err(TrackerError::NodeAlreadyExists { func });
        }
        let footprint = footprints.get(func)?;
        let node = RecursionNode::create(self.next_node_id, footprint, current_guard, exec);
        self.next_node_id += 1;
        debug!(func = %func, "begin rec node");
        self.nodes.insert(func, node);
        self.unfinished = Some(func);
        // the summary body runs under no path constraints
        exec.set_guard(GuardExpr::top());
        Ok(())
    }

    /// Finish the unfinished node: resolve and havoc its outputs,
    /// restore the caller's guard, and record the originating call site
    /// as a child whose inputs are the saved pre-havoc values.
    pub fn finish_node<E: Executor>(
        &mut self,
        func: FuncId,
        footprints: &FootprintAnalysis,
        exec: &mut E,
    ) -> Result<(), TrackerError> {
        match self.unfinished {
            None => return Err(TrackerError::NoUnfinishedNode { func }),
            Some(pending) if pending != func => {
                return Err(TrackerError::WrongUnfinishedNode {
                    expected: pending,
                    got: func,
                });
            }
            Some(_) => {}
        }
        let footprint = footprints.get(func)?;
        let (prev_guard, prev_input) = {
            let Some(node) = self.nodes.get_mut(&func) else {
                return Err(TrackerError::NoUnfinishedNode { func });
            };
            node.output = create_mapping(footprint.assigned_globals_and_return(), |var| {
                exec.assign_unknown(var);
                exec.resolve(var)
            });
            (node.prev_guard.clone(), node.prev_input.clone())
        };
        exec.set_guard(prev_guard.clone());
        let mut child = RecursionChild::create(
            self.children.len(),
            footprint,
            prev_guard,
            |var| prev_input.get(&var).copied().unwrap_or_else(|| exec.resolve(var)),
            None,
        );
        child.assign_written(footprint, exec);
        self.children.push(child);
        self.unfinished = None;
        debug!(func = %func, "finished rec node");
        Ok(())
    }

    /// Queue `func` to be summarized once the current node completes.
    /// Summarization is never reentered mid-summary.
    pub fn request(&mut self, func: FuncId) {
        if !self.requested.contains(&func) && !self.nodes.contains_key(&func) {
            self.requested.push_back(func);
        }
    }

    /// Drain the queued summary requests, for the executor to drive
    /// after [`RecursionNodeDb::finish_node`].
    pub fn take_requested(&mut self) -> Vec<FuncId> {
        self.requested.drain(..).collect()
    }

    pub(crate) fn unfinished(&self) -> Option<FuncId> {
        self.unfinished
    }

    pub(crate) fn render(&self, out: &mut String) {
        for node in self.nodes.values() {
            out.push_str(&node.render());
            out.push('\n');
        }
        for child in &self.children {
            out.push_str(&child.render());
            out.push('\n');
        }
    }
}
