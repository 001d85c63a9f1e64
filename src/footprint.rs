//! Whole-program function footprints.
//!
//! Computed once, before any symbolic-execution event is processed, and
//! read-only afterwards: for every function, a conservative superset of
//! the variables it or any transitive callee may read or write. The
//! tracker consults these sets to decide what must be havocked when a
//! call is abstracted instead of unrolled.

use crate::error::TrackerError;
use crate::program::{Expr, Instruction, Program};
use crate::varname::{FuncId, VarName};
use itertools::Itertools;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// Per-function read/write summary. `assigned`/`read` start out equal
/// to the direct sets and only ever grow during the fixpoint.
#[derive(Debug, Clone)]
pub struct FunctionFootprint {
    pub function_id: FuncId,
    directly_assigned: HashSet<VarName>,
    directly_read: HashSet<VarName>,
    assigned: HashSet<VarName>,
    read: HashSet<VarName>,
    parameters: Vec<VarName>,
    return_var: Option<VarName>,
    callers: HashSet<FuncId>,
    callees: HashSet<FuncId>,
}

impl FunctionFootprint {
    fn new(
        function_id: FuncId,
        directly_assigned: HashSet<VarName>,
        directly_read: HashSet<VarName>,
        parameters: Vec<VarName>,
        return_var: Option<VarName>,
        callers: HashSet<FuncId>,
        callees: HashSet<FuncId>,
    ) -> Self {
        Self {
            function_id,
            assigned: directly_assigned.clone(),
            read: directly_read.clone(),
            directly_assigned,
            directly_read,
            parameters,
            return_var,
            callers,
            callees,
        }
    }

    /// Union another function's transitive sets into this one. Returns
    /// whether anything new was recorded.
    fn absorb(&mut self, other: &FunctionFootprint) -> bool {
        let before = self.assigned.len() + self.read.len();
        self.assigned.extend(other.assigned.iter().copied());
        self.read.extend(other.read.iter().copied());
        before != self.assigned.len() + self.read.len()
    }

    pub fn assigned_variables(&self) -> &HashSet<VarName> {
        &self.assigned
    }

    pub fn read_variables(&self) -> &HashSet<VarName> {
        &self.read
    }

    pub fn directly_assigned_variables(&self) -> &HashSet<VarName> {
        &self.directly_assigned
    }

    pub fn directly_read_variables(&self) -> &HashSet<VarName> {
        &self.directly_read
    }

    pub fn parameters(&self) -> &[VarName] {
        &self.parameters
    }

    pub fn return_var(&self) -> Option<VarName> {
        self.return_var
    }

    pub fn callers(&self) -> &HashSet<FuncId> {
        &self.callers
    }

    pub fn callees(&self) -> &HashSet<FuncId> {
        &self.callees
    }

    pub fn assigned_globals(&self) -> BTreeSet<VarName> {
        self.assigned.iter().filter(|v| v.is_global()).copied().collect()
    }

    pub fn read_globals(&self) -> BTreeSet<VarName> {
        self.read.iter().filter(|v| v.is_global()).copied().collect()
    }

    pub fn assigned_globals_and_return(&self) -> BTreeSet<VarName> {
        let mut out = self.assigned_globals();
        out.extend(self.return_var);
        out
    }

    pub fn parameters_and_read_globals(&self) -> BTreeSet<VarName> {
        let mut out = self.read_globals();
        out.extend(self.parameters.iter().copied());
        out
    }
}

impl fmt::Display for FunctionFootprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "footprint({}, parameters = {}",
            self.function_id,
            self.parameters.iter().join(" ")
        )?;
        if let Some(ret) = self.return_var {
            write!(f, ", return = {ret}")?;
        }
        write!(
            f,
            ", assigned_globals = {}, read_globals = {})",
            self.assigned_globals().iter().join(" "),
            self.read_globals().iter().join(" ")
        )
    }
}

/// Variables a single function body touches directly.
#[derive(Default)]
struct DirectUse {
    assigned: HashSet<VarName>,
    read: HashSet<VarName>,
    return_var: Option<VarName>,
}

fn scan_body(body: &[Instruction]) -> DirectUse {
    let mut use_ = DirectUse::default();
    for instruction in body {
        match instruction {
            Instruction::Assign { lhs, rhs } => {
                match lhs {
                    // an index lvalue writes the base array symbol;
                    // every other symbol in it is a read
                    Expr::Index { array, index } => {
                        let symbols = array.symbols();
                        if let Some((first, rest)) = symbols.split_first() {
                            use_.assigned.insert(*first);
                            use_.read.extend(rest.iter().copied());
                        }
                        index.visit_symbols(&mut |v| {
                            use_.read.insert(v);
                        });
                    }
                    Expr::Symbol(var) => {
                        use_.assigned.insert(*var);
                        if var.is_return_value() {
                            use_.return_var = Some(*var);
                        }
                    }
                    other => other.visit_symbols(&mut |v| {
                        use_.read.insert(v);
                    }),
                }
                rhs.visit_symbols(&mut |v| {
                    use_.read.insert(v);
                });
            }
            Instruction::Call { args, .. } => {
                for arg in args {
                    arg.visit_symbols(&mut |v| {
                        use_.read.insert(v);
                    });
                }
            }
            Instruction::Other(expr) => expr.visit_symbols(&mut |v| {
                use_.read.insert(v);
            }),
        }
    }
    use_
}

/// The precomputed footprints of every function in the program.
#[derive(Debug, Clone)]
pub struct FootprintAnalysis {
    footprints: HashMap<FuncId, FunctionFootprint>,
}

impl FootprintAnalysis {
    /// Build the call graph, scan every body for direct uses, then run
    /// the worklist to a fixpoint. Termination: set union over the
    /// finite identifier universe is monotone.
    pub fn analyze(program: &Program) -> Self {
        let mut graph: DiGraph<FuncId, ()> = DiGraph::new();
        let mut nodes: HashMap<FuncId, NodeIndex> = HashMap::new();
        for function in program.functions() {
            nodes.insert(function.id, graph.add_node(function.id));
        }
        for function in program.functions() {
            for instruction in &function.body {
                if let Instruction::Call { target, .. } = instruction {
                    if let Some(&callee) = nodes.get(target) {
                        graph.update_edge(nodes[&function.id], callee, ());
                    }
                }
            }
        }

        let neighbors = |id: FuncId, dir: Direction| -> HashSet<FuncId> {
            graph
                .neighbors_directed(nodes[&id], dir)
                .map(|idx| graph[idx])
                .collect()
        };

        let mut footprints = HashMap::new();
        for function in program.functions() {
            let use_ = scan_body(&function.body);
            footprints.insert(
                function.id,
                FunctionFootprint::new(
                    function.id,
                    use_.assigned,
                    use_.read,
                    function.parameters.clone(),
                    use_.return_var,
                    neighbors(function.id, Direction::Incoming),
                    neighbors(function.id, Direction::Outgoing),
                ),
            );
        }

        let mut analysis = Self { footprints };
        analysis.run_fixpoint();
        analysis
    }

    /// Worklist fixpoint: pop a function, pull in each callee's
    /// transitive sets, re-enqueue the callers of anything that grew.
    fn run_fixpoint(&mut self) {
        let mut queue: VecDeque<FuncId> = self.footprints.keys().copied().sorted().collect();
        let mut queued: HashSet<FuncId> = queue.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            queued.remove(&id);
            let callees: Vec<FuncId> = self.footprints[&id].callees.iter().copied().collect();
            let mut changed = false;
            for callee in callees {
                if callee == id {
                    continue;
                }
                let callee_footprint = self.footprints[&callee].clone();
                changed |= self
                    .footprints
                    .get_mut(&id)
                    .expect("worklist entries come from the footprint map")
                    .absorb(&callee_footprint);
            }
            if changed {
                for caller in self.footprints[&id].callers.clone() {
                    if queued.insert(caller) {
                        queue.push_back(caller);
                    }
                }
            }
        }
    }

    pub fn get(&self, func: FuncId) -> Result<&FunctionFootprint, TrackerError> {
        self.footprints
            .get(&func)
            .ok_or(TrackerError::UnknownFunction { func })
    }

    pub fn contains(&self, func: FuncId) -> bool {
        self.footprints.contains_key(&func)
    }

    pub fn footprints(&self) -> impl Iterator<Item = &FunctionFootprint> {
        self.footprints.values()
    }
}

impl fmt::Display for FootprintAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "footprints(")?;
        for footprint in self.footprints.values().sorted_by_key(|fp| fp.function_id) {
            writeln!(f, "   {footprint}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Function;

    /// main calls f, f calls g; g writes a global and its return value.
    fn sample_program() -> Program {
        let mut program = Program::new();
        program.add_function(Function::new(
            FuncId::new("main"),
            vec![],
            vec![
                Instruction::Call {
                    target: FuncId::new("f"),
                    args: vec![Expr::symbol("main::arg")],
                },
                Instruction::Assign {
                    lhs: Expr::symbol("main::x"),
                    rhs: Expr::symbol("f#return_value"),
                },
            ],
        ));
        program.add_function(Function::new(
            FuncId::new("f"),
            vec![VarName::new("f::a")],
            vec![
                Instruction::Call {
                    target: FuncId::new("g"),
                    args: vec![Expr::symbol("f::a")],
                },
                Instruction::Assign {
                    lhs: Expr::symbol("f#return_value"),
                    rhs: Expr::symbol("g#return_value"),
                },
            ],
        ));
        program.add_function(Function::new(
            FuncId::new("g"),
            vec![VarName::new("g::b")],
            vec![
                Instruction::Assign {
                    lhs: Expr::symbol("counter"),
                    rhs: Expr::Apply(vec![Expr::symbol("counter"), Expr::Constant]),
                },
                Instruction::Assign {
                    lhs: Expr::symbol("g#return_value"),
                    rhs: Expr::symbol("g::b"),
                },
            ],
        ));
        program
    }

    #[test]
    fn call_graph_edges() {
        let analysis = FootprintAnalysis::analyze(&sample_program());
        let f = analysis.get(FuncId::new("f")).unwrap();
        assert!(f.callers().contains(&FuncId::new("main")));
        assert!(f.callees().contains(&FuncId::new("g")));
    }

    #[test]
    fn transitive_sets_are_monotone() {
        let analysis = FootprintAnalysis::analyze(&sample_program());
        for fp in analysis.footprints() {
            assert!(fp.assigned_variables().is_superset(fp.directly_assigned_variables()));
            assert!(fp.read_variables().is_superset(fp.directly_read_variables()));
            for callee in fp.callees() {
                let callee_fp = analysis.get(*callee).unwrap();
                assert!(fp.assigned_variables().is_superset(callee_fp.assigned_variables()));
                assert!(fp.read_variables().is_superset(callee_fp.read_variables()));
            }
        }
        // main transitively writes g's global
        let main = analysis.get(FuncId::new("main")).unwrap();
        assert!(main.assigned_variables().contains(&VarName::new("counter")));
    }

    #[test]
    fn fixpoint_is_idempotent() {
        let mut analysis = FootprintAnalysis::analyze(&sample_program());
        let before: Vec<_> = analysis
            .footprints()
            .sorted_by_key(|fp| fp.function_id)
            .map(|fp| (fp.function_id, fp.assigned.clone(), fp.read.clone()))
            .collect();
        analysis.run_fixpoint();
        let after: Vec<_> = analysis
            .footprints()
            .sorted_by_key(|fp| fp.function_id)
            .map(|fp| (fp.function_id, fp.assigned.clone(), fp.read.clone()))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn globals_exclude_qualified_names_and_returns() {
        let analysis = FootprintAnalysis::analyze(&sample_program());
        let g = analysis.get(FuncId::new("g")).unwrap();
        assert_eq!(
            g.assigned_globals().into_iter().collect::<Vec<_>>(),
            vec![VarName::new("counter")]
        );
        assert_eq!(g.return_var(), Some(VarName::new("g#return_value")));
        let outs = g.assigned_globals_and_return();
        assert!(outs.contains(&VarName::new("g#return_value")));
    }

    #[test]
    fn unknown_function_is_a_protocol_error() {
        let analysis = FootprintAnalysis::analyze(&sample_program());
        assert!(matches!(
            analysis.get(FuncId::new("missing")),
            Err(TrackerError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn index_lvalue_writes_the_array_base() {
        let mut program = Program::new();
        program.add_function(Function::new(
            FuncId::new("h"),
            vec![],
            vec![Instruction::Assign {
                lhs: Expr::index(Expr::symbol("arr"), Expr::symbol("h::i")),
                rhs: Expr::symbol("h::v"),
            }],
        ));
        let analysis = FootprintAnalysis::analyze(&program);
        let h = analysis.get(FuncId::new("h")).unwrap();
        assert!(h.directly_assigned_variables().contains(&VarName::new("arr")));
        assert!(h.directly_read_variables().contains(&VarName::new("h::i")));
        assert!(h.directly_read_variables().contains(&VarName::new("h::v")));
    }
}
