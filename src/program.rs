//! A minimal whole-program view for the footprint analysis.
//!
//! The tracker never executes this representation; it only scans it
//! once, before any symbolic-execution event arrives, to learn each
//! function's call edges and directly touched variables.

use crate::varname::{FuncId, VarName};
use std::collections::BTreeMap;

/// A side-effect-free expression tree. Only symbol occurrence and
/// index-lvalue structure matter to the analysis.
#[derive(Debug, Clone)]
pub enum Expr {
    Symbol(VarName),
    Index { array: Box<Expr>, index: Box<Expr> },
    Apply(Vec<Expr>),
    Constant,
}

impl Expr {
    pub fn symbol(raw: &str) -> Self {
        Expr::Symbol(VarName::new(raw))
    }

    pub fn index(array: Expr, index: Expr) -> Self {
        Expr::Index {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    pub fn visit_symbols(&self, f: &mut impl FnMut(VarName)) {
        match self {
            Expr::Symbol(var) => f(*var),
            Expr::Index { array, index } => {
                array.visit_symbols(f);
                index.visit_symbols(f);
            }
            Expr::Apply(operands) => {
                for op in operands {
                    op.visit_symbols(f);
                }
            }
            Expr::Constant => {}
        }
    }

    pub fn symbols(&self) -> Vec<VarName> {
        let mut out = Vec::new();
        self.visit_symbols(&mut |v| out.push(v));
        out
    }
}

#[derive(Debug, Clone)]
pub enum Instruction {
    Assign { lhs: Expr, rhs: Expr },
    Call { target: FuncId, args: Vec<Expr> },
    /// Anything else that reads variables (guards, asserts, ...).
    Other(Expr),
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: FuncId,
    pub parameters: Vec<VarName>,
    pub body: Vec<Instruction>,
}

impl Function {
    pub fn new(id: FuncId, parameters: Vec<VarName>, body: Vec<Instruction>) -> Self {
        Self {
            id,
            parameters,
            body,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    functions: BTreeMap<FuncId, Function>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.insert(function.id, function);
    }

    pub fn get(&self, id: &FuncId) -> Option<&Function> {
        self.functions.get(id)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }
}
