//! Loop and recursion abstraction tracking for bounded symbolic
//! execution.
//!
//! A bounded-model-checking executor unwinds loops and recursive calls
//! up to a bound. This crate observes the executor's variable events,
//! correlates them with lexical scopes, and replaces the tail of every
//! unwinding with a compact summary relation: havocked inputs, resolved
//! outputs, and the guards under which they hold. The summaries are
//! serialized as a line-oriented record stream for downstream analysis
//! tools.

pub mod config;
pub mod error;
pub mod executor;
pub mod footprint;
pub mod guard;
pub mod program;
pub mod scope;
pub mod stack;
pub mod varname;
pub mod vars;

pub use config::TrackerConfig;
pub use error::TrackerError;
pub use executor::Executor;
pub use footprint::{FootprintAnalysis, FunctionFootprint};
pub use guard::{GuardAtom, GuardExpr};
pub use stack::LoopStack;
pub use varname::{FuncId, VarKind, VarName};
pub use vars::VariableSet;
