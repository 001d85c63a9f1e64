use crate::varname::{FuncId, VarName};
use thiserror::Error;

/// Contract breaches between the tracker and its driver. None of these
/// are recoverable for the current run: they indicate either a protocol
/// violation by the caller or an internal consistency failure that
/// would make the emitted summaries unsound.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("empty identifier passed to the tracker")]
    EmptyIdentifier,
    #[error("scope {scope} already has guard {guard}; open a new scope before assigning {var}")]
    GuardAlreadySet {
        scope: usize,
        guard: VarName,
        var: VarName,
    },
    #[error("no loop is currently open")]
    NoOpenLoop,
    #[error("iteration {iteration} of loop {loop_id} is already closed")]
    IterationAlreadyClosed { loop_id: usize, iteration: usize },
    #[error("loop {loop_id} needs at least two iterations before its last iteration can begin")]
    NotEnoughIterations { loop_id: usize },
    #[error("the last iteration of loop {loop_id} has already begun")]
    LastIterationAlreadyBegun { loop_id: usize },
    #[error("loop {loop_id} was closed before its last iteration began")]
    LastIterationNotBegun { loop_id: usize },
    #[error("an iteration of loop {loop_id} cannot be both second-to-last and last")]
    ConflictingIterationFlags { loop_id: usize },
    #[error(
        "iteration {iteration} of loop {loop_id} still assigns variables at loop exit; \
         unrolling did not reach a fixed point"
    )]
    IterationHasEffects { loop_id: usize, iteration: usize },
    #[error("an aborted recursion of {func} is already in flight")]
    RecursionAlreadyInFlight { func: FuncId },
    #[error("no aborted recursion is in flight")]
    NoRecursionInFlight,
    #[error("abstract recursion is not enabled")]
    AbstractRecursionDisabled,
    #[error("cannot begin node for {requested}: node for {pending} is still unfinished")]
    UnfinishedNodeExists { pending: FuncId, requested: FuncId },
    #[error("a recursion node for {func} already exists")]
    NodeAlreadyExists { func: FuncId },
    #[error("cannot finish node for {func}: no node has been begun")]
    NoUnfinishedNode { func: FuncId },
    #[error("cannot finish node for {got}: the unfinished node is for {expected}")]
    WrongUnfinishedNode { expected: FuncId, got: FuncId },
    #[error("no footprint recorded for function {func}")]
    UnknownFunction { func: FuncId },
}
