//! Definitions shared by the module view and the analyses.

use thiserror::Error;

use crate::wasm::cfg::BlockId;
use crate::wasm::var::Label;

/// A module that passed [`crate::wasm::module::Module::validate`].  All
/// analyses consume modules through this wrapper, so they can index into
/// functions, types and table slots without re-checking them.
#[derive(Clone, Debug)]
pub struct Valid<T>(pub T);

/// Fatal analysis errors.  Unmodelled imports are deliberately absent: they
/// degrade to a `top` summary with a warning instead of aborting.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("function {fun} has more than one return value")]
    MultiReturn { fun: u32 },

    #[error("malformed cfg in function {fun}: predecessor {pred} of block {block} branches but the edge between them is unlabeled")]
    UnlabeledBranchEdge { fun: u32, pred: BlockId, block: BlockId },

    #[error("cannot combine a plain state with a branching state in function {fun} at block {block}")]
    ShapeMismatch { fun: u32, block: BlockId },

    #[error("call at label {label} in function {fun} disagrees with its callee about the return value")]
    MismatchedCall { fun: u32, label: Label },

    #[error("sub-word memory access at label {label} in function {fun} is not supported")]
    SubWordAccess { fun: u32, label: Label },

    #[error("table slot {slot} refers to unknown function {fun}")]
    BadTableEntry { slot: usize, fun: u32 },

    #[error("function {fun} names {got} globals at a call or exit point, module has {want}")]
    BadGlobalFrame { fun: u32, got: usize, want: usize },

    #[error("function {fun} return variable does not match its type")]
    BadReturnVar { fun: u32 },

    #[error("cfg of function {fun} refers to unknown block {block}")]
    UnknownBlock { fun: u32, block: BlockId },

    #[error("call at label {label} in function {fun} targets unknown function {callee}")]
    UnknownCallee { fun: u32, label: Label, callee: u32 },

    #[error("call_indirect at label {label} in function {fun} names unknown type {type_idx}")]
    UnknownType { fun: u32, label: Label, type_idx: u32 },
}

/// How the summaries of defined functions are seeded before the driver runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Seed {
    /// Start from the empty relation and iterate upward.  Most precise.
    Bottom,
    /// Start from `top` over every outward-facing variable.  Cheap and
    /// conservative.
    Top,
}

/// Knobs for one analysis run.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    pub seed: Seed,
    /// Resolve `call_indirect` from function types alone, ignoring the
    /// table instance.  Always sound, usually less precise.
    pub type_based_indirect: bool,
    /// Run one descending pass after the fixpoint to shed widening
    /// overshoot.  Off unless explicitly requested.
    pub narrow: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            seed: Seed::Bottom,
            type_based_indirect: false,
            narrow: false,
        }
    }
}
