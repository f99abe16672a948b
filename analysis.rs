//! Abstract interpretation over function CFGs.
//!
//! The engine in this module is generic over an analysis instance: a
//! [`Transfer`] supplies the abstract state (a join semi-lattice) and the
//! per-instruction transfer functions, and [`analyze`] computes the least
//! fixpoint of one function body with a worklist, widening at loop heads.
//! The concrete instances live in the submodules: [`taint`] (summary-based,
//! interprocedural) and [`value`] (symbolic values plus a coarse memory
//! log).

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt;

use crate::commons::AnalysisError;
use crate::wasm::cfg::{Block, BlockId, Cfg};
use crate::wasm::instr::{ControlInstr, DataInstr};
use crate::wasm::module::Module;
use crate::wasm::var::Label;

pub mod call_graph;
pub mod driver;
pub mod summary;
pub mod taint;
pub mod value;


// SECTION: lattice and transfer interface

/// An abstract state forming a join semi-lattice of finite height.
/// Equality doubles as the fixpoint check.
pub trait Domain: Clone + Eq {
    /// The least state for the given function body.
    fn bottom(cfg: &Cfg) -> Self;

    /// Least upper bound.
    fn join(&self, rhs: &Self) -> Self;

    /// Over-approximation of `join` applied at loop heads to force
    /// convergence.  For finite-height domains this is `join` itself.
    fn widen(&self, rhs: &Self) -> Self;
}

/// The capability set one analysis instance supplies to the engine.
///
/// Instances are plain structs (they may borrow a summary table or other
/// context) wired into [`analyze`] by generics; there is no registry.
pub trait Transfer {
    type State: Domain;

    /// The state on entry, built from the actuals, locals, globals and
    /// memory of the function under analysis.
    fn init(&self, module: &Module, cfg: &Cfg) -> Self::State;

    /// Effect of one straight-line instruction.
    fn data_instr(
        &self,
        module: &Module,
        cfg: &Cfg,
        instr: &DataInstr,
        pre: &Self::State,
    ) -> Result<Self::State, AnalysisError>;

    /// Effect of one control transfer.  Conditional transfers return
    /// [`Flow::Branch`] with the taken and not-taken states.
    fn control_instr(
        &self,
        module: &Module,
        cfg: &Cfg,
        instr: &ControlInstr,
        pre: &Self::State,
    ) -> Result<Flow<Self::State>, AnalysisError>;

    /// Combine the states flowing into a block.  The default is a plain
    /// join; instances override this for non-join merging logic at control
    /// merge points.
    fn merge_flows(
        &self,
        _module: &Module,
        cfg: &Cfg,
        _block: BlockId,
        states: &[(BlockId, Self::State)],
    ) -> Self::State {
        states
            .iter()
            .fold(Self::State::bottom(cfg), |acc, (_, s)| acc.join(s))
    }
}

// SECTION: per-point results

/// The abstract result attached to one program point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Flow<S> {
    /// The point was never reached by the fixpoint.
    Uninitialized,
    Simple(S),
    /// Post-state of a conditional transfer: taken arm, then not-taken arm.
    Branch(S, S),
}

impl<S: Domain> Flow<S> {
    /// Componentwise join.  `Uninitialized` is the identity; combining a
    /// `Simple` with a `Branch` means the CFG and the transfer disagree
    /// about the shape of this point, which is fatal.
    pub fn join(&self, rhs: &Self, fun: u32, block: BlockId) -> Result<Self, AnalysisError> {
        use Flow::*;
        match (self, rhs) {
            (Uninitialized, x) | (x, Uninitialized) => Ok(x.clone()),
            (Simple(a), Simple(b)) => Ok(Simple(a.join(b))),
            (Branch(at, af), Branch(bt, bf)) => Ok(Branch(at.join(bt), af.join(bf))),
            _ => Err(AnalysisError::ShapeMismatch { fun, block }),
        }
    }

    /// Componentwise widening, same shape rules as [`Flow::join`].
    pub fn widen(&self, rhs: &Self, fun: u32, block: BlockId) -> Result<Self, AnalysisError> {
        use Flow::*;
        match (self, rhs) {
            (Uninitialized, x) | (x, Uninitialized) => Ok(x.clone()),
            (Simple(a), Simple(b)) => Ok(Simple(a.widen(b))),
            (Branch(at, af), Branch(bt, bf)) => Ok(Branch(at.widen(bt), af.widen(bf))),
            _ => Err(AnalysisError::ShapeMismatch { fun, block }),
        }
    }

    /// Collapse to a plain state, joining the arms of a branch.
    pub fn to_state(&self, cfg: &Cfg) -> S {
        match self {
            Flow::Uninitialized => S::bottom(cfg),
            Flow::Simple(s) => s.clone(),
            Flow::Branch(t, f) => t.join(f),
        }
    }
}

impl<S: fmt::Display> fmt::Display for Flow<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Flow::Uninitialized => writeln!(f, "unreachable"),
            Flow::Simple(s) => write!(f, "{s}"),
            Flow::Branch(t, fl) => write!(f, "on true:\n{t}on false:\n{fl}"),
        }
    }
}

/// Pre/post results of one fixpoint run, per block and per instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntraResults<S> {
    pub blocks: Map<BlockId, (Flow<S>, Flow<S>)>,
    pub instrs: Map<Label, (Flow<S>, Flow<S>)>,
}

impl<S: Domain> IntraResults<S> {
    /// The state the function ends in: the exit block's post-state.
    pub fn final_state(&self, cfg: &Cfg) -> S {
        self.blocks[&cfg.exit].1.to_state(cfg)
    }
}

/// Results of [`analyze_keep`]: previous annotations paired with fresh
/// ones, per point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeptResults<A, S> {
    pub blocks: Map<BlockId, ((Flow<A>, Flow<A>), (Flow<S>, Flow<S>))>,
    pub instrs: Map<Label, ((Flow<A>, Flow<A>), (Flow<S>, Flow<S>))>,
}

// SECTION: the worklist fixpoint

/// Run `transfer` over `cfg` to its least fixpoint.
pub fn analyze<T: Transfer>(
    module: &Module,
    cfg: &Cfg,
    transfer: &T,
) -> Result<IntraResults<T::State>, AnalysisError> {
    let mut fix = IntraFixpoint::new(module, cfg, transfer);
    fix.run()?;
    Ok(fix.results())
}

/// Like [`analyze`], then one descending pass to shed widening overshoot.
/// Experimental; callers reach this only through
/// [`crate::commons::Options::narrow`].
pub fn analyze_narrow<T: Transfer>(
    module: &Module,
    cfg: &Cfg,
    transfer: &T,
) -> Result<IntraResults<T::State>, AnalysisError> {
    let mut fix = IntraFixpoint::new(module, cfg, transfer);
    fix.run()?;
    fix.descend()?;
    Ok(fix.results())
}

/// Re-run an analysis, keeping whatever annotations a previous run (of this
/// or any other analysis) produced next to the fresh ones.
pub fn analyze_keep<A: Clone, T: Transfer>(
    module: &Module,
    cfg: &Cfg,
    transfer: &T,
    prev: &IntraResults<A>,
) -> Result<KeptResults<A, T::State>, AnalysisError> {
    let uninit = || (Flow::Uninitialized, Flow::Uninitialized);
    let fresh = analyze(module, cfg, transfer)?;
    let mut blocks = Map::new();
    for (id, new) in fresh.blocks {
        let old = prev.blocks.get(&id).cloned().unwrap_or_else(uninit);
        blocks.insert(id, (old, new));
    }
    let mut instrs = Map::new();
    for (label, new) in fresh.instrs {
        let old = prev.instrs.get(&label).cloned().unwrap_or_else(uninit);
        instrs.insert(label, (old, new));
    }
    Ok(KeptResults { blocks, instrs })
}

/// One run of the worklist fixpoint.  All scratch state lives here and dies
/// with the run; the summary table is read through `transfer` and never
/// written during a run.
struct IntraFixpoint<'a, T: Transfer> {
    module: &'a Module,
    cfg: &'a Cfg,
    transfer: &'a T,
    init: T::State,
    block_data: Map<BlockId, (Flow<T::State>, Flow<T::State>)>,
    instr_data: Map<Label, (Flow<T::State>, Flow<T::State>)>,
    // ordered so the lowest block id is processed first
    worklist: Set<BlockId>,
}

impl<'a, T: Transfer> IntraFixpoint<'a, T> {
    fn new(module: &'a Module, cfg: &'a Cfg, transfer: &'a T) -> Self {
        let mut block_data = Map::new();
        let mut instr_data = Map::new();
        for (id, block) in &cfg.blocks {
            block_data.insert(*id, (Flow::Uninitialized, Flow::Uninitialized));
            match block {
                Block::Data(instrs) => {
                    for i in instrs {
                        instr_data.insert(i.label, (Flow::Uninitialized, Flow::Uninitialized));
                    }
                }
                Block::Control(i) => {
                    instr_data.insert(i.label, (Flow::Uninitialized, Flow::Uninitialized));
                }
                Block::Merge => {}
            }
        }
        IntraFixpoint {
            module,
            cfg,
            transfer,
            init: transfer.init(module, cfg),
            block_data,
            instr_data,
            worklist: Set::from([cfg.entry]),
        }
    }

    fn run(&mut self) -> Result<(), AnalysisError> {
        while let Some(b) = self.worklist.pop_first() {
            self.step(b)?;
        }
        Ok(())
    }

    fn results(self) -> IntraResults<T::State> {
        IntraResults {
            blocks: self.block_data,
            instrs: self.instr_data,
        }
    }

    fn step(&mut self, b: BlockId) -> Result<(), AnalysisError> {
        let cfg = self.cfg;
        let fun = cfg.fun_idx;

        let in_state = self.in_state(b)?;
        let out = self.transfer_block(b, &in_state)?;

        let prev_out = self.block_data[&b].1.clone();
        if out == prev_out {
            return Ok(());
        }

        let new_out = if cfg.loop_heads.contains(&b) {
            prev_out.widen(&prev_out.join(&out, fun, b)?, fun, b)?
        } else {
            prev_out.join(&out, fun, b)?
        };
        // successors only learn something when the stored out moved; this
        // also keeps a widened loop head from re-enqueueing itself forever
        let grew = new_out != prev_out;
        self.block_data.insert(b, (Flow::Simple(in_state), new_out));
        if grew {
            for s in cfg.succ(b) {
                self.worklist.insert(s);
            }
        }
        Ok(())
    }

    // The state flowing into `b`, split along edge labels when a
    // predecessor ends in a conditional transfer.
    fn in_state(&self, b: BlockId) -> Result<T::State, AnalysisError> {
        let cfg = self.cfg;
        let mut states: Vec<(BlockId, T::State)> = Vec::new();
        for &(pid, label) in cfg.preds_labeled(b) {
            let s = match (&self.block_data[&pid].1, label) {
                (Flow::Simple(s), _) => s.clone(),
                (Flow::Branch(t, _), Some(true)) => t.clone(),
                (Flow::Branch(_, f), Some(false)) => f.clone(),
                (Flow::Branch(_, _), None) => {
                    return Err(AnalysisError::UnlabeledBranchEdge {
                        fun: cfg.fun_idx,
                        pred: pid,
                        block: b,
                    })
                }
                (Flow::Uninitialized, _) => T::State::bottom(cfg),
            };
            states.push((pid, s));
        }
        // the entry block always sees the initial state as one of its flows
        if b == cfg.entry {
            states.push((b, self.init.clone()));
        }
        Ok(self.transfer.merge_flows(self.module, cfg, b, &states))
    }

    fn transfer_block(
        &mut self,
        b: BlockId,
        in_state: &T::State,
    ) -> Result<Flow<T::State>, AnalysisError> {
        let cfg = self.cfg;
        match &cfg.blocks[&b] {
            Block::Data(instrs) => {
                let mut pre = in_state.clone();
                for i in instrs {
                    let post = self.transfer.data_instr(self.module, cfg, i, &pre)?;
                    self.instr_data
                        .insert(i.label, (Flow::Simple(pre), Flow::Simple(post.clone())));
                    pre = post;
                }
                Ok(Flow::Simple(pre))
            }
            Block::Control(i) => {
                let res = self.transfer.control_instr(self.module, cfg, i, in_state)?;
                self.instr_data
                    .insert(i.label, (Flow::Simple(in_state.clone()), res.clone()));
                Ok(res)
            }
            Block::Merge => Ok(Flow::Simple(in_state.clone())),
        }
    }

    // One descending iteration: every block's out-state is recomputed from
    // its current in-state, without widening and without joining the old
    // out back in.  Monotone transfers keep the result above the least
    // fixpoint.
    fn descend(&mut self) -> Result<(), AnalysisError> {
        let ids: Vec<BlockId> = self.cfg.blocks.keys().copied().collect();
        for b in ids {
            if let Flow::Uninitialized = self.block_data[&b].1 {
                continue;
            }
            let in_state = self.in_state(b)?;
            let out = self.transfer_block(b, &in_state)?;
            self.block_data.insert(b, (Flow::Simple(in_state), out));
        }
        Ok(())
    }
}
