//! Intraprocedural symbolic value analysis with a coarse memory log.
//!
//! Values record a primitive type and where they came from; the memory is
//! an append-only association list, so stores never overwrite and loads
//! join everything stored at a matching address.  The imprecision is
//! deliberate and kept for equivalence with the summary-based taint layer's
//! view of memory.

use std::collections::BTreeMap as Map;
use std::fmt;

use super::{Domain, Flow, Transfer};
use crate::commons::AnalysisError;
use crate::wasm::cfg::Cfg;
use crate::wasm::instr::{Control, ControlInstr, Data, DataInstr};
use crate::wasm::module::{Module, ValType};
use crate::wasm::var::Var;

// SECTION: symbolic values

/// Where a value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueSource {
    /// A literal constant.
    Const(i64),
    /// The value held by a variable at function entry.
    Entry(Var),
    /// The content of the heap cell at the given address, for loads the
    /// memory log knows nothing about.
    Heap(i64),
}

/// A symbolic value: a primitive type plus a source tag, with the usual
/// lattice markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymValue {
    Bottom,
    Typed { ty: ValType, source: ValueSource },
    Top,
}

use SymValue as V;

impl SymValue {
    pub fn of_const(ty: ValType, val: i64) -> Self {
        V::Typed {
            ty,
            source: ValueSource::Const(val),
        }
    }

    pub fn join(&self, rhs: &Self) -> Self {
        match (self, rhs) {
            (V::Bottom, x) | (x, V::Bottom) => *x,
            (a, b) if a == b => *a,
            _ => V::Top,
        }
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValueSource::Const(n) => write!(f, "const {n}"),
            ValueSource::Entry(v) => write!(f, "entry {v}"),
            ValueSource::Heap(a) => write!(f, "heap {a}"),
        }
    }
}

impl fmt::Display for SymValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            V::Bottom => write!(f, "bot"),
            V::Typed { ty, source } => write!(f, "{ty}({source})"),
            V::Top => write!(f, "top"),
        }
    }
}

// SECTION: memory

/// Append-only memory log of `(addr, value)` pairs, newest first.
///
/// `store` never overwrites: `load` joins every pair whose address compares
/// equal, so shadowed stores only cost precision, not soundness.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Memory(Vec<(SymValue, SymValue)>);

impl Memory {
    pub fn new() -> Self {
        Memory(Vec::new())
    }

    pub fn store(&mut self, addr: SymValue, value: SymValue) {
        self.0.insert(0, (addr, value));
    }

    /// The join of every value stored at an address equal to `addr`, or
    /// `None` when nothing matches.
    pub fn lookup(&self, addr: &SymValue) -> Option<SymValue> {
        let mut hit = false;
        let mut out = V::Bottom;
        for (a, v) in &self.0 {
            if a == addr {
                hit = true;
                out = out.join(v);
            }
        }
        hit.then_some(out)
    }

    /// The join of every value stored at an address equal to `addr`, `Top`
    /// when nothing matches.
    pub fn load(&self, addr: &SymValue) -> SymValue {
        self.lookup(addr).unwrap_or(V::Top)
    }

    /// Concatenation, with exact duplicates pruned so the log stays finite
    /// across fixpoint iterations.  `load` joins over all matches, so
    /// pruning duplicates does not change any observable result.
    pub fn join(&self, rhs: &Self) -> Self {
        let mut out = self.clone();
        for pair in &rhs.0 {
            if !out.0.contains(pair) {
                out.0.push(*pair);
            }
        }
        out
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (a, v) in &self.0 {
            writeln!(f, "mem {a} -> {v}")?;
        }
        Ok(())
    }
}

// SECTION: the value state

/// Variable values plus the memory log.  Absent variables are `Bottom`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValueState {
    vars: Map<Var, SymValue>,
    pub memory: Memory,
}

impl ValueState {
    pub fn get(&self, v: Var) -> SymValue {
        self.vars.get(&v).copied().unwrap_or(V::Bottom)
    }

    pub fn set(&mut self, v: Var, val: SymValue) {
        if val == V::Bottom {
            self.vars.remove(&v);
        } else {
            self.vars.insert(v, val);
        }
    }
}

impl Domain for ValueState {
    fn bottom(_cfg: &Cfg) -> Self {
        ValueState::default()
    }

    fn join(&self, rhs: &Self) -> Self {
        let mut out = self.clone();
        for (v, val) in &rhs.vars {
            out.set(*v, out.get(*v).join(val));
        }
        out.memory = self.memory.join(&rhs.memory);
        out
    }

    // bot < typed < top is a chain of height three and the memory log is
    // deduplicated, so join already converges
    fn widen(&self, rhs: &Self) -> Self {
        self.join(rhs)
    }
}

impl fmt::Display for ValueState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (v, val) in &self.vars {
            writeln!(f, "{v} -> {val}")?;
        }
        write!(f, "{}", self.memory)
    }
}

// SECTION: transfer

/// The symbolic value transfer.  Intraprocedural: calls clobber their
/// results and leave the memory log alone.
pub struct ValueTransfer;

impl Transfer for ValueTransfer {
    type State = ValueState;

    fn init(&self, module: &Module, cfg: &Cfg) -> ValueState {
        let mut state = ValueState::default();
        let func = module.func(cfg.fun_idx);
        for (i, ty) in func.typ.params.iter().enumerate() {
            let v = Var::Local(i as u32);
            state.set(
                v,
                V::Typed {
                    ty: *ty,
                    source: ValueSource::Entry(v),
                },
            );
        }
        // non-parameter locals are zero-initialized
        for (j, ty) in func.locals.iter().enumerate() {
            let v = Var::Local((func.typ.params.len() + j) as u32);
            state.set(v, SymValue::of_const(*ty, 0));
        }
        for (g, ty) in module.globals.iter().enumerate() {
            let v = Var::SymVar(g as u32);
            state.set(
                v,
                V::Typed {
                    ty: *ty,
                    source: ValueSource::Entry(v),
                },
            );
        }
        state
    }

    fn data_instr(
        &self,
        _module: &Module,
        cfg: &Cfg,
        instr: &DataInstr,
        pre: &ValueState,
    ) -> Result<ValueState, AnalysisError> {
        let mut post = pre.clone();
        match &instr.op {
            Data::Const { ty, val } => {
                post.set(instr.defs[0], SymValue::of_const(*ty, *val));
            }
            Data::LocalGet { .. }
            | Data::LocalSet { .. }
            | Data::GlobalGet { .. }
            | Data::GlobalSet { .. } => {
                post.set(instr.defs[0], pre.get(instr.uses[0]));
            }
            Data::LocalTee { .. } => {
                let val = pre.get(instr.uses[0]);
                for d in &instr.defs {
                    post.set(*d, val);
                }
            }
            Data::Load { sz: Some(_), .. } | Data::Store { sz: Some(_), .. } => {
                return Err(AnalysisError::SubWordAccess {
                    fun: cfg.fun_idx,
                    label: instr.label,
                });
            }
            Data::Load { ty, .. } => {
                let addr = pre.get(instr.uses[0]);
                let loaded = match pre.memory.lookup(&addr) {
                    Some(v) => v,
                    // an unwritten cell at a known address is named by that
                    // address; an unknown address could alias anything
                    None => match addr {
                        V::Typed {
                            source: ValueSource::Const(a),
                            ..
                        } => V::Typed {
                            ty: *ty,
                            source: ValueSource::Heap(a),
                        },
                        _ => V::Top,
                    },
                };
                post.set(instr.defs[0], loaded);
            }
            Data::Store { .. } => {
                let addr = pre.get(instr.uses[0]);
                let value = pre.get(instr.uses[1]);
                post.memory.store(addr, value);
            }
            Data::Select => {
                let val = pre.get(instr.uses[0]).join(&pre.get(instr.uses[1]));
                post.set(instr.defs[0], val);
            }
            Data::Drop => {}
            Data::Unop { .. }
            | Data::Binop { .. }
            | Data::Relop { .. }
            | Data::MemorySize
            | Data::MemoryGrow => {
                for d in &instr.defs {
                    post.set(*d, V::Top);
                }
            }
        }
        Ok(post)
    }

    fn control_instr(
        &self,
        _module: &Module,
        _cfg: &Cfg,
        instr: &ControlInstr,
        pre: &ValueState,
    ) -> Result<Flow<ValueState>, AnalysisError> {
        match instr.op {
            Control::BrIf | Control::If => Ok(Flow::Branch(pre.clone(), pre.clone())),
            Control::Call { .. } | Control::CallIndirect { .. } => {
                let mut post = pre.clone();
                for d in &instr.defs {
                    post.set(*d, V::Top);
                }
                Ok(Flow::Simple(post))
            }
            Control::Return => {
                let mut post = pre.clone();
                if let (Some(d), Some(u)) = (instr.defs.first(), instr.uses.first()) {
                    post.set(*d, pre.get(*u));
                }
                Ok(Flow::Simple(post))
            }
            Control::Br | Control::BrTable | Control::Unreachable => Ok(Flow::Simple(pre.clone())),
        }
    }
}
