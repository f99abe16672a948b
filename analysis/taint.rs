//! Taint analysis: which inputs flow into each abstract variable.
//!
//! A variable's taint is the set of sources (parameters, globals, other
//! variables) whose value reached it.  Calls are modelled through the
//! summary table; see [`super::summary`].

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt;

use serde::{Serialize, Serializer};

use super::call_graph;
use super::summary::Summary;
use super::{Domain, Flow, Transfer};
use crate::commons::AnalysisError;
use crate::wasm::cfg::{BlockId, Cfg};
use crate::wasm::instr::{Control, ControlInstr, Data, DataInstr};
use crate::wasm::module::Module;
use crate::wasm::var::Var;

// SECTION: taint sets

/// A set of taint sources.  `Top` is every source, used for the effects of
/// unmodelled imports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Taint {
    Taints(Set<Var>),
    Top,
}

use Taint as T;

impl Taint {
    /// No sources at all.
    pub fn bottom() -> Self {
        T::Taints(Set::new())
    }

    /// The taint of a single source.
    pub fn of(v: Var) -> Self {
        T::Taints(Set::from([v]))
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, T::Taints(s) if s.is_empty())
    }

    pub fn join(&self, rhs: &Self) -> Self {
        match (self, rhs) {
            (T::Top, _) | (_, T::Top) => T::Top,
            (T::Taints(a), T::Taints(b)) => T::Taints(a.union(b).copied().collect()),
        }
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            T::Top => write!(f, "top"),
            T::Taints(s) => {
                write!(f, "{{")?;
                for (i, v) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Serialize for Taint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            T::Top => serializer.serialize_str("top"),
            T::Taints(s) => s.serialize(serializer),
        }
    }
}

// SECTION: taint environments

/// Pointwise map from variables to their taints.  Absent keys are
/// untainted, and the map never stores untainted entries, so derived
/// equality is semantic equality.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TaintMap(Map<Var, Taint>);

impl TaintMap {
    pub fn new() -> Self {
        TaintMap(Map::new())
    }

    /// Every key mapped to `Top`.
    pub fn top(keys: impl IntoIterator<Item = Var>) -> Self {
        TaintMap(keys.into_iter().map(|k| (k, T::Top)).collect())
    }

    /// The taint of `v`; bottom when absent.
    pub fn get(&self, v: Var) -> Taint {
        self.0.get(&v).cloned().unwrap_or_else(Taint::bottom)
    }

    /// Strong update of `k`.
    pub fn replace(&mut self, k: Var, t: Taint) {
        if t.is_bottom() {
            self.0.remove(&k);
        } else {
            self.0.insert(k, t);
        }
    }

    /// Move the entry under `old` to `new`.  A no-op when the keys are
    /// equal or `old` is absent.
    pub fn rename_key(&mut self, old: Var, new: Var) {
        if old == new {
            return;
        }
        if let Some(t) = self.0.remove(&old) {
            self.0.insert(new, t);
        }
    }

    /// Keep only the entries whose key is in `keys`.
    pub fn restrict(&self, keys: &Set<Var>) -> Self {
        TaintMap(
            self.0
                .iter()
                .filter(|(k, _)| keys.contains(k))
                .map(|(k, t)| (*k, t.clone()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (Var, &Taint)> {
        self.0.iter().map(|(k, t)| (*k, t))
    }
}

impl Domain for TaintMap {
    fn bottom(_cfg: &Cfg) -> Self {
        TaintMap::new()
    }

    fn join(&self, rhs: &Self) -> Self {
        let mut out = self.clone();
        for (k, t) in &rhs.0 {
            let joined = out.get(*k).join(t);
            out.replace(*k, joined);
        }
        out
    }

    // the powerset of sources is finite per function, join converges
    fn widen(&self, rhs: &Self) -> Self {
        Domain::join(self, rhs)
    }
}

impl fmt::Display for TaintMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (v, t) in &self.0 {
            writeln!(f, "{v} -> {t}")?;
        }
        Ok(())
    }
}

// SECTION: transfer

/// The taint transfer.  Consults the current summary table at call sites;
/// the table is read-only for the duration of one fixpoint run.
pub struct TaintTransfer<'a> {
    pub summaries: &'a Map<u32, Summary>,
    pub type_based_indirect: bool,
}

impl TaintTransfer<'_> {
    fn call(
        &self,
        cfg: &Cfg,
        instr: &ControlInstr,
        pre: &TaintMap,
        callee: u32,
    ) -> Result<TaintMap, AnalysisError> {
        let summary = &self.summaries[&callee];
        summary.apply(
            pre,
            cfg.fun_idx,
            instr.label,
            &instr.uses,
            &instr.globals_post,
            instr.defs.first().copied(),
        )
    }
}

impl Transfer for TaintTransfer<'_> {
    type State = TaintMap;

    // Parameters and globals are their own sources; non-parameter locals
    // are zero-initialized and start untainted.
    fn init(&self, module: &Module, cfg: &Cfg) -> TaintMap {
        let mut m = TaintMap::new();
        let func = module.func(cfg.fun_idx);
        for i in 0..func.typ.params.len() as u32 {
            m.replace(Var::Local(i), Taint::of(Var::Local(i)));
        }
        for g in 0..module.nglobals() {
            m.replace(Var::SymVar(g), Taint::of(Var::SymVar(g)));
        }
        m
    }

    fn data_instr(
        &self,
        _module: &Module,
        cfg: &Cfg,
        instr: &DataInstr,
        pre: &TaintMap,
    ) -> Result<TaintMap, AnalysisError> {
        if let Data::Load { sz: Some(_), .. } | Data::Store { sz: Some(_), .. } = instr.op {
            return Err(AnalysisError::SubWordAccess {
                fun: cfg.fun_idx,
                label: instr.label,
            });
        }
        // every result is tainted by every operand; with no memory in the
        // state this also covers loads (through the address) and makes
        // stores no-ops
        let mut post = pre.clone();
        let t = instr
            .uses
            .iter()
            .fold(Taint::bottom(), |acc, u| acc.join(&pre.get(*u)));
        for d in &instr.defs {
            post.replace(*d, t.clone());
        }
        Ok(post)
    }

    fn control_instr(
        &self,
        module: &Module,
        cfg: &Cfg,
        instr: &ControlInstr,
        pre: &TaintMap,
    ) -> Result<Flow<TaintMap>, AnalysisError> {
        match instr.op {
            Control::Call { fun_idx } => Ok(Flow::Simple(self.call(cfg, instr, pre, fun_idx)?)),
            Control::CallIndirect { type_idx } => {
                let targets =
                    call_graph::resolve_indirect(module, type_idx, self.type_based_indirect);
                // no resolvable callee, no effect
                let mut post = pre.clone();
                for f in targets {
                    post = Domain::join(&post, &self.call(cfg, instr, pre, f)?);
                }
                Ok(Flow::Simple(post))
            }
            Control::BrIf | Control::If => Ok(Flow::Branch(pre.clone(), pre.clone())),
            Control::Return => {
                let mut post = pre.clone();
                let t = instr
                    .uses
                    .iter()
                    .fold(Taint::bottom(), |acc, u| acc.join(&pre.get(*u)));
                for d in &instr.defs {
                    post.replace(*d, t.clone());
                }
                Ok(Flow::Simple(post))
            }
            Control::Br | Control::BrTable | Control::Unreachable => Ok(Flow::Simple(pre.clone())),
        }
    }

    fn merge_flows(
        &self,
        _module: &Module,
        _cfg: &Cfg,
        _block: BlockId,
        states: &[(BlockId, TaintMap)],
    ) -> TaintMap {
        states
            .iter()
            .fold(TaintMap::new(), |acc, (_, s)| Domain::join(&acc, s))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn join_is_pointwise_union() {
        let mut a = TaintMap::new();
        a.replace(Var::SymVar(0), Taint::of(Var::Local(0)));
        let mut b = TaintMap::new();
        b.replace(Var::SymVar(0), Taint::of(Var::Local(1)));
        b.replace(Var::SymVar(1), Taint::Top);

        let j = Domain::join(&a, &b);
        assert_eq!(
            j.get(Var::SymVar(0)),
            Taint::Taints(Set::from([Var::Local(0), Var::Local(1)]))
        );
        assert_eq!(j.get(Var::SymVar(1)), Taint::Top);
        // untouched keys are untainted
        assert_eq!(j.get(Var::SymVar(2)), Taint::bottom());
    }

    #[test]
    fn rename_key_round_trip() {
        let mut m = TaintMap::new();
        m.replace(Var::SymVar(0), Taint::of(Var::Local(0)));
        m.replace(Var::Local(1), Taint::of(Var::Local(1)));
        let orig = m.clone();

        // b not in dom(m) initially
        m.rename_key(Var::SymVar(0), Var::SymVar(9));
        m.rename_key(Var::SymVar(9), Var::SymVar(0));
        assert_eq!(m, orig);

        // renaming an absent key is a no-op
        m.rename_key(Var::SymVar(42), Var::SymVar(43));
        assert_eq!(m, orig);
    }

    #[test]
    fn replace_drops_untainted_entries() {
        let mut m = TaintMap::new();
        m.replace(Var::SymVar(0), Taint::of(Var::Local(0)));
        m.replace(Var::SymVar(0), Taint::bottom());
        assert_eq!(m, TaintMap::new());
    }

    #[test]
    fn restrict_keeps_only_given_keys() {
        let mut m = TaintMap::new();
        m.replace(Var::SymVar(0), Taint::of(Var::Local(0)));
        m.replace(Var::SymVar(1), Taint::of(Var::Local(1)));

        let r = m.restrict(&Set::from([Var::SymVar(1)]));
        assert_eq!(r.get(Var::SymVar(0)), Taint::bottom());
        assert_eq!(r.get(Var::SymVar(1)), Taint::of(Var::Local(1)));
    }

    #[test]
    fn top_absorbs_in_joins() {
        let t = Taint::of(Var::Local(0)).join(&Taint::Top);
        assert_eq!(t, Taint::Top);
    }
}
