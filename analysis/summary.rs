//! Per-function summaries of taint flow.
//!
//! A summary is the outward-facing projection of a function's final state:
//! what its return value and the globals look like to a caller.  Applying a
//! summary at a call site renames the callee's variables into the caller's
//! frame instead of re-descending into the callee.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt;

use serde::Serialize;
use tracing::warn;

use super::taint::TaintMap;
use super::Domain;
use crate::commons::{AnalysisError, Options, Seed, Valid};
use crate::wasm::module::{Func, Import, Module};
use crate::wasm::var::{Label, Var};

/// Imports that are known not to taint the globals or their return value.
const MODELLED_IMPORTS: &[&str] = &["fd_write", "proc_exit"];

/// The abstract input/output relation of one function.
///
/// `state`'s domain is restricted to `globals_post` plus `ret`: only the
/// variables a caller can observe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub args: Vec<Var>,
    pub globals_post: Vec<Var>,
    pub ret: Option<Var>,
    pub state: TaintMap,
}

// Variable numbering in the constructors: the globals occupy the symbolic
// prefix `SymVar(0) .. SymVar(nglobals - 1)` everywhere, but the return
// value is `SymVar(nglobals)` in `bottom`/`top` for defined functions and
// `SymVar(nglobals + 1)` in `of_import`.  The asymmetry is inherited and
// pinned by a test below; renaming at apply time makes both spellings
// equivalent to callers.

impl Summary {
    /// The empty relation for a defined function: nothing taints the
    /// globals or the return value.
    pub fn bottom(module: &Module, fun_idx: u32) -> Self {
        let typ = module.type_of(fun_idx);
        let nglobals = module.nglobals();
        Summary {
            args: (0..typ.params.len() as u32).map(Var::Local).collect(),
            globals_post: (0..nglobals).map(Var::SymVar).collect(),
            ret: if typ.results.is_empty() {
                None
            } else {
                Some(Var::SymVar(nglobals))
            },
            state: TaintMap::new(),
        }
    }

    /// The most conservative relation for a defined function: every
    /// outward-facing variable could carry anything.
    pub fn top(module: &Module, fun_idx: u32) -> Self {
        let mut s = Self::bottom(module, fun_idx);
        s.state = TaintMap::top(s.globals_post.iter().chain(&s.ret).copied());
        s
    }

    /// Model an import directly.  Allow-listed imports are pure with
    /// respect to taint; anything else gets `top` and a warning.
    pub fn of_import(import: &Import, nglobals: u32) -> Self {
        let args = (0..import.typ.params.len() as u32).map(Var::Local).collect();
        let globals_post: Vec<Var> = (0..nglobals).map(Var::SymVar).collect();
        let ret = if import.typ.results.is_empty() {
            None
        } else {
            Some(Var::SymVar(nglobals + 1))
        };
        let state = if MODELLED_IMPORTS.contains(&import.name.as_str()) {
            TaintMap::new()
        } else {
            warn!("Imported function is not modelled: {}", import.name);
            TaintMap::top(globals_post.iter().chain(&ret).copied())
        };
        Summary {
            args,
            globals_post,
            ret,
            state,
        }
    }

    /// Build a summary from the final state of one fixpoint run, keeping
    /// only the outward-facing entries.
    pub fn make(func: &Func, final_state: &TaintMap) -> Self {
        let cfg = &func.body;
        let mut keep: Set<Var> = cfg.exit_globals.iter().copied().collect();
        keep.extend(cfg.ret_var);
        Summary {
            args: (0..func.typ.params.len() as u32).map(Var::Local).collect(),
            globals_post: cfg.exit_globals.clone(),
            ret: cfg.ret_var,
            state: final_state.restrict(&keep),
        }
    }

    /// Rename-and-apply at a call site, in three stages, in order: the
    /// return key is renamed to the caller's receiving variable, each
    /// global key is renamed to the caller's post-call global, and each
    /// formal argument is replaced by the caller's taint for the actual.
    /// The transformed state joined into `caller` is returned.
    pub fn apply(
        &self,
        caller: &TaintMap,
        fun: u32,
        label: Label,
        args: &[Var],
        globals: &[Var],
        ret: Option<Var>,
    ) -> Result<TaintMap, AnalysisError> {
        let mut state = self.state.clone();
        match (self.ret, ret) {
            (Some(r), Some(r2)) => state.rename_key(r, r2),
            (None, None) => {}
            _ => return Err(AnalysisError::MismatchedCall { fun, label }),
        }
        for (g, g2) in self.globals_post.iter().zip(globals) {
            state.rename_key(*g, *g2);
        }
        for (a, a2) in self.args.iter().zip(args) {
            state.replace(*a, caller.get(*a2));
        }
        Ok(Domain::join(caller, &state))
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "args:")?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        writeln!(f)?;
        match self.ret {
            Some(r) => writeln!(f, "ret {r}: {}", self.state.get(r))?,
            None => writeln!(f, "ret: none")?,
        }
        for (i, g) in self.globals_post.iter().enumerate() {
            writeln!(f, "global {i} ({g}): {}", self.state.get(*g))?;
        }
        Ok(())
    }
}

/// The initial summary table: one entry per function, imported or defined.
pub fn initial_summaries(module: &Valid<Module>, options: &Options) -> Map<u32, Summary> {
    let module = &module.0;
    let mut table = Map::new();
    for import in &module.imports {
        table.insert(import.idx, Summary::of_import(import, module.nglobals()));
    }
    for func in &module.funcs {
        let summary = match options.seed {
            Seed::Bottom => Summary::bottom(module, func.idx),
            Seed::Top => Summary::top(module, func.idx),
        };
        table.insert(func.idx, summary);
    }
    table
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::analysis::taint::Taint;
    use crate::wasm::module::{FuncType, ValType};

    fn import(name: &str, results: Vec<ValType>) -> Import {
        Import {
            idx: 0,
            name: name.to_owned(),
            typ: FuncType {
                params: vec![ValType::I32],
                results,
            },
        }
    }

    #[test]
    fn import_ret_numbering_skips_one_past_the_globals() {
        // defined functions name their return SymVar(nglobals); imports
        // name it SymVar(nglobals + 1)
        let s = Summary::of_import(&import("mystery", vec![ValType::I32]), 2);
        assert_eq!(s.ret, Some(Var::SymVar(3)));
        assert_eq!(s.globals_post, vec![Var::SymVar(0), Var::SymVar(1)]);

        let module = Module {
            imports: vec![],
            funcs: vec![],
            types: vec![],
            globals: vec![ValType::I32, ValType::I32],
            table: None,
        };
        // type_of is only consulted for the arity, so a module with one
        // import stands in for a defined function of the same type
        let module = Module {
            imports: vec![import("f", vec![ValType::I32])],
            ..module
        };
        let s = Summary::bottom(&module, 0);
        assert_eq!(s.ret, Some(Var::SymVar(2)));
    }

    #[test]
    fn unmodelled_import_is_top_over_globals_and_ret() {
        let s = Summary::of_import(&import("mystery", vec![ValType::I32]), 1);
        assert_eq!(s.state.get(Var::SymVar(0)), Taint::Top);
        assert_eq!(s.state.get(Var::SymVar(2)), Taint::Top);
    }

    #[test]
    fn modelled_import_is_bottom() {
        let s = Summary::of_import(&import("fd_write", vec![ValType::I32]), 1);
        assert_eq!(s.state, TaintMap::new());
    }

    #[test]
    fn apply_bottom_to_bottom_is_bottom() {
        let s = Summary::of_import(&import("fd_write", vec![ValType::I32]), 0);
        let caller = TaintMap::new();
        let post = s
            .apply(&caller, 1, 0, &[Var::SymVar(5)], &[], Some(Var::SymVar(6)))
            .unwrap();
        assert_eq!(post, TaintMap::new());
    }

    #[test]
    fn apply_rejects_return_arity_mismatch() {
        let s = Summary::of_import(&import("fd_write", vec![ValType::I32]), 0);
        let err = s
            .apply(&TaintMap::new(), 1, 7, &[Var::SymVar(5)], &[], None)
            .unwrap_err();
        assert_eq!(err, AnalysisError::MismatchedCall { fun: 1, label: 7 });
    }
}
