//! The module view consumed by the analyses.

use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::cfg::{Block, Cfg};
use super::instr::Control;
use crate::commons::{AnalysisError, Valid};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValType {
    #[display(fmt = "i32")]
    I32,
    #[display(fmt = "i64")]
    I64,
    #[display(fmt = "f32")]
    F32,
    #[display(fmt = "f64")]
    F64,
}

/// A function type.  Structural equality on this type is the equality used
/// to resolve indirect calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncType {
    #[serde(default)]
    pub params: Vec<ValType>,
    #[serde(default)]
    pub results: Vec<ValType>,
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, t) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, "] -> [")?;
        for (i, t) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{t}")?;
        }
        write!(f, "]")
    }
}

/// An imported function.  Imports occupy the function index space before
/// any defined function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub idx: u32,
    pub name: String,
    pub typ: FuncType,
}

/// A defined function.  `locals` lists the non-parameter local slots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Func {
    pub idx: u32,
    pub typ: FuncType,
    #[serde(default)]
    pub locals: Vec<ValType>,
    pub body: Cfg,
}

/// A decoded module.  `table`, when present, maps table slots to function
/// indices (`None` for uninitialized slots).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub imports: Vec<Import>,
    #[serde(default)]
    pub funcs: Vec<Func>,
    #[serde(default)]
    pub types: Vec<FuncType>,
    #[serde(default)]
    pub globals: Vec<ValType>,
    #[serde(default)]
    pub table: Option<Vec<Option<u32>>>,
}

impl Module {
    pub fn nimports(&self) -> u32 {
        self.imports.len() as u32
    }

    /// Number of functions, imported and defined.
    pub fn nfuncs(&self) -> u32 {
        self.nimports() + self.funcs.len() as u32
    }

    pub fn nglobals(&self) -> u32 {
        self.globals.len() as u32
    }

    /// The type of any function, imported or defined.
    pub fn type_of(&self, fun_idx: u32) -> &FuncType {
        if fun_idx < self.nimports() {
            &self.imports[fun_idx as usize].typ
        } else {
            &self.funcs[(fun_idx - self.nimports()) as usize].typ
        }
    }

    /// Type-section lookup, for `call_indirect`.
    pub fn type_idx(&self, type_idx: u32) -> &FuncType {
        &self.types[type_idx as usize]
    }

    /// The defined function with the given index.
    pub fn func(&self, fun_idx: u32) -> &Func {
        &self.funcs[(fun_idx - self.nimports()) as usize]
    }

    /// Check the shape restrictions the analyses rely on.  Everything
    /// downstream indexes into the module without further checks.
    pub fn validate(self) -> Result<Valid<Module>, AnalysisError> {
        let nglobals = self.nglobals() as usize;

        for import in &self.imports {
            if import.typ.results.len() > 1 {
                return Err(AnalysisError::MultiReturn { fun: import.idx });
            }
        }

        if let Some(table) = &self.table {
            for (slot, fun) in table.iter().enumerate() {
                match fun {
                    Some(f) if *f >= self.nfuncs() => {
                        return Err(AnalysisError::BadTableEntry { slot, fun: *f })
                    }
                    _ => {}
                }
            }
        }

        for func in &self.funcs {
            let fun = func.idx;
            let cfg = &func.body;

            if func.typ.results.len() > 1 {
                return Err(AnalysisError::MultiReturn { fun });
            }
            if cfg.ret_var.is_some() != (func.typ.results.len() == 1) {
                return Err(AnalysisError::BadReturnVar { fun });
            }
            if cfg.exit_globals.len() != nglobals {
                return Err(AnalysisError::BadGlobalFrame {
                    fun,
                    got: cfg.exit_globals.len(),
                    want: nglobals,
                });
            }
            for b in [cfg.entry, cfg.exit] {
                if !cfg.blocks.contains_key(&b) {
                    return Err(AnalysisError::UnknownBlock { fun, block: b });
                }
            }
            for e in cfg.edges() {
                for b in [e.from, e.to] {
                    if !cfg.blocks.contains_key(&b) {
                        return Err(AnalysisError::UnknownBlock { fun, block: b });
                    }
                }
            }

            for block in cfg.blocks.values() {
                let instr = match block {
                    Block::Control(instr) => instr,
                    _ => continue,
                };
                let callee_typ = match instr.op {
                    Control::Call { fun_idx } => {
                        if fun_idx >= self.nfuncs() {
                            return Err(AnalysisError::UnknownCallee {
                                fun,
                                label: instr.label,
                                callee: fun_idx,
                            });
                        }
                        self.type_of(fun_idx)
                    }
                    Control::CallIndirect { type_idx } => {
                        if type_idx as usize >= self.types.len() {
                            return Err(AnalysisError::UnknownType {
                                fun,
                                label: instr.label,
                                type_idx,
                            });
                        }
                        self.type_idx(type_idx)
                    }
                    _ => continue,
                };
                if instr.uses.len() != callee_typ.params.len()
                    || instr.defs.len() != callee_typ.results.len()
                {
                    return Err(AnalysisError::MismatchedCall { fun, label: instr.label });
                }
                if instr.globals_post.len() != nglobals {
                    return Err(AnalysisError::BadGlobalFrame {
                        fun,
                        got: instr.globals_post.len(),
                        want: nglobals,
                    });
                }
            }
        }

        Ok(Valid(self))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn func_type_display() {
        let t = FuncType {
            params: vec![ValType::I32, ValType::I64],
            results: vec![ValType::I32],
        };
        assert_eq!(t.to_string(), "[i32, i64] -> [i32]");
    }

    #[test]
    fn multi_value_returns_are_rejected() {
        let module = Module {
            imports: vec![Import {
                idx: 0,
                name: "pair".to_owned(),
                typ: FuncType {
                    params: vec![],
                    results: vec![ValType::I32, ValType::I32],
                },
            }],
            funcs: vec![],
            types: vec![],
            globals: vec![],
            table: None,
        };
        assert_eq!(module.validate().unwrap_err(), AnalysisError::MultiReturn { fun: 0 });
    }

    #[test]
    fn table_entries_must_be_in_range() {
        let module = Module {
            imports: vec![],
            funcs: vec![],
            types: vec![],
            globals: vec![],
            table: Some(vec![None, Some(3)]),
        };
        assert_eq!(
            module.validate().unwrap_err(),
            AnalysisError::BadTableEntry { slot: 1, fun: 3 }
        );
    }
}
