//! Instructions as they appear in CFG blocks.
//!
//! Every instruction carries the abstract variables it consumes (`uses`, in
//! stack pop order) and produces (`defs`), assigned by the external stack
//! pre-pass.  The analyses never re-derive operand positions; they read
//! these annotations.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::module::ValType;
use super::var::{Label, Var};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unop {
    Clz,
    Ctz,
    Popcnt,
    Eqz,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binop {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relop {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

impl fmt::Display for Unop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Unop::Clz => "clz",
            Unop::Ctz => "ctz",
            Unop::Popcnt => "popcnt",
            Unop::Eqz => "eqz",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Binop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Binop::Add => "add",
            Binop::Sub => "sub",
            Binop::Mul => "mul",
            Binop::DivS => "div_s",
            Binop::DivU => "div_u",
            Binop::RemS => "rem_s",
            Binop::RemU => "rem_u",
            Binop::And => "and",
            Binop::Or => "or",
            Binop::Xor => "xor",
            Binop::Shl => "shl",
            Binop::ShrS => "shr_s",
            Binop::ShrU => "shr_u",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Relop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Relop::Eq => "eq",
            Relop::Ne => "ne",
            Relop::LtS => "lt_s",
            Relop::LtU => "lt_u",
            Relop::GtS => "gt_s",
            Relop::GtU => "gt_u",
            Relop::LeS => "le_s",
            Relop::LeU => "le_u",
            Relop::GeS => "ge_s",
            Relop::GeU => "ge_u",
        };
        write!(f, "{s}")
    }
}

/// Operations that stay inside a basic block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Data {
    Const {
        ty: ValType,
        val: i64,
    },
    Unop {
        ty: ValType,
        op: Unop,
    },
    Binop {
        ty: ValType,
        op: Binop,
    },
    Relop {
        ty: ValType,
        op: Relop,
    },
    LocalGet {
        idx: u32,
    },
    LocalSet {
        idx: u32,
    },
    LocalTee {
        idx: u32,
    },
    GlobalGet {
        idx: u32,
    },
    GlobalSet {
        idx: u32,
    },
    /// `sz` is a sub-word width in bits (8 or 16); `None` is a full-width
    /// access.  Sub-word accesses are rejected by the analyses.
    Load {
        ty: ValType,
        offset: u32,
        #[serde(default)]
        sz: Option<u32>,
    },
    Store {
        ty: ValType,
        offset: u32,
        #[serde(default)]
        sz: Option<u32>,
    },
    Drop,
    Select,
    MemorySize,
    MemoryGrow,
}

/// Operations that end a basic block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Control {
    Call { fun_idx: u32 },
    CallIndirect { type_idx: u32 },
    Br,
    BrIf,
    BrTable,
    If,
    Return,
    Unreachable,
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Data::Const { ty, val } => write!(f, "{ty}.const {val}"),
            Data::Unop { ty, op } => write!(f, "{ty}.{op}"),
            Data::Binop { ty, op } => write!(f, "{ty}.{op}"),
            Data::Relop { ty, op } => write!(f, "{ty}.{op}"),
            Data::LocalGet { idx } => write!(f, "local.get {idx}"),
            Data::LocalSet { idx } => write!(f, "local.set {idx}"),
            Data::LocalTee { idx } => write!(f, "local.tee {idx}"),
            Data::GlobalGet { idx } => write!(f, "global.get {idx}"),
            Data::GlobalSet { idx } => write!(f, "global.set {idx}"),
            Data::Load { ty, offset, sz } => match sz {
                None => write!(f, "{ty}.load offset={offset}"),
                Some(sz) => write!(f, "{ty}.load{sz} offset={offset}"),
            },
            Data::Store { ty, offset, sz } => match sz {
                None => write!(f, "{ty}.store offset={offset}"),
                Some(sz) => write!(f, "{ty}.store{sz} offset={offset}"),
            },
            Data::Drop => write!(f, "drop"),
            Data::Select => write!(f, "select"),
            Data::MemorySize => write!(f, "memory.size"),
            Data::MemoryGrow => write!(f, "memory.grow"),
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Control::Call { fun_idx } => write!(f, "call {fun_idx}"),
            Control::CallIndirect { type_idx } => write!(f, "call_indirect {type_idx}"),
            Control::Br => write!(f, "br"),
            Control::BrIf => write!(f, "br_if"),
            Control::BrTable => write!(f, "br_table"),
            Control::If => write!(f, "if"),
            Control::Return => write!(f, "return"),
            Control::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// An instruction that stays inside a basic block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInstr {
    pub label: Label,
    pub op: Data,
    #[serde(default)]
    pub uses: Vec<Var>,
    #[serde(default)]
    pub defs: Vec<Var>,
}

/// An instruction that ends a basic block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInstr {
    pub label: Label,
    pub op: Control,
    #[serde(default)]
    pub uses: Vec<Var>,
    #[serde(default)]
    pub defs: Vec<Var>,
    /// The variable naming each global after this instruction.  Only calls
    /// consult it: the callee's summary is projected onto these variables.
    #[serde(default)]
    pub globals_post: Vec<Var>,
}

fn fmt_assign(f: &mut fmt::Formatter, defs: &[Var], op: &dyn fmt::Display, uses: &[Var]) -> fmt::Result {
    for (i, d) in defs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{d}")?;
    }
    if !defs.is_empty() {
        write!(f, " = ")?;
    }
    write!(f, "{op}")?;
    for u in uses {
        write!(f, " {u}")?;
    }
    Ok(())
}

impl fmt::Display for DataInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_assign(f, &self.defs, &self.op, &self.uses)
    }
}

impl fmt::Display for ControlInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_assign(f, &self.defs, &self.op, &self.uses)
    }
}
