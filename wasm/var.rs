//! Abstract variables named by the stack pre-pass.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unique label of one instruction within a function body.
pub type Label = u32;

/// An abstract variable.
///
/// `Local(i)` is the i-th parameter or local slot of the enclosing function.
/// `SymVar(i)` is a symbolic value numbered by the stack pre-pass for an
/// instruction operand or result.  Globals are represented as symbolic
/// variables at fixed indices: at function entry, global `g` is `SymVar(g)`
/// for `g < nglobals`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Var {
    Local(u32),
    SymVar(u32),
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Var::Local(i) => write!(f, "l{i}"),
            Var::SymVar(i) => write!(f, "v{i}"),
        }
    }
}

impl FromStr for Var {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(n) = s.strip_prefix('l') {
            n.parse().map(Var::Local).map_err(|_| bad_var(s))
        } else if let Some(n) = s.strip_prefix('v') {
            n.parse().map(Var::SymVar).map_err(|_| bad_var(s))
        } else {
            Err(bad_var(s))
        }
    }
}

fn bad_var(s: &str) -> String {
    format!("not a variable: {s:?} (expected lN or vN)")
}

// Variables cross the serde boundary in their display form ("l0", "v3") so
// they can also key JSON maps.

impl Serialize for Var {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Var {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
