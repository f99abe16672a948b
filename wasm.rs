//! Read-only view of a decoded WebAssembly module.
//!
//! Decoding and CFG construction happen outside this crate; modules arrive
//! here fully shaped, with every instruction already annotated by the stack
//! pre-pass with the abstract variables it reads and writes.

pub mod cfg;
pub mod instr;
pub mod module;
pub mod var;
