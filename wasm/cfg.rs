//! Control-flow graphs, one per defined function.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::instr::{ControlInstr, DataInstr};
use super::var::Var;

pub type BlockId = u32;

/// A basic block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    /// Straight-line instructions.
    Data(Vec<DataInstr>),
    /// A single control transfer (call, branch, return, ...).
    Control(ControlInstr),
    /// A join point where control flows back together.
    Merge,
}

/// One directed edge.  `label` is `Some(true)` / `Some(false)` on the taken
/// and not-taken sides of a conditional transfer, `None` everywhere else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    #[serde(default)]
    pub label: Option<bool>,
}

/// The CFG of a single function.
///
/// `ret_var` and `exit_globals` are the stack pre-pass's names for the
/// return value and for each global at the exit point; summary construction
/// reads them.  Successor and predecessor maps and the loop heads are
/// derived from the edge list at construction time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CfgDef", into = "CfgDef")]
pub struct Cfg {
    pub fun_idx: u32,
    pub entry: BlockId,
    pub exit: BlockId,
    pub blocks: Map<BlockId, Block>,
    pub ret_var: Option<Var>,
    pub exit_globals: Vec<Var>,
    pub loop_heads: Set<BlockId>,
    edges: Vec<Edge>,
    succ_edges: Map<BlockId, Set<BlockId>>,
    pred_edges: Map<BlockId, Vec<(BlockId, Option<bool>)>>,
}

impl Cfg {
    pub fn new(
        fun_idx: u32,
        entry: BlockId,
        exit: BlockId,
        blocks: Map<BlockId, Block>,
        edges: Vec<Edge>,
        ret_var: Option<Var>,
        exit_globals: Vec<Var>,
    ) -> Self {
        let mut succ_edges: Map<BlockId, Set<BlockId>> = Map::new();
        let mut pred_edges: Map<BlockId, Vec<(BlockId, Option<bool>)>> = Map::new();

        for id in blocks.keys() {
            succ_edges.insert(*id, Set::new());
            pred_edges.insert(*id, Vec::new());
        }
        for e in &edges {
            succ_edges.entry(e.from).or_default().insert(e.to);
            pred_edges.entry(e.to).or_default().push((e.from, e.label));
        }

        let mut cfg = Cfg {
            fun_idx,
            entry,
            exit,
            blocks,
            ret_var,
            exit_globals,
            loop_heads: Set::new(),
            edges,
            succ_edges,
            pred_edges,
        };
        cfg.loop_heads = cfg.find_loop_heads();
        cfg
    }

    /// Successors of `b`.
    pub fn succ(&self, b: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.succ_edges.get(&b).into_iter().flatten().copied()
    }

    /// Predecessors of `b` with their edge labels.  A conditional transfer
    /// whose arms both reach `b` contributes two entries.
    pub fn preds_labeled(&self, b: BlockId) -> &[(BlockId, Option<bool>)] {
        self.pred_edges.get(&b).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    // Loop heads are the targets of back edges: a DFS from the entry marks
    // blocks on the current path, and any edge into a marked block closes a
    // loop.
    fn find_loop_heads(&self) -> Set<BlockId> {
        let mut heads = Set::new();
        let mut path = Set::new();
        let mut done = Set::new();
        self.search(self.entry, &mut path, &mut done, &mut heads);
        heads
    }

    fn search(
        &self,
        b: BlockId,
        path: &mut Set<BlockId>,
        done: &mut Set<BlockId>,
        heads: &mut Set<BlockId>,
    ) {
        path.insert(b);
        for s in self.succ(b) {
            if path.contains(&s) {
                heads.insert(s);
            } else if !done.contains(&s) {
                self.search(s, path, done, heads);
            }
        }
        path.remove(&b);
        done.insert(b);
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (id, block) in &self.blocks {
            write!(f, "bb{id}")?;
            if *id == self.entry {
                write!(f, " (entry)")?;
            }
            if *id == self.exit {
                write!(f, " (exit)")?;
            }
            if self.loop_heads.contains(id) {
                write!(f, " (loop head)")?;
            }
            writeln!(f, ":")?;
            match block {
                Block::Data(instrs) => {
                    for i in instrs {
                        writeln!(f, "  {i}")?;
                    }
                }
                Block::Control(i) => writeln!(f, "  {i}")?,
                Block::Merge => writeln!(f, "  merge")?,
            }
            for e in self.edges.iter().filter(|e| e.from == *id) {
                match e.label {
                    Some(l) => writeln!(f, "  -> bb{} [{l}]", e.to)?,
                    None => writeln!(f, "  -> bb{}", e.to)?,
                }
            }
        }
        Ok(())
    }
}

// The serde image of a cfg: just the data, with the derived maps rebuilt on
// the way in.

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CfgDef {
    fun_idx: u32,
    entry: BlockId,
    exit: BlockId,
    blocks: Map<BlockId, Block>,
    #[serde(default)]
    edges: Vec<Edge>,
    #[serde(default)]
    ret_var: Option<Var>,
    #[serde(default)]
    exit_globals: Vec<Var>,
}

impl From<CfgDef> for Cfg {
    fn from(d: CfgDef) -> Cfg {
        Cfg::new(d.fun_idx, d.entry, d.exit, d.blocks, d.edges, d.ret_var, d.exit_globals)
    }
}

impl From<Cfg> for CfgDef {
    fn from(c: Cfg) -> CfgDef {
        CfgDef {
            fun_idx: c.fun_idx,
            entry: c.entry,
            exit: c.exit,
            blocks: c.blocks,
            edges: c.edges,
            ret_var: c.ret_var,
            exit_globals: c.exit_globals,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn diamond_with_back_edge() -> Cfg {
        // 0 -> 1 -> {2, 3} -> 4, with 4 -> 1 closing a loop
        let blocks: Map<BlockId, Block> = [
            (0, Block::Merge),
            (1, Block::Merge),
            (2, Block::Merge),
            (3, Block::Merge),
            (4, Block::Merge),
        ]
        .into();
        let edges = vec![
            Edge { from: 0, to: 1, label: None },
            Edge { from: 1, to: 2, label: Some(true) },
            Edge { from: 1, to: 3, label: Some(false) },
            Edge { from: 2, to: 4, label: None },
            Edge { from: 3, to: 4, label: None },
            Edge { from: 4, to: 1, label: None },
        ];
        Cfg::new(0, 0, 4, blocks, edges, None, vec![])
    }

    #[test]
    fn loop_heads_are_back_edge_targets() {
        let cfg = diamond_with_back_edge();
        assert_eq!(cfg.loop_heads, Set::from([1]));
    }

    #[test]
    fn labeled_preds_are_kept_apart() {
        let cfg = diamond_with_back_edge();
        assert_eq!(cfg.preds_labeled(2), &[(1, Some(true))]);
        assert_eq!(cfg.preds_labeled(1).len(), 2);
    }

    #[test]
    fn serde_round_trip_rebuilds_derived_state() {
        let cfg = diamond_with_back_edge();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Cfg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
        assert_eq!(back.loop_heads, Set::from([1]));
    }
}
