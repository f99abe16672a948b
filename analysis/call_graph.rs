//! Call graph construction and SCC scheduling.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt::Write as _;

use crate::commons::Valid;
use crate::wasm::cfg::Block;
use crate::wasm::instr::Control;
use crate::wasm::module::Module;

/// Functions a `call_indirect` against type `type_idx` can reach.
///
/// With a table instance (and `type_based` off), the initialized slots
/// whose function type equals the queried type, by strict structural
/// equality.  Otherwise every function of that type, imported or defined —
/// the always-sound upper bound.
pub fn resolve_indirect(module: &Module, type_idx: u32, type_based: bool) -> Set<u32> {
    let typ = module.type_idx(type_idx);
    match &module.table {
        Some(table) if !type_based => table
            .iter()
            .flatten()
            .filter(|&&f| module.type_of(f) == typ)
            .copied()
            .collect(),
        _ => (0..module.nfuncs())
            .filter(|&f| module.type_of(f) == typ)
            .collect(),
    }
}

/// The module's call graph over function indices, imports included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallGraph {
    nodes: Set<u32>,
    edges: Map<u32, Set<u32>>,
}

impl CallGraph {
    pub fn new(module: &Valid<Module>, type_based_indirect: bool) -> Self {
        let module = &module.0;
        let nodes: Set<u32> = (0..module.nfuncs()).collect();
        let mut edges: Map<u32, Set<u32>> = Map::new();

        for func in &module.funcs {
            for block in func.body.blocks.values() {
                let instr = match block {
                    Block::Control(instr) => instr,
                    _ => continue,
                };
                match instr.op {
                    Control::Call { fun_idx } => {
                        edges.entry(func.idx).or_default().insert(fun_idx);
                    }
                    Control::CallIndirect { type_idx } => {
                        let targets = resolve_indirect(module, type_idx, type_based_indirect);
                        edges.entry(func.idx).or_default().extend(targets);
                    }
                    _ => {}
                }
            }
        }

        CallGraph { nodes, edges }
    }

    pub fn nodes(&self) -> &Set<u32> {
        &self.nodes
    }

    pub fn succ(&self, n: u32) -> impl Iterator<Item = u32> + '_ {
        self.edges.get(&n).into_iter().flatten().copied()
    }

    /// Drop the import nodes and every edge into them.  Imports never call
    /// back, so there are no edges out of them to drop.
    pub fn remove_imports(&self, nimports: u32) -> CallGraph {
        CallGraph {
            nodes: self.nodes.iter().filter(|&&n| n >= nimports).copied().collect(),
            edges: self
                .edges
                .iter()
                .filter(|(src, _)| **src >= nimports)
                .map(|(src, dsts)| {
                    (*src, dsts.iter().filter(|&&d| d >= nimports).copied().collect())
                })
                .collect(),
        }
    }

    /// DOT rendering; imports are labeled by name, defined functions by
    /// index.
    pub fn to_dot(&self, module: &Module) -> String {
        let mut out = String::new();
        writeln!(out, "digraph call_graph {{").unwrap();
        for &n in &self.nodes {
            let name = if n < module.nimports() {
                module.imports[n as usize].name.clone()
            } else {
                format!("f{n}")
            };
            writeln!(out, "node{n} [shape=record, mlabel=\"{{{name}}}\"];").unwrap();
        }
        for (src, dsts) in &self.edges {
            for dst in dsts {
                writeln!(out, "node{src} -> node{dst};").unwrap();
            }
        }
        writeln!(out, "}}").unwrap();
        out
    }

    /// Strongly connected components in topological order: an SCC appears
    /// before every SCC it has edges into.
    pub fn sccs(&self) -> Vec<Vec<u32>> {
        let mut sccs = Tarjan::new(self).run();
        sccs.reverse();
        sccs
    }

    /// The analysis schedule: the SCC list reversed, so callees come before
    /// their callers.
    pub fn schedule(&self) -> Vec<Vec<u32>> {
        Tarjan::new(self).run()
    }
}

// Tarjan's algorithm.  The scratch state lives in this value, owned by one
// call to `run`.  SCCs are emitted in completion order: each one after all
// the SCCs it reaches.
struct Tarjan<'a> {
    graph: &'a CallGraph,
    index: u32,
    indices: Map<u32, u32>,
    lowlinks: Map<u32, u32>,
    on_stack: Set<u32>,
    stack: Vec<u32>,
    sccs: Vec<Vec<u32>>,
}

impl<'a> Tarjan<'a> {
    fn new(graph: &'a CallGraph) -> Self {
        Tarjan {
            graph,
            index: 0,
            indices: Map::new(),
            lowlinks: Map::new(),
            on_stack: Set::new(),
            stack: Vec::new(),
            sccs: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<u32>> {
        for &n in &self.graph.nodes {
            if !self.indices.contains_key(&n) {
                self.connect(n);
            }
        }
        self.sccs
    }

    fn connect(&mut self, v: u32) {
        self.indices.insert(v, self.index);
        self.lowlinks.insert(v, self.index);
        self.index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        let succs: Vec<u32> = self.graph.succ(v).collect();
        for w in succs {
            if !self.indices.contains_key(&w) {
                self.connect(w);
                let low = self.lowlinks[&v].min(self.lowlinks[&w]);
                self.lowlinks.insert(v, low);
            } else if self.on_stack.contains(&w) {
                let low = self.lowlinks[&v].min(self.indices[&w]);
                self.lowlinks.insert(v, low);
            }
        }

        if self.lowlinks[&v] == self.indices[&v] {
            let mut scc = Vec::new();
            loop {
                let w = self.stack.pop().unwrap();
                self.on_stack.remove(&w);
                scc.push(w);
                if w == v {
                    break;
                }
            }
            scc.sort_unstable();
            self.sccs.push(scc);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn graph(nodes: impl IntoIterator<Item = u32>, edges: &[(u32, u32)]) -> CallGraph {
        let mut e: Map<u32, Set<u32>> = Map::new();
        for (src, dst) in edges {
            e.entry(*src).or_default().insert(*dst);
        }
        CallGraph {
            nodes: nodes.into_iter().collect(),
            edges: e,
        }
    }

    #[test]
    fn sccs_in_topological_order() {
        // 0 -> 1 <-> 2, 0 -> 3
        let g = graph(0..4, &[(0, 1), (1, 2), (2, 1), (0, 3)]);
        let sccs = g.sccs();
        let pos = |n: u32| sccs.iter().position(|scc| scc.contains(&n)).unwrap();

        assert_eq!(pos(1), pos(2));
        assert!(pos(0) < pos(1));
        assert!(pos(0) < pos(3));
        assert_eq!(sccs.iter().map(Vec::len).sum::<usize>(), 4);
    }

    #[test]
    fn schedule_puts_callees_first() {
        let g = graph(0..4, &[(0, 1), (1, 2), (2, 1), (0, 3)]);
        let schedule = g.schedule();
        let pos = |n: u32| schedule.iter().position(|scc| scc.contains(&n)).unwrap();

        // for any cross-scc edge f -> g, g is scheduled strictly before f
        for &f in g.nodes() {
            for callee in g.succ(f) {
                if pos(f) != pos(callee) {
                    assert!(pos(callee) < pos(f), "edge {f} -> {callee}");
                }
            }
        }
    }

    #[test]
    fn self_loop_is_its_own_scc() {
        let g = graph(0..2, &[(0, 0), (0, 1)]);
        let sccs = g.sccs();
        assert_eq!(sccs, vec![vec![0], vec![1]]);
    }

    #[test]
    fn remove_imports_drops_nodes_and_incident_edges() {
        let g = graph(0..3, &[(1, 0), (1, 2), (2, 1)]);
        let pruned = g.remove_imports(1);
        assert_eq!(pruned.nodes(), &Set::from([1, 2]));
        assert_eq!(pruned.succ(1).collect::<Vec<_>>(), vec![2]);
        assert_eq!(pruned.succ(2).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn dot_export_format() {
        let g = graph(0..2, &[(0, 1)]);
        let module = Module {
            imports: vec![],
            funcs: vec![],
            types: vec![],
            globals: vec![],
            table: None,
        };
        let dot = g.to_dot(&module);
        assert!(dot.contains("node0 [shape=record, mlabel=\"{f0}\"];"));
        assert!(dot.contains("node0 -> node1;"));
    }
}
