//! The interprocedural driver: walk the SCC schedule, re-running the
//! intra-procedural fixpoint until every summary in an SCC is stable.

use std::collections::BTreeMap as Map;

use tracing::debug;

use super::call_graph::CallGraph;
use super::summary::{self, Summary};
use super::taint::TaintTransfer;
use crate::commons::{AnalysisError, Options, Valid};
use crate::wasm::module::{Func, Module};

/// Run the taint analysis over the whole module and return the stabilized
/// summary table.
pub fn analyze_module(
    module: &Valid<Module>,
    options: &Options,
) -> Result<Map<u32, Summary>, AnalysisError> {
    let mut summaries = summary::initial_summaries(module, options);
    let graph = CallGraph::new(module, options.type_based_indirect);
    let schedule = graph.remove_imports(module.0.nimports()).schedule();

    // callees first; a non-recursive scc stabilizes in a single pass
    for scc in schedule {
        let mut changed = true;
        while changed {
            changed = false;
            for &fun_idx in &scc {
                let func = module.0.func(fun_idx);
                let new = summarize(module, &summaries, options, func)?;
                if new != summaries[&fun_idx] {
                    debug!(fun = fun_idx, "summary changed");
                    summaries.insert(fun_idx, new);
                    changed = true;
                }
            }
        }
    }
    Ok(summaries)
}

fn summarize(
    module: &Valid<Module>,
    summaries: &Map<u32, Summary>,
    options: &Options,
    func: &Func,
) -> Result<Summary, AnalysisError> {
    let transfer = TaintTransfer {
        summaries,
        type_based_indirect: options.type_based_indirect,
    };
    let results = if options.narrow {
        super::analyze_narrow(&module.0, &func.body, &transfer)?
    } else {
        super::analyze(&module.0, &func.body, &transfer)?
    };
    let final_state = results.final_state(&func.body);
    Ok(Summary::make(func, &final_state))
}
