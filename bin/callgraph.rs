use std::env;
use std::process;

use wasm_analysis::analysis::call_graph::CallGraph;
use wasm_analysis::commons::Valid;
use wasm_analysis::wasm::module::Module;

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <module.json> [--type-based-indirect]", args[0]);
        process::exit(1);
    }
    let type_based = args[2..].iter().any(|a| a == "--type-based-indirect");

    let module = load_module(&args[1]);
    let graph = CallGraph::new(&module, type_based);
    print!("{}", graph.to_dot(&module.0));
}

fn load_module(path: &str) -> Valid<Module> {
    let text = read_from(path);
    let module: Module = match serde_json::from_str(&text) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("could not parse {path}: {e}");
            process::exit(1);
        }
    };
    match module.validate() {
        Ok(module) => module,
        Err(e) => {
            eprintln!("invalid module: {e}");
            process::exit(1);
        }
    }
}

fn read_from(path: &str) -> String {
    String::from_utf8(
        std::fs::read(path).unwrap_or_else(|_| panic!("Could not read the input file {}", path)),
    )
    .expect("The input file does not contain valid utf-8 text")
}
