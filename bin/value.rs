use std::env;
use std::process;

use wasm_analysis::analysis;
use wasm_analysis::analysis::value::ValueTransfer;
use wasm_analysis::commons::Valid;
use wasm_analysis::wasm::module::Module;

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <module.json>", args[0]);
        process::exit(1);
    }

    let module = load_module(&args[1]);
    for func in &module.0.funcs {
        let results = match analysis::analyze(&module.0, &func.body, &ValueTransfer) {
            Ok(results) => results,
            Err(e) => {
                eprintln!("analysis failed: {e}");
                process::exit(1);
            }
        };
        println!("function {}:", func.idx);
        for (id, (pre, post)) in &results.blocks {
            println!("bb{id} before:\n{pre}");
            println!("bb{id} after:\n{post}");
        }
    }
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
