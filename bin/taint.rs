use std::env;
use std::process;

use wasm_analysis::analysis::driver;
use wasm_analysis::commons::{Options, Seed, Valid};
use wasm_analysis::wasm::module::Module;

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} <module.json> [--top-seed] [--type-based-indirect] [--narrow] [--json]",
            args[0]
        );
        process::exit(1);
    }

    let mut options = Options::default();
    let mut json = false;
    for flag in &args[2..] {
        match flag.as_str() {
            "--top-seed" => options.seed = Seed::Top,
            "--type-based-indirect" => options.type_based_indirect = true,
            "--narrow" => options.narrow = true,
            "--json" => json = true,
            _ => {
                eprintln!("unknown flag: {flag}");
                process::exit(1);
            }
        }
    }

    let module = load_module(&args[1]);
    let summaries = match driver::analyze_module(&module, &options) {
        Ok(summaries) => summaries,
        Err(e) => {
            eprintln!("analysis failed: {e}");
            process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries).unwrap());
    } else {
        for (fun, summary) in &summaries {
            println!("function {fun}:");
            println!("{summary}");
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
