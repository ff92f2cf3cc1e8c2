use std::{env, path::PathBuf, process::ExitCode};

use venom::{CompileOpts, compile_and_exec};

fn usage() -> &'static str {
    "usage: venom [options] <file.venom>\n\
     \n\
     options:\n\
       --trace-lex                dump the token stream\n\
       --trace-parse              dump the parsed tree\n\
       --print-ast                dump the rewritten tree\n\
       --print-bytecode           dump per-module symbolic bytecode\n\
       --semantic-check-only      stop after semantic analysis\n\
       --venom-import-path <dir>  root directory for imports"
}

fn main() -> ExitCode {
    let mut opts = CompileOpts::default();
    let mut file: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--trace-lex" => opts.trace_lex = true,
            "--trace-parse" => opts.trace_parse = true,
            "--print-ast" => opts.print_ast = true,
            "--print-bytecode" => opts.print_bytecode = true,
            "--semantic-check-only" => opts.semantic_check_only = true,
            "--venom-import-path" => match args.next() {
                Some(path) => opts.venom_import_path = PathBuf::from(path),
                None => {
                    eprintln!("error: --venom-import-path requires a value");
                    return ExitCode::FAILURE;
                }
            },
            "--help" | "-h" => {
                println!("{}", usage());
                return ExitCode::SUCCESS;
            }
            other if other.starts_with("--") => {
                eprintln!("error: unknown option {other}\n{}", usage());
                return ExitCode::FAILURE;
            }
            other => file = Some(PathBuf::from(other)),
        }
    }

    let Some(file) = file else {
        eprintln!("{}", usage());
        return ExitCode::FAILURE;
    };

    match compile_and_exec(&file, &opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
