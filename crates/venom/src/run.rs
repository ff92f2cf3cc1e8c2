//! The compilation driver: source text in, executable (and execution) out.

use std::path::{Path, PathBuf};

use crate::{
    analysis::{analyzer::{Analyzer, ModuleLoader}, context::Program},
    bytecode::{Executable, ObjectCode},
    codegen::CodeGenerator,
    error::{CompileError, CompileResult, VenomError},
    io::{CollectSink, OutputSink, StdoutSink},
    lex,
    linker,
    parse::parse_module,
    rewrite,
    vm::ExecutionContext,
};

/// Options consumed by the pipeline; the CLI fills these from its flags.
#[derive(Debug, Clone)]
pub struct CompileOpts {
    pub trace_lex: bool,
    pub trace_parse: bool,
    pub print_ast: bool,
    pub print_bytecode: bool,
    pub semantic_check_only: bool,
    pub venom_import_path: PathBuf,
}

impl Default for CompileOpts {
    fn default() -> Self {
        Self {
            trace_lex: false,
            trace_parse: false,
            print_ast: false,
            print_bytecode: false,
            semantic_check_only: false,
            venom_import_path: PathBuf::from("."),
        }
    }
}

/// Resolves `import a.b.c` to `<import_root>/a/b/c.venom`.
pub struct FileLoader {
    pub root: PathBuf,
}

impl ModuleLoader for FileLoader {
    fn load(&self, dotted: &str) -> CompileResult<String> {
        let mut path = self.root.clone();
        for seg in dotted.split('.') {
            path.push(seg);
        }
        path.set_extension("venom");
        std::fs::read_to_string(&path).map_err(|_| {
            CompileError::semantic(format!(
                "No such file {} to import module {dotted}",
                path.display()
            ))
        })
    }
}

/// Compiles one program rooted at `src` down to linked form. Returns
/// `None` when only semantic checking was requested.
pub fn compile(
    src: &str,
    module_name: &str,
    opts: &CompileOpts,
    loader: &dyn ModuleLoader,
) -> CompileResult<Option<Executable>> {
    if opts.trace_lex {
        for tok in lex::lex(src)? {
            eprintln!("{:?} at {}", tok.tok, tok.loc);
        }
    }
    let mut ast = parse_module(src)?;
    if opts.trace_parse {
        eprintln!("{ast:#?}");
    }

    let mut program = Program::new();
    program.register_module(module_name);
    {
        let mut analyzer = Analyzer::new(&mut program, loader, module_name);
        analyzer.analyze_module(&mut ast)?;
    }
    program
        .modules
        .get_mut(module_name)
        .expect("registered module")
        .ast = Some(ast);

    if opts.semantic_check_only {
        return Ok(None);
    }

    rewrite::run_pipeline(&mut program, loader)?;

    if opts.print_ast {
        for entry in program.modules.values() {
            eprintln!("{:#?}", entry.ast);
        }
    }

    // generate each module; the main module is the first registered
    let module_names: Vec<String> = program.modules.keys().cloned().collect();
    let mut objects: Vec<ObjectCode> = Vec::with_capacity(module_names.len());
    for name in &module_names {
        let ast = program
            .modules
            .get_mut(name)
            .expect("registered module")
            .ast
            .take()
            .expect("module AST present");
        let object = CodeGenerator::new(&mut program, name).generate(&ast)?;
        program.modules.get_mut(name).expect("registered module").ast = Some(ast);
        objects.push(object);
    }
    if opts.print_bytecode {
        for obj in &objects {
            dump_object_code(obj);
        }
    }

    let main_idx = module_names
        .iter()
        .position(|n| n == module_name)
        .expect("main module compiled");
    let exec = linker::link(&mut program, &objects, main_idx)?;
    Ok(Some(exec))
}

fn dump_object_code(obj: &ObjectCode) {
    eprintln!("; venom bytecode");
    eprintln!("; module: {}", obj.module_name);
    eprintln!("; constant pool");
    for (i, k) in obj.constant_pool.iter().enumerate() {
        eprintln!("{i}: {k:?}");
    }
    eprintln!("; class pool");
    for (i, c) in obj.class_pool.iter().enumerate() {
        eprintln!("{i}: {}", c.name);
    }
    eprintln!("; function pool");
    for (i, f) in obj.func_pool.iter().enumerate() {
        eprintln!("{i}: {} @{}", f.full_name(&obj.module_name), f.code_offset);
    }
    for (i, inst) in obj.instructions.iter().enumerate() {
        eprintln!("{i:4}  {inst:?}");
    }
}

/// Runs a linked executable, writing program output to `sink`.
pub fn execute(exec: &Executable, sink: &mut dyn OutputSink) -> Result<(), VenomError> {
    let mut ctx = ExecutionContext::new(exec, sink);
    ctx.execute()?;
    Ok(())
}

/// Compiles and runs a source file; the core entry the CLI drives.
pub fn compile_and_exec(path: &Path, opts: &CompileOpts) -> Result<(), VenomError> {
    let src = std::fs::read_to_string(path).map_err(|e| {
        VenomError::Compile(CompileError::semantic(format!(
            "Cannot read {}: {e}",
            path.display()
        )))
    })?;
    let module_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main")
        .to_owned();
    let loader = FileLoader {
        root: opts.venom_import_path.clone(),
    };
    match compile(&src, &module_name, opts, &loader)? {
        Some(exec) => {
            let mut sink = StdoutSink;
            execute(&exec, &mut sink)
        }
        None => Ok(()),
    }
}

/// Compiles and runs an in-memory program, returning everything it
/// printed. The workhorse of the end-to-end tests.
pub fn run_source(src: &str) -> Result<String, VenomError> {
    run_source_with_loader(src, &crate::analysis::analyzer::NoModules)
}

pub fn run_source_with_loader(
    src: &str,
    loader: &dyn ModuleLoader,
) -> Result<String, VenomError> {
    let opts = CompileOpts::default();
    let exec = compile(src, "main", &opts, loader)?.expect("full compile requested");
    let mut sink = CollectSink::new();
    execute(&exec, &mut sink)?;
    Ok(sink.into_string())
}
