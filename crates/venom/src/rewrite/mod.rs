//! The AST rewrite pipeline.
//!
//! Passes run in a fixed order on the fully checked AST of each module:
//! desugaring, canonical references, module-main extraction, then (globally)
//! type-parameter specialization, then lifting, return normalization, and
//! primitive boxing. Every pass re-checks the subtrees it replaces through
//! the analyzer's public entry points.

pub mod boxing;
pub mod canon;
pub mod desugar;
pub mod lift;
pub mod module_main;
pub mod returns;
pub mod specialize;

use crate::{
    analysis::{
        analyzer::{Analyzer, ModuleLoader, NoModules},
        context::Program,
    },
    ast::{Expr, NodeInfo},
    error::CompileResult,
};

static NO_MODULES: NoModules = NoModules;

/// An analyzer for re-checking rewritten subtrees; imports are already
/// resolved by the time any pass runs.
pub(crate) fn reanalyzer<'x>(program: &'x mut Program, module: &str) -> Analyzer<'x> {
    Analyzer::new(program, &NO_MODULES, module)
}

/// Takes an expression out of the tree, leaving a placeholder.
pub(crate) fn take_expr(e: &mut Expr) -> Expr {
    std::mem::replace(e, Expr::BoolLit(false, NodeInfo::default()))
}

/// Runs the per-module local passes in order, then the global passes.
pub fn run_pipeline(
    program: &mut Program,
    loader: &dyn ModuleLoader,
) -> CompileResult<()> {
    let _ = loader;
    let module_names: Vec<String> = program.modules.keys().cloned().collect();

    for name in &module_names {
        let mut ast = program
            .modules
            .get_mut(name)
            .expect("registered module")
            .ast
            .take()
            .expect("module AST present");
        desugar::run(program, name, &mut ast)?;
        canon::run(program, name, &mut ast)?;
        module_main::run(program, name, &mut ast)?;
        program.modules.get_mut(name).expect("registered module").ast = Some(ast);
    }

    specialize::run(program)?;

    for name in &module_names {
        let mut ast = program
            .modules
            .get_mut(name)
            .expect("registered module")
            .ast
            .take()
            .expect("module AST present");
        lift::run(program, name, &mut ast)?;
        returns::run(program, name, &mut ast)?;
        boxing::run(program, name, &mut ast)?;
        program.modules.get_mut(name).expect("registered module").ast = Some(ast);
    }
    Ok(())
}
