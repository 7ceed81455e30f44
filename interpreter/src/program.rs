use tracing::debug;
use whenlang::Program;
use whenlang::ast::Declaration;

use crate::environment::Environment;
use crate::error::{DiagnosticError, RuntimeError, Unwind};
use crate::evaluator::evaluate;
use crate::executor::Context;
use crate::modules::ModuleResolver;
use crate::runtime_value::RuntimeValue;

/// Register every function up front so declaration order does not matter
/// for calls.
pub(crate) fn register_functions(program: &Program, env: &mut Environment) {
    for decl in &program.declarations {
        if let Declaration::Function(function) = decl {
            env.define_function(function.clone(), program.source_id);
        }
    }
}

/// Evaluate global variables and resolve imports, in source order.
pub(crate) fn load_declarations(
    declarations: &[Declaration],
    ctx: &mut Context<'_>,
) -> Result<(), Unwind> {
    for decl in declarations {
        let span = decl.span().clone();
        let source_id = ctx.source_id;
        match decl {
            Declaration::Variable { name, value, .. } => {
                let value = evaluate(value, ctx).map_err(|u| u.escaped().with_span(span, source_id))?;
                ctx.env.define_global(name, value);
            }
            Declaration::Import { .. } | Declaration::FromImport { .. } => {
                let bindings = resolve_import(decl, ctx.modules)
                    .map_err(|e| DiagnosticError::from(e).with_span(span, source_id))?;
                for (name, value) in bindings {
                    ctx.env.define_global(&name, value);
                }
            }
            Declaration::Function(_) => {}
        }
    }
    Ok(())
}

/// Resolve one import declaration into the globals it binds.
pub(crate) fn resolve_import(
    decl: &Declaration,
    modules: &mut dyn ModuleResolver,
) -> Result<Vec<(String, RuntimeValue)>, RuntimeError> {
    let mut bindings = Vec::new();
    match decl {
        Declaration::Import { module, alias, .. } => {
            modules.import(module)?;
            let binding = alias.as_deref().unwrap_or(module);
            debug!(module = %module, binding, "import");
            bindings.push((binding.to_string(), RuntimeValue::Module(module.clone())));
        }
        Declaration::FromImport { module, names, .. } => {
            modules.import(module)?;
            for name in names {
                let value = modules.member(module, &name.name)?;
                debug!(module = %module, member = %name.name, binding = name.binding(), "import");
                bindings.push((name.binding().to_string(), value));
            }
        }
        _ => {}
    }
    Ok(bindings)
}

/// Warnings that can be known before the program runs.
pub fn static_warnings(program: &Program) -> Vec<DiagnosticError> {
    program
        .blocks
        .iter()
        .filter(|block| block.parallel)
        .map(|block| {
            DiagnosticError::warning(
                format!(
                    "parallel block '{}' runs cooperatively with the other blocks",
                    block.name
                ),
                block.span.clone(),
                program.source_id,
            )
        })
        .collect()
}
