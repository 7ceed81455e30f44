use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::ops::Range;

use tracing::{debug, trace};
use whenlang::ast::{LifecycleOp, Statement};

use crate::block::{RestartPolicy, StartOutcome};
use crate::environment::Frame;
use crate::error::{DiagnosticError, RuntimeError, Unwind};
use crate::evaluator::evaluate;
use crate::modules::ModuleResolver;
use crate::runtime_value::RuntimeValue;

/// Everything a statement needs while it runs.
pub struct Context<'a> {
    pub env: &'a mut crate::environment::Environment,
    pub modules: &'a mut dyn ModuleResolver,
    pub output: &'a mut dyn Write,
    pub input: &'a mut dyn BufRead,
    pub diagnostics: &'a mut Vec<DiagnosticError>,
    pub source_id: usize,
    pub restart_policy: RestartPolicy,
    pub max_call_depth: usize,
    /// Nesting of function calls and one-shot invocations.
    pub depth: usize,
}

/// How a body finished when it did not unwind.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    Return(RuntimeValue),
}

/// Run statements in order until one of them redirects control.
pub fn execute_body(body: &[Statement], ctx: &mut Context<'_>) -> Result<Flow, Unwind> {
    for statement in body {
        match execute_statement(statement, ctx)? {
            Flow::Normal => {}
            other => return Ok(other),
        }
    }
    Ok(Flow::Normal)
}

fn execute_statement(statement: &Statement, ctx: &mut Context<'_>) -> Result<Flow, Unwind> {
    let span = statement.span().clone();
    let source_id = ctx.source_id;
    // Attach the statement span to errors that don't already have one
    match run_statement(statement, &span, ctx) {
        Err(Unwind::Break) => Ok(Flow::Break),
        Err(Unwind::Continue) => Ok(Flow::Continue),
        result => result.map_err(|u| u.with_span(span, source_id)),
    }
}

fn run_statement(
    statement: &Statement,
    span: &Range<usize>,
    ctx: &mut Context<'_>,
) -> Result<Flow, Unwind> {
    match statement {
        Statement::Assignment { name, value, .. } => {
            let value = evaluate(value, ctx)?;
            ctx.env.set_variable(name, value);
            Ok(Flow::Normal)
        }
        Statement::Expression { value, .. } => {
            evaluate(value, ctx)?;
            Ok(Flow::Normal)
        }
        Statement::When {
            condition, body, ..
        } => {
            if evaluate(condition, ctx)?.is_truthy() {
                trace!(at = span.start, "guard matched");
                execute_body(body, ctx)
            } else {
                Ok(Flow::Normal)
            }
        }
        Statement::Break(_) => Ok(Flow::Break),
        Statement::Continue(_) => Ok(Flow::Continue),
        Statement::Pass(_) => Ok(Flow::Normal),
        Statement::Exit(_) => {
            debug!(at = span.start, "exit requested");
            Err(Unwind::Exit)
        }
        Statement::Return { value, .. } => {
            let value = match value {
                Some(expr) => evaluate(expr, ctx)?,
                None => RuntimeValue::None,
            };
            Ok(Flow::Return(value))
        }
    }
}

fn enter(ctx: &mut Context<'_>) -> Result<(), RuntimeError> {
    if ctx.depth >= ctx.max_call_depth {
        return Err(RuntimeError::StackOverflow);
    }
    ctx.depth += 1;
    Ok(())
}

/// Run a block's body once, synchronously, without touching its lifecycle.
///
/// This is what `name()` does for every block kind and what `start` does
/// for a one-shot block. A `break` or `continue` in the body is handed back
/// to the caller as an unwind.
pub fn invoke_block(name: &str, ctx: &mut Context<'_>) -> Result<RuntimeValue, Unwind> {
    let block = ctx
        .env
        .blocks()
        .get(name)
        .ok_or_else(|| RuntimeError::UndefinedBlock(name.to_string()))?;
    let (body, block_source) = (block.body(), block.source_id());
    enter(ctx)?;
    debug!(block = name, "invoking block body");
    let caller_source = std::mem::replace(&mut ctx.source_id, block_source);
    let result = execute_body(&body, ctx);
    ctx.source_id = caller_source;
    ctx.depth -= 1;
    match result? {
        Flow::Return(value) => Ok(value),
        Flow::Normal => Ok(RuntimeValue::None),
        Flow::Break => Err(Unwind::Break),
        Flow::Continue => Err(Unwind::Continue),
    }
}

/// Call a declared function with already evaluated arguments.
pub fn call_function(
    name: &str,
    args: Vec<RuntimeValue>,
    ctx: &mut Context<'_>,
) -> Result<RuntimeValue, Unwind> {
    let function = ctx
        .env
        .function(name)
        .ok_or_else(|| RuntimeError::UndefinedFunction(name.to_string()))?;
    let decl = &function.decl;
    if decl.params.len() != args.len() {
        return Err(RuntimeError::ArityMismatch {
            name: name.to_string(),
            expected: decl.params.len(),
            got: args.len(),
        }
        .into());
    }
    enter(ctx)?;
    let locals: HashMap<_, _> = decl.params.iter().cloned().zip(args).collect();
    ctx.env.push_frame(Frame::new(name, locals));
    let caller_source = std::mem::replace(&mut ctx.source_id, function.source_id);
    let result = execute_body(&decl.body, ctx);
    ctx.source_id = caller_source;
    if let Some(frame) = ctx.env.pop_frame() {
        trace!(function = frame.function(), "returned");
    }
    ctx.depth -= 1;
    match result? {
        Flow::Return(value) => Ok(value),
        Flow::Normal => Ok(RuntimeValue::None),
        Flow::Break => Err(RuntimeError::ControlFlowOutsideBlock("break").into()),
        Flow::Continue => Err(RuntimeError::ControlFlowOutsideBlock("continue").into()),
    }
}

/// Apply `name.start` or `name.stop`.
pub fn lifecycle(name: &str, op: LifecycleOp, ctx: &mut Context<'_>) -> Result<(), Unwind> {
    let policy = ctx.restart_policy;
    if !ctx.env.blocks().contains(name) {
        // A variable may hold a block handle.
        return match ctx.env.get_variable(name) {
            Some(RuntimeValue::Block(target)) if target != name => {
                let target = target.clone();
                lifecycle(&target, op, ctx)
            }
            Some(value) => Err(RuntimeError::InvalidLifecycleOperation {
                target: name.to_string(),
                reason: format!("a {} is not a block", value.type_name()),
            }
            .into()),
            None => Err(RuntimeError::UndefinedBlock(name.to_string()).into()),
        };
    }
    let Some(block) = ctx.env.blocks_mut().get_mut(name) else {
        return Err(RuntimeError::UndefinedBlock(name.to_string()).into());
    };
    match op {
        LifecycleOp::Start => match block.start(policy)? {
            StartOutcome::Invoke => {
                invoke_block(name, ctx)?;
            }
            StartOutcome::AlreadyRunning => trace!(block = name, "already running"),
            StartOutcome::Started => {
                debug!(block = name, remaining = block.remaining(), "block started")
            }
            StartOutcome::Exhausted => debug!(block = name, "block has no iterations to run"),
        },
        LifecycleOp::Stop => {
            if block.stop() {
                debug!(block = name, "block stopped");
            }
        }
    }
    Ok(())
}
