use std::ops::Range;

use whenlang::ast::{BinaryOperator, Expression, LifecycleOp, UnaryOperator};

use crate::builtins::Builtin;
use crate::environment::Binding;
use crate::error::{DiagnosticError, RuntimeError, Unwind};
use crate::executor::{self, Context};
use crate::runtime_value::RuntimeValue;

/// Evaluate an expression to produce a RuntimeValue.
pub fn evaluate(expr: &Expression, ctx: &mut Context<'_>) -> Result<RuntimeValue, Unwind> {
    match expr {
        // --- Literals ---
        Expression::NumberLiteral(n) => Ok(RuntimeValue::Number(*n)),
        Expression::StringLiteral(s) => Ok(RuntimeValue::String(s.clone())),
        Expression::BooleanLiteral(b) => Ok(RuntimeValue::Boolean(*b)),
        Expression::NoneLiteral => Ok(RuntimeValue::None),

        // --- References ---
        Expression::Identifier(name, span) => match ctx.env.lookup(name) {
            Some(Binding::Variable(value)) => Ok(value.clone()),
            Some(Binding::Block(block)) => Ok(RuntimeValue::Block(block.name().to_string())),
            None => Err(located(
                RuntimeError::UndefinedVariable(name.clone()),
                span,
                ctx.source_id,
            )),
        },

        // --- Calls ---
        Expression::Call { name, args, span } => {
            let args = evaluate_arguments(args, ctx)?;
            call(name, args, ctx).map_err(|u| u.with_span(span.clone(), ctx.source_id))
        }

        Expression::Lifecycle { block, op, span } => {
            executor::lifecycle(block, *op, ctx)
                .map_err(|u| u.with_span(span.clone(), ctx.source_id))?;
            Ok(RuntimeValue::None)
        }

        Expression::MemberAccess {
            object,
            member,
            span,
        } => match evaluate(object, ctx)? {
            RuntimeValue::Module(module) => ctx
                .modules
                .member(&module, member)
                .map_err(|e| located(e, span, ctx.source_id)),
            other => Err(located(
                RuntimeError::TypeError {
                    expected: "Module".to_string(),
                    got: other.type_name().to_string(),
                },
                span,
                ctx.source_id,
            )),
        },

        Expression::MethodCall {
            object,
            method,
            args,
            span,
        } => {
            let receiver = evaluate(object, ctx)?;
            let args = evaluate_arguments(args, ctx)?;
            call_method(receiver, method, args, ctx)
                .map_err(|u| u.with_span(span.clone(), ctx.source_id))
        }

        // --- Operations ---
        Expression::UnaryOperation { operator, operand } => {
            let value = evaluate(operand, ctx)?;
            match operator {
                UnaryOperator::Negation => Ok(RuntimeValue::Number(-coerce_number(&value)?)),
                UnaryOperator::LogicalNot => Ok(RuntimeValue::Boolean(value.is_falsy())),
            }
        }

        Expression::BinaryOperation {
            operator,
            left,
            right,
        } => {
            let left = evaluate(left, ctx)?;
            // Short-circuit: the right operand is not evaluated when the left decides.
            match operator {
                BinaryOperator::LogicalAnd if left.is_falsy() => {
                    return Ok(RuntimeValue::Boolean(false));
                }
                BinaryOperator::LogicalOr if left.is_truthy() => {
                    return Ok(RuntimeValue::Boolean(true));
                }
                _ => {}
            }
            let right = evaluate(right, ctx)?;
            Ok(eval_binary_op(operator, &left, &right)?)
        }
    }
}

fn evaluate_arguments(
    args: &[Expression],
    ctx: &mut Context<'_>,
) -> Result<Vec<RuntimeValue>, Unwind> {
    args.iter().map(|arg| evaluate(arg, ctx)).collect()
}

/// Resolve `name(args)`: builtins, then blocks, then functions, then
/// variables holding something callable.
fn call(name: &str, args: Vec<RuntimeValue>, ctx: &mut Context<'_>) -> Result<RuntimeValue, Unwind> {
    if let Some(builtin) = Builtin::lookup(name) {
        return Ok(builtin.call(args, ctx)?);
    }
    if ctx.env.blocks().contains(name) {
        return call_block(name, &args, ctx);
    }
    if ctx.env.function(name).is_some() {
        return executor::call_function(name, args, ctx);
    }
    match ctx.env.get_variable(name) {
        Some(RuntimeValue::External { module, member }) => {
            let (module, member) = (module.clone(), member.clone());
            Ok(ctx.modules.invoke(&module, &member, args)?)
        }
        Some(RuntimeValue::Block(block)) => {
            let block = block.clone();
            call_block(&block, &args, ctx)
        }
        Some(other) => Err(RuntimeError::TypeError {
            expected: "callable".to_string(),
            got: other.type_name().to_string(),
        }
        .into()),
        None => Err(RuntimeError::UndefinedFunction(name.to_string()).into()),
    }
}

fn call_block(
    name: &str,
    args: &[RuntimeValue],
    ctx: &mut Context<'_>,
) -> Result<RuntimeValue, Unwind> {
    if !args.is_empty() {
        return Err(RuntimeError::ArityMismatch {
            name: name.to_string(),
            expected: 0,
            got: args.len(),
        }
        .into());
    }
    executor::invoke_block(name, ctx)
}

fn call_method(
    receiver: RuntimeValue,
    method: &str,
    args: Vec<RuntimeValue>,
    ctx: &mut Context<'_>,
) -> Result<RuntimeValue, Unwind> {
    match receiver {
        RuntimeValue::Module(module) => Ok(ctx.modules.invoke(&module, method, args)?),
        RuntimeValue::Block(block) => {
            let op = match method {
                "start" => LifecycleOp::Start,
                "stop" => LifecycleOp::Stop,
                _ => {
                    return Err(RuntimeError::Custom(format!(
                        "block '{}' has no method '{}'",
                        block, method
                    ))
                    .into());
                }
            };
            if !args.is_empty() {
                return Err(RuntimeError::ArityMismatch {
                    name: format!("{}.{}", block, method),
                    expected: 0,
                    got: args.len(),
                }
                .into());
            }
            executor::lifecycle(&block, op, ctx)?;
            Ok(RuntimeValue::None)
        }
        other => Err(RuntimeError::Custom(format!(
            "value of type {} has no method '{}'",
            other.type_name(),
            method
        ))
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn located(error: RuntimeError, span: &Range<usize>, source_id: usize) -> Unwind {
    DiagnosticError::from(error)
        .with_span(span.clone(), source_id)
        .into()
}

fn coerce_number(val: &RuntimeValue) -> Result<f64, RuntimeError> {
    match val {
        RuntimeValue::Number(n) => Ok(*n),
        other => Err(RuntimeError::TypeError {
            expected: "Number".to_string(),
            got: other.type_name().to_string(),
        }),
    }
}

fn eval_binary_op(
    op: &BinaryOperator,
    left: &RuntimeValue,
    right: &RuntimeValue,
) -> Result<RuntimeValue, RuntimeError> {
    match op {
        BinaryOperator::Addition => match (left, right) {
            (RuntimeValue::Number(a), RuntimeValue::Number(b)) => Ok(RuntimeValue::Number(a + b)),
            (RuntimeValue::String(a), RuntimeValue::String(b)) => {
                Ok(RuntimeValue::String(format!("{}{}", a, b)))
            }
            _ => Err(RuntimeError::TypeError {
                expected: "matching numeric or string types".to_string(),
                got: format!("{} + {}", left.type_name(), right.type_name()),
            }),
        },
        BinaryOperator::Subtraction => numeric_binop(left, right, |a, b| a - b),
        BinaryOperator::Multiplication => numeric_binop(left, right, |a, b| a * b),
        BinaryOperator::Division => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            if b == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(RuntimeValue::Number(a / b))
        }
        BinaryOperator::Modulo => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            if b == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            // Result takes the sign of the divisor.
            Ok(RuntimeValue::Number(a - b * (a / b).floor()))
        }
        BinaryOperator::Equality => Ok(RuntimeValue::Boolean(left == right)),
        BinaryOperator::Inequality => Ok(RuntimeValue::Boolean(left != right)),
        BinaryOperator::GreaterThan => compare(left, right, |o| o.is_gt()),
        BinaryOperator::LessThan => compare(left, right, |o| o.is_lt()),
        BinaryOperator::GreaterThanOrEqual => compare(left, right, |o| o.is_ge()),
        BinaryOperator::LessThanOrEqual => compare(left, right, |o| o.is_le()),
        BinaryOperator::LogicalAnd => {
            Ok(RuntimeValue::Boolean(left.is_truthy() && right.is_truthy()))
        }
        BinaryOperator::LogicalOr => {
            Ok(RuntimeValue::Boolean(left.is_truthy() || right.is_truthy()))
        }
    }
}

fn numeric_binop(
    left: &RuntimeValue,
    right: &RuntimeValue,
    f: impl Fn(f64, f64) -> f64,
) -> Result<RuntimeValue, RuntimeError> {
    let a = coerce_number(left)?;
    let b = coerce_number(right)?;
    Ok(RuntimeValue::Number(f(a, b)))
}

/// Ordering comparisons work on two numbers or two strings.
fn compare(
    left: &RuntimeValue,
    right: &RuntimeValue,
    f: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<RuntimeValue, RuntimeError> {
    let ordering = match (left, right) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => a.partial_cmp(b),
        (RuntimeValue::String(a), RuntimeValue::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(RuntimeError::TypeError {
                expected: "two numbers or two strings".to_string(),
                got: format!("{} and {}", left.type_name(), right.type_name()),
            });
        }
    };
    // Comparisons involving NaN are false.
    Ok(RuntimeValue::Boolean(ordering.is_some_and(f)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> RuntimeValue {
        RuntimeValue::Number(n)
    }

    #[test]
    fn modulo_follows_divisor_sign() {
        let op = BinaryOperator::Modulo;
        assert_eq!(eval_binary_op(&op, &num(7.0), &num(3.0)).unwrap(), num(1.0));
        assert_eq!(eval_binary_op(&op, &num(-7.0), &num(3.0)).unwrap(), num(2.0));
        assert!(matches!(
            eval_binary_op(&op, &num(1.0), &num(0.0)),
            Err(RuntimeError::DivisionByZero)
        ));
    }

    #[test]
    fn mixed_type_equality_is_false() {
        let eq = BinaryOperator::Equality;
        assert_eq!(
            eval_binary_op(&eq, &num(1.0), &RuntimeValue::Boolean(true)).unwrap(),
            RuntimeValue::Boolean(false)
        );
        assert_eq!(
            eval_binary_op(&eq, &RuntimeValue::None, &RuntimeValue::None).unwrap(),
            RuntimeValue::Boolean(true)
        );
    }

    #[test]
    fn ordering_requires_matching_types() {
        let lt = BinaryOperator::LessThan;
        assert_eq!(
            eval_binary_op(
                &lt,
                &RuntimeValue::String("a".to_string()),
                &RuntimeValue::String("b".to_string())
            )
            .unwrap(),
            RuntimeValue::Boolean(true)
        );
        assert!(eval_binary_op(&lt, &num(1.0), &RuntimeValue::String("b".to_string())).is_err());
        assert_eq!(
            eval_binary_op(&lt, &num(f64::NAN), &num(1.0)).unwrap(),
            RuntimeValue::Boolean(false)
        );
    }
}
