use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::RuntimeError;
use crate::runtime_value::RuntimeValue;

/// Host side of `import`, member access and external calls.
///
/// The interpreter never touches host functionality directly; every
/// `math.sqrt(x)` or imported `sleep(1)` goes through this trait, so
/// embedders can substitute their own modules or a scripted fake.
pub trait ModuleResolver {
    /// Make `module` available. Fails with `ModuleNotFound` if it does not exist.
    fn import(&mut self, module: &str) -> Result<(), RuntimeError>;

    /// Read `module.member`. Callable members come back as `RuntimeValue::External`.
    fn member(&mut self, module: &str, member: &str) -> Result<RuntimeValue, RuntimeError>;

    fn invoke(
        &mut self,
        module: &str,
        member: &str,
        args: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, RuntimeError>;
}

/// Built-in `math` and `time` modules.
#[derive(Debug)]
pub struct HostModules {
    epoch: Instant,
}

impl Default for HostModules {
    fn default() -> Self {
        HostModules {
            epoch: Instant::now(),
        }
    }
}

const MODULES: &[&str] = &["math", "time"];

const MATH_FUNCTIONS: &[&str] = &[
    "sqrt", "floor", "ceil", "abs", "pow", "min", "max", "round",
];
const TIME_FUNCTIONS: &[&str] = &["time", "monotonic", "sleep"];

impl ModuleResolver for HostModules {
    fn import(&mut self, module: &str) -> Result<(), RuntimeError> {
        if MODULES.contains(&module) {
            debug!(module, "imported host module");
            Ok(())
        } else {
            Err(RuntimeError::ModuleNotFound(module.to_string()))
        }
    }

    fn member(&mut self, module: &str, member: &str) -> Result<RuntimeValue, RuntimeError> {
        let functions = match module {
            "math" => {
                match member {
                    "pi" => return Ok(RuntimeValue::Number(std::f64::consts::PI)),
                    "e" => return Ok(RuntimeValue::Number(std::f64::consts::E)),
                    "tau" => return Ok(RuntimeValue::Number(std::f64::consts::TAU)),
                    _ => {}
                }
                MATH_FUNCTIONS
            }
            "time" => TIME_FUNCTIONS,
            _ => return Err(RuntimeError::ModuleNotFound(module.to_string())),
        };
        if functions.contains(&member) {
            Ok(RuntimeValue::External {
                module: module.to_string(),
                member: member.to_string(),
            })
        } else {
            Err(no_such_member(module, member))
        }
    }

    fn invoke(
        &mut self,
        module: &str,
        member: &str,
        args: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, RuntimeError> {
        let call = ExternalCall {
            module,
            member,
            args: &args,
        };
        match (module, member) {
            ("math", "sqrt") => {
                let x = call.unary()?;
                if x < 0.0 {
                    return Err(call.fail("math domain error"));
                }
                Ok(RuntimeValue::Number(x.sqrt()))
            }
            ("math", "floor") => Ok(RuntimeValue::Number(call.unary()?.floor())),
            ("math", "ceil") => Ok(RuntimeValue::Number(call.unary()?.ceil())),
            ("math", "abs") => Ok(RuntimeValue::Number(call.unary()?.abs())),
            ("math", "round") => Ok(RuntimeValue::Number(call.unary()?.round())),
            ("math", "pow") => {
                let (base, exp) = call.binary()?;
                Ok(RuntimeValue::Number(base.powf(exp)))
            }
            ("math", "min") => call.fold(f64::min),
            ("math", "max") => call.fold(f64::max),
            ("time", "time") => {
                call.arity(0)?;
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|e| call.fail(&e.to_string()))?;
                Ok(RuntimeValue::Number(now.as_secs_f64()))
            }
            ("time", "monotonic") => {
                call.arity(0)?;
                Ok(RuntimeValue::Number(self.epoch.elapsed().as_secs_f64()))
            }
            ("time", "sleep") => {
                let seconds = call.unary()?;
                sleep_for(seconds).map_err(|msg| call.fail(msg))?;
                Ok(RuntimeValue::None)
            }
            _ => Err(no_such_member(module, member)),
        }
    }
}

fn no_such_member(module: &str, member: &str) -> RuntimeError {
    RuntimeError::ExternalCall {
        module: module.to_string(),
        member: member.to_string(),
        message: "no such member".to_string(),
    }
}

/// Block the current thread. Shared by `time.sleep` and the `sleep` builtin.
pub(crate) fn sleep_for(seconds: f64) -> Result<(), &'static str> {
    std::thread::sleep(sleep_duration(seconds)?);
    Ok(())
}

fn sleep_duration(seconds: f64) -> Result<Duration, &'static str> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err("sleep length must be a non-negative number");
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| "sleep length is too large")
}

struct ExternalCall<'a> {
    module: &'a str,
    member: &'a str,
    args: &'a [RuntimeValue],
}

impl ExternalCall<'_> {
    fn fail(&self, message: &str) -> RuntimeError {
        RuntimeError::ExternalCall {
            module: self.module.to_string(),
            member: self.member.to_string(),
            message: message.to_string(),
        }
    }

    fn arity(&self, expected: usize) -> Result<(), RuntimeError> {
        if self.args.len() != expected {
            return Err(RuntimeError::ArityMismatch {
                name: format!("{}.{}", self.module, self.member),
                expected,
                got: self.args.len(),
            });
        }
        Ok(())
    }

    fn number(&self, index: usize) -> Result<f64, RuntimeError> {
        match &self.args[index] {
            RuntimeValue::Number(n) => Ok(*n),
            other => Err(RuntimeError::TypeError {
                expected: "Number".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }

    fn unary(&self) -> Result<f64, RuntimeError> {
        self.arity(1)?;
        self.number(0)
    }

    fn binary(&self) -> Result<(f64, f64), RuntimeError> {
        self.arity(2)?;
        Ok((self.number(0)?, self.number(1)?))
    }

    fn fold(&self, f: fn(f64, f64) -> f64) -> Result<RuntimeValue, RuntimeError> {
        if self.args.is_empty() {
            return Err(self.fail("expected at least one argument"));
        }
        let mut acc = self.number(0)?;
        for index in 1..self.args.len() {
            acc = f(acc, self.number(index)?);
        }
        Ok(RuntimeValue::Number(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> RuntimeValue {
        RuntimeValue::Number(n)
    }

    #[test]
    fn sleep_length_is_checked() {
        assert_eq!(sleep_duration(0.25), Ok(Duration::from_millis(250)));
        assert_eq!(sleep_duration(0.0), Ok(Duration::ZERO));
        assert!(sleep_duration(-1.0).is_err());
        assert!(sleep_duration(f64::NAN).is_err());
        assert!(sleep_duration(f64::INFINITY).is_err());
        assert_eq!(sleep_duration(1e20), Err("sleep length is too large"));

        let mut host = HostModules::default();
        assert!(matches!(
            host.invoke("time", "sleep", vec![num(1e20)]),
            Err(RuntimeError::ExternalCall { member, .. }) if member == "sleep"
        ));
    }

    #[test]
    fn unknown_module_is_not_found() {
        let mut host = HostModules::default();
        assert!(host.import("math").is_ok());
        assert!(matches!(
            host.import("socket"),
            Err(RuntimeError::ModuleNotFound(name)) if name == "socket"
        ));
    }

    #[test]
    fn math_constants_and_functions() {
        let mut host = HostModules::default();
        assert_eq!(host.member("math", "pi").unwrap(), num(std::f64::consts::PI));
        assert_eq!(
            host.member("math", "sqrt").unwrap(),
            RuntimeValue::External {
                module: "math".to_string(),
                member: "sqrt".to_string()
            }
        );
        assert_eq!(host.invoke("math", "sqrt", vec![num(16.0)]).unwrap(), num(4.0));
        assert_eq!(host.invoke("math", "pow", vec![num(2.0), num(10.0)]).unwrap(), num(1024.0));
        assert_eq!(
            host.invoke("math", "max", vec![num(3.0), num(9.0), num(4.0)]).unwrap(),
            num(9.0)
        );
        assert_eq!(host.invoke("math", "floor", vec![num(2.7)]).unwrap(), num(2.0));
    }

    #[test]
    fn bad_external_arguments() {
        let mut host = HostModules::default();
        assert!(matches!(
            host.invoke("math", "sqrt", vec![num(-1.0)]),
            Err(RuntimeError::ExternalCall { .. })
        ));
        assert!(matches!(
            host.invoke("math", "sqrt", vec![]),
            Err(RuntimeError::ArityMismatch { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            host.invoke("math", "abs", vec![RuntimeValue::String("x".to_string())]),
            Err(RuntimeError::TypeError { .. })
        ));
        assert!(matches!(
            host.member("math", "nope"),
            Err(RuntimeError::ExternalCall { .. })
        ));
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let mut host = HostModules::default();
        let RuntimeValue::Number(a) = host.invoke("time", "monotonic", vec![]).unwrap() else {
            panic!("expected a number");
        };
        let RuntimeValue::Number(b) = host.invoke("time", "monotonic", vec![]).unwrap() else {
            panic!("expected a number");
        };
        assert!(b >= a);
    }
}
