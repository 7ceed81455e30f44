use crate::error::RuntimeError;
use crate::executor::Context;
use crate::modules::sleep_for;
use crate::runtime_value::RuntimeValue;

/// Functions callable by bare name without any declaration or import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Input,
    Int,
    Str,
    Sleep,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        match name {
            "print" => Some(Builtin::Print),
            "input" => Some(Builtin::Input),
            "int" => Some(Builtin::Int),
            "str" => Some(Builtin::Str),
            "sleep" => Some(Builtin::Sleep),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Input => "input",
            Builtin::Int => "int",
            Builtin::Str => "str",
            Builtin::Sleep => "sleep",
        }
    }

    pub fn call(
        self,
        args: Vec<RuntimeValue>,
        ctx: &mut Context<'_>,
    ) -> Result<RuntimeValue, RuntimeError> {
        match self {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(ctx.output, "{}", line).map_err(|e| RuntimeError::IoError(e.to_string()))?;
                Ok(RuntimeValue::None)
            }
            Builtin::Input => {
                if args.len() > 1 {
                    return Err(self.arity(1, args.len()));
                }
                if let Some(prompt) = args.first() {
                    write!(ctx.output, "{}", prompt)
                        .and_then(|_| ctx.output.flush())
                        .map_err(|e| RuntimeError::IoError(e.to_string()))?;
                }
                let mut line = String::new();
                let read = ctx
                    .input
                    .read_line(&mut line)
                    .map_err(|e| RuntimeError::IoError(e.to_string()))?;
                if read == 0 {
                    return Err(RuntimeError::IoError("unexpected end of input".to_string()));
                }
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                Ok(RuntimeValue::String(line))
            }
            Builtin::Int => {
                let value = self.single(args)?;
                to_int(&value).map(RuntimeValue::Number)
            }
            Builtin::Str => {
                let value = self.single(args)?;
                Ok(RuntimeValue::String(value.to_string()))
            }
            Builtin::Sleep => match self.single(args)? {
                RuntimeValue::Number(seconds) => {
                    sleep_for(seconds).map_err(|msg| RuntimeError::Custom(msg.to_string()))?;
                    Ok(RuntimeValue::None)
                }
                other => Err(RuntimeError::TypeError {
                    expected: "Number".to_string(),
                    got: other.type_name().to_string(),
                }),
            },
        }
    }

    fn single(self, mut args: Vec<RuntimeValue>) -> Result<RuntimeValue, RuntimeError> {
        if args.len() != 1 {
            return Err(self.arity(1, args.len()));
        }
        Ok(args.remove(0))
    }

    fn arity(self, expected: usize, got: usize) -> RuntimeError {
        RuntimeError::ArityMismatch {
            name: self.name().to_string(),
            expected,
            got,
        }
    }
}

fn to_int(value: &RuntimeValue) -> Result<f64, RuntimeError> {
    match value {
        RuntimeValue::Number(n) => Ok(n.trunc()),
        RuntimeValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        RuntimeValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| n as f64)
            .map_err(|_| RuntimeError::Custom(format!("invalid literal for int(): '{}'", s))),
        other => Err(RuntimeError::TypeError {
            expected: "Number, Boolean or String".to_string(),
            got: other.type_name().to_string(),
        }),
    }
}
