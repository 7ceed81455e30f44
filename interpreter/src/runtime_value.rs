use std::fmt;

/// A dynamically typed value produced by evaluating an expression.
#[derive(Debug, Clone)]
pub enum RuntimeValue {
    Number(f64),
    Boolean(bool),
    String(String),
    None,
    /// An imported host module, bound by `import name`.
    Module(String),
    /// A callable member of a host module, bound by `from m import f`
    /// or produced by `m.f` member access.
    External { module: String, member: String },
    /// A handle to a declared block, produced when a block name is used as a value.
    Block(String),
}

impl RuntimeValue {
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    pub fn is_falsy(&self) -> bool {
        match self {
            RuntimeValue::Boolean(b) => !b,
            RuntimeValue::None => true,
            RuntimeValue::Number(n) => *n == 0.0,
            RuntimeValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RuntimeValue::Number(_) => "Number",
            RuntimeValue::Boolean(_) => "Boolean",
            RuntimeValue::String(_) => "String",
            RuntimeValue::None => "None",
            RuntimeValue::Module(_) => "Module",
            RuntimeValue::External { .. } => "ExternalFunction",
            RuntimeValue::Block(_) => "Block",
        }
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Number(n) => {
                if n.is_finite() && *n == n.floor() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            RuntimeValue::Boolean(b) => write!(f, "{}", b),
            RuntimeValue::String(s) => write!(f, "{}", s),
            RuntimeValue::None => write!(f, "none"),
            RuntimeValue::Module(name) => write!(f, "<module {}>", name),
            RuntimeValue::External { module, member } => write!(f, "<function {}.{}>", module, member),
            RuntimeValue::Block(name) => write!(f, "<block {}>", name),
        }
    }
}

impl PartialEq for RuntimeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RuntimeValue::Number(a), RuntimeValue::Number(b)) => a == b, // NaN != NaN per IEEE 754
            (RuntimeValue::Boolean(a), RuntimeValue::Boolean(b)) => a == b,
            (RuntimeValue::String(a), RuntimeValue::String(b)) => a == b,
            (RuntimeValue::None, RuntimeValue::None) => true,
            (RuntimeValue::Module(a), RuntimeValue::Module(b)) => a == b,
            (
                RuntimeValue::External {
                    module: m1,
                    member: f1,
                },
                RuntimeValue::External {
                    module: m2,
                    member: f2,
                },
            ) => m1 == m2 && f1 == f2,
            (RuntimeValue::Block(a), RuntimeValue::Block(b)) => a == b,
            _ => false,
        }
    }
}
