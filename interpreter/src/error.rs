use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone)]
pub enum RuntimeError {
    TypeError { expected: String, got: String },
    UndefinedVariable(String),
    UndefinedBlock(String),
    UndefinedFunction(String),
    InvalidLifecycleOperation { target: String, reason: String },
    ArityMismatch { name: String, expected: usize, got: usize },
    DivisionByZero,
    ModuleNotFound(String),
    ExternalCall { module: String, member: String, message: String },
    /// `break` or `continue` escaped a function body or a global initialiser.
    ControlFlowOutsideBlock(&'static str),
    IoError(String),
    StackOverflow,
    Custom(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeError { expected, got } => {
                write!(f, "type error: expected {}, got {}", expected, got)
            }
            RuntimeError::UndefinedVariable(name) => write!(f, "undefined variable: {}", name),
            RuntimeError::UndefinedBlock(name) => write!(f, "undefined block: {}", name),
            RuntimeError::UndefinedFunction(name) => write!(f, "undefined function: {}", name),
            RuntimeError::InvalidLifecycleOperation { target, reason } => {
                write!(f, "invalid lifecycle operation on '{}': {}", target, reason)
            }
            RuntimeError::ArityMismatch {
                name,
                expected,
                got,
            } => write!(
                f,
                "{} expects {} argument{}, got {}",
                name,
                expected,
                if *expected == 1 { "" } else { "s" },
                got
            ),
            RuntimeError::DivisionByZero => write!(f, "division by zero"),
            RuntimeError::ModuleNotFound(module) => write!(f, "cannot import module '{}'", module),
            RuntimeError::ExternalCall {
                module,
                member,
                message,
            } => write!(f, "external call {}.{} failed: {}", module, member, message),
            RuntimeError::ControlFlowOutsideBlock(keyword) => {
                write!(f, "'{}' outside of a block body", keyword)
            }
            RuntimeError::IoError(msg) => write!(f, "I/O error: {}", msg),
            RuntimeError::StackOverflow => write!(f, "stack overflow"),
            RuntimeError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// A runtime error or warning enriched with source location information.
#[derive(Debug, Clone)]
pub struct DiagnosticError {
    pub error: RuntimeError,
    pub span: Option<Range<usize>>,
    pub source_id: usize,
    pub is_warning: bool,
}

impl DiagnosticError {
    /// Create a warning diagnostic with a source span.
    pub fn warning(message: String, span: Range<usize>, source_id: usize) -> Self {
        DiagnosticError {
            error: RuntimeError::Custom(message),
            span: Some(span),
            source_id,
            is_warning: true,
        }
    }

    /// Attach a span unless a more precise one is already present.
    pub fn with_span(mut self, span: Range<usize>, source_id: usize) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
            self.source_id = source_id;
        }
        self
    }
}

impl From<RuntimeError> for DiagnosticError {
    fn from(error: RuntimeError) -> Self {
        DiagnosticError {
            error,
            span: None,
            source_id: 0,
            is_warning: false,
        }
    }
}

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for DiagnosticError {}

/// Why evaluation stopped before reaching the end of a body.
///
/// `Exit` is the program-level termination signal raised by `exit`; it
/// unwinds straight to the scheduler and is not an error. `Break` and
/// `Continue` come out of a one-shot body and act on the body of the
/// statement that invoked it.
#[derive(Debug)]
pub enum Unwind {
    Exit,
    Break,
    Continue,
    Error(DiagnosticError),
}

impl Unwind {
    pub fn with_span(self, span: Range<usize>, source_id: usize) -> Self {
        match self {
            Unwind::Error(e) => Unwind::Error(e.with_span(span, source_id)),
            other => other,
        }
    }

    /// Turn a `break` or `continue` that reached a place with no body to
    /// act on into an error.
    pub fn escaped(self) -> Self {
        match self {
            Unwind::Break => RuntimeError::ControlFlowOutsideBlock("break").into(),
            Unwind::Continue => RuntimeError::ControlFlowOutsideBlock("continue").into(),
            other => other,
        }
    }
}

impl From<DiagnosticError> for Unwind {
    fn from(error: DiagnosticError) -> Self {
        Unwind::Error(error)
    }
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Error(error.into())
    }
}
