pub mod expression;
pub mod statement;

use std::ops::Range;

pub use expression::{BinaryOperator, Expression, LifecycleOp, UnaryOperator};
pub use statement::Statement;

/// How a declared block is driven by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// `os`: runs once per explicit invocation, never ticked.
    OneShot,
    /// `de NAME(N)`: ticks `N` times after a start, then becomes exhausted.
    Counted(u64),
    /// `fo`: ticks on every pass while running.
    Forever,
}

impl BlockKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            BlockKind::OneShot => "os",
            BlockKind::Counted(_) => "de",
            BlockKind::Forever => "fo",
        }
    }
}

/// A named block declaration: `os NAME:`, `de NAME(N):`, `fo NAME:`.
#[derive(Debug, Clone)]
pub struct BlockDecl {
    pub name: String,
    pub kind: BlockKind,
    /// Declared with the `parallel` prefix. Still ticked cooperatively.
    pub parallel: bool,
    pub body: Vec<Statement>,
    /// Byte span of the header line (for diagnostics).
    pub span: Range<usize>,
}

/// A top-level declaration other than a block.
#[derive(Debug, Clone)]
pub enum Declaration {
    /// `name = expr`
    Variable {
        name: String,
        value: Expression,
        span: Range<usize>,
    },
    /// `def name(params):`
    Function(FunctionDecl),
    /// `import module [as alias]`
    Import {
        module: String,
        alias: Option<String>,
        span: Range<usize>,
    },
    /// `from module import a [as x], b [as y]`
    FromImport {
        module: String,
        names: Vec<ImportName>,
        span: Range<usize>,
    },
}

impl Declaration {
    pub fn span(&self) -> &Range<usize> {
        match self {
            Declaration::Variable { span, .. } => span,
            Declaration::Function(func) => &func.span,
            Declaration::Import { span, .. } => span,
            Declaration::FromImport { span, .. } => span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
    pub span: Range<usize>,
}

/// One imported member of a `from ... import` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportName {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportName {
    /// The name the member is bound to in the program.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}
