use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Arithmetic negation: -x
    Negation,
    /// Logical not: not x
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    LogicalAnd,
    LogicalOr,
    Equality,
    Inequality,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Addition => "+",
            BinaryOperator::Subtraction => "-",
            BinaryOperator::Multiplication => "*",
            BinaryOperator::Division => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::LogicalAnd => "and",
            BinaryOperator::LogicalOr => "or",
            BinaryOperator::Equality => "==",
            BinaryOperator::Inequality => "!=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::LessThan => "<",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::LessThanOrEqual => "<=",
        }
    }
}

/// Block lifecycle operation named by `NAME.start()` / `NAME.stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Start,
    Stop,
}

/// An expression AST node.
#[derive(Debug, Clone)]
pub enum Expression {
    // Literals
    NumberLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    NoneLiteral,

    /// Variable or block name.
    Identifier(String, Range<usize>),

    /// `name(args)`: built-in, block, function or imported member.
    Call {
        name: String,
        args: Vec<Expression>,
        span: Range<usize>,
    },
    /// `block.start()` / `block.stop()`
    Lifecycle {
        block: String,
        op: LifecycleOp,
        span: Range<usize>,
    },
    /// `object.member`
    MemberAccess {
        object: Box<Expression>,
        member: String,
        span: Range<usize>,
    },
    /// `object.method(args)`
    MethodCall {
        object: Box<Expression>,
        method: String,
        args: Vec<Expression>,
        span: Range<usize>,
    },

    // Operations
    UnaryOperation {
        operator: UnaryOperator,
        operand: Box<Expression>,
    },
    BinaryOperation {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}
