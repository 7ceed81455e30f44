use std::ops::Range;

use crate::ast::expression::Expression;

/// A single statement inside a block, function or guard body.
#[derive(Debug, Clone)]
pub enum Statement {
    /// `name = expr`
    Assignment {
        name: String,
        value: Expression,
        span: Range<usize>,
    },
    /// Expression evaluated for its side effects; the result is discarded.
    Expression {
        value: Expression,
        span: Range<usize>,
    },
    /// `when condition:` followed by an indented body.
    /// Level-triggered: the body runs every time the condition holds.
    When {
        condition: Expression,
        body: Vec<Statement>,
        span: Range<usize>,
    },
    Break(Range<usize>),
    Continue(Range<usize>),
    Exit(Range<usize>),
    Pass(Range<usize>),
    Return {
        value: Option<Expression>,
        span: Range<usize>,
    },
}

impl Statement {
    pub fn span(&self) -> &Range<usize> {
        match self {
            Statement::Assignment { span, .. } => span,
            Statement::Expression { span, .. } => span,
            Statement::When { span, .. } => span,
            Statement::Break(span)
            | Statement::Continue(span)
            | Statement::Exit(span)
            | Statement::Pass(span) => span,
            Statement::Return { span, .. } => span,
        }
    }
}
