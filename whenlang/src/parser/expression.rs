use std::ops::Range;

use crate::ast::{BinaryOperator, Expression, LifecycleOp, UnaryOperator};
use crate::parser::error::ParseError;
use crate::parser::lexer::TokenKind;
use crate::parser::structural::TokenParser;

// Binding powers (precedence). Higher = tighter binding.
// Left bp, right bp. For left-assoc: right = left + 1.
const BP_OR: u8 = 2; // or
const BP_AND: u8 = 4; // and
const BP_NOT: u8 = 6; // not (prefix, looser than comparisons)
const BP_COMPARISON: u8 = 8; // == != < > <= >=
const BP_ADDITIVE: u8 = 10; // + -
const BP_MULTIPLICATIVE: u8 = 12; // * / %
const BP_UNARY: u8 = 14; // -

/// Infix binding powers: returns (left_bp, right_bp, operator) or None if not infix.
fn infix_bp(kind: &TokenKind) -> Option<(u8, u8, BinaryOperator)> {
    let (bp, op) = match kind {
        TokenKind::Or => (BP_OR, BinaryOperator::LogicalOr),
        TokenKind::And => (BP_AND, BinaryOperator::LogicalAnd),
        TokenKind::EqEq => (BP_COMPARISON, BinaryOperator::Equality),
        TokenKind::NotEq => (BP_COMPARISON, BinaryOperator::Inequality),
        TokenKind::Lt => (BP_COMPARISON, BinaryOperator::LessThan),
        TokenKind::Gt => (BP_COMPARISON, BinaryOperator::GreaterThan),
        TokenKind::LtEq => (BP_COMPARISON, BinaryOperator::LessThanOrEqual),
        TokenKind::GtEq => (BP_COMPARISON, BinaryOperator::GreaterThanOrEqual),
        TokenKind::Plus => (BP_ADDITIVE, BinaryOperator::Addition),
        TokenKind::Minus => (BP_ADDITIVE, BinaryOperator::Subtraction),
        TokenKind::Star => (BP_MULTIPLICATIVE, BinaryOperator::Multiplication),
        TokenKind::Slash => (BP_MULTIPLICATIVE, BinaryOperator::Division),
        TokenKind::Percent => (BP_MULTIPLICATIVE, BinaryOperator::Modulo),
        _ => return None,
    };
    Some((bp, bp + 1, op))
}

impl TokenParser {
    pub(crate) fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.parse_expr(0)
    }

    // ------------------------------------------------------------------
    // Pratt parser core
    // ------------------------------------------------------------------

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expression, ParseError> {
        let mut left = self.parse_prefix()?;

        loop {
            let Some((l_bp, r_bp, operator)) = infix_bp(self.peek_kind()) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let right = self.parse_expr(r_bp)?;
            left = Expression::BinaryOperation {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression, ParseError> {
        let token = self.peek().clone();

        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expression::NumberLiteral(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expression::StringLiteral(s))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::BooleanLiteral(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::BooleanLiteral(false))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expression::NoneLiteral)
            }

            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_expr(BP_UNARY)?;
                Ok(Expression::UnaryOperation {
                    operator: UnaryOperator::Negation,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_expr(BP_NOT)?;
                Ok(Expression::UnaryOperation {
                    operator: UnaryOperator::LogicalNot,
                    operand: Box::new(operand),
                })
            }

            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr(0)?;
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(expr)
            }

            TokenKind::Ident(name) => {
                self.advance();
                self.parse_postfix(name, token.span)
            }

            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Calls, lifecycle operations, member access and method calls that
    /// follow an identifier.
    fn parse_postfix(&mut self, name: String, span: Range<usize>) -> Result<Expression, ParseError> {
        let start = span.start;
        let mut expr = if self.at(&TokenKind::LParen) {
            let args = self.parse_arguments()?;
            Expression::Call {
                name,
                args,
                span: start..self.prev_end(),
            }
        } else {
            Expression::Identifier(name, span)
        };

        while self.at(&TokenKind::Dot) {
            self.advance();
            let (member, _) = self.expect_ident("member name after `.`")?;

            let lifecycle = match (&expr, member.as_str()) {
                (Expression::Identifier(block, _), "start") => Some((block.clone(), LifecycleOp::Start)),
                (Expression::Identifier(block, _), "stop") => Some((block.clone(), LifecycleOp::Stop)),
                _ => None,
            };

            expr = if let Some((block, op)) = lifecycle {
                if self.at(&TokenKind::LParen) {
                    self.advance();
                    self.expect(TokenKind::RParen, "`)`: lifecycle operations take no arguments")?;
                }
                Expression::Lifecycle {
                    block,
                    op,
                    span: start..self.prev_end(),
                }
            } else if self.at(&TokenKind::LParen) {
                let args = self.parse_arguments()?;
                Expression::MethodCall {
                    object: Box::new(expr),
                    method: member,
                    args,
                    span: start..self.prev_end(),
                }
            } else {
                Expression::MemberAccess {
                    object: Box::new(expr),
                    member,
                    span: start..self.prev_end(),
                }
            };
        }

        Ok(expr)
    }

    /// Parse `( expr, expr, ... )`. A trailing comma is allowed.
    fn parse_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut args = Vec::new();
        while !self.at(&TokenKind::RParen) {
            args.push(self.parse_expr(0)?);
            if self.at(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)` to close the argument list")?;
        Ok(args)
    }
}
