pub mod ast;
pub mod parser;

use std::ops::Range;

use crate::ast::{BlockDecl, Declaration, Statement};

/// A parsed WHEN program.
#[derive(Debug, Clone)]
pub struct Program {
    /// Top-level variable, function and import declarations in source order.
    pub declarations: Vec<Declaration>,
    /// Block declarations in source order. This order is the scheduler's tick order.
    pub blocks: Vec<BlockDecl>,
    /// The distinguished `main` block.
    pub main: MainBlock,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}

/// The body of `main:`, executed once at the start of every scheduler pass.
#[derive(Debug, Clone)]
pub struct MainBlock {
    pub body: Vec<Statement>,
    pub span: Range<usize>,
}
