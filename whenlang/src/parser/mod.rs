pub mod error;
mod expression;
mod lexer;
mod structural;

pub use error::ParseError;

use crate::Program;

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Parse the source text into a complete Program.
    pub fn parse(&self) -> Result<Program, Vec<ParseError>> {
        let tokens = lexer::Lexer::new(&self.source, self.file_id).tokenize()?;
        structural::TokenParser::new(tokens, self.file_id).parse_program()
    }
}
