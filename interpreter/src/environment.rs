use std::collections::HashMap;
use std::rc::Rc;

use whenlang::ast::FunctionDecl;

use crate::block::{Block, BlockTable};
use crate::runtime_value::RuntimeValue;

/// Local variables of one active function call.
#[derive(Debug)]
pub struct Frame {
    function: String,
    locals: HashMap<String, RuntimeValue>,
}

impl Frame {
    pub fn new(function: &str, locals: HashMap<String, RuntimeValue>) -> Self {
        Frame {
            function: function.to_string(),
            locals,
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

/// A declared function and the file it was declared in.
#[derive(Debug, Clone)]
pub struct Function {
    pub decl: Rc<FunctionDecl>,
    pub source_id: usize,
}

/// Result of resolving a bare name.
pub enum Binding<'a> {
    Variable(&'a RuntimeValue),
    Block(&'a Block),
}

/// All interpreter state that outlives a single statement: globals,
/// function frames, declared functions and the block table.
///
/// Names resolve innermost frame first, then globals, then blocks.
/// Writes go to the innermost frame when a function is running, so a
/// function never mutates a global by assignment.
#[derive(Debug, Default)]
pub struct Environment {
    globals: HashMap<String, RuntimeValue>,
    frames: Vec<Frame>,
    functions: HashMap<String, Function>,
    blocks: BlockTable,
}

impl Environment {
    pub fn new(blocks: BlockTable) -> Self {
        Environment {
            blocks,
            ..Default::default()
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Binding<'_>> {
        if let Some(value) = self.get_variable(name) {
            return Some(Binding::Variable(value));
        }
        self.blocks.get(name).map(Binding::Block)
    }

    pub fn get_variable(&self, name: &str) -> Option<&RuntimeValue> {
        self.frames
            .last()
            .and_then(|frame| frame.locals.get(name))
            .or_else(|| self.globals.get(name))
    }

    pub fn set_variable(&mut self, name: &str, value: RuntimeValue) {
        match self.frames.last_mut() {
            Some(frame) => frame.locals.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    pub fn define_global(&mut self, name: &str, value: RuntimeValue) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn global(&self, name: &str) -> Option<&RuntimeValue> {
        self.globals.get(name)
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn define_function(&mut self, decl: FunctionDecl, source_id: usize) {
        let function = Function {
            decl: Rc::new(decl),
            source_id,
        };
        self.functions.insert(function.decl.name.clone(), function);
    }

    pub fn function(&self, name: &str) -> Option<Function> {
        self.functions.get(name).cloned()
    }

    pub fn blocks(&self) -> &BlockTable {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut BlockTable {
        &mut self.blocks
    }

    /// Swap in a new block table, returning the old one.
    pub fn replace_blocks(&mut self, blocks: BlockTable) -> BlockTable {
        std::mem::replace(&mut self.blocks, blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_writes_stay_in_frame() {
        let mut env = Environment::default();
        env.define_global("x", RuntimeValue::Number(1.0));
        env.push_frame(Frame::new("f", HashMap::new()));
        assert_eq!(env.get_variable("x"), Some(&RuntimeValue::Number(1.0)));
        env.set_variable("x", RuntimeValue::Number(2.0));
        assert_eq!(env.get_variable("x"), Some(&RuntimeValue::Number(2.0)));
        env.pop_frame();
        assert_eq!(env.get_variable("x"), Some(&RuntimeValue::Number(1.0)));
    }

    #[test]
    fn variables_shadow_blocks() {
        let decls = vec![whenlang::ast::BlockDecl {
            name: "tick".to_string(),
            kind: whenlang::ast::BlockKind::Forever,
            parallel: false,
            body: Vec::new(),
            span: 0..0,
        }];
        let mut env = Environment::new(BlockTable::from_decls(&decls, 0));
        assert!(matches!(env.lookup("tick"), Some(Binding::Block(_))));
        env.define_global("tick", RuntimeValue::Boolean(true));
        assert!(matches!(env.lookup("tick"), Some(Binding::Variable(_))));
        assert!(env.lookup("missing").is_none());
    }
}
