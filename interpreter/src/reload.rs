use tracing::debug;
use whenlang::Program;
use whenlang::ast::Declaration;

use crate::block::BlockTable;
use crate::error::DiagnosticError;
use crate::program;
use crate::scheduler::Scheduler;

/// What changed when new definitions were swapped in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub functions: Vec<String>,
}

impl ReloadReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.functions.is_empty()
    }
}

impl Scheduler {
    /// Replace block and function definitions with those of `program`.
    ///
    /// Must be called between passes. Global variable declarations and
    /// `main` are left alone so the running program keeps its state.
    pub fn reload(&mut self, program: &Program) -> Result<ReloadReport, DiagnosticError> {
        let mut report = ReloadReport::default();

        // Resolve every import before touching the environment so a
        // failing one leaves the running program as it was.
        let mut globals = Vec::new();
        for decl in &program.declarations {
            if let Declaration::Import { .. } | Declaration::FromImport { .. } = decl {
                let bindings = program::resolve_import(decl, &mut *self.modules).map_err(|e| {
                    DiagnosticError::from(e).with_span(decl.span().clone(), program.source_id)
                })?;
                globals.extend(bindings);
            }
        }

        for (name, value) in globals {
            self.env.define_global(&name, value);
        }
        for decl in &program.declarations {
            if let Declaration::Function(function) = decl {
                report.functions.push(function.name.clone());
                self.env.define_function(function.clone(), program.source_id);
            }
        }

        let mut blocks = BlockTable::from_decls(&program.blocks, program.source_id);
        let previous = self.env.replace_blocks(BlockTable::default());
        for name in previous.names() {
            if !blocks.contains(name) {
                report.removed.push(name.to_string());
            }
        }
        for decl in &program.blocks {
            let Some(block) = blocks.get_mut(&decl.name) else {
                continue;
            };
            match previous.get(&decl.name) {
                Some(old) => {
                    block.carry_over(old);
                    report.updated.push(decl.name.clone());
                }
                None => report.added.push(decl.name.clone()),
            }
        }
        self.env.replace_blocks(blocks);

        debug!(
            added = ?report.added,
            updated = ?report.updated,
            removed = ?report.removed,
            "reloaded definitions"
        );
        Ok(report)
    }
}
