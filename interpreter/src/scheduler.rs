use std::io::{BufRead, Write};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};
use whenlang::Program;
use whenlang::ast::{Declaration, Statement};

use crate::block::{BlockTable, RestartPolicy};
use crate::environment::Environment;
use crate::error::{DiagnosticError, RuntimeError, Unwind};
use crate::executor::{Context, Flow, execute_body};
use crate::modules::{HostModules, ModuleResolver};
use crate::program;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Stop after this many passes. `None` runs until `exit` or `break`.
    pub max_passes: Option<u64>,
    /// Sleep between passes.
    pub pass_delay: Duration,
    pub restart_policy: RestartPolicy,
    pub max_call_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_passes: None,
            pass_delay: Duration::ZERO,
            restart_policy: RestartPolicy::default(),
            max_call_depth: 256,
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// `exit` was executed.
    Exited,
    /// `break` was executed directly in `main`.
    Broke,
    /// `max_passes` was reached.
    PassLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished(RunOutcome),
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Passes that were started, including the one that ended the run.
    pub passes: u64,
    pub diagnostics: Vec<DiagnosticError>,
}

enum PassEnd {
    Completed,
    Broke,
}

/// Drives a program: `main` once per pass, then one tick for every
/// running block in declaration order.
pub struct Scheduler {
    pub(crate) env: Environment,
    main: Rc<[Statement]>,
    declarations: Vec<Declaration>,
    pub(crate) modules: Box<dyn ModuleResolver>,
    config: SchedulerConfig,
    source_id: usize,
    passes: u64,
    booted: bool,
    finished: Option<RunOutcome>,
    /// A fatal error ends the run for good.
    failed: Option<DiagnosticError>,
    diagnostics: Vec<DiagnosticError>,
}

impl Scheduler {
    pub fn new(program: &Program, config: SchedulerConfig) -> Self {
        Self::with_modules(program, config, Box::new(HostModules::default()))
    }

    pub fn with_modules(
        program: &Program,
        config: SchedulerConfig,
        modules: Box<dyn ModuleResolver>,
    ) -> Self {
        let mut env = Environment::new(BlockTable::from_decls(&program.blocks, program.source_id));
        program::register_functions(program, &mut env);
        Scheduler {
            env,
            main: program.main.body.clone().into(),
            declarations: program.declarations.clone(),
            modules,
            config,
            source_id: program.source_id,
            passes: 0,
            booted: false,
            finished: None,
            failed: None,
            diagnostics: program::static_warnings(program),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.finished
    }

    /// The error that ended the run, if one did.
    pub fn failure(&self) -> Option<&DiagnosticError> {
        self.failed.as_ref()
    }

    /// Warnings collected so far, leaving the list empty.
    pub fn take_diagnostics(&mut self) -> Vec<DiagnosticError> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Run one pass. Global declarations are evaluated before the first one.
    pub fn step(
        &mut self,
        output: &mut dyn Write,
        input: &mut dyn BufRead,
    ) -> Result<Step, DiagnosticError> {
        if let Some(outcome) = self.finished {
            return Ok(Step::Finished(outcome));
        }
        if let Some(error) = &self.failed {
            return Err(error.clone());
        }
        if self.config.max_passes.is_some_and(|max| self.passes >= max) {
            debug!(passes = self.passes, "pass limit reached");
            return Ok(self.finish(RunOutcome::PassLimit));
        }

        let main = Rc::clone(&self.main);
        let mut ctx = Context {
            env: &mut self.env,
            modules: &mut *self.modules,
            output,
            input,
            diagnostics: &mut self.diagnostics,
            source_id: self.source_id,
            restart_policy: self.config.restart_policy,
            max_call_depth: self.config.max_call_depth,
            depth: 0,
        };

        if !self.booted {
            self.booted = true;
            if let Err(unwind) = program::load_declarations(&self.declarations, &mut ctx) {
                return self.unwound(unwind);
            }
        }

        let pass = self.passes;
        self.passes += 1;
        match run_pass(&main, pass, &mut ctx) {
            Ok(PassEnd::Completed) => {
                if !self.config.pass_delay.is_zero() {
                    std::thread::sleep(self.config.pass_delay);
                }
                Ok(Step::Continue)
            }
            Ok(PassEnd::Broke) => Ok(self.finish(RunOutcome::Broke)),
            Err(unwind) => self.unwound(unwind),
        }
    }

    /// Run passes until the program exits, breaks, or hits the pass limit.
    pub fn run(
        &mut self,
        output: &mut dyn Write,
        input: &mut dyn BufRead,
    ) -> Result<RunReport, DiagnosticError> {
        loop {
            if let Step::Finished(outcome) = self.step(output, input)? {
                return Ok(RunReport {
                    outcome,
                    passes: self.passes,
                    diagnostics: self.take_diagnostics(),
                });
            }
        }
    }

    fn finish(&mut self, outcome: RunOutcome) -> Step {
        debug!(?outcome, passes = self.passes, "run finished");
        self.finished = Some(outcome);
        Step::Finished(outcome)
    }

    fn unwound(&mut self, unwind: Unwind) -> Result<Step, DiagnosticError> {
        let error = match unwind {
            Unwind::Exit => return Ok(self.finish(RunOutcome::Exited)),
            Unwind::Error(error) => error,
            Unwind::Break => RuntimeError::ControlFlowOutsideBlock("break").into(),
            Unwind::Continue => RuntimeError::ControlFlowOutsideBlock("continue").into(),
        };
        debug!(passes = self.passes, %error, "run failed");
        self.failed = Some(error.clone());
        Err(error)
    }
}

fn run_pass(main: &[Statement], pass: u64, ctx: &mut Context<'_>) -> Result<PassEnd, Unwind> {
    trace!(pass, "pass");
    match execute_body(main, ctx)? {
        Flow::Break => return Ok(PassEnd::Broke),
        Flow::Continue => return Ok(PassEnd::Completed),
        Flow::Normal | Flow::Return(_) => {}
    }
    // Blocks cannot be added or removed mid-pass, so indices stay valid.
    for index in 0..ctx.env.blocks().len() {
        tick_block(index, ctx)?;
    }
    Ok(PassEnd::Completed)
}

fn tick_block(index: usize, ctx: &mut Context<'_>) -> Result<(), Unwind> {
    let Some(block) = ctx.env.blocks_mut().get_index_mut(index) else {
        return Ok(());
    };
    let Some(body) = block.begin_tick() else {
        return Ok(());
    };
    let name = block.name().to_string();
    let source_id = std::mem::replace(&mut ctx.source_id, block.source_id());
    trace!(block = %name, remaining = block.remaining(), "tick");

    let flow = execute_body(&body, ctx);
    ctx.source_id = source_id;
    let flow = flow?;

    let Some(block) = ctx.env.blocks_mut().get_index_mut(index) else {
        return Ok(());
    };
    if flow == Flow::Break {
        if block.stop() {
            debug!(block = %name, "block stopped by break");
        }
    } else if block.finish_tick() {
        debug!(block = %name, "block exhausted");
    }
    Ok(())
}

/// Run a program with the default configuration and no input.
pub fn execute_program(
    program: &Program,
    output: &mut dyn Write,
) -> Result<(RunOutcome, Vec<DiagnosticError>), DiagnosticError> {
    let report = execute_program_with(
        program,
        SchedulerConfig::default(),
        output,
        &mut std::io::empty(),
    )?;
    Ok((report.outcome, report.diagnostics))
}

pub fn execute_program_with(
    program: &Program,
    config: SchedulerConfig,
    output: &mut dyn Write,
    input: &mut dyn BufRead,
) -> Result<RunReport, DiagnosticError> {
    Scheduler::new(program, config).run(output, input)
}
