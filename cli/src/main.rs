mod config;
mod logging;
mod test_runner;
mod watch;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::diagnostic::{Diagnostic, Label, Severity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing::{info, warn};

use interpreter::block::BlockTable;
use interpreter::{DiagnosticError, Scheduler, Step};
use whenlang::Program;
use whenlang::ast::BlockKind;

use crate::watch::SourceWatcher;

const SUBCOMMANDS: &[&str] = &["run", "check", "test", "help"];

#[derive(Parser)]
#[command(name = "when", version, about = "Interpreter for the WHEN block language")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log interpreter activity at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a program until it exits
    Run(RunArgs),

    /// Parse a program and report errors without running it
    Check(CheckArgs),

    /// Run .test.when test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Program source file
    file: PathBuf,

    /// Reload block and function definitions when the file changes
    #[arg(short, long)]
    watch: bool,

    /// Stop after this many passes (overrides the config file)
    #[arg(long)]
    max_passes: Option<u64>,

    /// Settings file (default: when.toml next to the program, if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dump parsed AST
    #[arg(long)]
    ast: bool,

    /// List declared blocks in scheduling order
    #[arg(long)]
    list_blocks: bool,

    /// Suppress program output (just check for errors)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Program source file
    file: PathBuf,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.when file or directory containing them
    path: PathBuf,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    // `when prog.when` is shorthand for `when run prog.when`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().skip(1).position(|a| !a.starts_with('-')) {
        let pos = pos + 1;
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "run".to_string());
        }
    }

    let cli = Cli::parse_from(&args);
    logging::init(cli.verbose);

    let reporter = Reporter::new(cli.no_color);
    match cli.command {
        Command::Run(run_args) => do_run(run_args, reporter),
        Command::Check(check_args) => do_check(&check_args.file, reporter),
        Command::Test(test_args) => {
            if test_args.list_categories {
                test_runner::list_categories(&test_args.path);
                return;
            }
            let exit_code =
                test_runner::run_tests(&test_args.path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

/// Source files seen this session and the terminal they are reported to.
struct Reporter {
    files: SimpleFiles<String, String>,
    writer: StandardStream,
    config: term::Config,
}

impl Reporter {
    fn new(no_color: bool) -> Self {
        let color_choice = if no_color {
            ColorChoice::Never
        } else {
            ColorChoice::Auto
        };
        Reporter {
            files: SimpleFiles::new(),
            writer: StandardStream::stderr(color_choice),
            config: term::Config::default(),
        }
    }

    fn emit(&self, diagnostic: &Diagnostic<usize>) {
        let _ = term::emit_to_write_style(
            &mut self.writer.lock(),
            &self.config,
            &self.files,
            diagnostic,
        );
    }

    /// Parse `source`, reporting parse errors. Each call registers a new
    /// file id so diagnostics for older versions keep rendering.
    fn parse(&mut self, path: &Path, source: String) -> Option<Program> {
        let file_id = self.files.add(path.display().to_string(), source.clone());
        match whenlang::parser::Parser::new(source, file_id).parse() {
            Ok(program) => Some(program),
            Err(errors) => {
                for error in &errors {
                    self.emit(&error.to_diagnostic());
                }
                None
            }
        }
    }

    fn runtime(&self, error: &DiagnosticError) {
        let Some(span) = &error.span else {
            let prefix = if error.is_warning {
                "warning"
            } else {
                "runtime error"
            };
            eprintln!("{}: {}", prefix, error);
            return;
        };
        let severity = if error.is_warning {
            Severity::Warning
        } else {
            Severity::Error
        };
        let diagnostic = Diagnostic::new(severity)
            .with_message(error.to_string())
            .with_labels(vec![Label::primary(error.source_id, span.clone())]);
        self.emit(&diagnostic);
    }

    fn runtime_all(&self, diagnostics: &[DiagnosticError]) {
        for diagnostic in diagnostics {
            self.runtime(diagnostic);
        }
    }
}

fn read_source(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn do_check(file: &Path, mut reporter: Reporter) {
    let Some(program) = reporter.parse(file, read_source(file)) else {
        process::exit(1);
    };
    reporter.runtime_all(&interpreter::program::static_warnings(&program));
    eprintln!(
        "ok: {} parsed successfully ({} blocks)",
        file.display(),
        program.blocks.len()
    );
}

fn do_run(args: RunArgs, mut reporter: Reporter) {
    let source = read_source(&args.file);
    let Some(program) = reporter.parse(&args.file, source.clone()) else {
        process::exit(1);
    };

    if args.ast {
        println!("{:#?}", program);
        return;
    }

    if args.list_blocks {
        let table = BlockTable::from_decls(&program.blocks, program.source_id);
        if table.is_empty() {
            eprintln!("no blocks declared in {}", args.file.display());
        }
        for block in table.iter() {
            let prefix = if block.is_parallel() { "parallel " } else { "" };
            let kind = block.kind();
            match kind {
                BlockKind::Counted(count) => {
                    println!("{}{} {}({})", prefix, kind.keyword(), block.name(), count)
                }
                _ => println!("{}{} {}", prefix, kind.keyword(), block.name()),
            }
        }
        return;
    }

    let mut settings = match config::resolve_config(args.config.as_deref(), &args.file) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    if args.max_passes.is_some() {
        settings.max_passes = args.max_passes;
    }

    let mut watcher = if args.watch {
        match SourceWatcher::new(&args.file, source, settings.watch_interval()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                eprintln!("error: cannot watch '{}': {}", args.file.display(), e);
                process::exit(1);
            }
        }
    } else {
        None
    };

    let mut scheduler = Scheduler::new(&program, settings.scheduler_config());
    let mut output: Box<dyn Write> = if args.quiet {
        Box::new(io::sink())
    } else {
        Box::new(io::stdout().lock())
    };
    let mut input = io::stdin().lock();

    let result = loop {
        match scheduler.step(&mut *output, &mut input) {
            Ok(Step::Continue) => {}
            Ok(Step::Finished(outcome)) => break Ok(outcome),
            Err(error) => break Err(error),
        }
        if let Some(watcher) = watcher.as_mut() {
            reload_if_changed(watcher, &args.file, &mut scheduler, &mut reporter);
        }
    };
    let _ = output.flush();

    reporter.runtime_all(&scheduler.take_diagnostics());
    match result {
        Ok(outcome) => info!(?outcome, passes = scheduler.passes(), "program finished"),
        Err(error) => {
            reporter.runtime(&error);
            process::exit(1);
        }
    }
}

/// Swap in the new definitions if the source changed. A broken edit is
/// reported and the program keeps running the last good version.
fn reload_if_changed(
    watcher: &mut SourceWatcher,
    path: &Path,
    scheduler: &mut Scheduler,
    reporter: &mut Reporter,
) {
    let source = match watcher.poll() {
        Ok(Some(source)) => source,
        Ok(None) => return,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot poll source");
            return;
        }
    };
    let Some(program) = reporter.parse(path, source) else {
        eprintln!("reload skipped: {} has errors", path.display());
        return;
    };
    match scheduler.reload(&program) {
        Ok(report) => {
            reporter.runtime_all(&interpreter::program::static_warnings(&program));
            eprintln!(
                "reloaded {}: {} added, {} updated, {} removed",
                path.display(),
                report.added.len(),
                report.updated.len(),
                report.removed.len()
            );
        }
        Err(error) => reporter.runtime(&error),
    }
}
