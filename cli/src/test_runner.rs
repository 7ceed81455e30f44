//! Runner for `.test.when` program fixtures.
//!
//! A fixture is TOML front matter between `---` lines followed by the
//! program source. Subdirectories of the test root act as categories.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use interpreter::{DiagnosticError, RunReport, SchedulerConfig};

/// Extension of program test files.
const TEST_SUFFIX: &str = ".test.when";

/// Pass limit for tests that set none, so a program that never exits fails
/// instead of hanging the suite.
const DEFAULT_TEST_PASSES: u64 = 10_000;

#[derive(Debug, Deserialize)]
pub struct ExpectedWarning {
    /// Substring that must appear in the warning message.
    pub contains: String,

    /// If set, the warning's span must start on this 1-based source line.
    #[serde(default)]
    pub line: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Expected stdout, compared after trimming both sides.
    #[serde(default)]
    pub expect_output: Option<String>,

    /// The runtime error's message must contain this substring.
    #[serde(default)]
    pub expect_error: Option<String>,

    #[serde(default)]
    pub expect_parse_error: bool,

    /// When present (even empty), warnings must match one to one.
    #[serde(default)]
    pub expect_warnings: Option<Vec<ExpectedWarning>>,

    #[serde(default = "default_max_passes")]
    pub max_passes: u64,

    /// Text served to `input()`.
    #[serde(default)]
    pub stdin: String,
}

fn default_max_passes() -> u64 {
    DEFAULT_TEST_PASSES
}

struct TestCase {
    config: TestConfig,
    source: String,
}

/// Split `---\n<toml>\n---\n<source>` into its two halves.
fn split_front_matter(content: &str) -> Result<(&str, &str), String> {
    let content = content.trim_start_matches('\u{feff}');
    let body = content
        .strip_prefix("---")
        .ok_or("missing opening --- front matter delimiter")?;
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);

    let (header, rest) = match body.strip_prefix("---") {
        Some(rest) => ("", rest),
        None => {
            let close = body
                .find("\n---")
                .ok_or("missing closing --- front matter delimiter")?;
            (body[..close].trim_end_matches('\r'), &body[close + "\n---".len()..])
        }
    };
    let source = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);
    Ok((header, source))
}

fn load_case(path: &Path) -> Result<TestCase, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("cannot read file: {}", e))?;
    let (header, source) =
        split_front_matter(&content).map_err(|e| format!("front matter error: {}", e))?;
    let config: TestConfig =
        toml::from_str(header).map_err(|e| format!("front matter error: {}", e))?;
    Ok(TestCase {
        config,
        source: source.to_string(),
    })
}

#[derive(Debug, PartialEq)]
pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

impl TestResult {
    fn label(&self) -> &str {
        self.description.as_deref().unwrap_or_else(|| {
            self.path
                .file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.trim_end_matches(TEST_SUFFIX))
                .unwrap_or("?")
        })
    }
}

pub fn run_single_test(path: &Path) -> TestResult {
    let (description, outcome) = match load_case(path) {
        Ok(case) => {
            let outcome = match run_case(&case) {
                Ok(()) => TestOutcome::Pass,
                Err(reason) => TestOutcome::Fail(reason),
            };
            (case.config.description, outcome)
        }
        Err(reason) => (None, TestOutcome::Fail(reason)),
    };
    TestResult {
        path: path.to_path_buf(),
        description,
        outcome,
    }
}

fn run_case(case: &TestCase) -> Result<(), String> {
    let config = &case.config;
    let parsed = whenlang::parser::Parser::new(case.source.clone(), 0).parse();

    let program = match (parsed, config.expect_parse_error) {
        (Err(_), true) => return Ok(()),
        (Ok(_), true) => return Err("expected parse error, but parsing succeeded".into()),
        (Err(errors), false) => {
            let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
            return Err(format!("unexpected parse error: {}", messages.join("; ")));
        }
        (Ok(program), false) => program,
    };

    let scheduler_config = SchedulerConfig {
        max_passes: Some(config.max_passes),
        ..Default::default()
    };
    let mut output = Vec::new();
    let mut input = Cursor::new(config.stdin.as_bytes());
    let result =
        interpreter::execute_program_with(&program, scheduler_config, &mut output, &mut input);
    let output = String::from_utf8_lossy(&output);

    let report = check_result(config, result, &output)?;
    if let Some(expected) = &config.expect_warnings {
        let diagnostics = report.map(|r| r.diagnostics).unwrap_or_default();
        check_warnings(&case.source, &diagnostics, expected)?;
    }
    Ok(())
}

/// Compare the run against `expect_error` / `expect_output`. Hands back
/// the report of a successful run for the warning check.
fn check_result(
    config: &TestConfig,
    result: Result<RunReport, DiagnosticError>,
    output: &str,
) -> Result<Option<RunReport>, String> {
    match (result, &config.expect_error) {
        (Err(error), Some(expected)) => {
            let message = error.to_string();
            if message.contains(expected.as_str()) {
                Ok(None)
            } else {
                Err(format!(
                    "expected error containing \"{}\", got: {}",
                    expected, message
                ))
            }
        }
        (Ok(_), Some(expected)) => Err(format!(
            "expected error containing \"{}\", but the program finished",
            expected
        )),
        (Err(error), None) => Err(format!("unexpected runtime error: {}", error)),
        (Ok(report), None) => {
            if let Some(expected) = &config.expect_output {
                let (expected, actual) = (expected.trim(), output.trim());
                if expected != actual {
                    return Err(format!(
                        "output mismatch\n  expected: {}\n  actual:   {}",
                        expected, actual
                    ));
                }
            }
            Ok(Some(report))
        }
    }
}

/// Convert a byte offset in `source` to a 1-based line number.
fn line_of(source: &str, offset: usize) -> usize {
    source.as_bytes()[..offset.min(source.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

fn check_warnings(
    source: &str,
    diagnostics: &[DiagnosticError],
    expected: &[ExpectedWarning],
) -> Result<(), String> {
    let warnings: Vec<&DiagnosticError> = diagnostics.iter().filter(|d| d.is_warning).collect();

    if warnings.len() != expected.len() {
        let listed = if warnings.is_empty() {
            "    (none)".to_string()
        } else {
            warnings
                .iter()
                .map(|w| format!("    - {}", w))
                .collect::<Vec<_>>()
                .join("\n")
        };
        return Err(format!(
            "expected {} warning(s), got {}\n  actual warnings:\n{}",
            expected.len(),
            warnings.len(),
            listed
        ));
    }

    for (i, (warning, want)) in warnings.iter().zip(expected).enumerate() {
        let message = warning.to_string();
        if !message.contains(&want.contains) {
            return Err(format!(
                "warning[{}]: expected message containing \"{}\", got: {}",
                i, want.contains, message
            ));
        }
        let Some(line) = want.line else { continue };
        match &warning.span {
            Some(span) if line_of(source, span.start) == line => {}
            Some(span) => {
                return Err(format!(
                    "warning[{}]: expected on line {}, but span is on line {}",
                    i,
                    line,
                    line_of(source, span.start)
                ));
            }
            None => {
                return Err(format!(
                    "warning[{}]: expected on line {}, but warning has no span",
                    i, line
                ));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Fixtures under `root` keyed by category: the directory relative to
/// `root`, or `""` for files directly in it. Sorted by category and path.
fn discover(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for path in entries.flatten().map(|entry| entry.path()) {
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_test = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TEST_SUFFIX));
            if is_test {
                let category = dir
                    .strip_prefix(root)
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                categories.entry(category).or_default().push(path);
            }
        }
    }
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn category_label(category: &str) -> &str {
    if category.is_empty() { "(root)" } else { category }
}

/// Keep the requested categories and their subcategories. An empty
/// request keeps everything.
fn select<'a>(
    all: &'a BTreeMap<String, Vec<PathBuf>>,
    requested: &[String],
) -> BTreeMap<&'a str, &'a [PathBuf]> {
    if requested.is_empty() {
        return all.iter().map(|(k, v)| (k.as_str(), v.as_slice())).collect();
    }
    let mut selected = BTreeMap::new();
    for request in requested {
        let request = request.trim_matches('/');
        let nested = format!("{}/", request);
        let before = selected.len();
        for (category, files) in all {
            if category == request || category.starts_with(&nested) {
                selected.insert(category.as_str(), files.as_slice());
            }
        }
        if selected.len() == before {
            let available: Vec<&str> = all.keys().map(|k| category_label(k)).collect();
            eprintln!(
                "warning: category '{}' not found (available: {})",
                request,
                available.join(", ")
            );
        }
    }
    selected
}

/// List available categories for the given test path.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }
    let categories = discover(path);
    if categories.is_empty() {
        eprintln!("no {} files found in {}", TEST_SUFFIX, path.display());
        return;
    }
    eprintln!("available categories:");
    for (category, files) in &categories {
        eprintln!("  {} ({} tests)", category_label(category), files.len());
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

struct Palette {
    color: bool,
}

impl Palette {
    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn pass(&self) -> String {
        self.paint("32", "PASS")
    }

    fn fail(&self) -> String {
        self.paint("31", "FAIL")
    }
}

#[derive(Default)]
struct Summary {
    passed: usize,
    failures: Vec<TestResult>,
}

impl Summary {
    fn record(&mut self, result: TestResult, palette: &Palette) {
        match result.outcome {
            TestOutcome::Pass => {
                eprintln!("  {}  {}", palette.pass(), result.label());
                self.passed += 1;
            }
            TestOutcome::Fail(_) => {
                eprintln!("  {}  {}", palette.fail(), result.label());
                self.failures.push(result);
            }
        }
    }

    /// Print failure details and the totals line. Returns the exit code.
    fn finish(self, palette: &Palette) -> i32 {
        if !self.failures.is_empty() {
            eprintln!();
            eprintln!("failures:");
            for failure in &self.failures {
                eprintln!();
                eprintln!("  --- {} ---", failure.path.display());
                if let TestOutcome::Fail(reason) = &failure.outcome {
                    for line in reason.lines() {
                        eprintln!("  {}", line);
                    }
                }
            }
        }

        let failed = self.failures.len();
        eprintln!();
        if failed == 0 {
            eprintln!(
                "test result: {}. {} passed, 0 failed",
                palette.paint("32", "ok"),
                self.passed
            );
            0
        } else {
            eprintln!(
                "test result: {}. {} passed, {} failed (of {})",
                palette.paint("31", "FAILED"),
                self.passed,
                failed,
                self.passed + failed
            );
            1
        }
    }
}

/// Run one fixture file, or every fixture under a directory. Returns the
/// process exit code: 0 when everything passed, 1 otherwise.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    let palette = Palette { color: !no_color };
    let mut summary = Summary::default();

    if path.is_file() {
        summary.record(run_single_test(path), &palette);
        return summary.finish(&palette);
    }

    let all = discover(path);
    if all.is_empty() {
        eprintln!("no {} files found in {}", TEST_SUFFIX, path.display());
        return 1;
    }
    let selected = select(&all, categories);
    if selected.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    for (category, files) in selected {
        eprintln!();
        eprintln!("{}", palette.paint("1", category_label(category)));
        for file in files {
            summary.record(run_single_test(file), &palette);
        }
    }
    summary.finish(&palette)
}
