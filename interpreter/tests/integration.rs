use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use interpreter::{
    BlockState, DiagnosticError, ModuleResolver, RestartPolicy, RunOutcome, RunReport,
    RuntimeError, RuntimeValue, Scheduler, SchedulerConfig, Step,
};
use whenlang::Program;

fn parse(source: &str) -> Program {
    let parser = whenlang::parser::Parser::new(source.to_string(), 0);
    parser.parse().expect("parse failed")
}

fn limited(max_passes: u64) -> SchedulerConfig {
    SchedulerConfig {
        max_passes: Some(max_passes),
        ..Default::default()
    }
}

fn try_run_with(source: &str, config: SchedulerConfig) -> (Result<RunReport, DiagnosticError>, String) {
    let program = parse(source);
    let mut output = Vec::new();
    let result = interpreter::execute_program_with(&program, config, &mut output, &mut std::io::empty());
    (result, String::from_utf8(output).unwrap())
}

fn run_with(source: &str, config: SchedulerConfig) -> (RunReport, String) {
    let (result, output) = try_run_with(source, config);
    (result.expect("execution failed"), output)
}

/// Run with a generous pass limit so a broken program cannot hang the suite.
fn run(source: &str) -> String {
    run_with(source, limited(1000)).1
}

fn run_error(source: &str) -> RuntimeError {
    try_run_with(source, limited(1000))
        .0
        .expect_err("expected a runtime error")
        .error
}

fn state_of(scheduler: &Scheduler, block: &str) -> BlockState {
    scheduler.environment().blocks().get(block).unwrap().state()
}

fn step(scheduler: &mut Scheduler, output: &mut Vec<u8>) -> Step {
    scheduler.step(output, &mut std::io::empty()).expect("step failed")
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[test]
fn counted_timer_drives_exit() {
    let source = "\
counter = 0

de timer(5):
    counter = counter + 1
    print(counter)

main:
    when counter == 0:
        timer.start()
    when counter >= 5:
        exit()
";
    let (report, output) = run_with(source, limited(100));
    assert_eq!(output, "1\n2\n3\n4\n5\n");
    assert_eq!(report.outcome, RunOutcome::Exited);
    assert_eq!(report.passes, 6);
}

#[test]
fn runs_are_deterministic() {
    let source = "\
a = 0
b = 0
fo left:
    a = a + b + 1
    print(\"l\", a)
de right(3):
    b = b + a
    print(\"r\", b)
main:
    right.start()
    left.start()
    when a > 20:
        exit
";
    assert_eq!(run(source), run(source));
}

#[test]
fn counted_block_runs_exactly_its_count() {
    let source = "\
n = 0
passes = 0
de d(3):
    n = n + 1
main:
    when passes == 0:
        d.start()
    when passes == 1:
        d.start()
    when passes == 8:
        print(n)
        exit
    passes = passes + 1
";
    assert_eq!(run(source), "3\n");
}

#[test]
fn forever_block_ticks_once_per_pass() {
    let source = "\
ticks = 0
pass_no = 0
fo f:
    ticks = ticks + 1
main:
    when pass_no == 0:
        f.start()
    when pass_no == 2:
        f.stop()
        f.start()
    when pass_no == 4:
        print(ticks)
        exit
    pass_no = pass_no + 1
";
    assert_eq!(run(source), "4\n");
}

#[test]
fn blocks_tick_in_declaration_order() {
    let source = "\
fo first:
    print(\"first\")
fo second:
    print(\"second\")
main:
    second.start()
    first.start()
";
    let (report, output) = run_with(source, limited(2));
    assert_eq!(output, "first\nsecond\nfirst\nsecond\n");
    assert_eq!(report.outcome, RunOutcome::PassLimit);
    assert_eq!(report.passes, 2);
}

#[test]
fn guards_are_level_triggered() {
    let source = "\
x = 0
main:
    x = x + 1
    when x ge 3 and x le 7:
        print(x)
    when x == 10:
        exit
";
    assert_eq!(run(source), "3\n4\n5\n6\n7\n");
}

#[test]
fn exit_skips_remaining_blocks_in_the_pass() {
    let source = "\
fo a:
    print(\"a\")
    exit
fo b:
    print(\"b\")
main:
    a.start()
    b.start()
";
    let (report, output) = run_with(source, limited(10));
    assert_eq!(output, "a\n");
    assert_eq!(report.outcome, RunOutcome::Exited);
    assert_eq!(report.passes, 1);
}

#[test]
fn break_in_main_ends_the_run() {
    let source = "\
n = 0
main:
    n = n + 1
    print(n)
    when n == 2:
        break
";
    let (report, output) = run_with(source, limited(10));
    assert_eq!(output, "1\n2\n");
    assert_eq!(report.outcome, RunOutcome::Broke);
}

#[test]
fn continue_in_main_skips_block_ticks() {
    let source = "\
n = 0
fo t:
    print(\"tick\")
main:
    t.start()
    n = n + 1
    when n le 2:
        continue
    when n == 4:
        exit
";
    assert_eq!(run(source), "tick\n");
}

#[test]
fn break_in_block_stops_it() {
    let source = "\
i = 0
fo worker:
    i = i + 1
    when i == 3:
        break
    print(i)
main:
    when i == 0:
        worker.start()
    when i == 3:
        print(\"stopped\")
        exit
";
    assert_eq!(run(source), "1\n2\nstopped\n");
}

#[test]
fn continue_in_counted_block_still_counts() {
    let source = "\
n = 0
de d(3):
    n = n + 1
    continue
    print(\"unreachable\")
main:
    when n == 0:
        d.start()
    when n == 3:
        exit
";
    let (report, output) = run_with(source, limited(100));
    assert_eq!(output, "");
    assert_eq!(report.passes, 4);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn one_shot_runs_on_start_and_call() {
    let source = "\
os greet:
    print(\"hi\")
main:
    greet.start()
    greet()
    greet.stop()
    exit
";
    assert_eq!(run(source), "hi\nhi\n");
}

#[test]
fn break_in_one_shot_ends_main() {
    let source = "\
n = 0
os quit:
    break
main:
    n = n + 1
    when n == 3:
        quit()
";
    let (report, _) = run_with(source, limited(10));
    assert_eq!(report.outcome, RunOutcome::Broke);
    assert_eq!(report.passes, 3);
}

#[test]
fn break_in_one_shot_stops_the_ticking_block() {
    let program = parse(
        "\
n = 0
os halt:
    break
fo worker:
    n = n + 1
    when n == 2:
        halt.start()
    print(n)
main:
    worker.start()
",
    );
    let mut scheduler = Scheduler::new(&program, limited(5));
    let mut output = Vec::new();
    let report = scheduler.run(&mut output, &mut std::io::empty()).unwrap();
    assert_eq!(report.outcome, RunOutcome::PassLimit);
    assert_eq!(String::from_utf8(output).unwrap(), "1\n");
    assert_eq!(state_of(&scheduler, "worker"), BlockState::Stopped);
}

#[test]
fn continue_in_one_shot_skips_the_pass() {
    let source = "\
os skip:
    continue
fo w:
    print(\"tick\")
main:
    w.start()
    skip()
";
    let (report, output) = run_with(source, limited(5));
    assert_eq!(report.outcome, RunOutcome::PassLimit);
    assert_eq!(output, "");
}

#[test]
fn one_shot_loop_control_cannot_leave_a_function() {
    let in_function = "\
os quit:
    break
def f():
    quit()
main:
    f()
";
    assert!(matches!(
        run_error(in_function),
        RuntimeError::ControlFlowOutsideBlock("break")
    ));

    let in_initialiser = "\
os skip:
    continue
x = skip()
main:
    exit
";
    assert!(matches!(
        run_error(in_initialiser),
        RuntimeError::ControlFlowOutsideBlock("continue")
    ));
}

#[test]
fn calling_a_block_leaves_its_state_alone() {
    let program = parse("de d(2):\n    print(\"d\")\nmain:\n    d()\n");
    let mut scheduler = Scheduler::new(&program, limited(3));
    let mut output = Vec::new();
    assert_eq!(step(&mut scheduler, &mut output), Step::Continue);
    assert_eq!(String::from_utf8(output).unwrap(), "d\n");
    assert_eq!(state_of(&scheduler, "d"), BlockState::Idle);
    assert_eq!(scheduler.environment().blocks().get("d").unwrap().remaining(), 2);
}

#[test]
fn stop_is_a_no_op_outside_running() {
    let source = "\
fo idle_one:
    pass
de done(1):
    pass
passes = 0
main:
    idle_one.stop()
    when passes == 0:
        done.start()
    when passes == 2:
        done.stop()
    passes = passes + 1
";
    let program = parse(source);
    let mut scheduler = Scheduler::new(&program, limited(3));
    let mut output = Vec::new();
    while step(&mut scheduler, &mut output) == Step::Continue {}
    assert_eq!(state_of(&scheduler, "idle_one"), BlockState::Idle);
    assert_eq!(state_of(&scheduler, "done"), BlockState::Exhausted);
}

#[test]
fn restarting_a_stopped_block_resets_its_count() {
    let source = "\
n = 0
p = 0
de d(4):
    n = n + 1
main:
    when p == 0:
        d.start()
    when p == 2:
        d.stop()
    when p == 5:
        d.start()
    when p == 12:
        print(n)
        exit
    p = p + 1
";
    // Two ticks before the stop, then a full run of four.
    assert_eq!(run(source), "6\n");
}

#[test]
fn exhausted_restart_follows_policy() {
    let source = "\
n = 0
de d(1):
    n = n + 1
main:
    d.start()
";
    let (report, _) = run_with(source, limited(4));
    assert_eq!(report.outcome, RunOutcome::PassLimit);

    let strict = SchedulerConfig {
        restart_policy: RestartPolicy::Error,
        ..limited(4)
    };
    let (result, _) = try_run_with(source, strict);
    let err = result.expect_err("restart of an exhausted block should fail");
    assert!(matches!(
        err.error,
        RuntimeError::InvalidLifecycleOperation { ref target, .. } if target == "d"
    ));
    assert!(err.span.is_some());
}

#[test]
fn zero_count_block_never_ticks() {
    let program = parse("de z(0):\n    print(\"never\")\nmain:\n    z.start()\n");
    let mut scheduler = Scheduler::new(&program, limited(3));
    let mut output = Vec::new();
    let report = scheduler.run(&mut output, &mut std::io::empty()).unwrap();
    assert_eq!(report.outcome, RunOutcome::PassLimit);
    assert!(output.is_empty());
    assert_eq!(state_of(&scheduler, "z"), BlockState::Exhausted);
}

#[test]
fn lifecycle_on_unknown_names() {
    assert!(matches!(
        run_error("main:\n    ghost.start()\n"),
        RuntimeError::UndefinedBlock(name) if name == "ghost"
    ));
    assert!(matches!(
        run_error("x = 1\nmain:\n    x.stop()\n"),
        RuntimeError::InvalidLifecycleOperation { .. }
    ));
}

#[test]
fn block_handles_can_be_stored() {
    let source = "\
handle = none
fo f:
    print(\"f\")
    handle.stop()
main:
    when handle == none:
        handle = f
        handle.start()
";
    let (_, output) = run_with(source, limited(3));
    assert_eq!(output, "f\n");
}

// ---------------------------------------------------------------------------
// Expressions and functions
// ---------------------------------------------------------------------------

#[test]
fn arithmetic_and_printing() {
    assert_eq!(
        run("main:\n    print(1 + 2 * 3, 7 / 2, 10 / 2, -7 % 3)\n    exit\n"),
        "7 3.5 5 2\n"
    );
    assert_eq!(
        run("main:\n    print(\"a\" + \"b\", not 0, true and none, none)\n    exit\n"),
        "ab true false none\n"
    );
}

#[test]
fn logical_operators_short_circuit() {
    let source = "\
def boom():
    print(\"evaluated\")
    return true
main:
    print(false and boom())
    print(true or boom())
    exit
";
    assert_eq!(run(source), "false\ntrue\n");
}

#[test]
fn functions_return_values_and_recurse() {
    let source = "\
def fact(n):
    when n le 1:
        return 1
    return n * fact(n - 1)
main:
    print(fact(5))
    exit
";
    assert_eq!(run(source), "120\n");
}

#[test]
fn function_writes_do_not_leak() {
    let source = "\
x = 1
def f():
    x = 5
    return x
def g():
    pass
main:
    print(f(), x, g())
    exit
";
    assert_eq!(run(source), "5 1 none\n");
}

#[test]
fn function_errors() {
    assert!(matches!(
        run_error("def f(a, b):\n    return a\nmain:\n    f(1)\n"),
        RuntimeError::ArityMismatch { expected: 2, got: 1, .. }
    ));
    assert!(matches!(
        run_error("def f():\n    break\nmain:\n    f()\n"),
        RuntimeError::ControlFlowOutsideBlock("break")
    ));
    assert!(matches!(
        run_error("main:\n    nothing()\n"),
        RuntimeError::UndefinedFunction(name) if name == "nothing"
    ));
}

#[test]
fn runaway_recursion_overflows() {
    let config = SchedulerConfig {
        max_call_depth: 32,
        ..limited(10)
    };
    let (result, _) = try_run_with("def r(n):\n    return r(n + 1)\nmain:\n    r(0)\n", config);
    assert!(matches!(result.unwrap_err().error, RuntimeError::StackOverflow));
}

#[test]
fn runtime_errors_carry_spans() {
    let source = "main:\n    print(missing)\n";
    let (result, _) = try_run_with(source, limited(1));
    let err = result.unwrap_err();
    assert!(matches!(err.error, RuntimeError::UndefinedVariable(ref name) if name == "missing"));
    let span = err.span.expect("span");
    assert_eq!(&source[span], "missing");

    assert!(matches!(
        run_error("main:\n    x = 1 / 0\n"),
        RuntimeError::DivisionByZero
    ));
    assert!(matches!(
        run_error("main:\n    x = 1 + \"a\"\n"),
        RuntimeError::TypeError { .. }
    ));
}

#[test]
fn builtin_conversions_and_input() {
    let program = parse(
        "main:\n    name = input(\"name? \")\n    print(\"hello \" + name, int(\"41\") + 1, str(2) + \"!\")\n    exit\n",
    );
    let mut output = Vec::new();
    let mut input = Cursor::new("Ada\n");
    interpreter::execute_program_with(&program, limited(5), &mut output, &mut input).unwrap();
    assert_eq!(String::from_utf8(output).unwrap(), "name? hello Ada 42 2!\n");
}

#[test]
fn oversized_sleep_is_a_runtime_error() {
    let err = run_error("main:\n    sleep(100000000 * 100000000 * 10000)\n");
    assert!(matches!(err, RuntimeError::Custom(ref msg) if msg.contains("too large")));

    let err = run_error("import time\nmain:\n    time.sleep(-1)\n");
    assert!(matches!(err, RuntimeError::ExternalCall { ref member, .. } if member == "sleep"));
}

#[test]
fn fatal_error_ends_the_scheduler() {
    let program = parse("n = 0\nmain:\n    n = n + 1\n    print(n / 0)\n");
    let mut scheduler = Scheduler::new(&program, limited(10));
    let mut output = Vec::new();
    let first = scheduler.step(&mut output, &mut std::io::empty()).unwrap_err();
    assert!(matches!(first.error, RuntimeError::DivisionByZero));

    let again = scheduler.step(&mut output, &mut std::io::empty()).unwrap_err();
    assert!(matches!(again.error, RuntimeError::DivisionByZero));
    assert_eq!(scheduler.passes(), 1);
    assert_eq!(
        scheduler.environment().global("n"),
        Some(&RuntimeValue::Number(1.0))
    );
    assert!(scheduler.failure().is_some());
    assert!(scheduler.run(&mut output, &mut std::io::empty()).is_err());
    assert!(output.is_empty());
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

#[test]
fn host_math_module() {
    let source = "\
import math
from math import sqrt as root, pi
main:
    print(math.floor(2.7), root(16), pi > 3, math.max(1, 9, 4))
    exit
";
    assert_eq!(run(source), "2 4 true 9\n");
}

#[test]
fn unknown_module_fails() {
    assert!(matches!(
        run_error("import socket\nmain:\n    exit\n"),
        RuntimeError::ModuleNotFound(name) if name == "socket"
    ));
    assert!(matches!(
        run_error("import math\nmain:\n    math.sqrt(-1)\n"),
        RuntimeError::ExternalCall { .. }
    ));
}

/// Replays a fixed sequence of sensor readings.
struct Scripted {
    readings: Vec<f64>,
    calls: Rc<RefCell<Vec<String>>>,
}

impl ModuleResolver for Scripted {
    fn import(&mut self, module: &str) -> Result<(), RuntimeError> {
        self.calls.borrow_mut().push(format!("import {}", module));
        Ok(())
    }

    fn member(&mut self, module: &str, member: &str) -> Result<RuntimeValue, RuntimeError> {
        Ok(RuntimeValue::External {
            module: module.to_string(),
            member: member.to_string(),
        })
    }

    fn invoke(
        &mut self,
        module: &str,
        member: &str,
        _args: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, RuntimeError> {
        self.calls.borrow_mut().push(format!("{}.{}", module, member));
        Ok(RuntimeValue::Number(self.readings.remove(0)))
    }
}

#[test]
fn custom_resolver_feeds_guards() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let resolver = Scripted {
        readings: vec![1.0, 5.0, 12.0],
        calls: Rc::clone(&calls),
    };
    let program = parse("import sensor\nmain:\n    when sensor.read() > 10:\n        print(\"hot\")\n        exit\n");
    let mut scheduler = Scheduler::with_modules(&program, limited(10), Box::new(resolver));
    let mut output = Vec::new();
    let report = scheduler.run(&mut output, &mut std::io::empty()).unwrap();
    assert_eq!(String::from_utf8(output).unwrap(), "hot\n");
    assert_eq!(report.passes, 3);
    assert_eq!(
        *calls.borrow(),
        vec!["import sensor", "sensor.read", "sensor.read", "sensor.read"]
    );
}

// ---------------------------------------------------------------------------
// Reload and warnings
// ---------------------------------------------------------------------------

#[test]
fn reload_preserves_running_blocks_and_globals() {
    let before = parse(
        "\
count = 0
fo a:
    count = count + 1
de b(10):
    pass
os c:
    pass
main:
    a.start()
    b.start()
",
    );
    let after = parse(
        "\
count = 100
de b(2):
    pass
fo a:
    count = count + 10
fo d:
    pass
main:
    exit
",
    );
    let mut scheduler = Scheduler::new(&before, limited(100));
    let mut output = Vec::new();
    for _ in 0..4 {
        step(&mut scheduler, &mut output);
    }
    assert_eq!(
        scheduler.environment().global("count"),
        Some(&RuntimeValue::Number(4.0))
    );

    let report = scheduler.reload(&after).unwrap();
    assert_eq!(report.added, vec!["d"]);
    assert_eq!(report.updated, vec!["b", "a"]);
    assert_eq!(report.removed, vec!["c"]);

    let blocks = scheduler.environment().blocks();
    assert_eq!(blocks.names().collect::<Vec<_>>(), vec!["b", "a", "d"]);
    assert_eq!(blocks.get("b").unwrap().state(), BlockState::Running);
    assert_eq!(blocks.get("b").unwrap().remaining(), 2);
    assert_eq!(blocks.get("d").unwrap().state(), BlockState::Idle);

    // main is not replaced, so the next pass still runs the old one.
    assert_eq!(step(&mut scheduler, &mut output), Step::Continue);
    assert_eq!(
        scheduler.environment().global("count"),
        Some(&RuntimeValue::Number(14.0))
    );
    assert_eq!(state_of(&scheduler, "b"), BlockState::Running);
    assert_eq!(scheduler.environment().blocks().get("b").unwrap().remaining(), 1);
}

#[test]
fn failed_reload_keeps_the_previous_program() {
    let before = parse(
        "\
def f():
    return 1
fo a:
    print(f())
main:
    a.start()
",
    );
    let broken = parse(
        "\
import math
def f():
    return 2
import nosuch
fo b:
    pass
main:
    pass
",
    );
    let mut scheduler = Scheduler::new(&before, limited(100));
    let mut output = Vec::new();
    step(&mut scheduler, &mut output);

    let err = scheduler.reload(&broken).unwrap_err();
    assert!(matches!(err.error, RuntimeError::ModuleNotFound(ref name) if name == "nosuch"));
    assert!(err.span.is_some());

    step(&mut scheduler, &mut output);
    assert_eq!(String::from_utf8(output).unwrap(), "1\n1\n");
    let env = scheduler.environment();
    assert_eq!(env.blocks().names().collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(env.global("math"), None);
}

#[test]
fn parallel_blocks_warn() {
    let (report, _) = run_with("parallel fo w:\n    pass\nmain:\n    exit\n", limited(5));
    assert_eq!(report.diagnostics.len(), 1);
    assert!(report.diagnostics[0].is_warning);
    assert!(report.diagnostics[0].to_string().contains("'w'"));
}
