//! End-to-end tests: compile and run a whole program through the
//! public `lox` API, the way a script file would be interpreted.

use lox::reporter::CollectingReporter;
use lox::vm::InterpretResult;

/// Runs `source` against a fresh VM, capturing stdout is out of scope
/// here (the VM prints straight to stdout); these tests instead assert
/// on `InterpretResult` and on any reports collected.
fn run(source: &str) -> (InterpretResult, CollectingReporter) {
    let mut vm = lox::new_vm();
    let mut reporter = CollectingReporter::default();
    let result = lox::run(&mut vm, source, &mut reporter);
    (result, reporter)
}

#[test]
fn arithmetic_precedence() {
    let (result, reporter) = run("print 1 + 2 * 3 - 4 / 2;");
    assert_eq!(result, InterpretResult::Ok);
    assert!(reporter.reports.is_empty());
}

#[test]
fn string_concatenation_and_interned_equality() {
    let (result, reporter) = run(
        r#"
        var a = "hel" + "lo";
        var b = "hello";
        print a == b;
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert!(reporter.reports.is_empty());
}

#[test]
fn recursive_fibonacci() {
    let (result, reporter) = run(
        r#"
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        print fib(10);
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert!(reporter.reports.is_empty());
}

#[test]
fn closures_capture_and_share_upvalues() {
    let (result, reporter) = run(
        r#"
        fun makeCounter() {
            var count = 0;
            fun increment() {
                count = count + 1;
                return count;
            }
            return increment;
        }

        var counter = makeCounter();
        print counter();
        print counter();
        print counter();
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert!(reporter.reports.is_empty());
}

#[test]
fn continue_skips_to_loop_increment() {
    let (result, reporter) = run(
        r#"
        var sum = 0;
        for (var i = 0; i < 5; i = i + 1) {
            if (i == 2) continue;
            sum = sum + i;
        }
        print sum;
        "#,
    );
    assert_eq!(result, InterpretResult::Ok);
    assert!(reporter.reports.is_empty());
}

#[test]
fn undefined_global_is_a_runtime_error() {
    let (result, reporter) = run("print doesNotExist;");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(reporter.reports.len(), 1);
    assert!(reporter.reports[0].message.contains("Undefined variable"));
}

#[test]
fn ternary_picks_the_right_branch() {
    let (result, reporter) = run(r#"print true ? "yes" : "no";"#);
    assert_eq!(result, InterpretResult::Ok);
    assert!(reporter.reports.is_empty());
}

#[test]
fn adding_number_and_string_is_a_type_error() {
    let (result, reporter) = run(r#"print 1 + "a";"#);
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(reporter.reports.len(), 1);
    assert!(reporter.reports[0]
        .message
        .contains("Operands must be two numbers or two strings"));
}

#[test]
fn missing_semicolon_is_a_compile_error() {
    let (result, reporter) = run("print 1");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(reporter.reports.len(), 1);
}

#[test]
fn reading_local_in_its_own_initializer_is_a_compile_error() {
    let (result, reporter) = run("{ var a = a; }");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(reporter.reports.len(), 1);
    assert!(reporter.reports[0]
        .message
        .contains("its own initializer"));
}

#[test]
fn unterminated_string_error_has_no_at_clause() {
    let (result, reporter) = run("\"abc");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(reporter.reports.len(), 1);
    let printed = reporter.reports[0].to_string();
    assert!(printed.contains("Unterminated string."));
    assert!(!printed.contains("at end"));
    assert!(!printed.contains("at '"));
}

#[test]
fn repl_style_globals_persist_across_calls() {
    let mut vm = lox::new_vm();
    let mut reporter = CollectingReporter::default();

    let first = lox::run(&mut vm, "var x = 1;", &mut reporter);
    assert_eq!(first, InterpretResult::Ok);

    let second = lox::run(&mut vm, "print x + 1;", &mut reporter);
    assert_eq!(second, InterpretResult::Ok);
    assert!(reporter.reports.is_empty());
}
