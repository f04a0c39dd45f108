use std::{env, fs, process};

use lox::reporter::CliReporter;
use lox::vm::InterpretResult;

fn main() {
    let mut args = env::args().skip(1);
    let path = args.next();

    if args.next().is_some() {
        eprintln!("Usage: lox [script]");
        process::exit(exitcode::USAGE);
    }

    match path {
        Some(path) => run_file(&path),
        None => run_repl(),
    }
}

fn run_file(path: &str) {
    let source = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("Could not read '{}': {}", path, err);
        process::exit(exitcode::IOERR);
    });

    let mut vm = lox::new_vm();
    let mut reporter = CliReporter::default();
    match lox::run(&mut vm, &source, &mut reporter) {
        InterpretResult::Ok => {}
        InterpretResult::CompileError => process::exit(exitcode::DATAERR),
        InterpretResult::RuntimeError => process::exit(exitcode::SOFTWARE),
    }
}

fn run_repl() {
    let mut vm = lox::new_vm();
    let mut editor = rustyline::Editor::<()>::new();

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                editor.add_history_entry(line.as_str());
                let mut reporter = CliReporter::default();
                lox::run(&mut vm, &line, &mut reporter);
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error reading line: {}", err);
                break;
            }
        }
    }
}
