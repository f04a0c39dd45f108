//! Compiler and virtual machine for a small dynamically-typed scripting
//! language: a single-pass precedence-climbing parser that emits
//! bytecode directly (no AST), and a stack-based VM that runs it.

pub mod chunk;
pub mod compiler;
pub mod natives;
pub mod reporter;
pub mod scanner;
pub mod table;
pub mod token;
pub mod value;
pub mod vm;

#[cfg(feature = "debug-bytecode")]
pub mod debug;

use reporter::Reporter;
use vm::InterpretResult;

/// Builds a VM with the standard native functions installed.
pub fn new_vm() -> vm::Vm {
    let mut vm = vm::Vm::new();
    natives::install(&mut vm);
    vm
}

/// Compiles and runs `source` against `vm`, reporting any compile or
/// runtime errors through `reporter`. Globals and the string intern
/// table persist in `vm` across calls, which is what lets a REPL build
/// up state line by line.
pub fn run(vm: &mut vm::Vm, source: &str, reporter: &mut dyn Reporter) -> InterpretResult {
    vm.interpret(source, reporter)
}
