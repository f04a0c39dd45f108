//! The stack-based bytecode interpreter: call frames, a value stack,
//! globals, and the open-upvalue list that lets closures share live
//! locals until the scope that owns them actually ends.

use std::rc::Rc;

use crate::chunk::OpCode;
use crate::reporter::{Phase, Report, Reporter};
use crate::table::Table;
use crate::value::{LoxClosure, LoxFunction, StringInterner, Upvalue, UpvalueState, Value};

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

struct CallFrame {
    closure: Rc<LoxClosure>,
    ip: usize,
    /// Index into `Vm::stack` where this frame's slot 0 (the closure
    /// itself) lives; every local/upvalue slot index is relative to it.
    slots_start: usize,
}

impl CallFrame {
    fn name(&self) -> String {
        match &self.closure.function.name {
            Some(name) => name.chars.clone(),
            None => "script".to_string(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table<Value>,
    strings: StringInterner,
    open_upvalues: Vec<Rc<Upvalue>>,
    /// Set by `runtime_error`, drained and handed to the `Reporter` the
    /// next time the dispatch loop notices an `Err(())`.
    last_report: Option<(u32, String, Vec<(u32, String)>)>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            strings: StringInterner::new(),
            open_upvalues: Vec::new(),
            last_report: None,
        }
    }

    pub fn define_native(&mut self, name: &str, arity: u8, function: crate::value::NativeFn) {
        let name_ref = self.strings.intern(name);
        let native = crate::value::LoxNative {
            name: name_ref.clone(),
            arity,
            function,
        };
        self.globals.set(&name_ref, Value::Native(Rc::new(native)));
    }

    pub fn interpret(&mut self, source: &str, reporter: &mut dyn Reporter) -> InterpretResult {
        let function = match crate::compiler::compile(source, &mut self.strings, reporter) {
            Some(function) => function,
            None => return InterpretResult::CompileError,
        };
        self.run_function(function, reporter)
    }

    fn run_function(&mut self, function: Rc<LoxFunction>, reporter: &mut dyn Reporter) -> InterpretResult {
        let closure = Rc::new(LoxClosure {
            function,
            upvalues: Vec::new(),
        });
        self.stack.push(Value::Closure(closure.clone()));
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots_start: self.stack.len() - 1,
        });

        match self.run(reporter) {
            Ok(()) => InterpretResult::Ok,
            Err(()) => InterpretResult::RuntimeError,
        }
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().unwrap()
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().unwrap()
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.closure.function.chunk.byte(frame.ip);
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    /// Reads a short (`u8`) or long (`u16`) operand depending on `long`.
    fn read_index(&mut self, long: bool) -> usize {
        if long {
            self.read_u16() as usize
        } else {
            self.read_byte() as usize
        }
    }

    fn read_constant(&mut self, long: bool) -> Value {
        let index = self.read_index(long);
        self.frame().closure.function.chunk.constant(index).clone()
    }

    fn push(&mut self, value: Value) -> Result<(), ()> {
        if self.stack.len() >= STACK_MAX {
            self.runtime_error("Stack overflow.");
            return Err(());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn current_line(&self) -> u32 {
        let frame = self.frame();
        frame.closure.function.chunk.get_line(frame.ip.saturating_sub(1))
    }

    fn runtime_error(&mut self, message: impl Into<String>) {
        self.last_report = Some((self.current_line(), message.into(), self.build_trace()));
    }

    fn build_trace(&self) -> Vec<(u32, String)> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let line = frame.closure.function.chunk.get_line(frame.ip.saturating_sub(1));
                (line, frame.name())
            })
            .collect()
    }

    // --- upvalues ------------------------------------------------------

    fn capture_upvalue(&mut self, slot: usize) -> Rc<Upvalue> {
        if let Some(existing) = self.open_upvalues.iter().find(|u| u.slot() == Some(slot)) {
            return existing.clone();
        }
        let upvalue = Upvalue::new_open(slot);
        let insert_at = self
            .open_upvalues
            .iter()
            .position(|u| u.slot().map_or(true, |s| s < slot))
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, upvalue.clone());
        upvalue
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|up| {
            let slot = match up.slot() {
                Some(s) => s,
                None => return false,
            };
            if slot >= from_slot {
                up.close(stack[slot].clone());
                false
            } else {
                true
            }
        });
    }

    fn read_upvalue_value(&self, upvalue: &Upvalue) -> Value {
        match upvalue.slot() {
            Some(slot) => self.stack[slot].clone(),
            None => upvalue.current(),
        }
    }

    fn write_upvalue_value(&mut self, upvalue: &Upvalue, value: Value) {
        match upvalue.slot() {
            Some(slot) => self.stack[slot] = value,
            None => upvalue.close(value),
        }
    }

    // --- calls -----------------------------------------------------

    fn call_value(&mut self, argc: usize) -> Result<(), ()> {
        let callee = self.peek(argc).clone();
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Native(native) => {
                if argc != native.arity as usize {
                    self.runtime_error(format!(
                        "Expected {} arguments but got {}.",
                        native.arity, argc
                    ));
                    return Err(());
                }
                let args_start = self.stack.len() - argc;
                let args: Vec<Value> = self.stack[args_start..].to_vec();
                match (native.function)(&args) {
                    Ok(result) => {
                        self.stack.truncate(args_start - 1);
                        self.push(result)
                    }
                    Err(message) => {
                        self.runtime_error(message);
                        Err(())
                    }
                }
            }
            _ => {
                self.runtime_error("Can only call functions and classes.");
                Err(())
            }
        }
    }

    fn call_closure(&mut self, closure: Rc<LoxClosure>, argc: usize) -> Result<(), ()> {
        if argc != closure.function.arity as usize {
            self.runtime_error(format!(
                "Expected {} arguments but got {}.",
                closure.function.arity, argc
            ));
            return Err(());
        }
        if self.frames.len() >= FRAMES_MAX {
            self.runtime_error("Stack overflow.");
            return Err(());
        }
        let slots_start = self.stack.len() - argc - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots_start,
        });
        Ok(())
    }

    // --- main loop ---------------------------------------------------

    fn run(&mut self, reporter: &mut dyn Reporter) -> Result<(), ()> {
        loop {
            let op = match crate::chunk::OpCode::from_byte(self.read_byte()) {
                Some(op) => op,
                None => {
                    self.runtime_error("Invalid opcode.");
                    self.flush_error(reporter);
                    return Err(());
                }
            };

            macro_rules! bail {
                () => {{
                    self.flush_error(reporter);
                    return Err(());
                }};
            }

            match op {
                OpCode::Constant => {
                    let value = self.read_constant(false);
                    if self.push(value).is_err() {
                        bail!();
                    }
                }
                OpCode::ConstantLong => {
                    let value = self.read_constant(true);
                    if self.push(value).is_err() {
                        bail!();
                    }
                }
                OpCode::Nil => {
                    if self.push(Value::Nil).is_err() {
                        bail!();
                    }
                }
                OpCode::True => {
                    if self.push(Value::Bool(true)).is_err() {
                        bail!();
                    }
                }
                OpCode::False => {
                    if self.push(Value::Bool(false)).is_err() {
                        bail!();
                    }
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::PopN => {
                    let n = self.read_byte() as usize;
                    let new_len = self.stack.len() - n;
                    self.stack.truncate(new_len);
                }
                OpCode::GetLocal | OpCode::GetLocalLong => {
                    let slot = self.read_index(op == OpCode::GetLocalLong);
                    let value = self.stack[self.frame().slots_start + slot].clone();
                    if self.push(value).is_err() {
                        bail!();
                    }
                }
                OpCode::SetLocal | OpCode::SetLocalLong => {
                    let slot = self.read_index(op == OpCode::SetLocalLong);
                    let value = self.peek(0).clone();
                    let index = self.frame().slots_start + slot;
                    self.stack[index] = value;
                }
                OpCode::DefineGlobal | OpCode::DefineGlobalLong => {
                    let name = self.read_constant(op == OpCode::DefineGlobalLong);
                    let name = expect_string(name);
                    let value = self.pop();
                    self.globals.set(&name, value);
                }
                OpCode::GetGlobal | OpCode::GetGlobalLong => {
                    let name = self.read_constant(op == OpCode::GetGlobalLong);
                    let name = expect_string(name);
                    match self.globals.get(&name) {
                        Some(value) => {
                            if self.push(value).is_err() {
                                bail!();
                            }
                        }
                        None => {
                            self.runtime_error(format!("Undefined variable '{}'.", name.chars));
                            bail!();
                        }
                    }
                }
                OpCode::SetGlobal | OpCode::SetGlobalLong => {
                    let name = self.read_constant(op == OpCode::SetGlobalLong);
                    let name = expect_string(name);
                    let value = self.peek(0).clone();
                    if self.globals.set(&name, value) {
                        self.globals.delete(&name);
                        self.runtime_error(format!("Undefined variable '{}'.", name.chars));
                        bail!();
                    }
                }
                OpCode::GetUpvalue | OpCode::GetUpvalueLong => {
                    let index = self.read_index(op == OpCode::GetUpvalueLong);
                    let upvalue = self.frame().closure.upvalues[index].clone();
                    let value = self.read_upvalue_value(&upvalue);
                    if self.push(value).is_err() {
                        bail!();
                    }
                }
                OpCode::SetUpvalue | OpCode::SetUpvalueLong => {
                    let index = self.read_index(op == OpCode::SetUpvalueLong);
                    let upvalue = self.frame().closure.upvalues[index].clone();
                    let value = self.peek(0).clone();
                    self.write_upvalue_value(&upvalue, value);
                }
                OpCode::CloseUpvalue => {
                    let slot = self.stack.len() - 1;
                    self.close_upvalues(slot);
                    self.pop();
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    if self.push(Value::Bool(a == b)).is_err() {
                        bail!();
                    }
                }
                OpCode::NotEqual => {
                    let b = self.pop();
                    let a = self.pop();
                    if self.push(Value::Bool(a != b)).is_err() {
                        bail!();
                    }
                }
                OpCode::Greater | OpCode::GreaterEqual | OpCode::Less | OpCode::LessEqual => {
                    if self.numeric_compare(op).is_err() {
                        bail!();
                    }
                }
                OpCode::Add => {
                    if self.add().is_err() {
                        bail!();
                    }
                }
                OpCode::Subtract | OpCode::Multiply | OpCode::Divide => {
                    if self.arithmetic(op).is_err() {
                        bail!();
                    }
                }
                OpCode::Negate => {
                    if let Value::Number(n) = self.peek(0) {
                        let n = *n;
                        self.pop();
                        if self.push(Value::Number(-n)).is_err() {
                            bail!();
                        }
                    } else {
                        self.runtime_error("Operand must be a number.");
                        bail!();
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    if self.push(Value::Bool(!value.is_truthy())).is_err() {
                        bail!();
                    }
                }
                OpCode::Print => {
                    let value = self.pop();
                    println!("{}", value);
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if !self.peek(0).is_truthy() {
                        self.frame_mut().ip += offset as usize;
                    }
                }
                OpCode::JumpIfTrue => {
                    let offset = self.read_u16();
                    if self.peek(0).is_truthy() {
                        self.frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frame_mut().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    if self.call_value(argc).is_err() {
                        bail!();
                    }
                }
                OpCode::Closure | OpCode::ClosureLong => {
                    let function = self.read_constant(op == OpCode::ClosureLong);
                    let function = match function {
                        Value::Function(f) => f,
                        _ => unreachable!("CLOSURE constant is always a function"),
                    };
                    let mut upvalues = Vec::with_capacity(function.upvalue_count);
                    for _ in 0..function.upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_u16() as usize;
                        let upvalue = if is_local {
                            let slot = self.frame().slots_start + index;
                            self.capture_upvalue(slot)
                        } else {
                            self.frame().closure.upvalues[index].clone()
                        };
                        upvalues.push(upvalue);
                    }
                    let closure = Rc::new(LoxClosure { function, upvalues });
                    if self.push(Value::Closure(closure)).is_err() {
                        bail!();
                    }
                }
                OpCode::Return => {
                    let result = self.pop();
                    let slots_start = self.frame().slots_start;
                    self.close_upvalues(slots_start);
                    self.stack.truncate(slots_start);
                    self.frames.pop();

                    if self.frames.is_empty() {
                        return Ok(());
                    }

                    if self.push(result).is_err() {
                        bail!();
                    }
                }
            }
        }
    }

    fn flush_error(&mut self, reporter: &mut dyn Reporter) {
        if let Some((line, message, frames)) = self.last_report.take() {
            reporter.report(Report::runtime(line, message, frames));
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn numeric_compare(&mut self, op: OpCode) -> Result<(), ()> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0).clone(), self.peek(1).clone())
        else {
            self.runtime_error("Operands must be numbers.");
            return Err(());
        };
        self.pop();
        self.pop();
        let result = match op {
            OpCode::Greater => a > b,
            OpCode::GreaterEqual => a >= b,
            OpCode::Less => a < b,
            OpCode::LessEqual => a <= b,
            _ => unreachable!(),
        };
        self.push(Value::Bool(result))
    }

    fn arithmetic(&mut self, op: OpCode) -> Result<(), ()> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0).clone(), self.peek(1).clone())
        else {
            self.runtime_error("Operands must be numbers.");
            return Err(());
        };
        self.pop();
        self.pop();
        let result = match op {
            OpCode::Subtract => a - b,
            OpCode::Multiply => a * b,
            OpCode::Divide => a / b,
            _ => unreachable!(),
        };
        self.push(Value::Number(result))
    }

    fn add(&mut self) -> Result<(), ()> {
        match (self.peek(0).clone(), self.peek(1).clone()) {
            (Value::Number(b), Value::Number(a)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b))
            }
            (Value::String(b), Value::String(a)) => {
                self.pop();
                self.pop();
                let concatenated = format!("{}{}", a.chars, b.chars);
                let interned = self.strings.intern(&concatenated);
                self.push(Value::String(interned))
            }
            _ => {
                self.runtime_error("Operands must be two numbers or two strings.");
                Err(())
            }
        }
    }
}

fn expect_string(value: Value) -> crate::value::StringRef {
    match value {
        Value::String(s) => s,
        _ => unreachable!("name constants are always strings"),
    }
}
