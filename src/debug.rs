//! Bytecode disassembler. Only compiled in when the `debug-bytecode`
//! feature is on; not part of normal interpretation.

use crate::chunk::{Chunk, OpCode};

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);

    let line = chunk.get_line(offset);
    if offset > 0 && line == chunk.get_line(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", line);
    }

    let byte = chunk.byte(offset);
    let op = match OpCode::from_byte(byte) {
        Some(op) => op,
        None => {
            println!("Unknown opcode {}", byte);
            return offset + 1;
        }
    };

    match op {
        OpCode::Return => simple("OP_RETURN", offset),
        OpCode::Negate => simple("OP_NEGATE", offset),
        OpCode::Not => simple("OP_NOT", offset),
        OpCode::Equal => simple("OP_EQUAL", offset),
        OpCode::NotEqual => simple("OP_NOT_EQUAL", offset),
        OpCode::Less => simple("OP_LESS", offset),
        OpCode::LessEqual => simple("OP_LESS_EQUAL", offset),
        OpCode::Greater => simple("OP_GREATER", offset),
        OpCode::GreaterEqual => simple("OP_GREATER_EQUAL", offset),
        OpCode::Add => simple("OP_ADD", offset),
        OpCode::Subtract => simple("OP_SUBTRACT", offset),
        OpCode::Multiply => simple("OP_MULTIPLY", offset),
        OpCode::Divide => simple("OP_DIVIDE", offset),
        OpCode::Nil => simple("OP_NIL", offset),
        OpCode::True => simple("OP_TRUE", offset),
        OpCode::False => simple("OP_FALSE", offset),
        OpCode::Print => simple("OP_PRINT", offset),
        OpCode::Pop => simple("OP_POP", offset),
        OpCode::CloseUpvalue => simple("OP_CLOSE_UPVALUE", offset),
        OpCode::PopN => pop_n("OP_POPN", chunk, offset),
        OpCode::Constant => constant("OP_CONSTANT", chunk, offset, false),
        OpCode::ConstantLong => constant("OP_CONSTANT_LONG", chunk, offset, true),
        OpCode::DefineGlobal => constant("OP_DEFINE_GLOBAL", chunk, offset, false),
        OpCode::DefineGlobalLong => constant("OP_DEFINE_GLOBAL_LONG", chunk, offset, true),
        OpCode::GetGlobal => constant("OP_GET_GLOBAL", chunk, offset, false),
        OpCode::GetGlobalLong => constant("OP_GET_GLOBAL_LONG", chunk, offset, true),
        OpCode::SetGlobal => constant("OP_SET_GLOBAL", chunk, offset, false),
        OpCode::SetGlobalLong => constant("OP_SET_GLOBAL_LONG", chunk, offset, true),
        OpCode::GetLocal => byte_operand("OP_GET_LOCAL", chunk, offset, false),
        OpCode::GetLocalLong => byte_operand("OP_GET_LOCAL_LONG", chunk, offset, true),
        OpCode::SetLocal => byte_operand("OP_SET_LOCAL", chunk, offset, false),
        OpCode::SetLocalLong => byte_operand("OP_SET_LOCAL_LONG", chunk, offset, true),
        OpCode::GetUpvalue => byte_operand("OP_GET_UPVALUE", chunk, offset, false),
        OpCode::GetUpvalueLong => byte_operand("OP_GET_UPVALUE_LONG", chunk, offset, true),
        OpCode::SetUpvalue => byte_operand("OP_SET_UPVALUE", chunk, offset, false),
        OpCode::SetUpvalueLong => byte_operand("OP_SET_UPVALUE_LONG", chunk, offset, true),
        OpCode::Jump => jump("OP_JUMP", chunk, 1, offset),
        OpCode::JumpIfFalse => jump("OP_JUMP_IF_FALSE", chunk, 1, offset),
        OpCode::JumpIfTrue => jump("OP_JUMP_IF_TRUE", chunk, 1, offset),
        OpCode::Loop => jump("OP_LOOP", chunk, -1, offset),
        OpCode::Call => byte_operand("OP_CALL", chunk, offset, false),
        OpCode::Closure | OpCode::ClosureLong => closure(chunk, offset, op == OpCode::ClosureLong),
    }
}

fn simple(name: &str, offset: usize) -> usize {
    println!("{}", name);
    offset + 1
}

fn pop_n(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let count = chunk.byte(offset + 1);
    println!("{:<20} {:4}", name, count);
    offset + 2
}

fn byte_operand(name: &str, chunk: &Chunk, offset: usize, long: bool) -> usize {
    if long {
        let slot = read_u16(chunk, offset + 1);
        println!("{:<20} {:4}", name, slot);
        offset + 3
    } else {
        let slot = chunk.byte(offset + 1);
        println!("{:<20} {:4}", name, slot);
        offset + 2
    }
}

fn constant(name: &str, chunk: &Chunk, offset: usize, long: bool) -> usize {
    if long {
        let index = read_u16(chunk, offset + 1) as usize;
        println!("{:<20} {:4} '{}'", name, index, chunk.constant(index));
        offset + 3
    } else {
        let index = chunk.byte(offset + 1) as usize;
        println!("{:<20} {:4} '{}'", name, index, chunk.constant(index));
        offset + 2
    }
}

fn jump(name: &str, chunk: &Chunk, sign: i32, offset: usize) -> usize {
    let distance = read_u16(chunk, offset + 1) as i32;
    let target = offset as i32 + 3 + sign * distance;
    println!("{:<20} {:4} -> {}", name, offset, target);
    offset + 3
}

fn closure(chunk: &Chunk, offset: usize, long: bool) -> usize {
    let (index, mut next) = if long {
        (read_u16(chunk, offset + 1) as usize, offset + 3)
    } else {
        (chunk.byte(offset + 1) as usize, offset + 2)
    };
    let name = if long { "OP_CLOSURE_LONG" } else { "OP_CLOSURE" };
    println!("{:<20} {:4} '{}'", name, index, chunk.constant(index));

    if let crate::value::Value::Function(function) = chunk.constant(index) {
        for _ in 0..function.upvalue_count {
            let is_local = chunk.byte(next) != 0;
            let upvalue_index = read_u16(chunk, next + 1);
            println!(
                "{:04}      |                     {} {}",
                next,
                if is_local { "local" } else { "upvalue" },
                upvalue_index
            );
            next += 3;
        }
    }
    next
}

fn read_u16(chunk: &Chunk, at: usize) -> u16 {
    ((chunk.byte(at) as u16) << 8) | chunk.byte(at + 1) as u16
}
