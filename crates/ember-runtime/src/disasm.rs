//! Bytecode disassembler
//!
//! Grounded on `original_source/clox/src/debug.c` and
//! `atlas-runtime/src/bytecode/disasm.rs`'s textual layout. Used by
//! `Options::trace_execution` (per-instruction trace alongside the
//! value stack) and `Options::disassemble_on_compile` (whole-chunk
//! dump right after compiling).

use crate::chunk::{Chunk, Opcode};

/// Render every instruction in `chunk` as one line of
/// `offset line opcode operand` text, prefixed with `name`.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (line, next) = disassemble_instruction(chunk, offset);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }
    out
}

/// Disassemble the single instruction starting at `offset`, returning
/// its text and the offset of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut buf = format!("{offset:04} ");
    let line = chunk.line_for_offset(offset);
    if offset > 0 && line == chunk.line_for_offset(offset - 1) {
        buf.push_str("   | ");
    } else {
        buf.push_str(&format!("{line:4} "));
    }

    let op = Opcode::from_byte(chunk.code[offset]);
    let next = match op {
        Opcode::Constant => constant_instruction(&mut buf, "OP_CONSTANT", chunk, offset),
        Opcode::ConstantLong => constant_long_instruction(&mut buf, "OP_CONSTANT_LONG", chunk, offset),
        Opcode::Nil => simple_instruction(&mut buf, "OP_NIL", offset),
        Opcode::True => simple_instruction(&mut buf, "OP_TRUE", offset),
        Opcode::False => simple_instruction(&mut buf, "OP_FALSE", offset),
        Opcode::Pop => simple_instruction(&mut buf, "OP_POP", offset),
        Opcode::GetLocal => byte_instruction(&mut buf, "OP_GET_LOCAL", chunk, offset),
        Opcode::SetLocal => byte_instruction(&mut buf, "OP_SET_LOCAL", chunk, offset),
        Opcode::GetGlobal => constant_instruction(&mut buf, "OP_GET_GLOBAL", chunk, offset),
        Opcode::DefineGlobal => constant_instruction(&mut buf, "OP_DEFINE_GLOBAL", chunk, offset),
        Opcode::SetGlobal => constant_instruction(&mut buf, "OP_SET_GLOBAL", chunk, offset),
        Opcode::GetUpvalue => byte_instruction(&mut buf, "OP_GET_UPVALUE", chunk, offset),
        Opcode::SetUpvalue => byte_instruction(&mut buf, "OP_SET_UPVALUE", chunk, offset),
        Opcode::GetProperty => constant_instruction(&mut buf, "OP_GET_PROPERTY", chunk, offset),
        Opcode::SetProperty => constant_instruction(&mut buf, "OP_SET_PROPERTY", chunk, offset),
        Opcode::GetSuper => constant_instruction(&mut buf, "OP_GET_SUPER", chunk, offset),
        Opcode::Equal => simple_instruction(&mut buf, "OP_EQUAL", offset),
        Opcode::Greater => simple_instruction(&mut buf, "OP_GREATER", offset),
        Opcode::Less => simple_instruction(&mut buf, "OP_LESS", offset),
        Opcode::Add => simple_instruction(&mut buf, "OP_ADD", offset),
        Opcode::Subtract => simple_instruction(&mut buf, "OP_SUBTRACT", offset),
        Opcode::Multiply => simple_instruction(&mut buf, "OP_MULTIPLY", offset),
        Opcode::Divide => simple_instruction(&mut buf, "OP_DIVIDE", offset),
        Opcode::Not => simple_instruction(&mut buf, "OP_NOT", offset),
        Opcode::Negate => simple_instruction(&mut buf, "OP_NEGATE", offset),
        Opcode::Print => simple_instruction(&mut buf, "OP_PRINT", offset),
        Opcode::Jump => jump_instruction(&mut buf, "OP_JUMP", 1, chunk, offset),
        Opcode::JumpIfFalse => jump_instruction(&mut buf, "OP_JUMP_IF_FALSE", 1, chunk, offset),
        Opcode::Loop => jump_instruction(&mut buf, "OP_LOOP", -1, chunk, offset),
        Opcode::Call => byte_instruction(&mut buf, "OP_CALL", chunk, offset),
        Opcode::Invoke => invoke_instruction(&mut buf, "OP_INVOKE", chunk, offset),
        Opcode::SuperInvoke => invoke_instruction(&mut buf, "OP_SUPER_INVOKE", chunk, offset),
        Opcode::Closure => closure_instruction(&mut buf, chunk, offset),
        Opcode::CloseUpvalue => simple_instruction(&mut buf, "OP_CLOSE_UPVALUE", offset),
        Opcode::Return => simple_instruction(&mut buf, "OP_RETURN", offset),
        Opcode::Class => constant_instruction(&mut buf, "OP_CLASS", chunk, offset),
        Opcode::Inherit => simple_instruction(&mut buf, "OP_INHERIT", offset),
        Opcode::Method => constant_instruction(&mut buf, "OP_METHOD", chunk, offset),
    };
    (buf, next)
}

fn simple_instruction(buf: &mut String, name: &str, offset: usize) -> usize {
    buf.push_str(name);
    offset + 1
}

fn byte_instruction(buf: &mut String, name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    buf.push_str(&format!("{name:<18} {slot:4}"));
    offset + 2
}

fn constant_instruction(buf: &mut String, name: &str, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    buf.push_str(&format!(
        "{name:<18} {index:4} '{}'",
        chunk.constants[index]
    ));
    offset + 2
}

fn constant_long_instruction(buf: &mut String, name: &str, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.read_u24(offset + 1) as usize;
    buf.push_str(&format!(
        "{name:<18} {index:4} '{}'",
        chunk.constants[index]
    ));
    offset + 4
}

fn jump_instruction(buf: &mut String, name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let jump = chunk.read_u16(offset + 1) as i32;
    let target = offset as i32 + 3 + sign * jump;
    buf.push_str(&format!("{name:<18} {offset:4} -> {target}"));
    offset + 3
}

fn invoke_instruction(buf: &mut String, name: &str, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    let arg_count = chunk.code[offset + 2];
    buf.push_str(&format!(
        "{name:<18} ({arg_count} args) {index:4} '{}'",
        chunk.constants[index]
    ));
    offset + 3
}

/// `OP_CLOSURE` is followed by the function's constant index, then one
/// `(is_local, index)` byte pair per upvalue the function captures
/// (spec.md §4.1) — so, unlike every other opcode, its length depends
/// on the constant it references.
fn closure_instruction(buf: &mut String, chunk: &Chunk, offset: usize) -> usize {
    let index = chunk.code[offset + 1] as usize;
    buf.push_str(&format!(
        "{:<18} {index:4} '{}'",
        "OP_CLOSURE", chunk.constants[index]
    ));
    let mut cursor = offset + 2;
    if let crate::value::Value::Function(function) = chunk.constants[index] {
        for _ in 0..function.upvalue_count {
            let is_local = chunk.code[cursor];
            let slot = chunk.code[cursor + 1];
            buf.push_str(&format!(
                "\n{:04}      |                     {} {}",
                cursor,
                if is_local != 0 { "local" } else { "upvalue" },
                slot
            ));
            cursor += 2;
        }
    }
    cursor
}
