//! Single-pass Pratt-parsing bytecode compiler
//!
//! Grounded on `original_source/clox/src/compiler.c` for the parsing
//! mechanics (precedence climbing, panic-mode recovery, scope/upvalue
//! resolution, class compiler) and on `atlas-runtime/src/compiler/mod.rs`
//! for how to shape that as an owned Rust aggregate instead of the
//! original's file-scope globals (spec.md §9's redesign flag: "explicit
//! VM and Compiler aggregates passed by reference").

mod rules;

use crate::chunk::{Chunk, Opcode};
use crate::error::CompileError;
use crate::heap::{FunctionObj, GcRef, GcRoots, Heap, ObjString};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use crate::value::Value;
use rules::{has_prefix_rule, infix_precedence, Precedence};

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct UpvalueSlot {
    index: u8,
    is_local: bool,
}

/// Per-function compile state. Nested function literals push a new one
/// onto `Compiler::functions`; the chain of still-open entries *is* the
/// "enclosing function" list spec.md §4.1's upvalue resolver walks.
struct FunctionState<'src> {
    kind: FunctionKind,
    name: Option<GcRef<ObjString>>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueSlot>,
    scope_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<GcRef<ObjString>>) -> Self {
        // Slot 0 is reserved for the receiver (methods/initializers) or
        // is simply unused-but-present for plain functions and the
        // top-level script (spec.md §4.1: "this bound to slot 0").
        let implicit_name = if kind == FunctionKind::Function { "" } else { "this" };
        Self {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: implicit_name,
                depth: 0,
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

/// Compiles one source string into a top-level `FunctionObj` (spec.md
/// §4.1). A fresh `Compiler` exists for the lifetime of a single
/// compile call; nothing here is reused between runs.
pub struct Compiler<'src, 'heap> {
    heap: &'heap Heap,
    lexer: Lexer<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    functions: Vec<FunctionState<'src>>,
    classes: Vec<ClassState>,
    init_string: GcRef<ObjString>,
}

impl<'src, 'heap> Compiler<'src, 'heap> {
    pub fn compile(source: &'src str, heap: &'heap Heap) -> Result<GcRef<FunctionObj>, Vec<CompileError>> {
        let init_string = heap.intern_string("init");
        let mut compiler = Self {
            heap,
            lexer: Lexer::new(source),
            previous: Token::new(TokenKind::Eof, "", 0, 0),
            current: Token::new(TokenKind::Eof, "", 0, 0),
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            functions: vec![FunctionState::new(FunctionKind::Script, None)],
            classes: Vec::new(),
            init_string,
        };

        compiler.advance();
        while !compiler.check(TokenKind::Eof) {
            compiler.declaration();
            // A collection here covers the allocations a single
            // top-level statement can make (string literals, nested
            // function objects) without threading a check into every
            // call site inside the parser (spec.md §4.5 allows the GC
            // to run "during compilation", not at a fixed cadence).
            if compiler.heap.should_collect() {
                compiler.heap.collect_garbage(&compiler);
            }
        }
        compiler.consume(TokenKind::Eof, "Expect end of expression.");

        let state = compiler.functions.pop().expect("script function state");
        let function = FunctionObj {
            name: state.name,
            arity: state.arity,
            upvalue_count: state.upvalues.len(),
            chunk: state.chunk,
        };

        if compiler.had_error {
            return Err(compiler.errors);
        }
        Ok(compiler.heap.alloc_function(function))
    }

    // ---- token stream -------------------------------------------------

    fn advance(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let text = if token.kind == TokenKind::Eof {
            format!("{message} at end")
        } else if token.kind == TokenKind::Error {
            message.to_string()
        } else {
            format!("{message} at '{}'", token.lexeme)
        };
        self.errors.push(CompileError::new(text, token.line));
    }

    /// Panic-mode recovery: discard tokens until a likely statement
    /// boundary so one compile run can surface more than one error
    /// (spec.md §4.1, §7).
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- emission helpers ----------------------------------------------

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.functions.last_mut().expect("open function").chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_opcode(&mut self, op: Opcode) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, a: Opcode, b: u8) {
        self.emit_opcode(a);
        self.emit_byte(b);
    }

    fn emit_return(&mut self) {
        let kind = self.functions.last().expect("open function").kind;
        if kind == FunctionKind::Initializer {
            self.emit_bytes(Opcode::GetLocal, 0);
        } else {
            self.emit_opcode(Opcode::Nil);
        }
        self.emit_opcode(Opcode::Return);
    }

    /// Encode a constant-pool push, using the long form only when the
    /// index doesn't fit a byte (spec.md's Open Question: both forms
    /// are only implemented for the literal value-push opcode; every
    /// other constant-referencing opcode — globals, properties, method
    /// names — stays in the short 256-entry form, matching the
    /// reference implementation's own limit there).
    fn emit_constant(&mut self, value: Value) {
        let index = self.current_chunk().add_constant(value);
        if index <= u8::MAX as usize {
            self.emit_bytes(Opcode::Constant, index as u8);
        } else if index <= 0xFF_FFFF {
            self.emit_opcode(Opcode::ConstantLong);
            let line = self.previous.line;
            self.current_chunk().write_u24(index as u32, line);
        } else {
            self.error("Too many constants in one chunk.");
        }
    }

    /// Add `value` to the constant pool and emit a short-form index
    /// byte for an opcode that isn't `CONSTANT`/`CONSTANT_LONG`.
    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.current_chunk().add_constant(value);
        if index > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.heap.intern_string(name);
        self.make_constant(Value::String(interned))
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_opcode(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().current_offset() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        if let Err(message) = self.current_chunk().patch_jump(offset) {
            self.error(&message);
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_opcode(Opcode::Loop);
        let offset = self.current_chunk().current_offset() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let line = self.previous.line;
        self.current_chunk().write_u16(offset as u16, line);
    }

    // ---- scopes ---------------------------------------------------------

    fn begin_scope(&mut self) {
        self.functions.last_mut().expect("open function").scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let popped_captures: Vec<bool> = {
            let state = self.functions.last_mut().expect("open function");
            state.scope_depth -= 1;
            let depth = state.scope_depth;
            let mut captures = Vec::new();
            while let Some(local) = state.locals.last() {
                if local.depth <= depth {
                    break;
                }
                captures.push(local.is_captured);
                state.locals.pop();
            }
            captures
        };
        for captured in popped_captures {
            if captured {
                self.emit_opcode(Opcode::CloseUpvalue);
            } else {
                self.emit_opcode(Opcode::Pop);
            }
        }
    }

    fn declare_variable(&mut self, name: Token<'src>) {
        let duplicate = {
            let state = self.functions.last().expect("open function");
            if state.scope_depth == 0 {
                return;
            }
            let mut duplicate = false;
            for local in state.locals.iter().rev() {
                if local.depth != -1 && local.depth < state.scope_depth {
                    break;
                }
                if local.name == name.lexeme {
                    duplicate = true;
                    break;
                }
            }
            duplicate
        };
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: Token<'src>) {
        let state = self.functions.last_mut().expect("open function");
        if state.locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        state.locals.push(Local {
            name: name.lexeme,
            depth: -1,
            is_captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        let state = self.functions.last_mut().expect("open function");
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        state.locals.last_mut().expect("just-declared local").depth = depth;
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous;
        self.declare_variable(name);
        if self.functions.last().unwrap().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(name.lexeme)
    }

    fn define_variable(&mut self, global: u8) {
        if self.functions.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(Opcode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, depth_index: usize, name: &str) -> Option<u8> {
        let found = {
            let state = &self.functions[depth_index];
            state
                .locals
                .iter()
                .enumerate()
                .rev()
                .find(|(_, local)| local.name == name)
                .map(|(i, local)| (i as u8, local.depth == -1))
        };
        match found {
            Some((slot, uninitialized)) => {
                if uninitialized {
                    self.error("Can't read local variable in its own initializer.");
                }
                Some(slot)
            }
            None => None,
        }
    }

    /// Resolve `name` as an upvalue of the function at `depth_index`,
    /// recursing outward through the enclosing chain (spec.md §4.1).
    fn resolve_upvalue(&mut self, depth_index: usize, name: &str) -> Option<u8> {
        if depth_index == 0 {
            return None;
        }
        let enclosing = depth_index - 1;

        if let Some(local_slot) = self.resolve_local(enclosing, name) {
            self.functions[enclosing].locals[local_slot as usize].is_captured = true;
            return Some(self.add_upvalue(depth_index, local_slot, true));
        }

        if let Some(upvalue_slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(depth_index, upvalue_slot, false));
        }

        None
    }

    fn add_upvalue(&mut self, depth_index: usize, index: u8, is_local: bool) -> u8 {
        {
            let state = &self.functions[depth_index];
            for (i, upvalue) in state.upvalues.iter().enumerate() {
                if upvalue.index == index && upvalue.is_local == is_local {
                    return i as u8;
                }
            }
        }
        if self.functions[depth_index].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let state = &mut self.functions[depth_index];
        state.upvalues.push(UpvalueSlot { index, is_local });
        (state.upvalues.len() - 1) as u8
    }

    // ---- declarations & statements --------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name_token = self.previous;
        let name_constant = self.identifier_constant(name_token.lexeme);
        self.declare_variable(name_token);

        self.emit_bytes(Opcode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable_from_token(self.previous, false);
            if self.previous.lexeme == name_token.lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local(Token::new(TokenKind::Identifier, "super", 0, name_token.line));
            self.mark_initialized();

            self.named_variable(name_token.lexeme, false);
            self.emit_opcode(Opcode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(name_token.lexeme, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_opcode(Opcode::Pop);

        let class_state = self.classes.pop().expect("open class");
        if class_state.has_superclass {
            self.end_scope();
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name);
        let kind = if name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_bytes(Opcode::Method, constant);
    }

    fn fun_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect function name.");
        let name_token = self.previous;
        self.declare_variable(name_token);
        let global = if self.functions.last().unwrap().scope_depth > 0 {
            0
        } else {
            self.identifier_constant(name_token.lexeme)
        };
        if self.functions.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
        }
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = if kind == FunctionKind::Function || kind == FunctionKind::Method || kind == FunctionKind::Initializer {
            Some(self.heap.intern_string(self.previous.lexeme))
        } else {
            None
        };
        self.functions.push(FunctionState::new(kind, name));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let overflowed = {
                    let state = self.functions.last_mut().unwrap();
                    if state.arity == 255 {
                        true
                    } else {
                        state.arity += 1;
                        false
                    }
                };
                if overflowed {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return();
        let state = self.functions.pop().expect("just-opened function");
        let upvalues = state.upvalues.clone();
        let function = FunctionObj {
            name: state.name,
            arity: state.arity,
            upvalue_count: upvalues.len(),
            chunk: state.chunk,
        };
        let function_ref = self.heap.alloc_function(function);

        let index = self.make_constant(Value::Function(function_ref));
        self.emit_bytes(Opcode::Closure, index);
        for upvalue in upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_opcode(Opcode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_opcode(Opcode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_opcode(Opcode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_opcode(Opcode::Pop);
        self.statement();

        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump);
        self.emit_opcode(Opcode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().current_offset();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_opcode(Opcode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_opcode(Opcode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().current_offset();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit_opcode(Opcode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Opcode::Jump);
            let increment_start = self.current_chunk().current_offset();
            self.expression();
            self.emit_opcode(Opcode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_opcode(Opcode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.functions.last().unwrap().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.functions.last().unwrap().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_opcode(Opcode::Return);
        }
    }

    // ---- expressions (Pratt core) ---------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        if !has_prefix_rule(self.previous.kind) {
            self.error("Expect expression.");
            return;
        }
        let can_assign = precedence <= Precedence::Assignment;
        self.prefix(self.previous.kind, can_assign);

        while precedence <= infix_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::True | TokenKind::False | TokenKind::Nil => self.literal(kind),
            TokenKind::Identifier => self.variable(can_assign),
            TokenKind::This => self.this_expression(),
            TokenKind::Super => self.super_expression(),
            _ => self.error("Expect expression."),
        }
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        match kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => self.binary(kind),
            TokenKind::And => self.and_expression(),
            TokenKind::Or => self.or_expression(),
            TokenKind::LeftParen => self.call_expression(),
            TokenKind::Dot => self.dot_expression(can_assign),
            _ => unreachable!("token {kind:?} has no infix handler"),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let op = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Minus => self.emit_opcode(Opcode::Negate),
            TokenKind::Bang => self.emit_opcode(Opcode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, op: TokenKind) {
        let rule_precedence = infix_precedence(op);
        self.parse_precedence(rule_precedence.next());
        match op {
            TokenKind::Plus => self.emit_opcode(Opcode::Add),
            TokenKind::Minus => self.emit_opcode(Opcode::Subtract),
            TokenKind::Star => self.emit_opcode(Opcode::Multiply),
            TokenKind::Slash => self.emit_opcode(Opcode::Divide),
            TokenKind::EqualEqual => self.emit_opcode(Opcode::Equal),
            TokenKind::BangEqual => {
                self.emit_opcode(Opcode::Equal);
                self.emit_opcode(Opcode::Not);
            }
            TokenKind::Greater => self.emit_opcode(Opcode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_opcode(Opcode::Less);
                self.emit_opcode(Opcode::Not);
            }
            TokenKind::Less => self.emit_opcode(Opcode::Less),
            TokenKind::LessEqual => {
                self.emit_opcode(Opcode::Greater);
                self.emit_opcode(Opcode::Not);
            }
            _ => unreachable!(),
        }
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().expect("lexer only emits valid doubles");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let text = &self.previous.lexeme[1..self.previous.lexeme.len() - 1];
        let interned = self.heap.intern_string(text);
        self.emit_constant(Value::String(interned));
    }

    fn literal(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::True => self.emit_opcode(Opcode::True),
            TokenKind::False => self.emit_opcode(Opcode::False),
            TokenKind::Nil => self.emit_opcode(Opcode::Nil),
            _ => unreachable!(),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn variable_from_token(&mut self, token: Token<'src>, can_assign: bool) {
        self.named_variable(token.lexeme, can_assign);
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let depth_index = self.functions.len() - 1;
        let (get_op, set_op, slot) = if let Some(slot) = self.resolve_local(depth_index, name) {
            (Opcode::GetLocal, Opcode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(depth_index, name) {
            (Opcode::GetUpvalue, Opcode::SetUpvalue, slot)
        } else {
            let constant = self.identifier_constant(name);
            (Opcode::GetGlobal, Opcode::SetGlobal, constant)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op, slot);
        } else {
            self.emit_bytes(get_op, slot);
        }
    }

    fn and_expression(&mut self) {
        let end_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_opcode(Opcode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expression(&mut self) {
        let else_jump = self.emit_jump(Opcode::JumpIfFalse);
        let end_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(else_jump);
        self.emit_opcode(Opcode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call_expression(&mut self) {
        let arg_count = self.argument_list();
        self.emit_bytes(Opcode::Call, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count = 0u8;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                } else {
                    count += 1;
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count
    }

    fn dot_expression(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(Opcode::SetProperty, name);
        } else if self.matches(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_bytes(Opcode::Invoke, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_bytes(Opcode::GetProperty, name);
        }
    }

    fn this_expression(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_expression(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let method = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.matches(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable("super", false);
            self.emit_bytes(Opcode::SuperInvoke, method);
            self.emit_byte(arg_count);
        } else {
            self.named_variable("super", false);
            self.emit_bytes(Opcode::GetSuper, method);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn compile(source: &str) -> Result<GcRef<FunctionObj>, Vec<CompileError>> {
        let heap = Box::leak(Box::new(Heap::new(false)));
        Compiler::compile(source, heap)
    }

    #[test]
    fn compiles_a_trivial_expression_statement() {
        let result = compile("1 + 2;");
        assert!(result.is_ok());
    }

    #[test]
    fn reports_a_compile_error_for_an_unterminated_block() {
        let result = compile("fun f() { ");
        assert!(result.is_err());
    }

    #[test]
    fn panic_mode_recovers_to_surface_more_than_one_error() {
        let result = compile("var ; var ;");
        let errors = result.expect_err("both declarations are malformed");
        assert!(errors.len() >= 2);
    }

    #[test]
    fn assignment_to_a_non_lvalue_is_an_error() {
        let result = compile("1 + 2 = 3;");
        assert!(result.is_err());
    }

    #[test]
    fn this_outside_a_class_is_an_error() {
        let result = compile("fun f() { return this; }");
        assert!(result.is_err());
    }

    #[test]
    fn super_without_a_superclass_is_an_error() {
        let result = compile("class A { m() { return super.m(); } }");
        assert!(result.is_err());
    }

    #[test]
    fn return_from_top_level_is_an_error() {
        let result = compile("return 1;");
        assert!(result.is_err());
    }

    #[test]
    fn script_function_has_no_name_and_zero_arity() {
        let function = compile("var x = 1;").expect("valid source");
        assert!(function.name.is_none());
        assert_eq!(function.arity, 0);
    }

    #[test]
    fn a_function_records_its_parameter_count() {
        let function = compile("fun add(a, b) { return a + b; } var unused = add;").expect("valid source");
        // The top-level script's own arity is unaffected by nested functions.
        assert_eq!(function.arity, 0);
    }
}

impl<'src, 'heap> GcRoots for Compiler<'src, 'heap> {
    /// Roots during compilation: every constant already pushed into an
    /// in-progress chunk, across the whole enclosing-function chain
    /// (spec.md §4.5: "a collection can happen during compilation —
    /// constants have been pushed and are otherwise unrooted"), plus
    /// the cached `init` string.
    fn mark_roots(&self, heap: &Heap) {
        heap.mark_value(Value::String(self.init_string));
        for function in &self.functions {
            if let Some(name) = function.name {
                heap.mark_object(name.header());
            }
            for constant in &function.chunk.constants {
                heap.mark_value(*constant);
            }
        }
    }
}
