//! Single-pass compiler: a precedence-climbing expression parser and a
//! recursive-descent statement parser that emit bytecode directly as
//! they go. There is no intermediate AST — by the time `expression()`
//! returns, the bytes it produced are already in the current chunk.
//!
//! Prefix/infix dispatch is a match on `TokenKind` rather than a table
//! of function pointers; it gets the same O(1)-by-token-kind dispatch
//! without fighting the borrow checker over a table of methods closing
//! over `&mut self` across two independent lifetime parameters.

use std::rc::Rc;

use crate::chunk::{Chunk, OpCode};
use crate::reporter::{Phase, Report, Reporter};
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};
use crate::value::{LoxFunction, StringInterner, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment,
    Ternary,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Ternary,
            Precedence::Ternary => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

/// The precedence an infix operator binds at; `None` for tokens with no
/// infix meaning at all (used both to stop `parse_precedence`'s climb
/// and to know whether a token kind has an infix parselet).
fn infix_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::LeftParen => Precedence::Call,
        TokenKind::Minus | TokenKind::Plus => Precedence::Term,
        TokenKind::Slash | TokenKind::Star => Precedence::Factor,
        TokenKind::QuestionMark => Precedence::Ternary,
        TokenKind::BangEqual | TokenKind::EqualEqual => Precedence::Equality,
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            Precedence::Comparison
        }
        TokenKind::And => Precedence::And,
        TokenKind::Or => Precedence::Or,
        _ => Precedence::None,
    }
}

struct Local<'src> {
    name: Token<'src>,
    /// -1 means "declared but not yet initialized" (its own initializer
    /// is still being compiled and may not refer to itself).
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: usize,
    is_local: bool,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum FunctionKind {
    Script,
    Function,
}

struct FunctionState<'src> {
    name: Option<String>,
    kind: FunctionKind,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    loop_start: i32,
    loop_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<String>) -> Self {
        // Slot 0 of every frame is reserved for the closure being called.
        let locals = vec![Local {
            name: Token::synthetic(""),
            depth: 0,
            is_captured: false,
        }];
        FunctionState {
            name,
            kind,
            arity: 0,
            chunk: Chunk::new(),
            locals,
            upvalues: Vec::new(),
            scope_depth: 0,
            loop_start: -1,
            loop_depth: -1,
        }
    }
}

pub struct Compiler<'c> {
    scanner: Scanner<'c>,
    interner: &'c mut StringInterner,
    reporter: &'c mut dyn Reporter,
    previous: Token<'c>,
    current: Token<'c>,
    had_error: bool,
    panic_mode: bool,
    functions: Vec<FunctionState<'c>>,
}

/// Compiles `source` into the top-level script function, or `None` if any
/// compile error was reported.
pub fn compile(
    source: &str,
    interner: &mut StringInterner,
    reporter: &mut dyn Reporter,
) -> Option<Rc<LoxFunction>> {
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        interner,
        reporter,
        previous: Token::synthetic(""),
        current: Token::synthetic(""),
        had_error: false,
        panic_mode: false,
        functions: vec![FunctionState::new(FunctionKind::Script, None)],
    };

    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.consume(TokenKind::Eof, "Expected end of expression.");

    let (function, _upvalues) = compiler.end_function();
    if compiler.had_error {
        None
    } else {
        Some(Rc::new(function))
    }
}

impl<'c> Compiler<'c> {
    fn current_fn(&self) -> &FunctionState<'c> {
        self.functions.last().unwrap()
    }

    fn current_fn_mut(&mut self) -> &mut FunctionState<'c> {
        self.functions.last_mut().unwrap()
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.current_fn_mut().chunk
    }

    // --- token stream -----------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
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
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.reporter
            .report(Report::at_token(Phase::Compile, &self.current, message));
    }

    fn error(&mut self, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.reporter
            .report(Report::at_token(Phase::Compile, &self.previous, message));
    }

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
                _ => {}
            }
            self.advance();
        }
    }

    // --- bytecode emission -------------------------------------------

    fn line(&self) -> u32 {
        self.previous.line
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.current_chunk().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.current_chunk().write_op(op, line);
    }

    fn emit_u16(&mut self, value: u16) {
        let line = self.line();
        self.current_chunk().write_u16(value, line);
    }

    fn emit_short_or_long(&mut self, index: usize, short: OpCode, long: OpCode) {
        if index <= u8::MAX as usize {
            self.emit_op(short);
            self.emit_byte(index as u8);
        } else {
            self.emit_op(long);
            self.emit_u16(index as u16);
        }
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> usize {
        match self.current_chunk().add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_short_or_long(index, OpCode::Constant, OpCode::ConstantLong);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_u16(0xffff);
        self.current_chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.current_chunk().patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_u16(offset as u16);
    }

    // --- scopes, locals, upvalues -------------------------------------

    fn begin_scope(&mut self) {
        self.current_fn_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_fn_mut().scope_depth -= 1;
        let scope_depth = self.current_fn().scope_depth;
        let mut pending_pops: u32 = 0;

        while let Some(local) = self.current_fn().locals.last() {
            if local.depth <= scope_depth {
                break;
            }
            let is_captured = local.is_captured;
            self.current_fn_mut().locals.pop();

            if is_captured {
                self.flush_pops(&mut pending_pops);
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                pending_pops += 1;
            }
        }

        self.flush_pops(&mut pending_pops);
    }

    fn flush_pops(&mut self, pending: &mut u32) {
        while *pending > 0 {
            let batch = (*pending).min(u8::MAX as u32);
            if batch == 1 {
                self.emit_op(OpCode::Pop);
            } else {
                self.emit_op(OpCode::PopN);
                self.emit_byte(batch as u8);
            }
            *pending -= batch;
        }
    }

    fn identifiers_equal(a: &Token, b: &Token) -> bool {
        a.lexeme == b.lexeme
    }

    /// Finds `name` among `fn_index`'s locals, innermost first. A local
    /// whose own initializer is still being compiled has `depth == -1`;
    /// reading it there is an error, but (matching the source) resolution
    /// still returns its slot rather than falling through to a global.
    fn resolve_local(&mut self, fn_index: usize, name: &Token) -> Option<usize> {
        let locals = &self.functions[fn_index].locals;
        let found = locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| Self::identifiers_equal(&local.name, name))
            .map(|(i, local)| (i, local.depth));

        match found {
            Some((i, -1)) => {
                self.error("Can't read local variable in its own initializer.");
                Some(i)
            }
            Some((i, _)) => Some(i),
            None => None,
        }
    }

    fn add_upvalue(&mut self, fn_index: usize, index: usize, is_local: bool) -> usize {
        let existing = self.functions[fn_index]
            .upvalues
            .iter()
            .position(|u| u.index == index && u.is_local == is_local);
        if let Some(existing) = existing {
            return existing;
        }
        if self.functions[fn_index].upvalues.len() >= u16::MAX as usize + 1 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        let upvalues = &mut self.functions[fn_index].upvalues;
        upvalues.push(UpvalueDesc { index, is_local });
        upvalues.len() - 1
    }

    fn resolve_upvalue(&mut self, fn_index: usize, name: &Token) -> Option<usize> {
        if fn_index == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(fn_index - 1, name) {
            self.functions[fn_index - 1].locals[local].is_captured = true;
            return Some(self.add_upvalue(fn_index, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(fn_index - 1, name) {
            return Some(self.add_upvalue(fn_index, upvalue, false));
        }
        None
    }

    fn add_local(&mut self, name: Token<'c>) {
        if self.current_fn().locals.len() >= u16::MAX as usize + 1 {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_fn_mut().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.current_fn().scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let scope_depth = self.current_fn().scope_depth;
        for local in self.current_fn().locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if Self::identifiers_equal(&local.name, &name) {
                self.error("Already a variable with this name in this scope.");
                return;
            }
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        if self.current_fn().scope_depth == 0 {
            return;
        }
        let depth = self.current_fn().scope_depth;
        if let Some(local) = self.current_fn_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn identifier_constant(&mut self, name: &str) -> usize {
        let interned = self.interner.intern(name);
        let value = Value::String(interned);
        if let Some(index) = self
            .current_chunk()
            .constants()
            .iter()
            .position(|existing| *existing == value)
        {
            return index;
        }
        self.make_constant(value)
    }

    fn parse_variable(&mut self, message: &str) -> usize {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.current_fn().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.to_string();
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global: usize) {
        if self.current_fn().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_short_or_long(global, OpCode::DefineGlobal, OpCode::DefineGlobalLong);
    }

    // --- expressions ---------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            self.error("Expected expression.");
            return;
        }

        while precedence <= infix_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    /// Dispatches a prefix parselet for `kind` (the just-consumed token,
    /// `self.previous`). Returns `false` if `kind` has no prefix meaning.
    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Identifier => self.variable(can_assign),
            TokenKind::String => self.string(),
            TokenKind::Number => self.number(),
            TokenKind::False | TokenKind::True | TokenKind::Nil => self.literal(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::LeftParen => self.call(),
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => self.binary(kind),
            TokenKind::QuestionMark => self.ternary(),
            TokenKind::And => self.and_(),
            TokenKind::Or => self.or_(),
            _ => unreachable!("infix_precedence only admits tokens handled above"),
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn number(&mut self) {
        let lexeme = self.previous.lexeme.replace('_', "");
        let value: f64 = lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let lexeme = self.previous.lexeme;
        let chars = &lexeme[1..lexeme.len() - 1];
        let interned = self.interner.intern(chars);
        self.emit_constant(Value::String(interned));
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after expression.");
    }

    fn unary(&mut self) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, op_kind: TokenKind) {
        let precedence = infix_precedence(op_kind);
        self.parse_precedence(precedence.next());
        match op_kind {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::BangEqual => self.emit_op(OpCode::NotEqual),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_op(OpCode::GreaterEqual),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_op(OpCode::LessEqual),
            _ => unreachable!(),
        }
    }

    fn ternary(&mut self) {
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Ternary);

        let else_jump = self.emit_jump(OpCode::Jump);
        self.emit_op(OpCode::Pop);
        self.patch_jump(then_jump);

        self.consume(TokenKind::Colon, "Expected ':' after '?' branch.");
        self.parse_precedence(Precedence::Ternary);
        self.patch_jump(else_jump);
    }

    fn and_(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfTrue);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!(),
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after arguments.");
        count as u8
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(argc);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn named_variable(&mut self, name: Token<'c>, can_assign: bool) {
        let fn_index = self.functions.len() - 1;

        let (get_short, get_long, set_short, set_long, index) =
            if let Some(local) = self.resolve_local(fn_index, &name) {
                (
                    OpCode::GetLocal,
                    OpCode::GetLocalLong,
                    OpCode::SetLocal,
                    OpCode::SetLocalLong,
                    local,
                )
            } else if let Some(upvalue) = self.resolve_upvalue(fn_index, &name) {
                (
                    OpCode::GetUpvalue,
                    OpCode::GetUpvalueLong,
                    OpCode::SetUpvalue,
                    OpCode::SetUpvalueLong,
                    upvalue,
                )
            } else {
                let global = self.identifier_constant(name.lexeme);
                (
                    OpCode::GetGlobal,
                    OpCode::GetGlobalLong,
                    OpCode::SetGlobal,
                    OpCode::SetGlobalLong,
                    global,
                )
            };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_short_or_long(index, set_short, set_long);
        } else {
            self.emit_short_or_long(index, get_short, get_long);
        }
    }

    // --- statements ------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expected variable name.");

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expected ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expected function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compiles a function's parameter list and body in its own
    /// `FunctionState`, then emits `CLOSURE`/`CLOSURE_LONG` plus one
    /// `(is_local, index)` byte pair per upvalue into the *enclosing*
    /// chunk, exactly as the upvalue list says to capture them.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.previous.lexeme.to_string();
        self.functions.push(FunctionState::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expected '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = self.current_fn().arity;
                if arity == u8::MAX {
                    self.error("Can't have more than 255 parameters.");
                }
                self.current_fn_mut().arity = arity.saturating_add(1);
                let constant = self.parse_variable("Expected parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expected '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();

        let constant = self.make_constant(Value::Function(Rc::new(function)));
        self.emit_short_or_long(constant, OpCode::Closure, OpCode::ClosureLong);
        for upvalue in upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_u16(upvalue.index as u16);
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after block.");
    }

    fn end_function(&mut self) -> (LoxFunction, Vec<UpvalueDesc>) {
        self.emit_return();
        let state = self.functions.pop().unwrap();
        let function = LoxFunction {
            arity: state.arity,
            upvalue_count: state.upvalues.len(),
            chunk: state.chunk,
            name: state.name.map(|n| self.interner.intern(&n)),
        };
        (function, state.upvalues)
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expected '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let enclosing_start = self.current_fn().loop_start;
        let enclosing_depth = self.current_fn().loop_depth;

        let loop_start = self.current_chunk().len();
        self.current_fn_mut().loop_start = loop_start as i32;
        self.current_fn_mut().loop_depth = self.current_fn().scope_depth;

        self.consume(TokenKind::LeftParen, "Expected '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        self.current_fn_mut().loop_start = enclosing_start;
        self.current_fn_mut().loop_depth = enclosing_depth;
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expected '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let enclosing_start = self.current_fn().loop_start;
        let enclosing_depth = self.current_fn().loop_depth;

        let mut loop_start = self.current_chunk().len();
        self.current_fn_mut().loop_depth = self.current_fn().scope_depth;

        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expected ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.current_fn_mut().loop_start = loop_start as i32;

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.current_fn_mut().loop_start = enclosing_start;
        self.current_fn_mut().loop_depth = enclosing_depth;

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.current_fn().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    /// `continue` emits the same scope-exit bytecode `end_scope` would
    /// (popping/closing locals down to the loop's own depth) and then
    /// jumps back to the loop header — but unlike a real scope exit, the
    /// locals stay declared afterward, since lexically we're still
    /// inside the same block. Bytecode pops the stack; compile-time
    /// bookkeeping about what's in scope is restored from a snapshot.
    fn continue_statement(&mut self) {
        if self.current_fn().loop_start < 0 {
            self.error("Can't use 'continue' outside of a loop.");
            self.consume(TokenKind::Semicolon, "Expected ';' after 'continue'.");
            return;
        }

        self.consume(TokenKind::Semicolon, "Expected ';' after 'continue'.");

        let enclosing_depth = self.current_fn().scope_depth;
        let enclosing_locals: Vec<Token<'c>> =
            self.current_fn().locals.iter().map(|l| l.name).collect();
        let enclosing_captured: Vec<bool> =
            self.current_fn().locals.iter().map(|l| l.is_captured).collect();
        let enclosing_local_depths: Vec<i32> =
            self.current_fn().locals.iter().map(|l| l.depth).collect();

        let loop_depth = self.current_fn().loop_depth;
        while self.current_fn().scope_depth > loop_depth {
            self.end_scope();
        }

        let loop_start = self.current_fn().loop_start as usize;
        self.emit_loop(loop_start);

        self.current_fn_mut().scope_depth = enclosing_depth;
        let restored: Vec<Local<'c>> = enclosing_locals
            .into_iter()
            .zip(enclosing_local_depths)
            .zip(enclosing_captured)
            .map(|((name, depth), is_captured)| Local {
                name,
                depth,
                is_captured,
            })
            .collect();
        self.current_fn_mut().locals = restored;
    }
}
