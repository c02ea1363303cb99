use std::collections::HashMap;
use std::mem;

use crate::bytecode::ir::{FunctionDef, GlobalDef, Program, Ty};
use crate::bytecode::op::Op;
use crate::bytecode::symbols::{Param, Symbol, SymbolTable};
use crate::error::CompileError;
use crate::frontend::cursor::Pos;
use crate::frontend::lexer::{Lexer, TokenBuffer};
use crate::frontend::token::{Token, TokenKind};

/// Compile one source file into a [`Program`].
pub fn compile(source: &str) -> Result<Program, CompileError> {
    Compiler::new(source).program()
}

// =============================================================================
// Operator precedence
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinOp {
    fn from_token(kind: TokenKind) -> Option<BinOp> {
        match kind {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::Eq => Some(BinOp::Eq),
            TokenKind::Neq => Some(BinOp::Neq),
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::Gt => Some(BinOp::Gt),
            TokenKind::Le => Some(BinOp::Le),
            TokenKind::Ge => Some(BinOp::Ge),
            _ => None,
        }
    }

    /// Comparison < additive < multiplicative; all left-associative.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 1,
            BinOp::Add | BinOp::Sub => 2,
            BinOp::Mul | BinOp::Div => 3,
        }
    }
}

/// Displacement for a branch at instruction `from` landing on `target`.
/// The VM resumes at `from + 1 + displacement`.
fn displacement(target: usize, from: usize) -> i32 {
    target as i32 - from as i32 - 1
}

/// Host-provided functions, invoked by name via `callname`.
const LIBRARY: &[(&str, &[Ty], Ty)] = &[
    ("getint", &[], Ty::Int),
    ("getdouble", &[], Ty::Double),
    ("getchar", &[], Ty::Int),
    ("putint", &[Ty::Int], Ty::Void),
    ("putdouble", &[Ty::Double], Ty::Void),
    ("putchar", &[Ty::Int], Ty::Void),
    ("putstr", &[Ty::Int], Ty::Void),
    ("putln", &[], Ty::Void),
];

fn library_signature(name: &str) -> Option<(&'static str, &'static [Ty], Ty)> {
    LIBRARY
        .iter()
        .find(|(lib, _, _)| *lib == name)
        .map(|&(lib, params, ret)| (lib, params, ret))
}

enum Callee {
    Library(&'static str),
    User(u32),
}

struct LoopCtx {
    /// Instruction index of the condition's first instruction.
    top: usize,
    /// Placeholder `br` indices, back-patched past the loop.
    breaks: Vec<usize>,
}

// =============================================================================
// Compiler - fused parser, type checker, and emitter
// =============================================================================

/// Single pass over the token stream. There is no AST: recursive descent,
/// symbol management, type checking, and instruction emission all happen in
/// one walk, with one token of lookahead.
struct Compiler {
    tokens: TokenBuffer,

    symbols: SymbolTable,
    /// Parameters of the function currently being analyzed.
    params: Vec<Param>,
    /// User functions in declaration order; `funcs[i].id == i + 1`.
    funcs: Vec<FunctionDef>,
    func_index: HashMap<String, usize>,
    globals: Vec<GlobalDef>,

    /// Global-initializer instructions, later prefixed to `_start`.
    global_init: Vec<Op>,
    /// Body of the function currently being analyzed.
    code: Vec<Op>,
    in_function: bool,

    /// Block nesting depth; 0 is the global scope.
    level: u32,
    local_slots: u32,
    /// 1 when the current function returns a value (slot 0 is the return
    /// slot), else 0.
    param_base: u32,
    ret_ty: Ty,
    have_return: bool,
    loops: Vec<LoopCtx>,
}

impl Compiler {
    fn new(source: &str) -> Self {
        Compiler {
            tokens: TokenBuffer::new(Lexer::new(source)),
            symbols: SymbolTable::new(),
            params: Vec::new(),
            funcs: Vec::new(),
            func_index: HashMap::new(),
            globals: Vec::new(),
            global_init: Vec::new(),
            code: Vec::new(),
            in_function: false,
            level: 0,
            local_slots: 0,
            param_base: 0,
            ret_ty: Ty::Void,
            have_return: false,
            loops: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Emission
    // -------------------------------------------------------------------------

    fn emit(&mut self, op: Op) -> usize {
        let buf = if self.in_function {
            &mut self.code
        } else {
            &mut self.global_init
        };
        buf.push(op);
        buf.len() - 1
    }

    /// Index the next emitted instruction will occupy.
    fn here(&self) -> usize {
        if self.in_function {
            self.code.len()
        } else {
            self.global_init.len()
        }
    }

    fn patch(&mut self, at: usize, op: Op) {
        let buf = if self.in_function {
            &mut self.code
        } else {
            &mut self.global_init
        };
        buf[at] = op;
    }

    fn add_global(&mut self, def: GlobalDef) -> u32 {
        let index = self.globals.len() as u32;
        self.globals.push(def);
        index
    }

    fn emit_binop(&mut self, op: BinOp, ty: Ty) {
        let double = ty == Ty::Double;
        match op {
            BinOp::Add => {
                self.emit(if double { Op::AddF } else { Op::Add });
            }
            BinOp::Sub => {
                self.emit(if double { Op::SubF } else { Op::Sub });
            }
            BinOp::Mul => {
                self.emit(if double { Op::MulF } else { Op::Mul });
            }
            BinOp::Div => {
                self.emit(if double { Op::DivF } else { Op::Div });
            }
            BinOp::Lt => {
                self.emit_cmp(double);
                self.emit(Op::SetLt);
            }
            BinOp::Gt => {
                self.emit_cmp(double);
                self.emit(Op::SetGt);
            }
            BinOp::Eq => {
                self.emit_cmp(double);
                self.emit_is_zero();
            }
            BinOp::Neq => {
                self.emit_cmp(double);
                self.emit_nonzero();
            }
            BinOp::Le => {
                self.emit_cmp(double);
                self.emit(Op::SetGt);
                self.emit_is_zero();
            }
            BinOp::Ge => {
                self.emit_cmp(double);
                self.emit(Op::SetLt);
                self.emit_is_zero();
            }
        }
    }

    fn emit_cmp(&mut self, double: bool) {
        self.emit(if double { Op::CmpF } else { Op::CmpI });
    }

    /// Replace the top of the stack with 1 if it is zero, else 0. The opcode
    /// set has no `not`, so the inversion branches.
    fn emit_is_zero(&mut self) {
        self.emit(Op::BrTrue(2));
        self.emit(Op::Push(1));
        self.emit(Op::Br(1));
        self.emit(Op::Push(0));
    }

    /// Replace the top of the stack with 1 if it is nonzero, else 0.
    fn emit_nonzero(&mut self) {
        self.emit(Op::BrFalse(2));
        self.emit(Op::Push(1));
        self.emit(Op::Br(1));
        self.emit(Op::Push(0));
    }

    // -------------------------------------------------------------------------
    // Program and items
    // -------------------------------------------------------------------------

    fn program(mut self) -> Result<Program, CompileError> {
        loop {
            match self.tokens.peek()?.kind {
                TokenKind::Fn => self.function()?,
                TokenKind::Let | TokenKind::Const => self.decl_statement()?,
                _ => break,
            }
        }
        let eof = self.tokens.expect(TokenKind::Eof)?;
        self.synthesize_start(eof.start)
    }

    /// Build `_start` (function id 0): the accumulated global initializers,
    /// then the `main` invocation, with its return value popped if any.
    fn synthesize_start(mut self, eof: Pos) -> Result<Program, CompileError> {
        let (main_id, main_slots) = match self.func_index.get("main") {
            Some(&index) => (self.funcs[index].id, self.funcs[index].return_slots),
            None => return Err(CompileError::NoMain(eof)),
        };
        log::debug!(
            "synthesizing _start: call {} with {} return slots",
            main_id,
            main_slots
        );

        let mut code = mem::take(&mut self.global_init);
        code.push(Op::StackAlloc(main_slots));
        code.push(Op::Call(main_id));
        if main_slots == 1 {
            code.push(Op::Popn(1));
        }
        code.push(Op::Ret);

        let name_global = self.add_global(GlobalDef::utf8("_start"));
        let start = FunctionDef {
            name: "_start".to_string(),
            name_global,
            return_slots: 0,
            param_slots: 0,
            local_slots: 0,
            id: 0,
            ret: Ty::Void,
            params: Vec::new(),
            code,
        };

        let mut functions = vec![start];
        functions.append(&mut self.funcs);
        Ok(Program {
            globals: self.globals,
            functions,
        })
    }

    fn function(&mut self) -> Result<(), CompileError> {
        self.tokens.expect(TokenKind::Fn)?;
        let ident = self.tokens.expect(TokenKind::Ident)?;
        let name = ident.str_value().to_string();
        if self.func_index.contains_key(&name) {
            return Err(CompileError::DuplicateDeclaration(ident.start));
        }

        self.tokens.expect(TokenKind::LParen)?;
        self.params.clear();
        if !self.tokens.check(TokenKind::RParen)? {
            self.param_list()?;
        }
        self.tokens.expect(TokenKind::RParen)?;
        self.tokens.expect(TokenKind::Arrow)?;
        let ret = self.ty()?;

        self.code.clear();
        self.local_slots = 0;
        self.have_return = false;
        self.ret_ty = ret;
        self.param_base = if ret == Ty::Void { 0 } else { 1 };

        // Name global and function entry are registered before the body so
        // calls inside the body (including recursion) resolve.
        let name_global = self.add_global(GlobalDef::utf8(&name));
        let id = self.funcs.len() as u32 + 1;
        log::debug!("registered function '{}' with id {}", name, id);
        self.funcs.push(FunctionDef {
            name: name.clone(),
            name_global,
            return_slots: if ret == Ty::Void { 0 } else { 1 },
            param_slots: self.params.len() as u32,
            local_slots: 0,
            id,
            ret,
            params: self.params.iter().map(|p| p.ty).collect(),
            code: Vec::new(),
        });
        self.func_index.insert(name, self.funcs.len() - 1);

        self.in_function = true;
        self.block_statement()?;

        if self.ret_ty != Ty::Void && !self.have_return {
            return Err(CompileError::NotValidReturn(ident.end));
        }
        if self.ret_ty == Ty::Void {
            self.emit(Op::Ret);
        }

        let index = self.funcs.len() - 1;
        self.funcs[index].code = mem::take(&mut self.code);
        self.funcs[index].local_slots = self.local_slots;
        self.in_function = false;
        self.params.clear();
        Ok(())
    }

    fn param_list(&mut self) -> Result<(), CompileError> {
        loop {
            // Const-ness of parameters is not tracked; the data model keeps
            // only name and type.
            self.tokens.accept(TokenKind::Const)?;
            let ident = self.tokens.expect(TokenKind::Ident)?;
            let name = ident.str_value().to_string();
            if self.params.iter().any(|p| p.name == name) {
                return Err(CompileError::DuplicateDeclaration(ident.start));
            }
            self.tokens.expect(TokenKind::Colon)?;
            let ty = self.ty()?;
            self.params.push(Param { name, ty });
            if self.tokens.accept(TokenKind::Comma)?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// `ty -> IDENT` where the identifier names one of the three types.
    fn ty(&mut self) -> Result<Ty, CompileError> {
        let token = self.tokens.expect(TokenKind::Ident)?;
        Ty::from_name(token.str_value()).ok_or(CompileError::InvalidInput(token.start))
    }

    // -------------------------------------------------------------------------
    // Statements
    // -------------------------------------------------------------------------

    fn starts_expression(kind: TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Minus
                | TokenKind::Ident
                | TokenKind::LParen
                | TokenKind::UintLiteral
                | TokenKind::DoubleLiteral
                | TokenKind::CharLiteral
                | TokenKind::StringLiteral
        )
    }

    fn starts_statement(kind: TokenKind) -> bool {
        Self::starts_expression(kind)
            || matches!(
                kind,
                TokenKind::Let
                    | TokenKind::Const
                    | TokenKind::If
                    | TokenKind::While
                    | TokenKind::Break
                    | TokenKind::Continue
                    | TokenKind::Return
                    | TokenKind::LBrace
                    | TokenKind::Semicolon
            )
    }

    fn block_statement(&mut self) -> Result<(), CompileError> {
        self.tokens.expect(TokenKind::LBrace)?;
        self.level += 1;
        while Self::starts_statement(self.tokens.peek()?.kind) {
            self.statement()?;
        }
        self.tokens.expect(TokenKind::RBrace)?;
        self.symbols.close_scope(self.level);
        self.level -= 1;
        Ok(())
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        match self.tokens.peek()?.kind {
            TokenKind::Let | TokenKind::Const => self.decl_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Break => self.break_statement(),
            TokenKind::Continue => self.continue_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::LBrace => self.block_statement(),
            TokenKind::Semicolon => {
                self.tokens.next()?;
                Ok(())
            }
            _ => {
                // Expression statement. A value left by a non-void expression
                // stays on the operand stack.
                self.expression()?;
                self.tokens.expect(TokenKind::Semicolon)?;
                Ok(())
            }
        }
    }

    fn decl_statement(&mut self) -> Result<(), CompileError> {
        let is_const = self.tokens.next()?.kind == TokenKind::Const;
        let ident = self.tokens.expect(TokenKind::Ident)?;
        let name = ident.str_value().to_string();

        if self.symbols.declared_at(&name, self.level)
            || self.params.iter().any(|p| p.name == name)
            || self.func_index.contains_key(&name)
        {
            return Err(CompileError::DuplicateDeclaration(ident.start));
        }

        self.tokens.expect(TokenKind::Colon)?;
        let ty = self.ty()?;
        if ty == Ty::Void {
            return Err(CompileError::NotValidReturn(ident.start));
        }

        let offset = if self.level == 0 {
            self.globals.len() as u32
        } else {
            self.local_slots
        };
        self.symbols.push(Symbol {
            name: name.clone(),
            ty,
            level: self.level,
            offset,
            is_const,
            initialized: false,
        });
        if self.level == 0 {
            self.add_global(if is_const {
                GlobalDef::constant()
            } else {
                GlobalDef::variable()
            });
        }

        let has_init = if is_const {
            // `const` requires an initializer.
            self.tokens.expect(TokenKind::Assign)?;
            true
        } else {
            self.tokens.accept(TokenKind::Assign)?.is_some()
        };

        if has_init {
            self.emit(if self.level == 0 {
                Op::Globa(offset)
            } else {
                Op::Loca(offset)
            });
            let rhs = self.expression()?;
            if rhs != ty {
                return Err(CompileError::InvalidAssignment(ident.start));
            }
            self.emit(Op::Store);
            self.symbols.mark_initialized(&name);
        }
        self.tokens.expect(TokenKind::Semicolon)?;

        if self.level > 0 {
            self.local_slots += 1;
        }
        Ok(())
    }

    fn if_statement(&mut self) -> Result<(), CompileError> {
        self.tokens.expect(TokenKind::If)?;
        self.expression()?;

        // Condition true: skip the placeholder and run the then-block.
        self.emit(Op::BrTrue(1));
        let skip = self.emit(Op::Br(0));
        self.block_statement()?;
        let exit = self.emit(Op::Br(0));

        let disp = displacement(self.here(), skip);
        self.patch(skip, Op::Br(disp));

        if self.tokens.accept(TokenKind::Else)?.is_some() {
            if self.tokens.check(TokenKind::If)? {
                self.if_statement()?;
            } else {
                self.block_statement()?;
                self.emit(Op::Br(0));
            }
        }

        let disp = displacement(self.here(), exit);
        self.patch(exit, Op::Br(disp));
        Ok(())
    }

    fn while_statement(&mut self) -> Result<(), CompileError> {
        self.tokens.expect(TokenKind::While)?;

        let top = self.here();
        self.expression()?;
        self.emit(Op::BrTrue(1));
        let exit = self.emit(Op::Br(0));

        self.loops.push(LoopCtx {
            top,
            breaks: Vec::new(),
        });
        self.block_statement()?;

        let back = self.here();
        self.emit(Op::Br(displacement(top, back)));
        let end = self.here();
        self.patch(exit, Op::Br(displacement(end, exit)));

        if let Some(ctx) = self.loops.pop() {
            for at in ctx.breaks {
                self.patch(at, Op::Br(displacement(end, at)));
            }
        }
        log::trace!("while loop [{}..{}) back-patched", top, end);
        Ok(())
    }

    fn break_statement(&mut self) -> Result<(), CompileError> {
        let token = self.tokens.expect(TokenKind::Break)?;
        self.tokens.expect(TokenKind::Semicolon)?;
        if self.loops.is_empty() {
            return Err(CompileError::NotWhile(token.start));
        }
        let at = self.emit(Op::Br(0));
        if let Some(ctx) = self.loops.last_mut() {
            ctx.breaks.push(at);
        }
        Ok(())
    }

    fn continue_statement(&mut self) -> Result<(), CompileError> {
        let token = self.tokens.expect(TokenKind::Continue)?;
        self.tokens.expect(TokenKind::Semicolon)?;
        let top = match self.loops.last() {
            Some(ctx) => ctx.top,
            None => return Err(CompileError::NotWhile(token.start)),
        };
        let from = self.here();
        self.emit(Op::Br(displacement(top, from)));
        Ok(())
    }

    fn return_statement(&mut self) -> Result<(), CompileError> {
        self.tokens.expect(TokenKind::Return)?;
        let next = self.tokens.peek()?;
        let (kind, pos) = (next.kind, next.start);

        if Self::starts_expression(kind) {
            if self.ret_ty == Ty::Void {
                return Err(CompileError::NotValidReturn(pos));
            }
            self.emit(Op::Arga(0));
            let ty = self.expression()?;
            if ty != self.ret_ty {
                return Err(CompileError::NotValidReturn(pos));
            }
            self.emit(Op::Store);
            self.have_return = true;
        }
        self.tokens.expect(TokenKind::Semicolon)?;
        self.emit(Op::Ret);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------------

    /// `expr ::= term (bin_op term)*` where `term ::= unary_or_primary ('as' ty)*`
    ///
    /// Each call owns a local operator stack: before pushing a new operator,
    /// operators of greater or equal precedence are popped and emitted; the
    /// rest drain when the expression ends. Groups and call arguments recurse
    /// with a fresh stack, so no sentinel is needed. Casts bind tighter than
    /// any binary operator, so each operand absorbs its own trailing `as`
    /// chain before it is compared against the expression type.
    fn expression(&mut self) -> Result<Ty, CompileError> {
        let mut pending: Vec<BinOp> = Vec::new();
        let mut ty = self.term()?;

        loop {
            let token = self.tokens.peek()?;
            let (kind, pos) = (token.kind, token.start);
            let op = match BinOp::from_token(kind) {
                Some(op) => op,
                None => break,
            };
            self.tokens.next()?;
            if ty == Ty::Void {
                return Err(CompileError::TypeError(pos));
            }
            while let Some(&top) = pending.last() {
                if top.precedence() >= op.precedence() {
                    pending.pop();
                    self.emit_binop(top, ty);
                } else {
                    break;
                }
            }
            pending.push(op);
            let rhs = self.term()?;
            if rhs != ty {
                return Err(CompileError::TypeError(pos));
            }
        }

        while let Some(op) = pending.pop() {
            self.emit_binop(op, ty);
        }
        Ok(ty)
    }

    /// One operand, with any trailing casts already applied: `1.0 + 2 as
    /// double` casts the `2` and then adds two doubles.
    fn term(&mut self) -> Result<Ty, CompileError> {
        let mut ty = self.unary_or_primary()?;
        while self.tokens.check(TokenKind::As)? {
            let token = self.tokens.next()?;
            if ty == Ty::Void {
                return Err(CompileError::TypeError(token.start));
            }
            let target = self.ty()?;
            if target == Ty::Void {
                return Err(CompileError::TypeError(token.start));
            }
            if target != ty {
                self.emit(if ty == Ty::Int { Op::ItoF } else { Op::FtoI });
                ty = target;
            }
            // Identity casts emit nothing.
        }
        Ok(ty)
    }

    fn unary_or_primary(&mut self) -> Result<Ty, CompileError> {
        let token = self.tokens.peek()?;
        let (kind, pos) = (token.kind, token.start);
        match kind {
            TokenKind::Minus => {
                self.tokens.next()?;
                let ty = self.unary_or_primary()?;
                match ty {
                    Ty::Int => self.emit(Op::NegI),
                    Ty::Double => self.emit(Op::NegF),
                    Ty::Void => return Err(CompileError::TypeError(pos)),
                };
                Ok(ty)
            }
            TokenKind::Ident => self.ident_expression(),
            TokenKind::LParen => {
                self.tokens.next()?;
                let ty = self.expression()?;
                self.tokens.expect(TokenKind::RParen)?;
                Ok(ty)
            }
            TokenKind::UintLiteral | TokenKind::CharLiteral => {
                let token = self.tokens.next()?;
                let value = token.int_value();
                self.emit(Op::Push(value));
                Ok(Ty::Int)
            }
            TokenKind::DoubleLiteral => {
                let token = self.tokens.next()?;
                let bits = token.int_value();
                self.emit(Op::Push(bits));
                Ok(Ty::Double)
            }
            TokenKind::StringLiteral => {
                // Sugar for the address of an interned global.
                let token = self.tokens.next()?;
                let index = self.add_global(GlobalDef::utf8(token.str_value()));
                self.emit(Op::Push(index as u64));
                Ok(Ty::Int)
            }
            _ => Err(CompileError::InvalidInput(pos)),
        }
    }

    /// `IDENT ( '=' expr | '(' arg_list? ')' | e )`
    fn ident_expression(&mut self) -> Result<Ty, CompileError> {
        let ident = self.tokens.expect(TokenKind::Ident)?;
        if self.tokens.accept(TokenKind::Assign)?.is_some() {
            self.assignment(&ident)
        } else if self.tokens.accept(TokenKind::LParen)?.is_some() {
            self.call(&ident)
        } else {
            let (address, ty, _) = self
                .resolve(ident.str_value())
                .ok_or(CompileError::NotDeclared(ident.start))?;
            self.emit(address);
            self.emit(Op::Load);
            Ok(ty)
        }
    }

    /// Resolve a name to its address opcode, innermost first: local, then
    /// parameter, then global. Returns the address op, type, and const-ness.
    fn resolve(&self, name: &str) -> Option<(Op, Ty, bool)> {
        if let Some(symbol) = self.symbols.lookup(name) {
            if symbol.level > 0 {
                return Some((Op::Loca(symbol.offset), symbol.ty, symbol.is_const));
            }
        }
        if let Some(index) = self.params.iter().position(|p| p.name == name) {
            let param = &self.params[index];
            return Some((Op::Arga(self.param_base + index as u32), param.ty, false));
        }
        if let Some(symbol) = self.symbols.lookup(name) {
            return Some((Op::Globa(symbol.offset), symbol.ty, symbol.is_const));
        }
        None
    }

    fn assignment(&mut self, ident: &Token) -> Result<Ty, CompileError> {
        let (address, lhs_ty, is_const) = self
            .resolve(ident.str_value())
            .ok_or(CompileError::NotDeclared(ident.start))?;
        if lhs_ty == Ty::Void {
            return Err(CompileError::InvalidAssignment(ident.start));
        }
        if is_const {
            return Err(CompileError::AssignToConstant(ident.start));
        }

        self.emit(address);
        let rhs = self.expression()?;
        if rhs != lhs_ty {
            return Err(CompileError::InvalidAssignment(ident.start));
        }
        self.emit(Op::Store);
        Ok(Ty::Void)
    }

    fn call(&mut self, ident: &Token) -> Result<Ty, CompileError> {
        let name = ident.str_value();
        // Library names take precedence over same-named user functions.
        let (callee, signature, ret) = if let Some((lib, params, ret)) = library_signature(name) {
            (Callee::Library(lib), params.to_vec(), ret)
        } else if let Some(&index) = self.func_index.get(name) {
            let def = &self.funcs[index];
            (Callee::User(def.id), def.params.clone(), def.ret)
        } else {
            return Err(CompileError::NotDeclared(ident.start));
        };

        // The return slot is allocated before the arguments are evaluated.
        self.emit(Op::StackAlloc(if ret == Ty::Void { 0 } else { 1 }));

        let mut args = Vec::new();
        if !self.tokens.check(TokenKind::RParen)? {
            loop {
                args.push(self.expression()?);
                if self.tokens.accept(TokenKind::Comma)?.is_none() {
                    break;
                }
            }
        }
        self.tokens.expect(TokenKind::RParen)?;

        if args != signature {
            return Err(CompileError::ParamError(ident.start));
        }

        match callee {
            Callee::Library(lib) => {
                // Interned at emission time, after any argument globals.
                let index = self.add_global(GlobalDef::utf8(lib));
                self.emit(Op::CallName(index));
            }
            Callee::User(id) => {
                self.emit(Op::Call(id));
            }
        }
        Ok(ret)
    }
}

// =============================================================================
// Tests
// =============================================================================
