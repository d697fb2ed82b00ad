//! A single-pass compiler from s-expression source to bytecode.
//!
//! There is no syntax tree: the compiler pulls tokens from the
//! [`Lexer`] and emits opcodes as it goes, patching forward jumps and
//! lifting nested function bodies out of the main code array.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::symbol::Symbol;
use crate::syntax::token::{Lexer, Paired, Token};
use crate::syntax::Positioned;
use crate::value::{Function, Value};
use crate::vm::ops::Op;

/// A compiled program: an interned constant pool and the flat
/// top-level code array. Function bodies carry their own code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub constants: Vec<Value>,
    pub code: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CompileError {
    #[error("{0}")]
    Lex(Symbol),
    #[error("unexpected token {0}")]
    UnexpectedToken(Token),
    #[error("unbalanced parenthesis")]
    UnbalancedParenthesis,
    #[error("expected a name")]
    ExpectedName,
    #[error("expected a block")]
    ExpectedBlock,
    #[error("unexpected end of input")]
    UnexpectedEof,
}

type Result<T, E = Positioned<CompileError>> = std::result::Result<T, E>;

pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    constants: Vec<Value>,
    code: Vec<i64>,
}

impl<'a> Compiler<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
            constants: Vec::new(),
            code: Vec::new(),
        }
    }

    /// Compiles every top-level s-expression, stopping at the first
    /// error. The emitted code always ends with [`Op::Return`].
    pub fn compile(mut self) -> Result<Program> {
        loop {
            let token = self.lexer.next_token();
            if token.0 == Token::Eof {
                break;
            }
            self.expression(token)?;
        }
        self.emit(Op::Return);

        debug!(
            constants = self.constants.len(),
            code = self.code.len(),
            "compiled program"
        );
        Ok(Program {
            constants: self.constants,
            code: self.code,
        })
    }

    fn expression(&mut self, token: Positioned<Token>) -> Result<()> {
        match token.0 {
            Token::Open(Paired::Paren) => self.parenthesized(),
            Token::Identifier(name) => {
                let name = self.name_constant(name);
                self.emit(Op::GetVariable);
                self.code.push(name);
                Ok(())
            }
            Token::Number(value) => {
                let constant = self.constant(Value::Number(value));
                self.emit(Op::GetConst);
                self.code.push(constant);
                Ok(())
            }
            Token::String(value) => {
                let constant = self.constant(Value::String(value));
                self.emit(Op::GetConst);
                self.code.push(constant);
                Ok(())
            }
            Token::True => {
                self.emit(Op::True);
                Ok(())
            }
            Token::False => {
                self.emit(Op::False);
                Ok(())
            }
            Token::Undefined => {
                self.emit(Op::Undefined);
                Ok(())
            }
            Token::Error(message) => Err(Positioned::new(CompileError::Lex(message), token.1)),
            Token::Eof => Err(Positioned::new(CompileError::UnexpectedEof, token.1)),
            other => Err(Positioned::new(
                CompileError::UnexpectedToken(other),
                token.1,
            )),
        }
    }

    fn parenthesized(&mut self) -> Result<()> {
        let head = self.lexer.next_token();
        match head.0 {
            Token::Close(Paired::Paren) => Err(Positioned::new(
                CompileError::UnbalancedParenthesis,
                head.1,
            )),
            Token::Plus => self.binary(Op::Add),
            Token::Minus => self.minus(),
            Token::Star => self.binary(Op::Multiply),
            Token::Slash => self.binary(Op::Divide),
            Token::SlashSlash => self.binary(Op::FloorDivide),
            Token::Percent => self.binary(Op::Remainder),
            Token::Dot => self.binary(Op::Dot),
            Token::Is => self.binary(Op::Is),
            Token::Equals => self.binary(Op::Equal),
            Token::NotEquals => self.binary(Op::NotEqual),
            Token::Less => self.binary(Op::Less),
            Token::LessOrEqual => self.binary(Op::LessEqual),
            Token::Greater => self.binary(Op::Greater),
            Token::GreaterOrEqual => self.binary(Op::GreaterEqual),
            Token::And | Token::LogicalAnd => self.binary(Op::And),
            Token::Or | Token::LogicalOr => self.binary(Op::Or),
            Token::Bang => {
                let operand = self.lexer.next_token();
                self.expression(operand)?;
                self.emit(Op::Not);
                self.expect_close()
            }
            Token::PlusEquals => self.compound_assign(Op::Add),
            Token::MinusEquals => self.compound_assign(Op::Subtract),
            Token::TimesEquals => self.compound_assign(Op::Multiply),
            Token::DivideEquals => self.compound_assign(Op::Divide),
            Token::FloorDivideEquals => self.compound_assign(Op::FloorDivide),
            Token::RemainderEquals => self.compound_assign(Op::Remainder),
            Token::Assign => {
                let name = self.expect_name()?;
                let name = self.name_constant(name);
                let value = self.lexer.next_token();
                self.expression(value)?;
                self.emit(Op::SetVariable);
                self.code.push(name);
                self.expect_close()
            }
            Token::Let => {
                let name = self.expect_name()?;
                let name = self.name_constant(name);
                let value = self.lexer.next_token();
                self.expression(value)?;
                self.emit(Op::DefVariable);
                self.code.push(name);
                self.expect_close()
            }
            Token::If => self.if_form(),
            Token::While => self.while_form(),
            Token::Fun => self.fun_form(),
            Token::Return => self.return_form(),
            Token::Import => {
                let name = self.expect_name()?;
                let name = self.name_constant(name);
                self.emit(Op::Import);
                self.code.push(name);
                self.expect_close()
            }
            Token::Identifier(name) => self.call(name),
            Token::Error(message) => Err(Positioned::new(CompileError::Lex(message), head.1)),
            Token::Eof => Err(Positioned::new(CompileError::UnexpectedEof, head.1)),
            other => Err(Positioned::new(CompileError::UnexpectedToken(other), head.1)),
        }
    }

    fn binary(&mut self, op: Op) -> Result<()> {
        let lhs = self.lexer.next_token();
        self.expression(lhs)?;
        let rhs = self.lexer.next_token();
        self.expression(rhs)?;
        self.emit(op);
        self.expect_close()
    }

    /// `-` is subtraction with two operands and negation with one.
    fn minus(&mut self) -> Result<()> {
        let lhs = self.lexer.next_token();
        self.expression(lhs)?;
        if self.lexer.peek().0 == Token::Close(Paired::Paren) {
            self.lexer.next_token();
            self.emit(Op::Negate);
            Ok(())
        } else {
            let rhs = self.lexer.next_token();
            self.expression(rhs)?;
            self.emit(Op::Subtract);
            self.expect_close()
        }
    }

    fn compound_assign(&mut self, op: Op) -> Result<()> {
        let name = self.expect_name()?;
        let name = self.name_constant(name);
        self.emit(Op::GetVariable);
        self.code.push(name);
        let value = self.lexer.next_token();
        self.expression(value)?;
        self.emit(op);
        self.emit(Op::SetVariable);
        self.code.push(name);
        self.expect_close()
    }

    fn call(&mut self, name: Symbol) -> Result<()> {
        let mut args = 0_i64;
        loop {
            match self.lexer.peek().0 {
                Token::Close(Paired::Paren) => {
                    self.lexer.next_token();
                    break;
                }
                Token::Eof => {
                    let token = self.lexer.next_token();
                    return Err(Positioned::new(CompileError::UnexpectedEof, token.1));
                }
                _ => {
                    let arg = self.lexer.next_token();
                    self.expression(arg)?;
                    args += 1;
                }
            }
        }
        let name = self.name_constant(name);
        self.emit(Op::Call);
        self.code.push(args);
        self.code.push(name);
        Ok(())
    }

    fn if_form(&mut self) -> Result<()> {
        let condition = self.lexer.next_token();
        self.expression(condition)?;
        let after_true = self.emit_jump(Op::JumpIfFalse);
        self.block()?;
        if self.lexer.peek().0 == Token::Open(Paired::Paren) {
            let after_else = self.emit_jump(Op::Jump);
            self.patch_jump(after_true);
            self.block()?;
            self.patch_jump(after_else);
        } else {
            self.patch_jump(after_true);
        }
        self.expect_close()
    }

    fn while_form(&mut self) -> Result<()> {
        let condition_start = self.code.len();
        let condition = self.lexer.next_token();
        self.expression(condition)?;
        let exit = self.emit_jump(Op::JumpIfFalse);
        self.block()?;
        self.emit(Op::Jump);
        #[allow(clippy::cast_possible_wrap)]
        let back = condition_start as i64 - (self.code.len() as i64 + 1);
        self.code.push(back);
        self.patch_jump(exit);
        self.expect_close()
    }

    /// `(fun NAME (PARAM*) BODY)`: the body compiles into the main
    /// code array, then is sliced out into the function's own code.
    fn fun_form(&mut self) -> Result<()> {
        let name = self.expect_name()?;

        let open = self.lexer.next_token();
        if open.0 != Token::Open(Paired::Paren) {
            return Err(Positioned::new(CompileError::UnexpectedToken(open.0), open.1));
        }
        let mut params = Vec::new();
        loop {
            let token = self.lexer.next_token();
            match token.0 {
                Token::Close(Paired::Paren) => break,
                Token::Identifier(param) => params.push(param),
                Token::Eof => return Err(Positioned::new(CompileError::UnexpectedEof, token.1)),
                other => {
                    return Err(Positioned::new(CompileError::UnexpectedToken(other), token.1))
                }
            }
        }

        let body_start = self.code.len();
        self.block()?;
        let mut body = self.code.split_off(body_start);
        body.push(Op::Return.into());
        // Parameters are bound by popping arguments at call time;
        // reversing here makes the popped order match source order.
        params.reverse();
        let function = Value::Function(Arc::new(Function {
            name: name.clone(),
            params,
            code: Arc::from(body),
        }));

        let function = self.append_constant(function);
        self.emit(Op::GetConst);
        self.code.push(function);
        let name = self.name_constant(name);
        self.emit(Op::DefVariable);
        self.code.push(name);
        self.expect_close()
    }

    fn return_form(&mut self) -> Result<()> {
        if self.lexer.peek().0 == Token::Close(Paired::Paren) {
            self.emit(Op::Undefined);
        } else {
            let value = self.lexer.next_token();
            self.expression(value)?;
        }
        self.emit(Op::Return);
        self.expect_close()
    }

    /// A block is `(` followed by any number of s-expressions and a
    /// closing `)`.
    fn block(&mut self) -> Result<()> {
        let open = self.lexer.next_token();
        if open.0 != Token::Open(Paired::Paren) {
            return Err(Positioned::new(CompileError::ExpectedBlock, open.1));
        }
        loop {
            let token = self.lexer.next_token();
            match token.0 {
                Token::Close(Paired::Paren) => break Ok(()),
                Token::Eof => break Err(Positioned::new(CompileError::UnexpectedEof, token.1)),
                _ => self.expression(token)?,
            }
        }
    }

    fn expect_close(&mut self) -> Result<()> {
        let token = self.lexer.next_token();
        match token.0 {
            Token::Close(Paired::Paren) => Ok(()),
            Token::Eof => Err(Positioned::new(CompileError::UnexpectedEof, token.1)),
            other => Err(Positioned::new(CompileError::UnexpectedToken(other), token.1)),
        }
    }

    fn expect_name(&mut self) -> Result<Symbol> {
        let token = self.lexer.next_token();
        match token.0 {
            Token::Identifier(name) => Ok(name),
            Token::Eof => Err(Positioned::new(CompileError::UnexpectedEof, token.1)),
            _ => Err(Positioned::new(CompileError::ExpectedName, token.1)),
        }
    }

    fn emit(&mut self, op: Op) {
        self.code.push(op.into());
    }

    /// Emits a jump with a placeholder offset, returning the index of
    /// the operand cell to patch.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op);
        self.code.push(0);
        self.code.len() - 1
    }

    /// Points a previously emitted jump at the current end of code.
    /// Offsets are relative to the cell after the operand.
    #[allow(clippy::cast_possible_wrap)]
    fn patch_jump(&mut self, operand: usize) {
        self.code[operand] = self.code.len() as i64 - (operand as i64 + 1);
    }

    /// Interns Numbers and Strings by value; everything else appends.
    #[allow(clippy::cast_possible_wrap)]
    fn constant(&mut self, value: Value) -> i64 {
        let existing = self.constants.iter().position(|constant| {
            match (constant, &value) {
                (Value::Number(lhs), Value::Number(rhs)) => lhs == rhs,
                (Value::String(lhs), Value::String(rhs)) => lhs == rhs,
                _ => false,
            }
        });
        match existing {
            Some(index) => index as i64,
            None => self.append_constant(value),
        }
    }

    fn name_constant(&mut self, name: Symbol) -> i64 {
        self.constant(Value::String(name))
    }

    #[allow(clippy::cast_possible_wrap)]
    fn append_constant(&mut self, value: Value) -> i64 {
        self.constants.push(value);
        self.constants.len() as i64 - 1
    }
}
