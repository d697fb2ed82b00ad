//! The closed instruction set.
//!
//! Code is a flat `i64` sequence: each opcode is followed inline by
//! its fixed number of operands. Jump operands are signed deltas
//! applied after the operand has been read; everything else indexes
//! the constant pool or carries an argument count.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Op {
    /// `i`: push `constants[i]`.
    GetConst,
    /// `i`: pop a value and bind it to the name `constants[i]` in the
    /// innermost environment, unless the name is already bound there.
    DefVariable,
    /// `i`: push the value bound to `constants[i]` in the nearest
    /// enclosing environment, or Undefined.
    GetVariable,
    /// `i`: pop a value and assign it to the nearest enclosing binding
    /// of `constants[i]`, else bind in the innermost environment.
    SetVariable,
    True,
    False,
    Undefined,
    Pop,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Remainder,
    And,
    Or,
    Negate,
    Not,
    /// `off`: `pc += off`.
    Jump,
    /// `off`: pop a value; when it is falsey, `pc += off`.
    JumpIfFalse,
    Dup,
    /// `n, i`: call the value bound to the name `constants[i]` with
    /// `n` arguments popped from the stack.
    Call,
    Return,
    Dot,
    Is,
    /// `i`: merge the registered library named `constants[i]` into the
    /// innermost environment.
    Import,
}

impl Op {
    const ALL: [Op; 32] = [
        Op::GetConst,
        Op::DefVariable,
        Op::GetVariable,
        Op::SetVariable,
        Op::True,
        Op::False,
        Op::Undefined,
        Op::Pop,
        Op::Equal,
        Op::NotEqual,
        Op::Greater,
        Op::GreaterEqual,
        Op::Less,
        Op::LessEqual,
        Op::Add,
        Op::Subtract,
        Op::Multiply,
        Op::Divide,
        Op::FloorDivide,
        Op::Remainder,
        Op::And,
        Op::Or,
        Op::Negate,
        Op::Not,
        Op::Jump,
        Op::JumpIfFalse,
        Op::Dup,
        Op::Call,
        Op::Return,
        Op::Dot,
        Op::Is,
        Op::Import,
    ];

    /// How many inline operands follow this opcode.
    #[must_use]
    pub const fn operand_count(self) -> usize {
        match self {
            Op::GetConst
            | Op::DefVariable
            | Op::GetVariable
            | Op::SetVariable
            | Op::Jump
            | Op::JumpIfFalse
            | Op::Import => 1,
            Op::Call => 2,
            _ => 0,
        }
    }
}

impl From<Op> for i64 {
    fn from(op: Op) -> Self {
        op as i64
    }
}

impl TryFrom<i64> for Op {
    type Error = InvalidOpcode;

    fn try_from(value: i64) -> Result<Self, InvalidOpcode> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Op::ALL.get(index).copied())
            .ok_or(InvalidOpcode(value))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[error("invalid opcode {0}")]
pub struct InvalidOpcode(pub i64);
