//! # ludus
//!
//! A tiny, dynamically-typed, fully parenthesized scripting language
//! for authoring small games. Source is tokenized by a pull
//! [`Lexer`](syntax::Lexer), compiled in a single pass to a flat
//! bytecode, and executed by a stack-based [`Vm`] that a host drives
//! in short cooperative batches.
//!
//! ```rust
//! use ludus::vm::Vm;
//!
//! let mut vm = Vm::default();
//! let value = vm.eval("(let x 10) (= x (* x 2)) x").unwrap();
//! assert_eq!(value.to_string(), "20");
//! ```
//!
//! Hosts extend the language with native functions. A library is an
//! [`Environment`](env::Environment) of bindings that programs pull
//! in with `(import name)`:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ludus::game::{self, KeyState, NullSurface};
//! use ludus::vm::Vm;
//!
//! let mut vm = Vm::default();
//! vm.add_library("game", game::library(Arc::new(NullSurface), KeyState::new()));
//! vm.eval("(import game) (draw_rect 0 0 8 8)").unwrap();
//! ```
//!
//! Loading (rather than evaluating) a program appends the kernel
//! event loop, which invokes the script's `update` and `draw`
//! functions whenever the [`driver::Driver`]'s ticks raise the
//! corresponding flags.

pub mod compiler;
pub mod driver;
pub mod env;
pub mod game;
pub mod library;
pub mod symbol;
pub mod syntax;
pub mod value;
pub mod vm;

pub use compiler::Compiler;
pub use value::Value;
pub use vm::Vm;
