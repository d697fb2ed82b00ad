//! The builtin globals every program starts with, and the console
//! sink they print through.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::env::Environment;
use crate::symbol::Symbol;
use crate::value::{RustFunction, TypeValue, Value};
use crate::vm::Flags;

/// Where `print` sends its lines.
pub trait Console: Send + Sync {
    fn line(&self, text: &str);
}

#[derive(Debug, Default)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn line(&self, text: &str) {
        println!("{text}");
    }
}

/// Builds the global environment injected at load time: the callable
/// types, `print`, and the driver-flag predicates.
pub fn builtins(console: Arc<dyn Console>, flags: Arc<Flags>) -> Environment {
    let mut env = Environment::new();

    env.set(
        Symbol::bool_symbol().clone(),
        Value::Type(TypeValue::bool_type()),
    );
    env.set(
        Symbol::number_symbol().clone(),
        Value::Type(TypeValue::number_type()),
    );
    env.set(
        Symbol::string_symbol().clone(),
        Value::Type(TypeValue::string_type()),
    );
    env.set(
        Symbol::function_symbol().clone(),
        Value::Type(TypeValue::function_type()),
    );

    env.set(
        Symbol::print_symbol().clone(),
        Value::NativeFunction(RustFunction::new("print", None, move |args: &[Value]| {
            let mut line = String::new();
            for (index, arg) in args.iter().enumerate() {
                if index > 0 {
                    line.push(' ');
                }
                let _ = write!(line, "{arg}");
            }
            console.line(&line);
            None
        })),
    );

    let update_flags = flags.clone();
    env.set(
        Symbol::needs_update_symbol().clone(),
        Value::NativeFunction(RustFunction::new("__needs_update", 0, move |_: &[Value]| {
            Some(Value::Bool(update_flags.take_needs_update()))
        })),
    );
    env.set(
        Symbol::needs_draw_symbol().clone(),
        Value::NativeFunction(RustFunction::new("__needs_draw", 0, move |_: &[Value]| {
            Some(Value::Bool(flags.take_needs_draw()))
        })),
    );

    env
}
