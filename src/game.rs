//! The `game` module: the drawing surface contract a host provides
//! and the key-state map it records input into.

use std::sync::Arc;

use kempt::Map;
use parking_lot::Mutex;
use tracing::trace;

use crate::env::Environment;
use crate::symbol::Symbol;
use crate::value::{RustFunction, Value};

/// A host-provided 2D drawing surface. Coordinates and sizes are in
/// surface pixels; colors are 0..=255 channels or CSS color strings.
pub trait Surface: Send + Sync {
    fn fill_color(&self, r: f64, g: f64, b: f64);
    fn fill_color_css(&self, css: &str);
    fn draw_rect(&self, x: f64, y: f64, width: f64, height: f64);
    fn draw_text(&self, x: f64, y: f64, text: &str);
    fn set_font_size(&self, size: f64);
    fn set_font_family(&self, family: &str);
    fn set_font_style(&self, style: &str);
    fn clear(&self);
}

/// Keyboard state shared between the host, which records events, and
/// the `is_key_pressed` native, which only reads. Key codes follow
/// the host's keyboard-event codes (`"ArrowLeft"`, `"KeyA"`, ...).
#[derive(Clone, Default, Debug)]
pub struct KeyState(Arc<Mutex<Map<Symbol, bool>>>);

impl KeyState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pressed(&self, code: impl Into<Symbol>, pressed: bool) {
        self.0.lock().insert(code.into(), pressed);
    }

    #[must_use]
    pub fn is_pressed(&self, code: &Symbol) -> bool {
        self.0.lock().get(code).copied().unwrap_or_default()
    }
}

/// A surface that only logs. Lets game scripts run headless.
#[derive(Debug, Default)]
pub struct NullSurface;

impl Surface for NullSurface {
    fn fill_color(&self, r: f64, g: f64, b: f64) {
        trace!(r, g, b, "fill_color");
    }

    fn fill_color_css(&self, css: &str) {
        trace!(css, "fill_color_css");
    }

    fn draw_rect(&self, x: f64, y: f64, width: f64, height: f64) {
        trace!(x, y, width, height, "draw_rect");
    }

    fn draw_text(&self, x: f64, y: f64, text: &str) {
        trace!(x, y, text, "draw_text");
    }

    fn set_font_size(&self, size: f64) {
        trace!(size, "set_font_size");
    }

    fn set_font_family(&self, family: &str) {
        trace!(family, "set_font_family");
    }

    fn set_font_style(&self, style: &str) {
        trace!(style, "set_font_style");
    }

    fn clear(&self) {
        trace!("clear");
    }
}

/// Builds the `game` library over a surface and key map. Register it
/// with [`crate::vm::Vm::add_library`] under the name `game`.
pub fn library(surface: Arc<dyn Surface>, keys: KeyState) -> Environment {
    let mut env = Environment::new();

    let s = surface.clone();
    native(&mut env, "fill_color", 3, move |args| match args {
        [Value::Number(r), Value::Number(g), Value::Number(b)] => {
            s.fill_color(*r, *g, *b);
            None
        }
        _ => Some(Value::error("fill_color expects three numbers")),
    });

    let s = surface.clone();
    native(&mut env, "fill_color_css", 1, move |args| match args {
        [Value::String(css)] => {
            s.fill_color_css(css);
            None
        }
        _ => Some(Value::error("fill_color_css expects a string")),
    });

    let s = surface.clone();
    native(&mut env, "draw_rect", 4, move |args| match args {
        [Value::Number(x), Value::Number(y), Value::Number(w), Value::Number(h)] => {
            s.draw_rect(*x, *y, *w, *h);
            None
        }
        _ => Some(Value::error("draw_rect expects four numbers")),
    });

    let s = surface.clone();
    native(&mut env, "draw_text", 3, move |args| match args {
        [Value::Number(x), Value::Number(y), text] => {
            s.draw_text(*x, *y, &text.to_string());
            None
        }
        _ => Some(Value::error("draw_text expects two numbers and a value")),
    });

    let s = surface.clone();
    native(&mut env, "set_font_size", 1, move |args| match args {
        [Value::Number(size)] => {
            s.set_font_size(*size);
            None
        }
        _ => Some(Value::error("set_font_size expects a number")),
    });

    let s = surface.clone();
    native(&mut env, "set_font_family", 1, move |args| match args {
        [Value::String(family)] => {
            s.set_font_family(family);
            None
        }
        _ => Some(Value::error("set_font_family expects a string")),
    });

    let s = surface.clone();
    native(&mut env, "set_font_style", 1, move |args| match args {
        [Value::String(style)] => {
            s.set_font_style(style);
            None
        }
        _ => Some(Value::error("set_font_style expects a string")),
    });

    let s = surface;
    native(&mut env, "clear", 0, move |_| {
        s.clear();
        None
    });

    native(&mut env, "is_key_pressed", 1, move |args| match args {
        [Value::String(code)] => Some(Value::Bool(keys.is_pressed(code))),
        _ => Some(Value::error("is_key_pressed expects a key code string")),
    });

    env
}

fn native<F>(env: &mut Environment, name: &str, arity: u8, func: F)
where
    F: Fn(&[Value]) -> Option<Value> + Send + Sync + 'static,
{
    env.set(name, Value::NativeFunction(RustFunction::new(name, arity, func)));
}
