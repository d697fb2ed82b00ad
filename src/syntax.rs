//! Source positions and the tokenizer.

use std::fmt::{self, Display};
use std::ops::Deref;

use serde::{Deserialize, Serialize};

pub mod token;

pub use token::{Lexer, Paired, Token};

/// A 1-based line and column in a source string.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A value tagged with the position it came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Positioned<T>(pub T, pub Position);

impl<T> Positioned<T> {
    pub const fn new(value: T, position: Position) -> Self {
        Self(value, position)
    }

    #[must_use]
    pub const fn position(&self) -> Position {
        self.1
    }

    pub fn map<U>(self, map: impl FnOnce(T) -> U) -> Positioned<U> {
        Positioned(map(self.0), self.1)
    }
}

impl<T> Deref for Positioned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> Display for Positioned<T>
where
    T: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.1, self.0)
    }
}
