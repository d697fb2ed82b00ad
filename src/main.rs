use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ludus::driver::Driver;
use ludus::game::{self, KeyState, NullSurface};
use ludus::syntax::{Lexer, Paired, Token};
use ludus::vm::{RunState, Vm};
use parking_lot::Mutex;
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Editor, Helper};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match std::env::args().nth(1) {
        Some(path) => run_file(&path),
        None => repl(),
    }
}

/// Runs a script headless: the `game` library is backed by a surface
/// that only logs, and the kernel loop runs until the machine stops.
fn run_file(path: &str) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::default();
    vm.add_library("game", game::library(Arc::new(NullSurface), KeyState::new()));
    if let Err(err) = vm.load(&source) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let vm = Arc::new(Mutex::new(vm));
    let mut driver = Driver::new(vm.clone());
    driver.run();

    loop {
        std::thread::sleep(Duration::from_millis(100));
        let vm = vm.lock();
        if vm.state() != RunState::Running {
            return match vm.last_fault() {
                Some(fault) => {
                    eprintln!("{fault}");
                    ExitCode::FAILURE
                }
                None => ExitCode::SUCCESS,
            };
        }
    }
}

fn repl() -> ExitCode {
    let mut editor: Editor<Ludus, DefaultHistory> = match Editor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    editor.set_helper(Some(Ludus));

    let mut vm = Vm::default();
    vm.add_library("game", game::library(Arc::new(NullSurface), KeyState::new()));

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(&line);
                match vm.eval(&line) {
                    Ok(value) => println!("{value}"),
                    Err(err) => eprintln!("{err}"),
                }
            }
            Err(ReadlineError::Eof) => return ExitCode::SUCCESS,
            Err(ReadlineError::Interrupted) => {}
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }
    }
}

struct Ludus;

impl Helper for Ludus {}

impl Validator for Ludus {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        let mut depth = 0_i64;
        let mut lexer = Lexer::new(ctx.input());
        loop {
            match lexer.next_token().0 {
                Token::Open(Paired::Paren) => depth += 1,
                Token::Close(Paired::Paren) => depth -= 1,
                Token::Eof => break,
                _ => {}
            }
        }
        if depth > 0 {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }

    fn validate_while_typing(&self) -> bool {
        true
    }
}

impl Highlighter for Ludus {}

impl Hinter for Ludus {
    type Hint = String;
}

impl Completer for Ludus {
    type Candidate = String;
}
