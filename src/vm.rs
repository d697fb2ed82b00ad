//! The stack-based virtual machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kempt::Map;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::compiler::{CompileError, Compiler, Program};
use crate::env::Environment;
use crate::library::{self, Console, StdoutConsole};
use crate::symbol::Symbol;
use crate::syntax::Positioned;
use crate::value::Value;
use crate::vm::ops::Op;

pub mod ops;

/// The value stack quota. Pushes beyond it are discarded.
pub const VALUE_STACK_LIMIT: usize = 65_536;
/// The environment stack quota. Pushes beyond it are discarded.
pub const ENV_STACK_LIMIT: usize = 256;
/// How many instructions one [`Vm::multi_step`] batch executes.
pub const UPDATE_BATCH: usize = 160;

/// The event loop appended to every loaded program. It polls the
/// driver flags and invokes the script's `update` and `draw`
/// functions.
pub const KERNEL: &str = "(while true (
  (if (__needs_update) ((update)))
  (if (__needs_draw) ((clear) (draw)))
))";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// The outcome of executing a single instruction.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StepResult {
    Ran,
    Halted,
}

/// A catastrophic execution error. Faults stop the machine; the
/// recoverable kind of error travels the stack as [`Value::Error`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum Fault {
    #[error("the value stack underflowed")]
    StackUnderflow,
    #[error("invalid opcode {0}")]
    InvalidOpcode(i64),
    #[error("truncated instruction")]
    TruncatedInstruction,
    #[error("constant {0} out of bounds")]
    InvalidConstant(i64),
    #[error("expected a name constant")]
    ExpectedName,
    #[error("jump target out of bounds")]
    InvalidJump,
    #[error("invalid argument count {0}")]
    InvalidArity(i64),
    #[error("unknown module {0}")]
    UnknownModule(Symbol),
}

/// A compilation or execution failure surfaced to the host.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Compilation(#[from] Positioned<CompileError>),
    #[error("{0}")]
    Fault(#[from] Fault),
}

/// The update/draw flags shared between the driver, which sets them
/// on a timer, and the `__needs_update`/`__needs_draw` builtins,
/// which atomically read and clear them.
#[derive(Debug, Default)]
pub struct Flags {
    needs_update: AtomicBool,
    needs_draw: AtomicBool,
}

impl Flags {
    pub fn set_needs_update(&self) {
        self.needs_update.store(true, Ordering::Relaxed);
    }

    pub fn set_needs_draw(&self) {
        self.needs_draw.store(true, Ordering::Relaxed);
    }

    pub fn take_needs_update(&self) -> bool {
        self.needs_update.swap(false, Ordering::Relaxed)
    }

    pub fn take_needs_draw(&self) -> bool {
        self.needs_draw.swap(false, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
struct Frame {
    code: Arc<[i64]>,
    pc: usize,
}

pub struct Vm {
    constants: Vec<Value>,
    stack: Vec<Value>,
    envs: Vec<Environment>,
    frames: Vec<Frame>,
    libraries: Map<Symbol, Environment>,
    console: Arc<dyn Console>,
    flags: Arc<Flags>,
    state: RunState,
    last_fault: Option<Fault>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::with_console(Arc::new(StdoutConsole))
    }
}

impl Vm {
    #[must_use]
    pub fn with_console(console: Arc<dyn Console>) -> Self {
        Self {
            constants: Vec::new(),
            stack: Vec::new(),
            envs: Vec::new(),
            frames: Vec::new(),
            libraries: Map::new(),
            console,
            flags: Arc::new(Flags::default()),
            state: RunState::Stopped,
            last_fault: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn last_fault(&self) -> Option<&Fault> {
        self.last_fault.as_ref()
    }

    #[must_use]
    pub fn flags(&self) -> &Arc<Flags> {
        &self.flags
    }

    #[must_use]
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// How many environments are on the scope stack.
    #[must_use]
    pub fn env_depth(&self) -> usize {
        self.envs.len()
    }

    /// Registers a library the program can `(import name)`.
    pub fn add_library(&mut self, name: impl Into<Symbol>, library: Environment) {
        self.libraries.insert(name.into(), library);
    }

    /// Binds a global, creating the global environment if the machine
    /// has never run.
    pub fn declare(&mut self, name: impl Into<Symbol>, value: Value) {
        self.ensure_global_env();
        self.envs[0].set(name, value);
    }

    /// Looks a name up through the environment stack, innermost
    /// scope first.
    #[must_use]
    pub fn resolve(&self, name: &Symbol) -> Value {
        for env in self.envs.iter().rev() {
            if env.has(name) {
                return env.get(name);
            }
        }
        Value::Undefined
    }

    /// Compiles `source` with the kernel event loop appended and
    /// readies it for driver-scheduled execution. The global
    /// environment is rebuilt from the builtins.
    pub fn load(&mut self, source: &str) -> Result<(), ExecutionError> {
        let merged = format!("{source}\n{KERNEL}");
        let program = Compiler::new(&merged).compile()?;
        debug!(bytes = source.len(), "loaded program");
        self.install(program, true);
        Ok(())
    }

    /// Installs an already compiled program, as [`Vm::load`] does.
    pub fn load_program(&mut self, program: Program) {
        self.install(program, true);
    }

    /// Compiles `source` without the kernel and runs it synchronously
    /// to completion, returning the value left on top of the stack.
    /// Global bindings survive between calls.
    pub fn eval(&mut self, source: &str) -> Result<Value, ExecutionError> {
        let program = Compiler::new(source).compile()?;
        self.install(program, false);
        loop {
            match self.step()? {
                StepResult::Ran => {}
                StepResult::Halted => break,
            }
        }
        Ok(self.stack.last().cloned().unwrap_or_default())
    }

    fn install(&mut self, program: Program, fresh_globals: bool) {
        self.constants = program.constants;
        self.stack.clear();
        self.frames.clear();
        self.frames.push(Frame {
            code: Arc::from(program.code),
            pc: 0,
        });
        if fresh_globals {
            self.envs.clear();
        }
        self.ensure_global_env();
        self.envs.truncate(1);
        self.state = RunState::Stopped;
        self.last_fault = None;
    }

    fn ensure_global_env(&mut self) {
        if self.envs.is_empty() {
            self.envs
                .push(library::builtins(self.console.clone(), self.flags.clone()));
        }
    }

    /// Marks the machine runnable; the driver's update ticks will
    /// execute it in batches.
    pub fn run(&mut self) {
        if !self.frames.is_empty() {
            self.state = RunState::Running;
        }
    }

    /// Halts driver-driven execution, leaving all state intact.
    pub fn pause(&mut self) {
        if self.state == RunState::Running {
            self.state = RunState::Paused;
        }
    }

    /// Returns to the stopped state and rewinds execution to the top
    /// of the program. Global bindings are discarded down to the
    /// global environment.
    pub fn stop(&mut self) {
        self.state = RunState::Stopped;
        self.stack.clear();
        self.envs.truncate(1);
        self.frames.truncate(1);
        if let Some(root) = self.frames.first_mut() {
            root.pc = 0;
        }
    }

    /// Executes up to [`UPDATE_BATCH`] instructions, stopping early
    /// on completion or a fault. Does nothing unless running.
    pub fn multi_step(&mut self) {
        if self.state != RunState::Running {
            return;
        }
        for _ in 0..UPDATE_BATCH {
            match self.step() {
                Ok(StepResult::Ran) => {}
                Ok(StepResult::Halted) | Err(_) => break,
            }
        }
    }

    /// Executes one instruction. A fault stops the machine and is
    /// recorded before being returned.
    pub fn step(&mut self) -> Result<StepResult, Fault> {
        match self.step_inner() {
            Ok(result) => Ok(result),
            Err(fault) => {
                error!(%fault, "execution stopped");
                self.state = RunState::Stopped;
                self.last_fault = Some(fault.clone());
                Err(fault)
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn step_inner(&mut self) -> Result<StepResult, Fault> {
        let Some(frame) = self.frames.last() else {
            return Ok(StepResult::Halted);
        };
        let pc = frame.pc;
        if pc >= frame.code.len() {
            self.state = RunState::Stopped;
            return Ok(StepResult::Halted);
        }

        let op = Op::try_from(frame.code[pc]).map_err(|err| Fault::InvalidOpcode(err.0))?;
        let operands = op.operand_count();
        if pc + operands >= frame.code.len() && operands > 0 {
            return Err(Fault::TruncatedInstruction);
        }
        let a = (operands >= 1).then(|| frame.code[pc + 1]).unwrap_or(0);
        let b = (operands >= 2).then(|| frame.code[pc + 2]).unwrap_or(0);
        self.frames
            .last_mut()
            .expect("frame checked above")
            .pc = pc + 1 + operands;

        match op {
            Op::GetConst => {
                let value = self.constant(a)?.clone();
                self.push(value);
            }
            Op::DefVariable => {
                let name = self.name(a)?;
                let value = self.pop()?;
                let env = self.envs.last_mut().expect("no environment");
                // Redefinition in the same scope is a silent no-op.
                env.define(name, value);
            }
            Op::GetVariable => {
                let name = self.name(a)?;
                let value = self.resolve(&name);
                self.push(value);
            }
            Op::SetVariable => {
                let name = self.name(a)?;
                let value = self.pop()?;
                self.assign(name, value);
            }
            Op::True => self.push(Value::Bool(true)),
            Op::False => self.push(Value::Bool(false)),
            Op::Undefined => self.push(Value::Undefined),
            Op::Pop => {
                self.pop()?;
            }
            Op::Equal => self.binary(Value::eq)?,
            Op::NotEqual => self.binary(Value::neq)?,
            Op::Greater => self.binary(Value::gt)?,
            Op::GreaterEqual => self.binary(Value::gteq)?,
            Op::Less => self.binary(Value::lt)?,
            Op::LessEqual => self.binary(Value::lteq)?,
            Op::Add => self.binary(Value::add)?,
            Op::Subtract => self.binary(Value::sub)?,
            Op::Multiply => self.binary(Value::mul)?,
            Op::Divide => self.binary(Value::div)?,
            Op::FloorDivide => self.binary(Value::fdiv)?,
            Op::Remainder => self.binary(Value::rem)?,
            Op::And => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(if lhs.truthy() { rhs } else { lhs });
            }
            Op::Or => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.push(if lhs.truthy() { lhs } else { rhs });
            }
            Op::Negate => {
                let value = self.pop()?;
                self.push(value.negate());
            }
            Op::Not => {
                let value = self.pop()?;
                self.push(value.not());
            }
            Op::Jump => self.jump(a)?,
            Op::JumpIfFalse => {
                let condition = self.pop()?;
                if !condition.truthy() {
                    self.jump(a)?;
                }
            }
            Op::Dup => {
                let top = self.stack.last().cloned().ok_or(Fault::StackUnderflow)?;
                self.push(top);
            }
            Op::Call => self.call(a, b)?,
            Op::Return => {
                if self.frames.len() == 1 {
                    self.state = RunState::Stopped;
                    return Ok(StepResult::Halted);
                }
                // A body that leaves nothing behind returns Undefined.
                let value = self.stack.pop().unwrap_or_default();
                self.frames.pop();
                self.pop_env();
                self.push(value);
            }
            Op::Dot => self.binary(Value::dot)?,
            Op::Is => self.binary(Value::is)?,
            Op::Import => {
                let name = self.name(a)?;
                let Some(library) = self.libraries.get(&name) else {
                    return Err(Fault::UnknownModule(name));
                };
                let library = library.clone();
                trace!(module = %name, "importing library");
                self.envs
                    .last_mut()
                    .expect("no environment")
                    .merge_from(&library);
            }
        }

        Ok(StepResult::Ran)
    }

    fn call(&mut self, count: i64, name: i64) -> Result<(), Fault> {
        let count = usize::try_from(count).map_err(|_| Fault::InvalidArity(count))?;
        let name = self.name(name)?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.pop()?);
        }
        args.reverse();

        match self.resolve(&name) {
            Value::Function(function) => {
                if function.params.len() == count {
                    let mut env = Environment::new();
                    // Parameter names were reversed when compiled, so
                    // reversing again pairs them with the arguments in
                    // source order.
                    for (param, value) in function.params.iter().rev().zip(args) {
                        env.set(param.clone(), value);
                    }
                    self.push_env(env);
                    self.frames.push(Frame {
                        code: function.code.clone(),
                        pc: 0,
                    });
                } else {
                    self.push(Value::error(format!(
                        "{name} expects {} arguments, got {count}",
                        function.params.len()
                    )));
                }
            }
            Value::Undefined => self.push(Value::error(format!("{name} is not defined"))),
            callee => {
                let result = callee.call(&args);
                self.push(result);
            }
        }
        Ok(())
    }

    fn binary(&mut self, op: fn(&Value, &Value) -> Value) -> Result<(), Fault> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(op(&lhs, &rhs));
        Ok(())
    }

    fn jump(&mut self, offset: i64) -> Result<(), Fault> {
        let frame = self.frames.last_mut().expect("no active frame");
        #[allow(clippy::cast_possible_wrap)]
        let target = frame.pc as i64 + offset;
        if target < 0 || target > frame.code.len() as i64 {
            return Err(Fault::InvalidJump);
        }
        #[allow(clippy::cast_sign_loss)]
        {
            frame.pc = target as usize;
        }
        Ok(())
    }

    fn assign(&mut self, name: Symbol, value: Value) {
        for env in self.envs.iter_mut().rev() {
            if env.has(&name) {
                env.set(name, value);
                return;
            }
        }
        self.envs
            .last_mut()
            .expect("no environment")
            .set(name, value);
    }

    fn constant(&self, index: i64) -> Result<&Value, Fault> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.constants.get(index))
            .ok_or(Fault::InvalidConstant(index))
    }

    fn name(&self, index: i64) -> Result<Symbol, Fault> {
        match self.constant(index)? {
            Value::String(name) => Ok(name.clone()),
            _ => Err(Fault::ExpectedName),
        }
    }

    fn push(&mut self, value: Value) {
        if self.stack.len() < VALUE_STACK_LIMIT {
            self.stack.push(value);
        } else {
            trace!("value stack quota reached; discarding push");
        }
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    fn push_env(&mut self, env: Environment) {
        if self.envs.len() < ENV_STACK_LIMIT {
            self.envs.push(env);
        } else {
            trace!("environment stack quota reached; discarding push");
        }
    }

    /// The global environment is never popped.
    fn pop_env(&mut self) {
        if self.envs.len() > 1 {
            self.envs.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Value {
        Vm::default().eval(source).expect("execution failed")
    }

    #[test]
    fn expressions_leave_their_value() {
        assert_eq!(eval("(+ 1 2)"), Value::Number(3.));
        assert_eq!(eval("(* (+ 1 2) 4)"), Value::Number(12.));
        assert_eq!(eval("(- 5)"), Value::Number(-5.));
        assert_eq!(eval("(// 7 2)"), Value::Number(3.));
        assert_eq!(eval("(. \"abc\" 1)"), Value::string("b"));
        assert_eq!(eval("(== 1 2)"), Value::Bool(false));
        assert_eq!(eval("(! false)"), Value::Bool(true));
        assert_eq!(eval("undefined"), Value::Undefined);
    }

    #[test]
    fn variables_define_and_assign() {
        assert_eq!(eval("(let x 10) (= x (* x 2)) x"), Value::Number(20.));
        assert_eq!(eval("(let x 1) (+= x 2) x"), Value::Number(3.));
        assert_eq!(eval("(= fresh 9) fresh"), Value::Number(9.));
    }

    #[test]
    fn let_redefinition_is_silent() {
        assert_eq!(eval("(let x 1) (let x 2) x"), Value::Number(1.));
    }

    #[test]
    fn unknown_variables_are_undefined() {
        assert_eq!(eval("missing"), Value::Undefined);
    }

    #[test]
    fn and_or_select_operands() {
        assert_eq!(eval("(and 1 2)"), Value::Number(2.));
        assert_eq!(eval("(and 0 2)"), Value::Number(0.));
        assert_eq!(eval("(or 0 2)"), Value::Number(2.));
        assert_eq!(eval("(or 1 2)"), Value::Number(1.));
        assert_eq!(eval("(&& true false)"), Value::Bool(false));
        assert_eq!(eval("(|| false true)"), Value::Bool(true));
    }

    #[test]
    fn function_calls_bind_parameters_in_order() {
        assert_eq!(
            eval("(fun sub (a b) ((return (- a b)))) (sub 10 4)"),
            Value::Number(6.)
        );
    }

    #[test]
    fn function_arity_mismatch_is_an_error_value() {
        let result = eval("(fun pair (a b) ((return a))) (pair 1)");
        assert_eq!(result, Value::error("pair expects 2 arguments, got 1"));
    }

    #[test]
    fn calling_undefined_is_an_error_value() {
        assert_eq!(eval("(nothing 1 2)"), Value::error("nothing is not defined"));
    }

    #[test]
    fn type_checks_and_casts() {
        assert_eq!(eval("(is 1 number)"), Value::Bool(true));
        assert_eq!(eval("(is \"a\" number)"), Value::Bool(false));
        assert_eq!(eval("(number \"12.5\")"), Value::Number(12.5));
        assert_eq!(eval("(string 42)"), Value::string("42"));
        assert_eq!(eval("(bool 0)"), Value::Bool(false));
    }

    #[test]
    fn runtime_errors_flow_as_values() {
        assert_eq!(eval("(/ 1 0)"), Value::error("division by zero"));
        assert_eq!(
            eval("(+ (/ 1 0) 5)"),
            Value::error("division by zero")
        );
        // An error used as a condition is falsey.
        assert_eq!(eval("(if (/ 1 0) ((= r 1)) ((= r 2))) r"), Value::Number(2.));
    }

    #[test]
    fn scopes_nest_through_calls() {
        assert_eq!(
            eval("(let x 1) (fun bump () ((= x (+ x 1)))) (bump) x"),
            Value::Number(2.)
        );
        // A parameter shadows the global of the same name.
        assert_eq!(
            eval("(let x 1) (fun shadow (x) ((return (* x 10)))) (shadow 5)"),
            Value::Number(50.)
        );
    }

    #[test]
    fn value_stack_overflow_is_dropped() {
        let source = "1 ".repeat(VALUE_STACK_LIMIT + 100);
        let mut vm = Vm::default();
        vm.eval(&source).expect("quota should not fault");
        assert_eq!(vm.stack().len(), VALUE_STACK_LIMIT);
    }

    #[test]
    fn env_stack_overflow_is_dropped() {
        // Unbounded recursion: environments beyond the quota are
        // discarded, but execution keeps going without faulting.
        let program = Compiler::new("(fun recurse (n) ((recurse (+ n 1)))) (recurse 0)")
            .compile()
            .unwrap();
        let mut vm = Vm::default();
        vm.load_program(program);
        for _ in 0..50_000 {
            match vm.step() {
                Ok(StepResult::Ran) => {}
                other => panic!("unexpected step outcome: {other:?}"),
            }
        }
        assert!(vm.env_depth() <= ENV_STACK_LIMIT);
        assert!(vm.last_fault().is_none());
    }

    #[test]
    fn stack_underflow_faults() {
        let mut vm = Vm::default();
        vm.load_program(Program {
            constants: Vec::new(),
            code: vec![Op::Add.into(), Op::Return.into()],
        });
        assert_eq!(vm.step(), Err(Fault::StackUnderflow));
        assert_eq!(vm.state(), RunState::Stopped);
        assert_eq!(vm.last_fault(), Some(&Fault::StackUnderflow));
    }

    #[test]
    fn invalid_opcode_faults() {
        let mut vm = Vm::default();
        vm.load_program(Program {
            constants: Vec::new(),
            code: vec![9999, Op::Return.into()],
        });
        assert_eq!(vm.step(), Err(Fault::InvalidOpcode(9999)));
    }

    #[test]
    fn dup_and_pop() {
        let mut vm = Vm::default();
        vm.load_program(Program {
            constants: vec![Value::Number(7.)],
            code: vec![
                Op::GetConst.into(),
                0,
                Op::Dup.into(),
                Op::Pop.into(),
                Op::Return.into(),
            ],
        });
        while vm.step() == Ok(StepResult::Ran) {}
        assert_eq!(vm.stack(), &[Value::Number(7.)]);
    }

    #[test]
    fn unknown_import_faults() {
        let result = Vm::default().eval("(import missing)");
        assert_eq!(
            result,
            Err(ExecutionError::Fault(Fault::UnknownModule(Symbol::from(
                "missing"
            ))))
        );
    }

    #[test]
    fn imports_merge_into_the_current_scope() {
        let mut library = Environment::new();
        library.set("answer", Value::Number(42.));
        let mut vm = Vm::default();
        vm.add_library("facts", library);
        assert_eq!(vm.eval("(import facts) answer"), Ok(Value::Number(42.)));
    }

    #[test]
    fn globals_survive_between_evals() {
        let mut vm = Vm::default();
        vm.eval("(let score 3)").unwrap();
        assert_eq!(vm.eval("score"), Ok(Value::Number(3.)));
    }

    #[test]
    fn declare_and_resolve() {
        let mut vm = Vm::default();
        vm.declare("lives", Value::Number(3.));
        assert_eq!(vm.resolve(&Symbol::from("lives")), Value::Number(3.));
        assert_eq!(vm.eval("lives"), Ok(Value::Number(3.)));
    }

    #[test]
    fn run_state_transitions() {
        let mut vm = Vm::default();
        vm.load("(let x 1)").unwrap();
        assert_eq!(vm.state(), RunState::Stopped);
        vm.run();
        assert_eq!(vm.state(), RunState::Running);
        vm.pause();
        assert_eq!(vm.state(), RunState::Paused);
        vm.stop();
        assert_eq!(vm.state(), RunState::Stopped);
    }

    #[test]
    fn multi_step_is_bounded() {
        let mut vm = Vm::default();
        vm.load("").unwrap();
        vm.run();
        // The kernel loop never halts on its own; one batch executes
        // at most UPDATE_BATCH instructions and returns.
        vm.multi_step();
        assert_eq!(vm.state(), RunState::Running);
    }

    #[test]
    fn compile_errors_surface_with_positions() {
        let error = Vm::default().eval("(let x 1").unwrap_err();
        assert_eq!(error.to_string(), "1:9: unexpected end of input");
    }
}
