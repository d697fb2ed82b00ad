//! End-to-end scenarios: compile and execute programs against a
//! capturing console.

use std::sync::{Arc, Mutex};

use ludus::env::Environment;
use ludus::library::Console;
use ludus::symbol::Symbol;
use ludus::value::Value;
use ludus::vm::{RunState, Vm};

#[derive(Default)]
struct BufferConsole(Mutex<Vec<String>>);

impl BufferConsole {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Console for BufferConsole {
    fn line(&self, text: &str) {
        self.0.lock().unwrap().push(text.to_string());
    }
}

fn run(source: &str) -> Vec<String> {
    let console = Arc::new(BufferConsole::default());
    let mut vm = Vm::with_console(console.clone());
    vm.eval(source).expect("execution failed");
    console.lines()
}

#[test]
fn prints_a_sum() {
    assert_eq!(run("(print (+ 1 2))"), ["3"]);
}

#[test]
fn assignment_doubles() {
    assert_eq!(run("(let x 10) (= x (* x 2)) (print x)"), ["20"]);
}

#[test]
fn branches_on_comparison() {
    assert_eq!(run("(if (> 3 2) ((print \"y\")) ((print \"n\")))"), ["y"]);
    assert_eq!(run("(if (> 2 3) ((print \"y\")) ((print \"n\")))"), ["n"]);
}

#[test]
fn while_loop_counts() {
    assert_eq!(
        run("(let i 0) (while (< i 3) ((print i) (+= i 1)))"),
        ["0", "1", "2"]
    );
}

#[test]
fn functions_return_values() {
    assert_eq!(
        run("(fun sq (n) ((return (* n n)))) (print (sq 5))"),
        ["25"]
    );
}

#[test]
fn string_indexing_and_recovery() {
    assert_eq!(run("(print (. \"abc\" 1))"), ["b"]);
    // An out-of-bounds index is an error value; execution continues.
    assert_eq!(
        run("(print (. \"abc\" 9)) (print \"ok\")"),
        ["error: string index 9 out of bounds", "ok"]
    );
}

#[test]
fn multiple_parameters_bind_in_source_order() {
    assert_eq!(
        run("(fun tag (name score) ((print name score))) (tag \"ada\" 99)"),
        ["ada 99"]
    );
}

#[test]
fn compound_assignment_forms() {
    assert_eq!(
        run("(let x 8) (+= x 2) (-= x 1) (*= x 3) (/= x 9) (//= x 2) (print x)"),
        ["1"]
    );
}

#[test]
fn recursion() {
    assert_eq!(
        run("(fun fact (n) ((if (< n 2) ((return 1))) (return (* n (fact (- n 1)))))) \
             (print (fact 5))"),
        ["120"]
    );
}

#[test]
fn arity_mismatch_prints_an_error_value() {
    assert_eq!(
        run("(fun pair (a b) ((return a))) (print (pair 1))"),
        ["error: pair expects 2 arguments, got 1"]
    );
}

#[test]
fn string_building() {
    assert_eq!(
        run("(let line (* \"-\" 5)) (print (+ line \"!\"))"),
        ["-----!"]
    );
}

#[test]
fn type_predicates() {
    assert_eq!(
        run("(print (is 1 number) (is 1 string) (is print function))"),
        ["true false false"]
    );
}

#[test]
fn imported_library_functions_are_callable() {
    let console = Arc::new(BufferConsole::default());
    let mut vm = Vm::with_console(console.clone());
    let mut library = Environment::new();
    library.set(
        "greeting",
        Value::string("hello"),
    );
    vm.add_library("words", library);
    vm.eval("(import words) (print greeting)").unwrap();
    assert_eq!(console.lines(), ["hello"]);
}

#[test]
fn kernel_invokes_update_and_draw_on_flags() {
    let console = Arc::new(BufferConsole::default());
    let mut vm = Vm::with_console(console.clone());
    vm.load(
        "(fun update () ((print \"tick\")))
         (fun draw () ((print \"frame\")))",
    )
    .unwrap();
    vm.run();

    vm.flags().set_needs_update();
    for _ in 0..20 {
        vm.multi_step();
    }
    // The predicate clears the flag, so update ran exactly once.
    assert_eq!(console.lines(), ["tick"]);

    vm.flags().set_needs_draw();
    for _ in 0..20 {
        vm.multi_step();
    }
    assert_eq!(console.lines(), ["tick", "frame"]);
    assert_eq!(vm.state(), RunState::Running);
}

#[test]
fn stopping_rewinds_the_program() {
    let mut vm = Vm::with_console(Arc::new(BufferConsole::default()));
    vm.load("(let x 1)").unwrap();
    vm.run();
    vm.multi_step();
    vm.stop();
    assert_eq!(vm.state(), RunState::Stopped);
    assert!(vm.stack().is_empty());
}

#[test]
fn undefined_update_does_not_stop_the_kernel() {
    // A program with no update function: the kernel's call produces
    // an error value and keeps looping.
    let console = Arc::new(BufferConsole::default());
    let mut vm = Vm::with_console(console.clone());
    vm.load("(let x 1)").unwrap();
    vm.run();
    vm.flags().set_needs_update();
    for _ in 0..20 {
        vm.multi_step();
    }
    assert_eq!(vm.state(), RunState::Running);
    assert!(vm.last_fault().is_none());
}

#[test]
fn globals_are_inspectable_from_the_host() {
    let mut vm = Vm::with_console(Arc::new(BufferConsole::default()));
    vm.eval("(let lives 3) (fun update () ((= lives (- lives 1))))")
        .unwrap();
    vm.eval("(update)").unwrap();
    assert_eq!(vm.resolve(&Symbol::from("lives")), Value::Number(2.));
}
