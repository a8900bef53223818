// Executes generated code, so the whole suite is pinned to the one target
// the emitter speaks.
#![cfg(all(target_arch = "x86_64", unix))]

use std::cell::RefCell;

use sjit::{
    BuiltinTable, EvalError, List, Object, Region, STATUS_ERROR, STATUS_OK, compile,
    compile_with_table, default_table, read_str,
};

fn read_list(source: &str) -> List {
    match read_str(source).expect("read should succeed") {
        Object::List(list) => list,
        Object::Atom(_) => panic!("expected list"),
    }
}

fn run(source: &str) -> Result<Object, EvalError> {
    compile(&read_list(source))
        .expect("compile should succeed")
        .invoke()
}

fn run_atom(source: &str) -> String {
    match run(source).expect("invoke should succeed") {
        Object::Atom(text) => text,
        Object::List(list) => panic!("expected atom result, got {list}"),
    }
}

#[test]
fn flat_sum_evaluates() {
    assert_eq!(run_atom("(+ 1 2)"), "3");
}

#[test]
fn nested_product_evaluates() {
    assert_eq!(run_atom("(* 3 (+ 4 5))"), "27");
}

#[test]
fn print_passes_its_argument_through() {
    assert_eq!(run_atom("(print (* 2 21))"), "42");
}

#[test]
fn sums_of_sums_evaluate() {
    assert_eq!(run_atom("(+ (+ 1 2) (+ 3 4))"), "10");
}

#[test]
fn negative_operands_evaluate() {
    assert_eq!(run_atom("(+ -5 2)"), "-3");
    assert_eq!(run_atom("(* -6 -7)"), "42");
}

#[test]
fn literals_round_trip_through_print() {
    for n in [
        -1_000_000_000i64,
        -987_654,
        -1,
        0,
        1,
        42,
        123_456_789,
        1_000_000_000,
    ] {
        let source = format!("(print {n})");
        assert_eq!(run_atom(&source), n.to_string());
    }
}

#[test]
fn addition_commutes() {
    for (a, b) in [(1i64, 2i64), (-7, 9), (0, 0), (1_000_000, -1), (i64::from(i32::MAX), 1)] {
        let forward = run_atom(&format!("(+ {a} {b})"));
        let reversed = run_atom(&format!("(+ {b} {a})"));
        assert_eq!(forward, reversed);
        assert_eq!(forward, (a + b).to_string());
    }
}

#[test]
fn addition_associates_via_nesting() {
    for (a, b, c) in [(1i64, 2i64, 3i64), (-4, 5, -6), (100, 0, -100), (7, 7, 7)] {
        let left = run_atom(&format!("(+ (+ {a} {b}) {c})"));
        let right = run_atom(&format!("(+ {a} (+ {b} {c}))"));
        assert_eq!(left, right);
        assert_eq!(left, (a + b + c).to_string());
    }
}

#[test]
fn region_survives_runtime_errors_and_can_be_reinvoked() {
    let region = compile(&read_list("(+ x 2)")).expect("compile should succeed");
    for _ in 0..2 {
        let err = region.invoke().expect_err("invoke should fail");
        assert_eq!(err, EvalError::BadNumber("x".to_string()));
    }
    // The region is unharmed; a healthy sibling still works.
    assert_eq!(run_atom("(+ 40 2)"), "42");
}

#[test]
fn list_operand_to_arithmetic_is_a_runtime_type_error() {
    let region = compile(&read_list("(+ ((a) 1) 2)")).expect("compile should succeed");
    let err = region.invoke().expect_err("invoke should fail");
    assert_eq!(err, EvalError::TypeMismatch("atom"));
}

#[test]
fn invoking_twice_yields_the_same_result() {
    let region = compile(&read_list("(* 6 7)")).expect("compile should succeed");
    assert_eq!(region.invoke().expect("invoke should succeed"), Object::atom("42"));
    assert_eq!(region.invoke().expect("invoke should succeed"), Object::atom("42"));
}

#[test]
fn regions_are_shareable_across_threads() {
    let region = compile(&read_list("(+ (+ 1 2) (+ 3 4))")).expect("compile should succeed");
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                assert_eq!(
                    region.invoke().expect("invoke should succeed"),
                    Object::atom("10")
                );
            });
        }
    });
}

// Instrumented builtins below: each records what it observes into a
// thread-local log, then behaves like an ordinary table entry.

thread_local! {
    static TRACE_LOG: RefCell<Vec<(i64, i64)>> = const { RefCell::new(Vec::new()) };
    static REG_LOG: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

unsafe extern "C" fn trace_add(stack: *mut Vec<Object>, _region: *const Region) -> i32 {
    let stack = unsafe { &mut *stack };
    let len = stack.len();
    let parse = |object: &Object| match object {
        Object::Atom(text) => text.parse::<i64>().expect("trace operand should be numeric"),
        Object::List(_) => panic!("trace operand should be an atom"),
    };
    let left = parse(&stack[len - 2]);
    let right = parse(&stack[len - 1]);
    TRACE_LOG.with(|log| log.borrow_mut().push((left, right)));
    stack.pop();
    stack[len - 2] = Object::Atom((left + right).to_string());
    STATUS_OK
}

unsafe extern "C" fn record_registers(stack: *mut Vec<Object>, region: *const Region) -> i32 {
    REG_LOG.with(|log| log.borrow_mut().push((stack as usize, region as usize)));
    STATUS_OK
}

unsafe extern "C" fn wipe_stack(stack: *mut Vec<Object>, _region: *const Region) -> i32 {
    unsafe { &mut *stack }.clear();
    STATUS_OK
}

unsafe extern "C" fn duplicate_top(stack: *mut Vec<Object>, _region: *const Region) -> i32 {
    let stack = unsafe { &mut *stack };
    let Some(top) = stack.last().cloned() else {
        return STATUS_ERROR;
    };
    stack.push(top);
    STATUS_OK
}

#[test]
fn siblings_evaluate_left_to_right_and_operands_reduce_before_operators() {
    let mut table = BuiltinTable::new();
    table.register("+", 2, trace_add);
    TRACE_LOG.with(|log| log.borrow_mut().clear());

    let region = compile_with_table(&read_list("(+ (+ 1 2) (+ 3 4))"), &table)
        .expect("compile should succeed");
    assert_eq!(
        region.invoke().expect("invoke should succeed"),
        Object::atom("10")
    );
    // Left subtree first, then the right, then the parent over both results.
    TRACE_LOG.with(|log| {
        assert_eq!(*log.borrow(), vec![(1, 2), (3, 4), (3, 7)]);
    });
}

#[test]
fn entry_registers_are_preserved_at_every_call_depth() {
    let mut table = BuiltinTable::new();
    table.register("keep", 1, record_registers);
    REG_LOG.with(|log| log.borrow_mut().clear());

    let region = compile_with_table(&read_list("(keep (keep (keep 5)))"), &table)
        .expect("compile should succeed");
    assert_eq!(
        region.invoke().expect("invoke should succeed"),
        Object::atom("5")
    );
    REG_LOG.with(|log| {
        let log = log.borrow();
        assert_eq!(log.len(), 3);
        let (stack_ptr, region_ptr) = log[0];
        assert_ne!(stack_ptr, 0);
        assert_eq!(region_ptr, &region as *const Region as usize);
        assert!(log.iter().all(|&entry| entry == (stack_ptr, region_ptr)));
    });
}

#[test]
fn an_emptied_stack_violates_the_return_invariant() {
    let mut table = BuiltinTable::new();
    table.register("wipe", 1, wipe_stack);
    let region =
        compile_with_table(&read_list("(wipe 1)"), &table).expect("compile should succeed");
    let err = region.invoke().expect_err("invoke should fail");
    assert_eq!(err, EvalError::StackInvariant(0));
}

#[test]
fn a_surplus_stack_entry_violates_the_return_invariant() {
    let mut table = BuiltinTable::new();
    table.register("dup", 1, duplicate_top);
    let region =
        compile_with_table(&read_list("(dup 9)"), &table).expect("compile should succeed");
    let err = region.invoke().expect_err("invoke should fail");
    assert_eq!(err, EvalError::StackInvariant(2));
}

#[test]
fn instrumented_tables_can_reuse_the_default_entries() {
    let mut table = BuiltinTable::new();
    let add = default_table().lookup("+").expect("+ should be registered");
    table.register("+", add.arity, add.entry);
    table.register("keep", 1, record_registers);

    let region = compile_with_table(&read_list("(keep (+ 20 22))"), &table)
        .expect("compile should succeed");
    assert_eq!(
        region.invoke().expect("invoke should succeed"),
        Object::atom("42")
    );
}
