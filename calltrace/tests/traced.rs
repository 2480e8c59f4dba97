use std::panic;

use calltrace::{MethodRecord, current_thread_id, global, traced};

#[traced]
fn add(a: u32, b: u32) -> u32 {
    a + b
}

#[traced]
fn sum_pair() -> u32 {
    add(1, 2)
}

#[traced]
fn check(limit: u32, value: u32) -> Result<u32, String> {
    if value > limit {
        return Err(format!("{value} exceeds {limit}"));
    }
    Ok(value)
}

#[traced]
fn explode() {
    panic!("boom");
}

struct Counter {
    hits: u32,
}

impl Counter {
    #[traced]
    fn bump(&mut self, by: u32) -> u32 {
        self.hits += by;
        self.hits
    }
}

/// Top-level calls recorded for the current test's thread.
fn my_calls() -> Vec<MethodRecord> {
    global()
        .document()
        .thread(current_thread_id())
        .map(|thread| thread.methods.clone())
        .unwrap_or_default()
}

fn nothing_open() -> bool {
    global().with_tree(|tree| tree.open_call(current_thread_id()).is_none())
}

#[test]
fn traced_functions_nest_and_report_params() {
    assert_eq!(sum_pair(), 3);

    let calls = my_calls();
    assert_eq!(calls.len(), 1);
    let outer = &calls[0];
    assert_eq!(outer.name, "sum_pair");
    assert_eq!(outer.package, "traced");
    assert_eq!(outer.params_count, Some(0));
    assert_eq!(outer.children.len(), 1);
    assert_eq!(outer.children[0].name, "add");
    assert_eq!(outer.children[0].params_count, Some(2));
    assert!(nothing_open());
}

#[test]
fn receiver_is_not_counted() {
    let mut counter = Counter { hits: 0 };
    counter.bump(2);
    assert_eq!(counter.bump(3), 5);

    let calls = my_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.name == "bump" && c.params_count == Some(1)));
}

#[test]
fn early_return_closes_the_call() {
    assert!(check(1, 5).is_err());
    assert_eq!(check(10, 5), Ok(5));

    assert_eq!(my_calls().len(), 2);
    assert!(nothing_open());
}

#[test]
fn unwinding_closes_the_call() {
    let result = panic::catch_unwind(explode);
    assert!(result.is_err());

    let calls = my_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "explode");
    assert!(nothing_open());
}
