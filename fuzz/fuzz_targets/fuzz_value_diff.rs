#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pollwatch_core::Value;
use pollwatch_core::diff::{deep_changed, structural_copy};

/// Builds a graph over a small pool of nodes, so links may share or cycle.
#[derive(Arbitrary, Debug)]
enum Op {
    NewMap,
    NewList,
    Insert { node: u8, key: u8, scalar: Option<i16>, link: u8 },
    Push { node: u8, scalar: Option<i16>, link: u8 },
    Remove { node: u8, key: u8 },
}

const KEYS: [&str; 4] = ["a", "b", "c", "d"];

fn pick(pool: &[Value], index: u8) -> Option<&Value> {
    if pool.is_empty() {
        None
    } else {
        pool.get(usize::from(index) % pool.len())
    }
}

fn operand(pool: &[Value], scalar: Option<i16>, link: u8) -> Value {
    match scalar {
        Some(n) => Value::from(n),
        None => pick(pool, link).cloned().unwrap_or(Value::Null),
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let mut pool = vec![Value::empty_map()];
    for op in ops.iter().take(64) {
        match *op {
            Op::NewMap => pool.push(Value::empty_map()),
            Op::NewList => pool.push(Value::list([])),
            Op::Insert { node, key, scalar, link } => {
                let value = operand(&pool, scalar, link);
                if let Some(target) = pick(&pool, node) {
                    target.insert(KEYS[usize::from(key) % KEYS.len()], value);
                }
            }
            Op::Push { node, scalar, link } => {
                let value = operand(&pool, scalar, link);
                if let Some(target) = pick(&pool, node) {
                    target.push(value);
                }
            }
            Op::Remove { node, key } => {
                if let Some(target) = pick(&pool, node) {
                    target.remove(KEYS[usize::from(key) % KEYS.len()]);
                }
            }
        }
    }

    let root = &pool[0];
    let copy = structural_copy(root);
    assert!(!deep_changed(root, root));
    assert!(!deep_changed(root, &copy));
    assert!(!deep_changed(&copy, root));

    root.insert("__fuzz_marker__", 1);
    assert!(deep_changed(root, &copy));
    assert!(!deep_changed(&copy, &structural_copy(&copy)));
});
