use std::cell::RefCell;
use std::rc::Rc;

use eddy::adaptive::{Cell, Engine};

#[test]
fn memoize_outside_a_reader_is_a_plain_call() {
    let mut engine = Engine::new();
    let table = engine.memo::<u32, u32>();
    let runs = Rc::new(RefCell::new(0usize));

    for _ in 0..2 {
        let runs = Rc::clone(&runs);
        let v = engine.memoize(table, 7, move |_| {
            *runs.borrow_mut() += 1;
            99
        });
        assert_eq!(v, 99);
    }
    assert_eq!(*runs.borrow(), 2);
}

#[test]
fn memo_hit_skips_reexecution_and_preserves_cleanups() {
    let mut engine = Engine::new();
    let (key_src, wkey) = engine.changeable(1i32);
    let (sibling, wsib) = engine.changeable(10i32);
    let table = engine.memo::<i32, i32>();

    let runs = Rc::new(RefCell::new(0usize));
    let dropped = Rc::new(RefCell::new(0usize));

    let body_runs = Rc::clone(&runs);
    let body_dropped = Rc::clone(&dropped);
    let out = engine.bind(sibling, move |engine, &sib| {
        let k = engine.read(key_src).unwrap();
        let runs = Rc::clone(&body_runs);
        let dropped = Rc::clone(&body_dropped);
        let doubled = engine.memoize(table, k, move |engine| {
            *runs.borrow_mut() += 1;
            engine.cleanup(move |_| *dropped.borrow_mut() += 1);
            k * 2
        });
        engine.constant(doubled + sib)
    });

    // Construction runs the body directly (no caching outside a re-run).
    assert_eq!(engine.read(out), Ok(12));
    assert_eq!(*runs.borrow(), 1);

    // First re-run: a miss, which records the sub-range.
    engine.write(wsib, 20);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(22));
    assert_eq!(*runs.borrow(), 2);
    // The construction run's cleanup died with its range.
    assert_eq!(*dropped.borrow(), 1);

    // Second re-run: the sibling changed but the key did not; the cached
    // range is re-spliced, the memoized body does not execute, and the
    // cleanup inside the cached range does not re-fire.
    engine.write(wsib, 30);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(32));
    assert_eq!(*runs.borrow(), 2);
    assert_eq!(*dropped.borrow(), 1);

    // A different key misses and evaluates.
    engine.write(wkey, 5);
    engine.write(wsib, 40);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(50));
    assert_eq!(*runs.borrow(), 3);

    // The old key's entry was discarded with its range: coming back to it
    // evaluates again.
    engine.write(wkey, 1);
    engine.write(wsib, 50);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(52));
    assert_eq!(*runs.borrow(), 4);
}

#[test]
fn memo_hit_replays_readers_inside_the_cached_range() {
    let mut engine = Engine::new();
    let (inner_src, w_inner) = engine.changeable(1i32);
    let (sibling, wsib) = engine.changeable(0i32);
    let table = engine.memo::<(), Cell<i32>>();

    let misses = Rc::new(RefCell::new(0usize));
    let lift_runs = Rc::new(RefCell::new(0usize));

    let body_misses = Rc::clone(&misses);
    let body_lift_runs = Rc::clone(&lift_runs);
    let out = engine.bind(sibling, move |engine, _| {
        let misses = Rc::clone(&body_misses);
        let lift_runs = Rc::clone(&body_lift_runs);
        engine.memoize(table, (), move |engine| {
            *misses.borrow_mut() += 1;
            engine.lift(inner_src, move |&v| {
                *lift_runs.borrow_mut() += 1;
                v * 10
            })
        })
    });

    assert_eq!(engine.read(out), Ok(10));
    assert_eq!((*misses.borrow(), *lift_runs.borrow()), (1, 1));

    // Construction cached nothing, so this re-run misses and rebuilds the
    // inner reader.
    engine.write(w_inner, 5);
    engine.write(wsib, 1);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(50));
    assert_eq!((*misses.borrow(), *lift_runs.borrow()), (2, 2));

    // Now the entry is cached: the hit re-splices the range and *replays*
    // the pending inner reader instead of rebuilding it.
    engine.write(w_inner, 7);
    engine.write(wsib, 2);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(70));
    assert_eq!((*misses.borrow(), *lift_runs.borrow()), (2, 3));
}
