use std::cell::RefCell;
use std::rc::Rc;

use eddy::adaptive::{Engine, Fault};

fn counter() -> (Rc<RefCell<usize>>, Rc<RefCell<usize>>) {
    let n = Rc::new(RefCell::new(0));
    (Rc::clone(&n), n)
}

#[test]
fn diamond_recomputes_each_reader_exactly_once() {
    let mut engine = Engine::new();
    let (a, wa) = engine.changeable(1i32);

    let (b_runs, b_seen) = counter();
    let b = engine.lift(a, move |&x| {
        *b_seen.borrow_mut() += 1;
        x + 1
    });
    let (c_runs, c_seen) = counter();
    let c = engine.lift(a, move |&x| {
        *c_seen.borrow_mut() += 1;
        x * 2
    });
    let (d_runs, d_seen) = counter();
    let d = engine.lift2(b, c, move |&x, &y| {
        *d_seen.borrow_mut() += 1;
        x + y
    });

    assert_eq!(engine.read(d), Ok(4));
    assert_eq!((*b_runs.borrow(), *c_runs.borrow(), *d_runs.borrow()), (1, 1, 1));

    engine.write(wa, 10);
    engine.propagate();

    assert_eq!(engine.read(d), Ok(31));
    assert_eq!((*b_runs.borrow(), *c_runs.borrow(), *d_runs.borrow()), (2, 2, 2));
}

#[test]
fn lift_of_constant_short_circuits() {
    let mut engine = Engine::new();
    let k = engine.constant(5i32);
    let l = engine.lift(k, |&v| v + 1);
    assert!(engine.is_constant(l));
    assert_eq!(engine.read(l), Ok(6));

    let broken = engine.fail::<i32>(Fault::msg("nope"));
    let m = engine.lift(broken, |&v: &i32| v + 1);
    assert!(engine.is_constant(m));
    assert_eq!(engine.read(m).unwrap_err().message(), Some("nope"));
}

#[test]
fn lift_identity_tracks_its_input() {
    let mut engine = Engine::new();
    let (a, wa) = engine.changeable(3i32);
    let mirror = engine.lift(a, |&v| v);
    assert_eq!(engine.read(mirror), Ok(3));

    engine.write(wa, 8);
    engine.propagate();
    assert_eq!(engine.read(mirror), engine.read(a));
}

#[test]
fn failures_propagate_and_catch_recovers() {
    let mut engine = Engine::new();
    let (a, wa) = engine.changeable(1i32);
    let b = engine.try_lift(a, |&x| {
        if x == 0 {
            Err(Fault::msg("division by zero"))
        } else {
            Ok(10 / x)
        }
    });
    let c = engine.catch(b, |_| -1);

    assert_eq!(engine.read(c), Ok(10));

    engine.write(wa, 0);
    engine.propagate();
    assert_eq!(engine.read(b).unwrap_err().message(), Some("division by zero"));
    assert_eq!(engine.read(c), Ok(-1));

    engine.write(wa, 5);
    engine.propagate();
    assert_eq!(engine.read(c), Ok(2));
}

#[test]
fn bind_follows_the_chosen_cell() {
    let mut engine = Engine::new();
    let (sw, wsw) = engine.changeable(true);
    let (x, wx) = engine.changeable(1i32);
    let (y, wy) = engine.changeable(100i32);
    let out = engine.bind(sw, move |_, &b| if b { x } else { y });

    assert_eq!(engine.read(out), Ok(1));

    engine.write(wsw, false);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(100));

    // The abandoned branch no longer feeds the output.
    engine.write(wx, 2);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(100));

    engine.write(wy, 200);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(200));
}

#[test]
fn bind_does_not_filter_equal_results() {
    let mut engine = Engine::new();
    let (a, wa) = engine.changeable(1i32);
    let out = engine.bind(a, |engine, _| engine.constant(5i32));
    let (count, seen) = counter();
    engine.notify(out, move |_| *seen.borrow_mut() += 1);

    engine.write(wa, 2);
    engine.propagate();
    engine.write(wa, 3);
    engine.propagate();
    // The produced value never changes, but bind's default equality is
    // "never equal": the structure was rebuilt, so dependents hear it.
    assert_eq!(*count.borrow(), 2);
}

#[test]
fn bind_all_fails_fast_and_recovers() {
    let mut engine = Engine::new();
    let (p, wp) = engine.changeable(1i32);
    let (q, _wq) = engine.changeable(2i32);
    let out = engine.bind_all(&[p, q], |engine, values| {
        let sum: i32 = values.iter().sum();
        engine.constant(sum)
    });
    assert_eq!(engine.read(out), Ok(3));

    let broken = Fault::msg("broken");
    engine.write_fault(wp, broken.clone());
    engine.propagate();
    assert_eq!(engine.read(out).unwrap_err(), broken);

    engine.write(wp, 10);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(12));
}

#[test]
fn lift_all_tracks_every_input() {
    let mut engine = Engine::new();
    let mut writers = Vec::new();
    let mut cells = Vec::new();
    for n in 0..4 {
        let (c, w) = engine.changeable(n as i32);
        cells.push(c);
        writers.push(w);
    }
    let total = engine.lift_all(&cells, |values| values.iter().sum::<i32>());
    assert_eq!(engine.read(total), Ok(6));

    engine.write(writers[2], 10);
    engine.propagate();
    assert_eq!(engine.read(total), Ok(14));
}

#[test]
fn switch_flattens_a_cell_of_cells() {
    let mut engine = Engine::new();
    let (inner1, _w1) = engine.changeable(1i32);
    let (inner2, w2) = engine.changeable(2i32);
    let (sel, wsel) = engine.changeable(inner1);
    let out = engine.switch(sel);

    assert_eq!(engine.read(out), Ok(1));

    engine.write(wsel, inner2);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(2));

    engine.write(w2, 5);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(5));
}

#[test]
fn try_bind_routes_values_and_faults() {
    let mut engine = Engine::new();
    let (a, wa) = engine.changeable_unset::<i32>();
    let out = engine.try_bind(
        a,
        |engine, &v| engine.constant(v * 2),
        |engine, _| engine.constant(-1),
    );
    assert_eq!(engine.read(out), Ok(-1));

    engine.write(wa, 4);
    engine.propagate();
    assert_eq!(engine.read(out), Ok(8));
}

#[test]
#[should_panic(expected = "cycle")]
fn writing_upstream_mid_propagation_is_fatal() {
    let mut engine = Engine::new();
    let (a, wa) = engine.changeable(0i32);
    let _out = engine.bind(a, move |engine, &v| {
        let k = engine.constant(v);
        engine.write(wa, v + 1);
        k
    });
    engine.write(wa, 10);
    engine.propagate();
}

#[test]
fn fault_handler_receives_cycle_instead_of_panicking() {
    let mut engine = Engine::new();
    let cycles: Rc<RefCell<usize>> = Rc::default();
    let seen = Rc::clone(&cycles);
    engine.set_fault_handler(move |fault| {
        assert!(fault.is_cycle());
        *seen.borrow_mut() += 1;
    });

    let (a, wa) = engine.changeable(0i32);
    let _out = engine.bind(a, move |engine, &v| {
        let k = engine.constant(v);
        engine.write(wa, v + 1);
        k
    });
    engine.write(wa, 10);
    engine.propagate();
    assert_eq!(*cycles.borrow(), 1);
}
