//! Disposal, pinning and ownership rules across states and handles.

use lunaria::{Error, State, ThreadStatus, Value};

// ============================================================================
// Disposal
// ============================================================================

#[test]
fn test_disposing_main_disposes_threads_and_handles() {
    let state = State::new().unwrap();
    let thread = state.create_thread().unwrap();
    let table = state.create_table().unwrap();
    let buffer = state.create_buffer(4).unwrap();

    state.dispose();

    assert!(state.is_disposed());
    assert!(thread.is_disposed());
    assert!(table.is_disposed());
    assert!(buffer.is_disposed());
    assert!(matches!(table.get::<Value>("x"), Err(Error::Disposed(_))));
    assert!(matches!(thread.top(), Err(Error::Disposed(_))));
    assert!(matches!(state.do_string("return 1"), Err(Error::Disposed(_))));
}

#[test]
fn test_disposing_thread_leaves_main_alive() {
    let state = State::new().unwrap();
    let thread = state.create_thread().unwrap();

    thread.dispose();

    assert!(thread.is_disposed());
    assert!(!state.is_disposed());
    assert_eq!(state.do_string("return 7").unwrap(), vec![Value::Number(7.0)]);
}

#[test]
fn test_double_dispose_is_noop() {
    let state = State::new().unwrap();
    let table = state.create_table().unwrap();
    table.dispose();
    table.dispose();
    assert!(table.is_disposed());
    assert!(state.registry_stats().is_balanced());

    state.dispose();
    state.dispose();
    assert!(state.is_disposed());
}

#[test]
fn test_handles_dropped_after_dispose_are_harmless() {
    let state = State::new().unwrap();
    let function = state.create_function("noop", |_| Ok(0)).unwrap();
    let values = state.do_string("return {}, 'text'").unwrap();
    state.dispose();
    drop(values);
    assert!(function.is_disposed());
    function.dispose();
}

#[test]
fn test_handle_keeps_heap_alive() {
    let state = State::new().unwrap();
    let table = state.create_table().unwrap();
    drop(state);
    assert!(!table.is_disposed());
    table.set("k", 1.0).unwrap();
    assert_eq!(table.get::<f64>("k").unwrap(), 1.0);
}

#[test]
fn test_dispose_main_from_callback_defers_close() {
    let state = State::new().unwrap();
    let kill = state
        .create_function("kill", |s| {
            s.main_thread()?.dispose();
            Ok(0)
        })
        .unwrap();
    state.set_global("kill", &kill).unwrap();

    let err = state
        .do_string("kill() local t = {} for i = 1, 1000 do t[i] = {i} end return #t")
        .unwrap_err();
    assert_eq!(err, Error::Disposed("state"));
    assert!(state.is_disposed());
    assert!(kill.is_disposed());
    assert!(matches!(state.create_table(), Err(Error::Disposed(_))));
}

#[test]
fn test_dispose_main_from_metamethod_defers_close() {
    let state = State::new().unwrap();
    state.open_base_library().unwrap();
    let kill = state
        .create_function("kill", |s| {
            s.push(7.0)?;
            s.main_thread()?.dispose();
            Ok(1)
        })
        .unwrap();
    state.set_global("kill", &kill).unwrap();
    let table = state
        .do_string("return setmetatable({}, { __index = function() return kill() end })")
        .unwrap()[0]
        .read::<lunaria::Table>()
        .unwrap();

    // The lookup completes on the still-open heap; only later calls see the disposal.
    assert_eq!(table.get::<Value>("missing").unwrap(), Value::Number(7.0));
    assert!(state.is_disposed());
    assert!(matches!(table.get::<Value>("missing"), Err(Error::Disposed(_))));
}

// ============================================================================
// Registry pins
// ============================================================================

#[test]
fn test_clones_share_one_pin() {
    let state = State::new().unwrap();
    let table = state.create_table().unwrap();
    let alias = table.clone();
    assert_eq!(state.registry_stats().outstanding(), 1);

    drop(table);
    assert_eq!(state.registry_stats().outstanding(), 1);
    assert!(!alias.is_disposed());

    drop(alias);
    assert!(state.registry_stats().is_balanced());
}

#[test]
fn test_dispose_through_clone_affects_all() {
    let state = State::new().unwrap();
    let table = state.create_table().unwrap();
    let alias = table.clone();
    alias.dispose();
    assert!(table.is_disposed());
    assert_eq!(table, alias);
    assert!(state.registry_stats().is_balanced());
}

#[test]
fn test_round_trips_do_not_leak_pins() {
    let state = State::new().unwrap();
    state.open_libraries().unwrap();
    let echo = state.do_string("return function(...) return ... end").unwrap()[0]
        .read::<lunaria::Function>()
        .unwrap();
    for _ in 0..32 {
        let table = state.create_table_from_values([1.0, 2.0]).unwrap();
        let out = echo.call(&[Value::Table(table), Value::from("s")]).unwrap();
        assert_eq!(out.len(), 2);
    }
    drop(echo);
    state.collect_garbage().unwrap();
    assert!(state.registry_stats().is_balanced());
}

// ============================================================================
// Ownership
// ============================================================================

#[test]
fn test_handle_rejected_by_other_state() {
    let a = State::new().unwrap();
    let b = State::new().unwrap();
    let table = a.create_table().unwrap();

    let err = b.set_global("t", &table).unwrap_err();
    assert_eq!(err, Error::CrossState("table"));
    assert!(err.is_usage_error());
    assert_eq!(b.top().unwrap(), 0);
}

#[test]
fn test_thread_rejected_by_other_heap() {
    let a = State::new().unwrap();
    let b = State::new().unwrap();
    let thread = a.create_thread().unwrap();
    assert_eq!(b.push(Value::Thread(thread)).unwrap_err(), Error::CrossState("thread"));
}

#[test]
fn test_xmove_requires_same_heap() {
    let a = State::new().unwrap();
    let b = State::new().unwrap();
    let thread = a.create_thread().unwrap();

    a.push(1.0).unwrap();
    a.xmove(&thread, 1).unwrap();
    assert_eq!(thread.pop().unwrap(), Value::Number(1.0));

    b.push(2.0).unwrap();
    assert_eq!(b.xmove(&thread, 1).unwrap_err(), Error::CrossState("value"));
}

// ============================================================================
// Identity
// ============================================================================

#[test]
fn test_thread_identity_is_stable() {
    let state = State::new().unwrap();
    state.open_libraries().unwrap();
    let values = state
        .do_string("local co = coroutine.create(function() end) return co, co")
        .unwrap();
    let (first, second) = match (&values[0], &values[1]) {
        (Value::Thread(a), Value::Thread(b)) => (a.clone(), b.clone()),
        other => panic!("expected threads, got {:?}", other),
    };
    assert!(first.same(&second));
    assert!(first.same_heap(&state));
    assert!(!first.is_main_thread());
    assert_eq!(first.status().unwrap(), ThreadStatus::Suspended);
    assert!(first.main_thread().unwrap().same(&state));
}
