//! Test harness for running scripts through a default runtime

use lunaria::Value;
use lunaria_runtime::{Runtime, RuntimeError, RuntimeOptions};

/// Runtime with every library and `wait`, but no `require`.
pub fn runtime() -> Runtime {
    let mut options = RuntimeOptions::default();
    options.runtime.require = false;
    Runtime::new(options).expect("runtime should build")
}

/// Run `source` and return its values.
pub fn run(source: &str) -> Result<Vec<Value>, RuntimeError> {
    runtime().run_source(source, "test")
}

/// Run `source` and expect a single number.
pub fn expect_number(source: &str, expected: f64) {
    let values = run(source).unwrap_or_else(|e| panic!("script failed: {}", e));
    assert_eq!(values, vec![Value::Number(expected)], "source: {}", source);
}

/// Run `source` and expect a single string.
pub fn expect_string(source: &str, expected: &str) {
    let values = run(source).unwrap_or_else(|e| panic!("script failed: {}", e));
    assert_eq!(values, vec![Value::from(expected)], "source: {}", source);
}

/// Run `source` and expect a single boolean.
pub fn expect_bool(source: &str, expected: bool) {
    let values = run(source).unwrap_or_else(|e| panic!("script failed: {}", e));
    assert_eq!(values, vec![Value::Boolean(expected)], "source: {}", source);
}

/// Run `source` and expect a script error containing `fragment`.
pub fn expect_error(source: &str, fragment: &str) {
    match run(source) {
        Ok(values) => panic!("expected an error, got {:?}", values),
        Err(err) => {
            assert!(err.is_script_error(), "not a script error: {}", err);
            assert!(err.to_string().contains(fragment), "{}", err);
        }
    }
}
