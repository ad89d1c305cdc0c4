//! Scripts that `require` modules from disk

use std::fs;

use lunaria::Value;
use lunaria_runtime::{Runtime, RuntimeOptions};

#[test]
fn test_run_file_with_modules() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("vec.luau"), "return { add = function(a, b) return a + b end }").unwrap();
    fs::write(dir.path().join("main.luau"), "local vec = require('vec') return vec.add(40, 2)").unwrap();

    let mut options = RuntimeOptions::default();
    options.runtime.module_root = Some(dir.path().to_path_buf());
    let runtime = Runtime::new(options).unwrap();

    let values = runtime.run_file(&dir.path().join("main.luau")).unwrap();
    assert_eq!(values, vec![Value::Number(42.0)]);
}

#[test]
fn test_options_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(dir.path().join("lib/name.luau"), "return 'configured'").unwrap();
    fs::write(
        dir.path().join("lunaria.toml"),
        "[runtime]\nmodule_root = \"lib\"\nlibraries = [\"base\"]\n",
    )
    .unwrap();

    let options = RuntimeOptions::from_file(&dir.path().join("lunaria.toml")).unwrap();
    let runtime = Runtime::new(options).unwrap();
    let values = runtime.run_source("return require('name')", "config").unwrap();
    assert_eq!(values, vec![Value::from("configured")]);
}

#[test]
fn test_module_error_location() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bad.luau"), "error('broken module')").unwrap();

    let mut options = RuntimeOptions::default();
    options.runtime.module_root = Some(dir.path().to_path_buf());
    let runtime = Runtime::new(options).unwrap();

    let err = runtime.run_source("require('bad')", "main").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("bad.luau:1: broken module"), "{}", message);
}
