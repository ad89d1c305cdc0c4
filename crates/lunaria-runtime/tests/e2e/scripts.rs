//! Plain scripts against the standard libraries

use super::harness::{expect_bool, expect_error, expect_number, expect_string, run};
use lunaria::Value;

// ============================================================================
// Values
// ============================================================================

#[test]
fn test_arithmetic() {
    expect_number("return (2 + 3) * 4 - 1", 19.0);
    expect_number("return 7 // 2", 3.0);
    expect_number("return 2 ^ 10", 1024.0);
}

#[test]
fn test_strings() {
    expect_string("return string.upper('luau')", "LUAU");
    expect_string("return ('%d-%s'):format(4, 'x')", "4-x");
    expect_number("return #'hello'", 5.0);
}

#[test]
fn test_multiple_returns() {
    let values = run("return 1, nil, 'three'").unwrap();
    assert_eq!(values, vec![Value::Number(1.0), Value::Nil, Value::from("three")]);
}

#[test]
fn test_no_returns() {
    assert!(run("local x = 1").unwrap().is_empty());
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn test_closures() {
    expect_number(
        r#"
        local function counter()
            local n = 0
            return function() n += 1 return n end
        end
        local c = counter()
        c() c()
        return c()
        "#,
        3.0,
    );
}

#[test]
fn test_script_coroutines() {
    expect_number(
        r#"
        local co = coroutine.wrap(function()
            for i = 1, 3 do coroutine.yield(i) end
        end)
        return co() + co() + co()
        "#,
        6.0,
    );
}

#[test]
fn test_table_library() {
    expect_string(
        r#"
        local t = { 'c', 'a', 'b' }
        table.sort(t)
        return table.concat(t, ',')
        "#,
        "a,b,c",
    );
}

#[test]
fn test_buffer_library() {
    expect_number(
        r#"
        local b = buffer.create(4)
        buffer.writeu32(b, 0, 123456)
        return buffer.readu32(b, 0)
        "#,
        123456.0,
    );
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_error_carries_message() {
    expect_error("error('exploded')", "test:1: exploded");
}

#[test]
fn test_pcall_recovers() {
    expect_bool("return (pcall(error, 'x'))", false);
}

#[test]
fn test_syntax_error() {
    expect_error("local = 1", "test");
}
