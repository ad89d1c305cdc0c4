//! The asynchronous `wait` global

use std::time::Duration;

use lunaria::{CancellationToken, Error, Value};
use lunaria_runtime::RuntimeError;

use super::harness::{expect_error, runtime};

#[tokio::test]
async fn test_wait_inside_script() {
    let runtime = runtime();
    let values = runtime
        .run_source_async("wait(0.01) return 'woke'", "timer", None)
        .await
        .unwrap();
    assert_eq!(values, vec![Value::from("woke")]);
}

#[tokio::test]
async fn test_wait_inside_script_coroutines() {
    let runtime = runtime();
    let values = runtime
        .run_source_async(
            r#"
            local log = {}
            local co = coroutine.create(function()
                table.insert(log, 'start')
                coroutine.yield()
                table.insert(log, 'end')
            end)
            coroutine.resume(co)
            wait(0.005)
            coroutine.resume(co)
            return table.concat(log, ',')
            "#,
            "coroutines",
            None,
        )
        .await
        .unwrap();
    assert_eq!(values, vec![Value::from("start,end")]);
}

#[tokio::test]
async fn test_cancel_interrupts_wait() {
    let runtime = runtime();
    let token = CancellationToken::new();
    let canceller = token.clone();

    let (result, _) = tokio::join!(
        runtime.run_source_async("wait(30) return 1", "sleepy", Some(&token)),
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        }
    );

    match result {
        Err(RuntimeError::Luau(Error::Cancelled)) => {}
        other => panic!("expected cancellation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_wait_can_be_caught() {
    let runtime = runtime();
    let token = CancellationToken::new();
    token.cancel();
    let values = runtime
        .run_source_async("return pcall(wait, 1)", "caught", Some(&token))
        .await
        .unwrap();
    assert_eq!(values[0], Value::Boolean(false));
    assert!(values[1].as_str().unwrap().contains("cancelled"));
}

#[test]
fn test_wait_in_sync_run() {
    expect_error("wait(1)", "asynchronous run");
}
