//! Host functions the runtime installs as globals.

use std::time::{Duration, Instant};

use lunaria::{Error, Function, State};

/// Longest single `wait` a script may request.
const MAX_WAIT_SECS: f64 = 24.0 * 60.0 * 60.0;

/// `wait(seconds?) -> elapsed`
///
/// Suspends the calling coroutine for `seconds` (default 0) and returns the
/// seconds actually elapsed. A zero wait returns immediately, so it also works
/// in synchronous runs. A positive wait needs an asynchronous run on a tokio
/// runtime; cancelling the run interrupts the sleep.
pub fn create_wait(state: &State) -> lunaria::Result<Function> {
    state.create_async_function("wait", |state, cancel| {
        let requested = state.arg::<Option<f64>>(1);
        async move {
            let seconds = requested?.unwrap_or(0.0);
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "bad argument #1 to 'wait' (non-negative number expected, got {})",
                    seconds
                )));
            }
            let started = Instant::now();
            if seconds > 0.0 {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(Error::runtime("wait requires an asynchronous run"));
                }
                let duration = Duration::from_secs_f64(seconds.min(MAX_WAIT_SECS));
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
            state.push(started.elapsed().as_secs_f64())?;
            Ok(1)
        }
    })
}
