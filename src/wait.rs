//! Bounded waits over async primitives.
//!
//! The embassy-sync channel, signal and mutex used across the firmware are
//! async; blocking callers drive them with `futures_lite::future::block_on`
//! and race them against an `async_io_mini::Timer`.

use core::future::Future;
use core::time::Duration;

/// Block the current thread on `fut` for at most `timeout`.
///
/// Returns `None` if the timer fired first.  The future is dropped in that
/// case, so a pending lock or receive is abandoned cleanly.
pub fn block_on_timeout<F: Future>(fut: F, timeout: Duration) -> Option<F::Output> {
    futures_lite::future::block_on(futures_lite::future::or(
        async { Some(fut.await) },
        async {
            async_io_mini::Timer::after(timeout).await;
            None
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_future_completes() {
        assert_eq!(block_on_timeout(async { 7 }, Duration::from_millis(50)), Some(7));
    }

    #[test]
    fn pending_future_times_out() {
        let out = block_on_timeout(core::future::pending::<()>(), Duration::from_millis(20));
        assert_eq!(out, None);
    }
}
