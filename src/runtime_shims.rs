//! Runtime symbol providers for third-party crates.
//!
//! `async_io_mini::Timer` reads its clock and schedules wake-ups through the
//! `embassy-time-driver` hooks `_embassy_time_now` and
//! `_embassy_time_schedule_wake`, ticking at 1 MHz.  On target they are backed
//! by `esp_timer`, together with the `critical-section` 1.x acquire/release
//! pair used by `embassy-sync`.  On the host a monotonic clock from process
//! start stands in; `critical-section` comes from its `std` feature there.

use core::task::Waker;
use core::time::Duration;

/// Wake `waker` once the clock reaches `at`, from a short-lived thread.
fn wake_at(at: u64, waker: &Waker, now: fn() -> u64) {
    let pending = waker.clone();
    let spawned = std::thread::Builder::new()
        .name("time-wake".into())
        .spawn(move || {
            let current = now();
            if at > current {
                std::thread::sleep(Duration::from_micros(at - current));
            }
            pending.wake();
        });
    if let Err(e) = spawned {
        // The timer re-polls on wake and schedules itself again.
        log::warn!("Timer: wake thread not started: {}", e);
        waker.wake_by_ref();
    }
}

// ---------------------------------------------------------------------------
// ESP-IDF
// ---------------------------------------------------------------------------

#[cfg(target_os = "espidf")]
mod esp {
    use core::cell::{Cell, RefCell};
    use core::task::Waker;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static CRITICAL_SECTION_MUTEX: Mutex<()> = Mutex::new(());

    thread_local! {
        static CRITICAL_SECTION_DEPTH: Cell<u8> = const { Cell::new(0) };
        static CRITICAL_SECTION_GUARD: RefCell<Option<MutexGuard<'static, ()>>> =
            const { RefCell::new(None) };
    }

    /// Runtime-backed critical-section acquire used by `critical-section` 1.x.
    #[unsafe(no_mangle)]
    pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
        CRITICAL_SECTION_DEPTH.with(|depth| {
            CRITICAL_SECTION_GUARD.with(|guard| {
                let d = depth.get();
                if d == 0 {
                    let lock = CRITICAL_SECTION_MUTEX
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    *guard.borrow_mut() = Some(lock);
                }
                let new_depth = d.saturating_add(1);
                depth.set(new_depth);
                new_depth
            })
        })
    }

    /// Runtime-backed critical-section release used by `critical-section` 1.x.
    #[unsafe(no_mangle)]
    pub extern "C" fn _critical_section_1_0_release(_token: u8) {
        CRITICAL_SECTION_DEPTH.with(|depth| {
            CRITICAL_SECTION_GUARD.with(|guard| {
                let d = depth.get();
                if d == 0 {
                    return;
                }
                let new_depth = d - 1;
                depth.set(new_depth);
                if new_depth == 0 {
                    *guard.borrow_mut() = None;
                }
            })
        })
    }

    /// Microseconds since boot.
    #[unsafe(no_mangle)]
    pub fn _embassy_time_now() -> u64 {
        // SAFETY: `esp_timer_get_time` has no preconditions once the
        // scheduler runs.
        unsafe { esp_idf_svc::sys::esp_timer_get_time() as u64 }
    }

    /// Runtime-backed wake scheduler for async timers.
    #[unsafe(no_mangle)]
    pub fn _embassy_time_schedule_wake(at: u64, waker: &Waker) {
        super::wake_at(at, waker, _embassy_time_now);
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "espidf"))]
mod host {
    use core::task::Waker;
    use std::sync::OnceLock;
    use std::time::Instant;

    fn epoch() -> Instant {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        *EPOCH.get_or_init(Instant::now)
    }

    /// Microseconds since the clock was first read.
    #[unsafe(no_mangle)]
    pub fn _embassy_time_now() -> u64 {
        epoch().elapsed().as_micros() as u64
    }

    #[unsafe(no_mangle)]
    pub fn _embassy_time_schedule_wake(at: u64, waker: &Waker) {
        super::wake_at(at, waker, _embassy_time_now);
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn clock_is_monotonic() {
        let a = host::_embassy_time_now();
        std::thread::sleep(Duration::from_millis(2));
        let b = host::_embassy_time_now();
        assert!(b >= a + 2_000);
    }

    #[test]
    fn timer_fires_after_its_delay() {
        let start = Instant::now();
        futures_lite::future::block_on(async_io_mini::Timer::after(Duration::from_millis(30)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_secs(2));
    }
}
