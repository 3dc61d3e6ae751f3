// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-shared pthread primitives for placement inside a shared memory segment.
//!
//! Both types are `#[repr(C)]` and must be initialized in place exactly once, by the segment
//! creator, before any other party maps the segment. Condition waits use `CLOCK_MONOTONIC` so
//! wall-clock adjustments cannot stall the exchange protocol.

/* ---------------------------------------------------------------------------------------------- */

use std::cell::UnsafeCell;
use std::io;
use std::time::Duration;

use crate::error::Result;

/* ---------------------------------------------------------------------------------------------- */

/// A pthread mutex shared between processes.
#[repr(C)]
pub struct RawMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

impl RawMutex {
    /// Initialize the mutex in place.
    ///
    /// # Safety
    ///
    /// Must be called exactly once per segment lifetime, before any `lock`.
    pub unsafe fn init(&self) -> Result<()> {
        let mut attr = std::mem::zeroed::<libc::pthread_mutexattr_t>();
        check(libc::pthread_mutexattr_init(&mut attr))?;
        check(libc::pthread_mutexattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        let rc = libc::pthread_mutex_init(self.inner.get(), &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        check(rc)
    }

    pub fn lock(&self) -> MutexGuard<'_> {
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        assert_eq!(rc, 0, "locking a shared mutex failed");
        MutexGuard { mutex: self }
    }
}

impl std::fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawMutex")
    }
}

/// Proof of holding a [`RawMutex`]; unlocks on drop.
///
/// The exchange structures require a guard reference for every state access, which makes
/// unlocked access a compile error.
#[derive(Debug)]
pub struct MutexGuard<'a> {
    mutex: &'a RawMutex,
}

impl MutexGuard<'_> {
    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.mutex.inner.get()
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.raw()) };
        debug_assert_eq!(rc, 0);
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// A pthread condition variable shared between processes, clocked on `CLOCK_MONOTONIC`.
#[repr(C)]
pub struct RawCond {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for RawCond {}
unsafe impl Sync for RawCond {}

impl RawCond {
    /// Initialize the condition variable in place.
    ///
    /// # Safety
    ///
    /// Must be called exactly once per segment lifetime, before any wait or notify.
    pub unsafe fn init(&self) -> Result<()> {
        let mut attr = std::mem::zeroed::<libc::pthread_condattr_t>();
        check(libc::pthread_condattr_init(&mut attr))?;
        check(libc::pthread_condattr_setpshared(
            &mut attr,
            libc::PTHREAD_PROCESS_SHARED,
        ))?;
        check(libc::pthread_condattr_setclock(
            &mut attr,
            libc::CLOCK_MONOTONIC,
        ))?;
        let rc = libc::pthread_cond_init(self.inner.get(), &attr);
        libc::pthread_condattr_destroy(&mut attr);
        check(rc)
    }

    /// Wait until notified, releasing the guard's mutex while blocked.
    pub fn wait(&self, guard: &mut MutexGuard<'_>) {
        let rc = unsafe { libc::pthread_cond_wait(self.inner.get(), guard.raw()) };
        assert_eq!(rc, 0, "waiting on a shared condition failed");
    }

    /// Wait until notified or until `timeout` elapses. Returns `false` on timeout.
    ///
    /// Spurious wakeups return `true`; callers re-check their predicate in a loop.
    pub fn timed_wait(&self, guard: &mut MutexGuard<'_>, timeout: Duration) -> bool {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
        assert_eq!(rc, 0);

        let mut deadline = now;
        deadline.tv_sec += timeout.as_secs() as libc::time_t;
        deadline.tv_nsec += timeout.subsec_nanos() as libc::c_long;
        if deadline.tv_nsec >= 1_000_000_000 {
            deadline.tv_sec += 1;
            deadline.tv_nsec -= 1_000_000_000;
        }

        let rc =
            unsafe { libc::pthread_cond_timedwait(self.inner.get(), guard.raw(), &deadline) };
        match rc {
            0 => true,
            libc::ETIMEDOUT => false,
            other => panic!("waiting on a shared condition failed: {}", other),
        }
    }

    pub fn notify_one(&self) {
        let rc = unsafe { libc::pthread_cond_signal(self.inner.get()) };
        debug_assert_eq!(rc, 0);
    }

    pub fn notify_all(&self) {
        let rc = unsafe { libc::pthread_cond_broadcast(self.inner.get()) };
        debug_assert_eq!(rc, 0);
    }
}

impl std::fmt::Debug for RawCond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawCond")
    }
}

/* ---------------------------------------------------------------------------------------------- */

fn check(rc: libc::c_int) -> Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc).into())
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;
    use std::sync::Arc;
    use std::time::Instant;

    fn mutex() -> Arc<RawMutex> {
        let mutex = Arc::new(unsafe { MaybeUninit::<RawMutex>::zeroed().assume_init() });
        unsafe { mutex.init().unwrap() };
        mutex
    }

    fn cond() -> Arc<RawCond> {
        let cond = Arc::new(unsafe { MaybeUninit::<RawCond>::zeroed().assume_init() });
        unsafe { cond.init().unwrap() };
        cond
    }

    #[test]
    fn guard_releases_on_drop() {
        let mutex = mutex();
        drop(mutex.lock());
        drop(mutex.lock());
    }

    #[test]
    fn timed_wait_reports_timeout() {
        let mutex = mutex();
        let cond = cond();

        let mut guard = mutex.lock();
        let start = Instant::now();
        let signaled = cond.timed_wait(&mut guard, Duration::from_millis(10));
        assert!(!signaled);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn notify_wakes_a_timed_waiter() {
        let mutex = mutex();
        let cond = cond();

        let waiter = {
            let mutex = mutex.clone();
            let cond = cond.clone();
            std::thread::spawn(move || {
                let mut guard = mutex.lock();
                cond.timed_wait(&mut guard, Duration::from_secs(5))
            })
        };

        // let the waiter reach the wait before signaling
        std::thread::sleep(Duration::from_millis(50));
        drop(mutex.lock());
        cond.notify_all();

        assert!(waiter.join().unwrap());
    }
}

/* ---------------------------------------------------------------------------------------------- */
