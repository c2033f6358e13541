//! Portable readers/writer lock.
//!
//! This crate implements a readers/writer lock from first principles: one
//! mutex guarding the bookkeeping, one condition variable for waiting readers
//! and one for waiting writers. Any number of readers may hold the lock at
//! once; writers are exclusive and have priority, so a stream of readers
//! cannot starve a queued writer.
//!
//! Unlike the usual guard-based lock APIs, acquisition and release are
//! separate calls with no RAII tie between them. That is the point: the lock
//! is meant to sit behind a lock-strategy object whose acquire and release
//! happen in different stack frames (one per container operation), where a
//! borrowing guard cannot be threaded through. Release is still safe:
//! [`RwLock::unlock`] consults the lock state to tell a reader release from a
//! writer release, and unlocking an idle lock reports an error rather than
//! corrupting the state.

use parking_lot::{Condvar, Mutex};
use std::error;
use std::fmt;

/// Error returned when unlocking a lock that is not held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unheld;

impl fmt::Display for Unheld {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unlock of a lock that is not held")
    }
}

impl error::Error for Unheld {}

/// The bookkeeping behind the guard mutex.
struct State {
    /// `-1` when a writer holds the lock, `0` when idle, and the reader count
    /// otherwise.
    held: isize,
    /// The number of writers queued for the lock. Writers dequeue themselves
    /// once they have acquired, so an active writer is not counted here.
    waiters: usize,
}

/// A writer-priority readers/writer lock.
///
/// # Example
///
/// ```
/// let lock = prwlock::RwLock::new();
///
/// lock.read();
/// lock.read();
/// assert!(!lock.try_write());
/// lock.unlock().unwrap();
/// lock.unlock().unwrap();
/// assert!(lock.try_write());
/// lock.unlock().unwrap();
/// ```
pub struct RwLock {
    /// The mutex guarding `State`. Every transition of the bookkeeping
    /// happens with this held, which is what keeps the state machine sound:
    /// there is no window in which `held` and `waiters` disagree. (The
    /// pthread implementation this descends from needed cancellation cleanup
    /// handlers around its waits; a condition variable wait cannot unwind
    /// here, so the repair logic has no counterpart.)
    guard: Mutex<State>,
    /// Where readers wait while a writer is active or queued.
    readers: Condvar,
    /// Where writers wait for the lock to go idle.
    writers: Condvar,
}

impl RwLock {
    /// Create an idle lock.
    pub fn new() -> RwLock {
        RwLock {
            guard: Mutex::new(State {
                held: 0,
                waiters: 0,
            }),
            readers: Condvar::new(),
            writers: Condvar::new(),
        }
    }

    /// Acquire the lock for reading, blocking while any writer is active or
    /// queued.
    pub fn read(&self) {
        let mut state = self.guard.lock();

        // Writers have priority: a reader waits not only for an active writer
        // to finish but also while any writer is queued.
        while state.held == -1 || state.waiters > 0 {
            self.readers.wait(&mut state);
        }

        state.held += 1;
    }

    /// Acquire the lock for reading without blocking.
    ///
    /// Returns `false` when a writer is active or queued.
    pub fn try_read(&self) -> bool {
        let mut state = self.guard.lock();

        if state.held != -1 && state.waiters == 0 {
            state.held += 1;
            true
        } else {
            false
        }
    }

    /// Acquire the lock for writing, blocking until all readers have
    /// finished.
    pub fn write(&self) {
        let mut state = self.guard.lock();

        // Queue this writer. From here on new readers will block.
        state.waiters += 1;

        while state.held != 0 {
            self.writers.wait(&mut state);
        }

        state.held = -1;
        // Dequeue: an active writer no longer counts as waiting.
        state.waiters -= 1;
    }

    /// Acquire the lock for writing without blocking.
    ///
    /// Returns `false` when the lock is held by anyone, or when another
    /// writer is already queued.
    pub fn try_write(&self) -> bool {
        let mut state = self.guard.lock();

        if state.held == 0 && state.waiters == 0 {
            state.held = -1;
            true
        } else {
            false
        }
    }

    /// Release the lock, whichever way it is held.
    ///
    /// A writer release wakes one queued writer if any, otherwise all waiting
    /// readers. The last reader out wakes one queued writer. Unlocking an
    /// idle lock returns [`Unheld`] and changes nothing.
    pub fn unlock(&self) -> Result<(), Unheld> {
        let mut state = self.guard.lock();

        if state.held == -1 {
            // Writer release. Mark the lock idle, then prefer queued writers
            // over readers.
            state.held = 0;

            if state.waiters > 0 {
                drop(state);
                self.writers.notify_one();
            } else {
                drop(state);
                self.readers.notify_all();
            }

            Ok(())
        } else if state.held > 0 {
            // Reader release. Only the last reader out has anyone to wake,
            // and the only parties waiting at that point are writers (readers
            // never wait behind readers).
            state.held -= 1;

            if state.held == 0 {
                drop(state);
                self.writers.notify_one();
            }

            Ok(())
        } else {
            Err(Unheld)
        }
    }

    /// Snapshot of `(held, waiters)` for the invariant tests.
    #[cfg(test)]
    fn snapshot(&self) -> (isize, usize) {
        let state = self.guard.lock();
        (state.held, state.waiters)
    }
}

impl Default for RwLock {
    fn default() -> RwLock {
        RwLock::new()
    }
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.guard.lock();
        f.debug_struct("RwLock")
            .field("held", &state.held)
            .field("waiters", &state.waiters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_share() {
        let lock = RwLock::new();

        lock.read();
        lock.read();
        lock.read();
        assert_eq!(lock.snapshot(), (3, 0));

        assert!(!lock.try_write());

        lock.unlock().unwrap();
        lock.unlock().unwrap();
        lock.unlock().unwrap();
        assert_eq!(lock.snapshot(), (0, 0));

        assert!(lock.try_write());
        lock.unlock().unwrap();
    }

    #[test]
    fn writer_excludes() {
        let lock = RwLock::new();

        lock.write();
        assert_eq!(lock.snapshot(), (-1, 0));
        assert!(!lock.try_read());
        assert!(!lock.try_write());

        lock.unlock().unwrap();
        assert!(lock.try_read());
        lock.unlock().unwrap();
    }

    #[test]
    fn unlock_idle_is_an_error() {
        let lock = RwLock::new();
        assert_eq!(lock.unlock(), Err(Unheld));

        // And the failed unlock must not have perturbed anything.
        lock.write();
        lock.unlock().unwrap();
        assert_eq!(lock.unlock(), Err(Unheld));
    }

    #[test]
    fn queued_writer_blocks_new_readers() {
        let lock = Arc::new(RwLock::new());

        lock.read();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.write();
                lock.unlock().unwrap();
            })
        };

        // Wait for the writer to queue up behind our read lock.
        while lock.snapshot().1 == 0 {
            thread::yield_now();
        }

        // Writer priority: a new reader must not slip past the queued writer.
        assert!(!lock.try_read());

        lock.unlock().unwrap();
        writer.join().unwrap();

        assert!(lock.try_read());
        lock.unlock().unwrap();
    }

    #[test]
    fn stress_readers_and_writers() {
        // Writers update two counters under the write lock; readers assert
        // under the read lock that they never observe them out of step. The
        // counters are atomics only so the test itself is race-free; the
        // consistency of the two values is entirely down to the lock.
        let lock = Arc::new(RwLock::new());
        let a = Arc::new(AtomicU64::new(0));
        let b = Arc::new(AtomicU64::new(0));
        let mut joins = Vec::new();

        for _ in 0..4 {
            let lock = lock.clone();
            let a = a.clone();
            let b = b.clone();
            joins.push(thread::spawn(move || {
                for _ in 0..200 {
                    lock.write();
                    let next = a.load(Ordering::Relaxed) + 1;
                    a.store(next, Ordering::Relaxed);
                    thread::sleep(Duration::from_micros(10));
                    b.store(next, Ordering::Relaxed);
                    lock.unlock().unwrap();
                }
            }));
        }

        for _ in 0..8 {
            let lock = lock.clone();
            let a = a.clone();
            let b = b.clone();
            joins.push(thread::spawn(move || {
                for _ in 0..200 {
                    lock.read();
                    assert_eq!(a.load(Ordering::Relaxed), b.load(Ordering::Relaxed));
                    lock.unlock().unwrap();
                }
            }));
        }

        for join in joins {
            join.join().unwrap();
        }

        assert_eq!(a.load(Ordering::Relaxed), 800);
        assert_eq!(lock.snapshot(), (0, 0));
    }

    #[test]
    fn writer_handoff() {
        // Two writers contending for the lock held by a reader; both must
        // eventually get through, one at a time.
        let lock = Arc::new(RwLock::new());

        lock.read();

        let mut writers = Vec::new();
        for _ in 0..2 {
            let lock = lock.clone();
            writers.push(thread::spawn(move || {
                lock.write();
                thread::sleep(Duration::from_millis(1));
                lock.unlock().unwrap();
            }));
        }

        while lock.snapshot().1 < 2 {
            thread::yield_now();
        }

        lock.unlock().unwrap();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(lock.snapshot(), (0, 0));
    }
}
