//! Pluggable lock strategies.
//!
//! Containers that want to be usable both single-threaded and shared between
//! threads have a problem: the locking they need in one setting is pure
//! overhead in the other, and even when locking is wanted, which primitive
//! (a mutex? a readers/writer lock? one lock shared across five containers?)
//! is the caller's call, not the container's.
//!
//! This crate decouples the two. A [`Locker`] bundles a lock with the five
//! abstract operations a container needs (`try_read`, `read`, `try_write`,
//! `write`, `unlock`) behind one cheap, cloneable handle. The null locker
//! ([`Locker::none`]) performs no synchronisation at all: every operation
//! returns success immediately, so the same container code compiles into an
//! unsynchronised build and a synchronised one by swapping the value plugged
//! in at construction.
//!
//! Cloning a `Locker` shares the underlying lock, which is how one lock is
//! stretched over any number of containers (trading concurrency for
//! overhead).
//!
//! The [`cell`] module provides the other half of the story: the aliasing
//! guard a container interposes between its `&self` API and its mutable
//! innards, so that a misused null locker fails fast instead of racing.

pub mod cell;

use parking_lot::lock_api::RawMutex as _;
use quick_error::quick_error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

quick_error! {
    /// A lock-strategy error.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Error {
        /// A try-lock found the lock already held (or queued for).
        Busy {
            display("the lock is busy")
        }
        /// An unlock of a lock that is not held.
        Unheld {
            display("unlock of a lock that is not held")
        }
    }
}

impl From<prwlock::Unheld> for Error {
    fn from(_: prwlock::Unheld) -> Error {
        Error::Unheld
    }
}

/// The five abstract operations of a lock strategy.
///
/// Implementations are expected to be balanced by their callers: every
/// successful acquisition is paired with exactly one [`unlock`], from the
/// same thread. `unlock` is a single operation on purpose: the strategy is
/// responsible for knowing whether it is releasing a read or a write
/// acquisition (a mutex does not care; a readers/writer lock tracks it in its
/// own state).
///
/// [`unlock`]: LockStrategy::unlock
pub trait LockStrategy: Send + Sync {
    /// Acquire for reading without blocking.
    fn try_read(&self) -> Result<(), Error>;

    /// Acquire for reading.
    fn read(&self) -> Result<(), Error>;

    /// Acquire for writing without blocking.
    fn try_write(&self) -> Result<(), Error>;

    /// Acquire for writing.
    fn write(&self) -> Result<(), Error>;

    /// Release, whichever way the lock is held.
    fn unlock(&self) -> Result<(), Error>;
}

/// A lock strategy handle.
///
/// The handle is either null (no synchronisation, every operation succeeds
/// immediately) or a shared reference to some [`LockStrategy`]. Clones share
/// the strategy.
#[derive(Clone, Default)]
pub struct Locker {
    /// The strategy, if any.
    strategy: Option<Arc<dyn LockStrategy>>,
}

impl Locker {
    /// The null locker: never synchronises, never fails.
    pub fn none() -> Locker {
        Locker { strategy: None }
    }

    /// A locker over a fresh mutex.
    ///
    /// Read and write acquisitions both take the one exclusive lock, so this
    /// trades away reader concurrency for the cheapest possible primitive.
    pub fn mutex() -> Locker {
        Locker::custom(MutexStrategy::new())
    }

    /// A locker over a fresh readers/writer lock.
    ///
    /// The five operations map one-to-one onto [`prwlock::RwLock`].
    pub fn rwlock() -> Locker {
        Locker::custom(RwStrategy::new())
    }

    /// Like [`Locker::mutex`], but every operation is logged to `log` before
    /// and after the underlying call.
    ///
    /// The records carry the calling thread, the operation name, and the lock
    /// address, which is usually enough to reconstruct the interleaving that
    /// led to a deadlock. Expect a measurable cost per lock event.
    pub fn debug_mutex(log: slog::Logger) -> Locker {
        Locker::custom(Trace {
            log,
            inner: MutexStrategy::new(),
        })
    }

    /// Like [`Locker::rwlock`], but with the debug logging of
    /// [`Locker::debug_mutex`].
    pub fn debug_rwlock(log: slog::Logger) -> Locker {
        Locker::custom(Trace {
            log,
            inner: RwStrategy::new(),
        })
    }

    /// A locker over any other synchronisation strategy.
    pub fn custom<S: LockStrategy + 'static>(strategy: S) -> Locker {
        Locker {
            strategy: Some(Arc::new(strategy)),
        }
    }

    /// Is this the null locker?
    pub fn is_none(&self) -> bool {
        self.strategy.is_none()
    }

    /// Acquire for reading without blocking.
    pub fn try_read(&self) -> Result<(), Error> {
        match self.strategy {
            Some(ref strategy) => strategy.try_read(),
            None => Ok(()),
        }
    }

    /// Acquire for reading.
    pub fn read(&self) -> Result<(), Error> {
        match self.strategy {
            Some(ref strategy) => strategy.read(),
            None => Ok(()),
        }
    }

    /// Acquire for writing without blocking.
    pub fn try_write(&self) -> Result<(), Error> {
        match self.strategy {
            Some(ref strategy) => strategy.try_write(),
            None => Ok(()),
        }
    }

    /// Acquire for writing.
    pub fn write(&self) -> Result<(), Error> {
        match self.strategy {
            Some(ref strategy) => strategy.write(),
            None => Ok(()),
        }
    }

    /// Release.
    pub fn unlock(&self) -> Result<(), Error> {
        match self.strategy {
            Some(ref strategy) => strategy.unlock(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Locker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.strategy {
            Some(ref strategy) => write!(f, "Locker({:p})", Arc::as_ptr(strategy)),
            None => write!(f, "Locker(none)"),
        }
    }
}

/// The mutex strategy: read and write both take the exclusive lock.
struct MutexStrategy {
    /// The raw lock. A raw (guard-less) mutex because acquire and release
    /// happen in different stack frames.
    raw: parking_lot::RawMutex,
    /// Whether the lock is currently held.
    ///
    /// The raw mutex cannot be asked, and releasing a raw mutex that is not
    /// held corrupts it; this flag turns that misuse into an `Unheld` error.
    held: AtomicBool,
}

impl MutexStrategy {
    fn new() -> MutexStrategy {
        MutexStrategy {
            raw: parking_lot::RawMutex::INIT,
            held: AtomicBool::new(false),
        }
    }

    fn acquire(&self) -> Result<(), Error> {
        self.raw.lock();
        self.held.store(true, Ordering::Release);
        Ok(())
    }

    fn try_acquire(&self) -> Result<(), Error> {
        if self.raw.try_lock() {
            self.held.store(true, Ordering::Release);
            Ok(())
        } else {
            Err(Error::Busy)
        }
    }
}

impl LockStrategy for MutexStrategy {
    fn try_read(&self) -> Result<(), Error> {
        self.try_acquire()
    }

    fn read(&self) -> Result<(), Error> {
        self.acquire()
    }

    fn try_write(&self) -> Result<(), Error> {
        self.try_acquire()
    }

    fn write(&self) -> Result<(), Error> {
        self.acquire()
    }

    fn unlock(&self) -> Result<(), Error> {
        if self.held.swap(false, Ordering::AcqRel) {
            // We hold the lock (the flag can only be set by a successful
            // acquisition that has not been released yet), so the raw unlock
            // is balanced.
            unsafe { self.raw.unlock() }
            Ok(())
        } else {
            Err(Error::Unheld)
        }
    }
}

/// The readers/writer strategy.
struct RwStrategy {
    lock: prwlock::RwLock,
}

impl RwStrategy {
    fn new() -> RwStrategy {
        RwStrategy {
            lock: prwlock::RwLock::new(),
        }
    }
}

impl LockStrategy for RwStrategy {
    fn try_read(&self) -> Result<(), Error> {
        if self.lock.try_read() {
            Ok(())
        } else {
            Err(Error::Busy)
        }
    }

    fn read(&self) -> Result<(), Error> {
        self.lock.read();
        Ok(())
    }

    fn try_write(&self) -> Result<(), Error> {
        if self.lock.try_write() {
            Ok(())
        } else {
            Err(Error::Busy)
        }
    }

    fn write(&self) -> Result<(), Error> {
        self.lock.write();
        Ok(())
    }

    fn unlock(&self) -> Result<(), Error> {
        self.lock.unlock()?;
        Ok(())
    }
}

/// A tracing wrapper around any strategy.
///
/// Logs one record before and one after every operation. The output looks
/// like
///
/// ```text
/// [ThreadId(2)] write(0x7f31c4001a30) ...
/// [ThreadId(2)] write(0x7f31c4001a30) done
/// ```
///
/// with the error appended to `done` when the operation fails.
struct Trace<S> {
    /// Where the records go.
    log: slog::Logger,
    /// The strategy being traced.
    inner: S,
}

impl<S: LockStrategy> Trace<S> {
    fn invoke(&self, name: &str, op: fn(&S) -> Result<(), Error>) -> Result<(), Error> {
        let lock = &self.inner as *const S as *const ();
        let tid = thread::current().id();

        slog::debug!(self.log, "[{:?}] {}({:p}) ...", tid, name, lock);

        let result = op(&self.inner);

        match result {
            Ok(()) => slog::debug!(self.log, "[{:?}] {}({:p}) done", tid, name, lock),
            Err(err) => slog::debug!(self.log, "[{:?}] {}({:p}) done ({})", tid, name, lock, err),
        }

        result
    }
}

impl<S: LockStrategy> LockStrategy for Trace<S> {
    fn try_read(&self) -> Result<(), Error> {
        self.invoke("try_read", S::try_read)
    }

    fn read(&self) -> Result<(), Error> {
        self.invoke("read", S::read)
    }

    fn try_write(&self) -> Result<(), Error> {
        self.invoke("try_write", S::try_write)
    }

    fn write(&self) -> Result<(), Error> {
        self.invoke("write", S::write)
    }

    fn unlock(&self) -> Result<(), Error> {
        self.invoke("unlock", S::unlock)
    }
}
