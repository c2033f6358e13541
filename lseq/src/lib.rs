//! An indexed, resizable, optionally lock-guarded sequence.
//!
//! The sequence comes in two planes. [`RawSeq`] is the container itself:
//! every operation, mutation through `&mut self`, no locking anywhere.
//! [`Seq`] wraps a raw sequence together with a [`locker::Locker`] and gives
//! the same operations a `&self` face: each one acquires the locker (read for
//! read-only operations, write otherwise), delegates to the raw plane, and
//! releases. A sequence built with the null locker pays two uncontended
//! atomic updates per operation and nothing else, so the same code serves the
//! single-threaded and the shared case; which lock (if any) is plugged in is
//! decided once, at construction.
//!
//! For composing several operations under one lock acquisition, [`Seq::read`]
//! and [`Seq::write`] return RAII guards deref-ing to the raw plane, the
//! moral equivalent of the C tradition's `_unlocked` function families, with
//! the discipline enforced by the borrow checker instead of the manual.
//!
//! Item ownership is explicit: a sequence created with a dispose function
//! destroys every item that leaves it (except those handed back to the
//! caller, e.g. by [`Seq::pop`]), and [`Seq::disown`] transfers that
//! responsibility back out. See [`RawSeq`] for the details, including the
//! relative index convention (`-1` is the append position, `-2` the last
//! item).

mod raw;


pub use raw::{RawCursor, RawSeq};

use locker::cell::{Exclusive, Protected, Shared};
use locker::Locker;
use quick_error::quick_error;
use std::cmp::Ordering;
use std::fmt;
use std::mem::ManuallyDrop;

/// An item destructor. Items leaving an owning sequence go through one of
/// these exactly once.
pub type Dispose<T> = fn(T);

/// An item copier, for the operations that duplicate items between
/// sequences.
pub type CopyFn<T> = fn(&T) -> T;

quick_error! {
    /// A sequence error.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Error {
        /// An index out of range (after relative mapping).
        Bounds(index: isize, len: usize) {
            display("index {} out of range for length {}", index, len)
        }
        /// A range that maps to a negative length.
        Range(range: isize) {
            display("range {} maps to a negative length", range)
        }
        /// Pop or shift (or sort) on an empty sequence.
        Empty {
            display("the sequence is empty")
        }
        /// A copy function given to a non-owning destination, or withheld
        /// from an owning one.
        CopyPolicy {
            display("copy function presence must match destination ownership")
        }
        /// An iterator operation with no current item.
        NoCursor {
            display("no current item")
        }
        /// A lock failure, propagated from the sequence's locker.
        Lock(err: locker::Error) {
            from()
            display("lock failure: {}", err)
        }
    }
}

/// An optionally lock-guarded sequence.
///
/// All operations take `&self` and return `Result`; the only error source
/// beyond the operation itself is the locker. See the [crate docs](crate)
/// for the two-plane design and [`RawSeq`] for the container semantics.
pub struct Seq<T> {
    /// The raw sequence, behind the aliasing guard.
    inner: Protected<RawSeq<T>>,
    /// The lock strategy. The null locker means no synchronisation.
    locker: Locker,
}

impl<T> Seq<T> {
    /// Create an empty, unsynchronised sequence.
    pub fn new(dispose: Option<Dispose<T>>) -> Seq<T> {
        Seq::with_locker(dispose, Locker::none())
    }

    /// Create an empty sequence guarded by `locker`.
    pub fn with_locker(dispose: Option<Dispose<T>>, locker: Locker) -> Seq<T> {
        Seq::from_raw(RawSeq::new(dispose), locker)
    }

    /// Create an unsynchronised sequence holding `items`.
    pub fn from_vec(items: Vec<T>, dispose: Option<Dispose<T>>) -> Seq<T> {
        Seq::from_raw(RawSeq::from_vec(items, dispose), Locker::none())
    }

    /// Create a sequence holding `items`, guarded by `locker`.
    pub fn from_vec_with_locker(
        items: Vec<T>,
        dispose: Option<Dispose<T>>,
        locker: Locker,
    ) -> Seq<T> {
        Seq::from_raw(RawSeq::from_vec(items, dispose), locker)
    }

    /// Wrap a raw sequence with a locker.
    pub fn from_raw(raw: RawSeq<T>, locker: Locker) -> Seq<T> {
        Seq {
            inner: Protected::new(raw),
            locker,
        }
    }

    /// Acquire the read lock and return a guard deref-ing to the raw plane.
    ///
    /// The lock is held, and the sequence claimed shared, until the guard is
    /// dropped.
    pub fn read(&self) -> Result<ReadGuard<T>, Error> {
        self.locker.read()?;
        Ok(ReadGuard {
            slot: ManuallyDrop::new(self.inner.share()),
            locker: &self.locker,
        })
    }

    /// Acquire the write lock and return a guard deref-ing (mutably) to the
    /// raw plane.
    pub fn write(&self) -> Result<WriteGuard<T>, Error> {
        self.locker.write()?;
        Ok(WriteGuard {
            slot: ManuallyDrop::new(self.inner.seize()),
            locker: &self.locker,
        })
    }

    /// Reach the raw plane through exclusivity, bypassing lock and guard.
    pub fn get_mut(&mut self) -> &mut RawSeq<T> {
        self.inner.get_mut()
    }

    /// Unwrap the raw sequence, discarding the locker.
    pub fn into_raw(self) -> RawSeq<T> {
        self.inner.into_inner()
    }

    /// The number of items.
    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.read()?.len())
    }

    /// Is the sequence empty?
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.read()?.is_empty())
    }

    /// The index of the last item, or `None` when empty.
    pub fn last(&self) -> Result<Option<usize>, Error> {
        Ok(self.read()?.last())
    }

    /// A clone of the item at `index` (relative indices allowed).
    pub fn get(&self, index: isize) -> Result<T, Error>
    where
        T: Clone,
    {
        let guard = self.read()?;
        let item = guard.get(index)?.clone();
        Ok(item)
    }

    /// Install (or replace) the dispose function.
    pub fn own(&self, dispose: Dispose<T>) -> Result<(), Error> {
        self.write()?.own(dispose);
        Ok(())
    }

    /// Clear the dispose function and return the previous one.
    pub fn disown(&self) -> Result<Option<Dispose<T>>, Error> {
        Ok(self.write()?.disown())
    }

    /// Add `item` at `index`, shifting the tail right.
    pub fn insert(&self, index: isize, item: T) -> Result<(), Error> {
        self.write()?.insert(index, item)
    }

    /// Add `item` at the end.
    pub fn push(&self, item: T) -> Result<(), Error> {
        self.write()?.push(item);
        Ok(())
    }

    /// Add `item` at the front.
    pub fn unshift(&self, item: T) -> Result<(), Error> {
        self.write()?.unshift(item);
        Ok(())
    }

    /// Detach the item at `index` and hand it to the caller (the dispose
    /// function is not applied).
    pub fn take(&self, index: isize) -> Result<T, Error> {
        self.write()?.take(index)
    }

    /// Detach and return the last item.
    pub fn pop(&self) -> Result<T, Error> {
        self.write()?.pop()
    }

    /// Detach and return the first item.
    pub fn shift(&self) -> Result<T, Error> {
        self.write()?.shift()
    }

    /// Remove the item at `index`, disposing of it if owned.
    pub fn remove(&self, index: isize) -> Result<(), Error> {
        self.write()?.remove(index)
    }

    /// Remove `range` items starting at `index`, disposing of them if owned.
    pub fn remove_range(&self, index: isize, range: isize) -> Result<(), Error> {
        self.write()?.remove_range(index, range)
    }

    /// Remove `range` items starting at `index` and store `item` in their
    /// place.
    pub fn replace(&self, index: isize, range: isize, item: T) -> Result<(), Error> {
        self.write()?.replace(index, range, item)
    }

    /// Insert a copy of every item of `src` at `index`.
    ///
    /// The destination is write-locked first, then the source read-locked;
    /// release happens in the reverse order. Two threads transferring between
    /// the same pair of sequences in opposite directions can deadlock on
    /// that ordering; such callers should pre-lock both sequences and use
    /// the raw plane instead.
    pub fn insert_seq(
        &self,
        index: isize,
        src: &Seq<T>,
        copy: Option<CopyFn<T>>,
    ) -> Result<(), Error>
    where
        T: Clone,
    {
        let mut dst = self.write()?;
        let src = src.read()?;
        dst.insert_seq(index, &src, copy)
    }

    /// Insert a copy of every item of `src` at the end.
    pub fn append_seq(&self, src: &Seq<T>, copy: Option<CopyFn<T>>) -> Result<(), Error>
    where
        T: Clone,
    {
        self.insert_seq(-1, src, copy)
    }

    /// Insert a copy of every item of `src` at the front.
    pub fn prepend_seq(&self, src: &Seq<T>, copy: Option<CopyFn<T>>) -> Result<(), Error>
    where
        T: Clone,
    {
        self.insert_seq(0, src, copy)
    }

    /// Remove `range` items starting at `index` and insert a copy of every
    /// item of `src` in their place. Same locking order as
    /// [`Seq::insert_seq`].
    pub fn replace_seq(
        &self,
        index: isize,
        range: isize,
        src: &Seq<T>,
        copy: Option<CopyFn<T>>,
    ) -> Result<(), Error>
    where
        T: Clone,
    {
        let mut dst = self.write()?;
        let src = src.read()?;
        dst.replace_seq(index, range, &src, copy)
    }

    /// A new raw sequence holding a copy of `range` items starting at
    /// `index`.
    pub fn extract(
        &self,
        index: isize,
        range: isize,
        copy: Option<CopyFn<T>>,
    ) -> Result<RawSeq<T>, Error>
    where
        T: Clone,
    {
        self.read()?.extract(index, range, copy)
    }

    /// Extract and remove: the items are returned and the originals removed.
    pub fn splice(
        &self,
        index: isize,
        range: isize,
        copy: Option<CopyFn<T>>,
    ) -> Result<RawSeq<T>, Error>
    where
        T: Clone,
    {
        self.write()?.splice(index, range, copy)
    }

    /// A copy of the whole sequence, guarded by `locker`.
    pub fn duplicate(&self, copy: Option<CopyFn<T>>, locker: Locker) -> Result<Seq<T>, Error>
    where
        T: Clone,
    {
        let raw = self.read()?.duplicate(copy)?;
        Ok(Seq::from_raw(raw, locker))
    }

    /// Sort the items in place. Not stable.
    pub fn sort_by<F>(&self, cmp: F) -> Result<(), Error>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        self.write()?.sort_by(cmp)
    }

    /// Invoke `f` for every item, with its index, under the read lock.
    pub fn for_each<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnMut(usize, &T),
    {
        self.read()?.for_each(f);
        Ok(())
    }

    /// Invoke `f` for every item, with its index, under the write lock.
    pub fn for_each_mut<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnMut(usize, &mut T),
    {
        self.write()?.for_each_mut(f);
        Ok(())
    }

    /// A new sequence of `f(index, item)` for every item.
    pub fn map<U, F>(&self, dispose: Option<Dispose<U>>, f: F) -> Result<RawSeq<U>, Error>
    where
        F: FnMut(usize, &T) -> U,
    {
        Ok(self.read()?.map(dispose, f))
    }

    /// A new, non-owning sequence of the items satisfying `pred`.
    pub fn grep<F>(&self, pred: F) -> Result<RawSeq<T>, Error>
    where
        T: Clone,
        F: FnMut(usize, &T) -> bool,
    {
        Ok(self.read()?.grep(pred))
    }

    /// Scan forward from `*cursor` for an item satisfying `pred`. See
    /// [`RawSeq::query`].
    pub fn query<F>(&self, cursor: &mut isize, pred: F) -> Result<Option<usize>, Error>
    where
        F: FnMut(usize, &T) -> bool,
    {
        self.read()?.query(cursor, pred)
    }

    /// A write-locked cursor over the sequence. The lock is held until the
    /// cursor is dropped, so the whole walk, removals included, is atomic
    /// with respect to other users of the locker.
    pub fn cursor(&self) -> Result<Cursor<T>, Error> {
        Ok(Cursor {
            guard: self.write()?,
            index: -1,
        })
    }

    /// A read-locked cursor: like [`Seq::cursor`] but shareable with other
    /// readers, and without `remove`.
    pub fn cursor_read(&self) -> Result<ReadCursor<T>, Error> {
        Ok(ReadCursor {
            guard: self.read()?,
            index: -1,
        })
    }
}

impl<T> Default for Seq<T> {
    fn default() -> Seq<T> {
        Seq::new(None)
    }
}

impl<T: fmt::Debug> fmt::Debug for Seq<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.read() {
            Ok(guard) => fmt::Debug::fmt(&*guard, f),
            Err(_) => write!(f, "Seq(<locked>)"),
        }
    }
}

/// A RAII read guard: holds the read lock and a shared claim, and derefs to
/// the raw plane.
pub struct ReadGuard<'a, T> {
    /// The shared claim. Dropped by hand (before the unlock) in `drop`.
    slot: ManuallyDrop<Shared<'a, RawSeq<T>>>,
    /// The locker to release.
    locker: &'a Locker,
}

impl<'a, T> std::ops::Deref for ReadGuard<'a, T> {
    type Target = RawSeq<T>;

    fn deref(&self) -> &RawSeq<T> {
        &self.slot
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        // Release the claim before the lock, so no other thread can acquire
        // the lock and find the claim still in place.
        unsafe { ManuallyDrop::drop(&mut self.slot) }
        let _ = self.locker.unlock();
    }
}

/// A RAII write guard: holds the write lock and the exclusive claim, and
/// derefs mutably to the raw plane.
pub struct WriteGuard<'a, T> {
    /// The exclusive claim. Dropped by hand (before the unlock) in `drop`.
    slot: ManuallyDrop<Exclusive<'a, RawSeq<T>>>,
    /// The locker to release.
    locker: &'a Locker,
}

impl<'a, T> std::ops::Deref for WriteGuard<'a, T> {
    type Target = RawSeq<T>;

    fn deref(&self) -> &RawSeq<T> {
        &self.slot
    }
}

impl<'a, T> std::ops::DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut RawSeq<T> {
        &mut self.slot
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.slot) }
        let _ = self.locker.unlock();
    }
}

/// A write-locked external cursor.
///
/// Created by [`Seq::cursor`]. `has_next` peeks, `next` advances and returns
/// the item, `remove` deletes the item just returned and steps back so the
/// following `next` sees the item that slid into its place. Dropping the
/// cursor releases the lock.
pub struct Cursor<'a, T> {
    /// The write guard keeping the walk atomic.
    guard: WriteGuard<'a, T>,
    /// Index of the item last returned; `-1` before the first.
    index: isize,
}

impl<'a, T> Cursor<'a, T> {
    /// Is there an item after the current one?
    pub fn has_next(&self) -> bool {
        self.index + 1 < self.guard.len() as isize
    }

    /// Advance and return the next item, or `None` at the end.
    pub fn next(&mut self) -> Option<&T> {
        if !self.has_next() {
            return None;
        }

        self.index += 1;
        self.guard.get(self.index).ok()
    }

    /// Remove the item last returned by `next`, disposing of it if the
    /// sequence owns its items.
    pub fn remove(&mut self) -> Result<(), Error> {
        if self.index < 0 {
            return Err(Error::NoCursor);
        }

        self.guard.remove(self.index)?;
        self.index -= 1;
        Ok(())
    }
}

/// A read-locked external cursor: [`Cursor`] without `remove`, shareable
/// with other readers of the same locker.
pub struct ReadCursor<'a, T> {
    /// The read guard keeping the walk atomic.
    guard: ReadGuard<'a, T>,
    /// Index of the item last returned; `-1` before the first.
    index: isize,
}

impl<'a, T> ReadCursor<'a, T> {
    /// Is there an item after the current one?
    pub fn has_next(&self) -> bool {
        self.index + 1 < self.guard.len() as isize
    }

    /// Advance and return the next item, or `None` at the end.
    pub fn next(&mut self) -> Option<&T> {
        if !self.has_next() {
            return None;
        }

        self.index += 1;
        self.guard.get(self.index).ok()
    }
}
