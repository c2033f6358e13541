//! An open-chained hash table with optional lock guarding.
//!
//! The map mirrors the two-plane design of [`lseq`]: [`RawMap`] is the hash
//! table itself, [`Map`] wraps it with a [`locker::Locker`] and gives every
//! operation a `&self` face that acquires the locker, delegates, and
//! releases. [`Map::read`] and [`Map::write`] return RAII guards deref-ing
//! to the raw plane for composing several operations under one acquisition.
//!
//! The table is a vector of chains (each chain an [`lseq::RawSeq`] of
//! [`Mapping`] records) whose size walks a ladder of primes, growing when
//! the load factor (mappings per bucket) reaches 2.0. Hashing, key copying,
//! and key equality are per-instance functions; string-keyed maps come with
//! defaults (the `h * 31 + byte` rolling hash of the TPOP tradition).
//!
//! Ownership is per mapping: every record carries the key and value dispose
//! functions that were current when it was inserted, so destructors survive
//! the map growing or changing hands. [`Map::own`] and [`Map::disown`]
//! install and retract the value destructor across the whole table.

mod raw;

#[cfg(test)]
mod tests;

pub use raw::{str_copy, str_eq, str_hash, Mapping, RawMap, RawMapCursor, TABLE_SIZES};

use locker::cell::{Exclusive, Protected, Shared};
use locker::Locker;
use lseq::RawSeq;
use quick_error::quick_error;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// A destructor for keys or values. Re-exported from [`lseq`]: it is the
/// same notion of item ownership.
pub use lseq::Dispose;

/// A hash function: `(table_size, key) -> bucket`, with the bucket required
/// to be below the table size.
pub type HashFn<K> = fn(usize, &K) -> usize;

/// A key copier, applied to every key on insertion.
pub type KeyCopy<K> = fn(&K) -> K;

/// A key equality function.
pub type EqFn<K> = fn(&K, &K) -> bool;

quick_error! {
    /// A map error.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Error {
        /// Inserting (without replacement) a key that is already present.
        Exists {
            display("the key already exists")
        }
        /// Looking up or removing a key that is not present.
        NotFound {
            display("the key was not found")
        }
        /// The hash function returned a bucket outside the table.
        BadHash(bucket: usize, size: usize) {
            display("hash returned bucket {} for table size {}", bucket, size)
        }
        /// A size hint beyond the largest table size.
        TooBig(hint: usize) {
            display("size hint {} exceeds the largest table size", hint)
        }
        /// An iterator operation with no current mapping.
        NoCursor {
            display("no current mapping")
        }
        /// A lock failure, propagated from the map's locker.
        Lock(err: locker::Error) {
            from()
            display("lock failure: {}", err)
        }
        /// A chain operation failure.
        Chain(err: lseq::Error) {
            from()
            display("chain failure: {}", err)
        }
    }
}

/// An optionally lock-guarded hash table.
///
/// All operations take `&self` and return `Result`; see the
/// [crate docs](crate) for the design and [`RawMap`] for the table
/// semantics.
pub struct Map<K, V> {
    /// The raw map, behind the aliasing guard.
    inner: Protected<RawMap<K, V>>,
    /// The lock strategy. The null locker means no synchronisation.
    locker: Locker,
}

impl<K, V> Map<K, V> {
    /// Create a map with an explicit scheme, guarded by `locker`. See
    /// [`RawMap::with_scheme`]; every other constructor reduces to this.
    pub fn with_scheme(
        hint: usize,
        hash: HashFn<K>,
        copy: KeyCopy<K>,
        eq: EqFn<K>,
        key_dispose: Option<Dispose<K>>,
        value_dispose: Option<Dispose<V>>,
        locker: Locker,
    ) -> Result<Map<K, V>, Error> {
        Ok(Map::from_raw(
            RawMap::with_scheme(hint, hash, copy, eq, key_dispose, value_dispose)?,
            locker,
        ))
    }

    /// Wrap a raw map with a locker.
    pub fn from_raw(raw: RawMap<K, V>, locker: Locker) -> Map<K, V> {
        Map {
            inner: Protected::new(raw),
            locker,
        }
    }

    /// Acquire the read lock and return a guard deref-ing to the raw plane.
    pub fn read(&self) -> Result<ReadGuard<K, V>, Error> {
        self.locker.read()?;
        Ok(ReadGuard {
            slot: ManuallyDrop::new(self.inner.share()),
            locker: &self.locker,
        })
    }

    /// Acquire the write lock and return a guard deref-ing (mutably) to the
    /// raw plane.
    pub fn write(&self) -> Result<WriteGuard<K, V>, Error> {
        self.locker.write()?;
        Ok(WriteGuard {
            slot: ManuallyDrop::new(self.inner.seize()),
            locker: &self.locker,
        })
    }

    /// Reach the raw plane through exclusivity, bypassing lock and guard.
    pub fn get_raw_mut(&mut self) -> &mut RawMap<K, V> {
        self.inner.get_mut()
    }

    /// Unwrap the raw map, discarding the locker.
    pub fn into_raw(self) -> RawMap<K, V> {
        self.inner.into_inner()
    }

    /// The number of mappings.
    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.read()?.len())
    }

    /// Is the map empty?
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.read()?.is_empty())
    }

    /// The current table size (bucket count).
    pub fn buckets(&self) -> Result<usize, Error> {
        Ok(self.read()?.buckets())
    }

    /// Insert a mapping from a copy of `key` to `value`; `replace` decides
    /// what happens to an existing equal key. See [`RawMap::insert`].
    pub fn insert(&self, key: &K, value: V, replace: bool) -> Result<(), Error> {
        self.write()?.insert(key, value, replace)
    }

    /// Insert a new mapping; an existing equal key is [`Error::Exists`].
    pub fn add(&self, key: &K, value: V) -> Result<(), Error> {
        self.insert(key, value, false)
    }

    /// Insert a mapping, replacing any existing one for an equal key.
    pub fn put(&self, key: &K, value: V) -> Result<(), Error> {
        self.insert(key, value, true)
    }

    /// The value mapped to `key`, behind a read-locked guard.
    ///
    /// The guard holds the map's read lock until dropped, so other readers
    /// proceed and writers wait.
    pub fn get(&self, key: &K) -> Result<Option<ValueRef<K, V>>, Error> {
        let guard = self.read()?;
        let value = match guard.get(key) {
            Some(value) => NonNull::from(value),
            None => return Ok(None),
        };

        // The pointer stays valid while the guard lives: the guard pins the
        // claim (and the lock), and moving the guard moves neither the map
        // nor its heap-allocated chains.
        Ok(Some(ValueRef {
            _guard: guard,
            value,
        }))
    }

    /// The value mapped to `key`, mutably, behind a write-locked guard.
    pub fn get_mut(&self, key: &K) -> Result<Option<ValueMut<K, V>>, Error> {
        let mut guard = self.write()?;
        let value = match guard.get_mut(key) {
            Some(value) => NonNull::from(value),
            None => return Ok(None),
        };

        Ok(Some(ValueMut {
            _guard: guard,
            value,
        }))
    }

    /// Does the map contain `key`?
    pub fn contains_key(&self, key: &K) -> bool {
        match self.read() {
            Ok(guard) => guard.contains_key(key),
            Err(_) => false,
        }
    }

    /// Remove the mapping for `key`. [`Error::NotFound`] when absent.
    pub fn remove(&self, key: &K) -> Result<(), Error> {
        self.write()?.remove(key)
    }

    /// Install (or replace) the value dispose function across the table.
    pub fn own(&self, dispose: Dispose<V>) -> Result<(), Error> {
        self.write()?.own(dispose);
        Ok(())
    }

    /// Clear the value dispose function across the table and return it.
    pub fn disown(&self) -> Result<Option<Dispose<V>>, Error> {
        Ok(self.write()?.disown())
    }

    /// Invoke `f` for every mapping, under the read lock.
    pub fn for_each<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnMut(&K, &V),
    {
        self.read()?.for_each(f);
        Ok(())
    }

    /// Invoke `f` for every mapping with the value mutable, under the write
    /// lock.
    pub fn for_each_mut<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnMut(&K, &mut V),
    {
        self.write()?.for_each_mut(f);
        Ok(())
    }

    /// A write-locked cursor over the map. The lock is held until the cursor
    /// is dropped.
    pub fn cursor(&self) -> Result<MapCursor<K, V>, Error> {
        Ok(MapCursor {
            guard: self.write()?,
            bucket: -1,
            index: -1,
            pending: None,
        })
    }

    /// A read-locked cursor: like [`Map::cursor`] but shareable with other
    /// readers, and without `remove`.
    pub fn cursor_read(&self) -> Result<MapReadCursor<K, V>, Error> {
        Ok(MapReadCursor {
            guard: self.read()?,
            bucket: -1,
            index: -1,
            pending: None,
        })
    }
}

impl<V> Map<String, V> {
    /// An unsynchronised string-keyed map. `value_dispose` is the value
    /// destructor, if values need more than dropping.
    pub fn new(value_dispose: Option<Dispose<V>>) -> Map<String, V> {
        Map::from_raw(RawMap::new(value_dispose), Locker::none())
    }

    /// A string-keyed map sized for `hint` mappings' worth of buckets.
    pub fn with_capacity(
        hint: usize,
        value_dispose: Option<Dispose<V>>,
    ) -> Result<Map<String, V>, Error> {
        Ok(Map::from_raw(
            RawMap::with_capacity(hint, value_dispose)?,
            Locker::none(),
        ))
    }

    /// A string-keyed map guarded by `locker`.
    pub fn with_locker(value_dispose: Option<Dispose<V>>, locker: Locker) -> Map<String, V> {
        Map::from_raw(RawMap::new(value_dispose), locker)
    }

    /// A string-keyed map with both a size hint and a locker.
    pub fn with_capacity_and_locker(
        hint: usize,
        value_dispose: Option<Dispose<V>>,
        locker: Locker,
    ) -> Result<Map<String, V>, Error> {
        Ok(Map::from_raw(
            RawMap::with_capacity(hint, value_dispose)?,
            locker,
        ))
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Map<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.read() {
            Ok(guard) => fmt::Debug::fmt(&*guard, f),
            Err(_) => write!(f, "Map(<locked>)"),
        }
    }
}

/// A RAII read guard: holds the read lock and a shared claim, and derefs to
/// the raw plane.
pub struct ReadGuard<'a, K, V> {
    /// The shared claim. Dropped by hand (before the unlock) in `drop`.
    slot: ManuallyDrop<Shared<'a, RawMap<K, V>>>,
    /// The locker to release.
    locker: &'a Locker,
}

impl<'a, K, V> std::ops::Deref for ReadGuard<'a, K, V> {
    type Target = RawMap<K, V>;

    fn deref(&self) -> &RawMap<K, V> {
        &self.slot
    }
}

impl<'a, K, V> Drop for ReadGuard<'a, K, V> {
    fn drop(&mut self) {
        // Claim first, lock second, as for the sequence guards.
        unsafe { ManuallyDrop::drop(&mut self.slot) }
        let _ = self.locker.unlock();
    }
}

/// A RAII write guard: holds the write lock and the exclusive claim, and
/// derefs mutably to the raw plane.
pub struct WriteGuard<'a, K, V> {
    /// The exclusive claim. Dropped by hand (before the unlock) in `drop`.
    slot: ManuallyDrop<Exclusive<'a, RawMap<K, V>>>,
    /// The locker to release.
    locker: &'a Locker,
}

impl<'a, K, V> std::ops::Deref for WriteGuard<'a, K, V> {
    type Target = RawMap<K, V>;

    fn deref(&self) -> &RawMap<K, V> {
        &self.slot
    }
}

impl<'a, K, V> std::ops::DerefMut for WriteGuard<'a, K, V> {
    fn deref_mut(&mut self) -> &mut RawMap<K, V> {
        &mut self.slot
    }
}

impl<'a, K, V> Drop for WriteGuard<'a, K, V> {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.slot) }
        let _ = self.locker.unlock();
    }
}

/// A read-locked view of one value, returned by [`Map::get`].
///
/// Derefs to the value; holds the map's read lock (and shared claim) until
/// dropped.
pub struct ValueRef<'a, K, V> {
    /// The guard pinning the lock and claim.
    _guard: ReadGuard<'a, K, V>,
    /// The value, pinned by the guard.
    value: NonNull<V>,
}

impl<'a, K, V> std::ops::Deref for ValueRef<'a, K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        // Sound: the guard's shared claim rules out mutation, and the value
        // sits on the heap behind the map, unmoved by guard moves.
        unsafe { self.value.as_ref() }
    }
}

/// A write-locked view of one value, returned by [`Map::get_mut`].
///
/// Derefs (mutably) to the value; holds the map's write lock until dropped.
pub struct ValueMut<'a, K, V> {
    /// The guard pinning the lock and claim.
    _guard: WriteGuard<'a, K, V>,
    /// The value, pinned by the guard.
    value: NonNull<V>,
}

impl<'a, K, V> std::ops::Deref for ValueMut<'a, K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        unsafe { self.value.as_ref() }
    }
}

impl<'a, K, V> std::ops::DerefMut for ValueMut<'a, K, V> {
    fn deref_mut(&mut self) -> &mut V {
        // Sound: the guard's exclusive claim makes this the only live
        // reference into the map.
        unsafe { self.value.as_mut() }
    }
}

/// A write-locked external cursor over a map.
///
/// Created by [`Map::cursor`]. Same shape as [`RawMapCursor`], with the lock
/// held for the cursor's lifetime.
pub struct MapCursor<'a, K, V> {
    /// The write guard keeping the walk atomic.
    guard: WriteGuard<'a, K, V>,
    /// Bucket of the mapping last returned; `-1` before the first.
    bucket: isize,
    /// Index within the chain of the mapping last returned.
    index: isize,
    /// The position pre-computed by `has_next`, consumed by `next`.
    pending: Option<(usize, usize)>,
}

impl<'a, K, V> MapCursor<'a, K, V> {
    /// Is there a mapping after the current one?
    pub fn has_next(&mut self) -> bool {
        self.pending = self.guard.advance(self.bucket, self.index);
        self.pending.is_some()
    }

    /// Advance and return the next key and value, or `None` at the end.
    pub fn next(&mut self) -> Option<(&K, &V)> {
        let mapping = self.next_mapping()?;
        Some((mapping.key(), mapping.value()))
    }

    /// Advance and return the next mapping, or `None` at the end.
    pub fn next_mapping(&mut self) -> Option<&Mapping<K, V>> {
        let (b, i) = match self.pending.take() {
            Some(position) => position,
            None => self.guard.advance(self.bucket, self.index)?,
        };

        self.bucket = b as isize;
        self.index = i as isize;
        self.guard.mapping_at(b, i)
    }

    /// Remove the mapping last returned by `next`.
    pub fn remove(&mut self) -> Result<(), Error> {
        if self.index < 0 {
            return Err(Error::NoCursor);
        }

        let (bucket, index) = (self.bucket as usize, self.index);
        self.guard.remove_at(bucket, index)?;
        self.index -= 1;
        self.pending = None;
        Ok(())
    }
}

/// A read-locked external cursor: [`MapCursor`] without `remove`.
pub struct MapReadCursor<'a, K, V> {
    /// The read guard keeping the walk atomic.
    guard: ReadGuard<'a, K, V>,
    /// Bucket of the mapping last returned; `-1` before the first.
    bucket: isize,
    /// Index within the chain of the mapping last returned.
    index: isize,
    /// The position pre-computed by `has_next`, consumed by `next`.
    pending: Option<(usize, usize)>,
}

impl<'a, K, V> MapReadCursor<'a, K, V> {
    /// Is there a mapping after the current one?
    pub fn has_next(&mut self) -> bool {
        self.pending = self.guard.advance(self.bucket, self.index);
        self.pending.is_some()
    }

    /// Advance and return the next key and value, or `None` at the end.
    pub fn next(&mut self) -> Option<(&K, &V)> {
        let (b, i) = match self.pending.take() {
            Some(position) => position,
            None => self.guard.advance(self.bucket, self.index)?,
        };

        self.bucket = b as isize;
        self.index = i as isize;
        let mapping = self.guard.mapping_at(b, i)?;
        Some((mapping.key(), mapping.value()))
    }
}

/// Borrowed key/value snapshots, lifted to the locked plane for the common
/// case of wanting them under a momentary read lock.
impl<K, V> Map<K, V> {
    /// Clones of every key, in iteration order.
    pub fn keys_cloned(&self) -> Result<RawSeq<K>, Error>
    where
        K: Clone,
    {
        let guard = self.read()?;
        let mut out = RawSeq::new(None);
        guard.for_each(|key, _| out.push(key.clone()));
        Ok(out)
    }

    /// Clones of every value, in iteration order.
    pub fn values_cloned(&self) -> Result<RawSeq<V>, Error>
    where
        V: Clone,
    {
        let guard = self.read()?;
        let mut out = RawSeq::new(None);
        guard.for_each(|_, value| out.push(value.clone()));
        Ok(out)
    }
}
