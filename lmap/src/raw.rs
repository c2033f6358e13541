//! The unlocked plane of the map.
//!
//! [`RawMap`] is the hash table itself: the bucket vector, the chains, the
//! scheme functions, and every operation, with mutation through `&mut self`
//! and no locking anywhere. The locked plane ([`Map`](crate::Map)) wraps it
//! the same way [`lseq::Seq`] wraps [`lseq::RawSeq`].

use crate::{Dispose, Error, EqFn, HashFn, KeyCopy};
use lseq::RawSeq;
use std::fmt;
use std::mem;

/// The table sizes: ascending primes, each roughly double the previous. A
/// size hint rounds up to the next of these; growth steps along them.
pub const TABLE_SIZES: [usize; 22] = [
    11, 23, 47, 101, 199, 401, 797, 1601, 3203, 6397, 12799, 25601, 51199, 102397, 204803, 409597,
    819187, 1638431, 3276799, 6553621, 13107197, 26214401,
];

/// The average chain length that triggers growth on insertion.
const LOAD_FACTOR: usize = 2;

/// The default hash for string keys: the rolling hash from The Practice of
/// Programming (`h = h * 31 + byte`), reduced modulo the table size.
pub fn str_hash(size: usize, key: &String) -> usize {
    let mut h: usize = 0;

    for &byte in key.as_bytes() {
        h = h.wrapping_mul(31).wrapping_add(byte as usize);
    }

    h % size
}

/// The default key copier for string keys.
pub fn str_copy(key: &String) -> String {
    key.clone()
}

/// The default key equality for string keys.
pub fn str_eq(a: &String, b: &String) -> bool {
    a == b
}

/// One key/value record in a chain.
///
/// Each mapping carries its own dispose functions, so that the right
/// destructors run no matter how ownership of the map has shifted since the
/// mapping was created.
pub struct Mapping<K, V> {
    /// The key (the map's copy of it).
    key: K,
    /// The value.
    value: V,
    /// The key destructor, when the map owns its keys.
    key_dispose: Option<Dispose<K>>,
    /// The value destructor, when the map owns its values.
    value_dispose: Option<Dispose<V>>,
}

impl<K, V> Mapping<K, V> {
    /// The key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Destroy the mapping: the key and value each go through their carried
    /// dispose function, or are dropped in place without one.
    ///
    /// This is the dispose function of every chain.
    fn release(self) {
        let Mapping {
            key,
            value,
            key_dispose,
            value_dispose,
        } = self;

        match key_dispose {
            Some(f) => f(key),
            None => drop(key),
        }
        match value_dispose {
            Some(f) => f(value),
            None => drop(value),
        }
    }
}

/// An open-chained hash table.
///
/// Keys are hashed, copied, and compared by per-instance functions rather
/// than by traits, so two maps over the same key type can disagree about all
/// three, and the hash can be swapped out for a keyed or deliberately
/// bad one in tests. String-keyed maps get sensible defaults; everything
/// else goes through [`RawMap::with_scheme`].
///
/// Each bucket holds a lazily created chain, a [`RawSeq`] of [`Mapping`]s
/// owned through the mapping-release dispose function. The bucket count
/// walks the [`TABLE_SIZES`] ladder: when an insertion finds the load factor
/// (mappings per bucket) at 2.0 or above, the table grows to the next size
/// first. Growth past the end of the ladder is silently skipped: the map
/// still works, the chains just lengthen.
pub struct RawMap<K, V> {
    /// The buckets. `None` is a chain that has never been needed.
    buckets: Vec<Option<RawSeq<Mapping<K, V>>>>,
    /// The number of mappings, across all chains.
    len: usize,
    /// The hash function: `(table_size, key) -> bucket`.
    hash: HashFn<K>,
    /// The key copier, applied to every inserted key.
    copy: KeyCopy<K>,
    /// The key equality.
    eq: EqFn<K>,
    /// The key destructor installed into new mappings.
    key_dispose: Option<Dispose<K>>,
    /// The value destructor installed into new mappings.
    value_dispose: Option<Dispose<V>>,
    /// The built-in iteration anchor.
    walk: Option<Walk>,
}

/// The state of a built-in map iteration.
struct Walk {
    /// Bucket of the current mapping; `-1` before the first.
    bucket: isize,
    /// Index of the current mapping within its chain; `-1` before the first.
    index: isize,
    /// The position pre-computed by `has_next`, consumed by `next`.
    pending: Option<(usize, usize)>,
}

impl<K, V> RawMap<K, V> {
    /// Create a map with an explicit scheme.
    ///
    /// `hint` rounds up to the next table size ([`Error::TooBig`] when it is
    /// beyond the last). The hash must return a bucket below the table size
    /// it is given, and must be a pure function of the key: every lookup,
    /// and every rebuild during growth, recomputes it.
    pub fn with_scheme(
        hint: usize,
        hash: HashFn<K>,
        copy: KeyCopy<K>,
        eq: EqFn<K>,
        key_dispose: Option<Dispose<K>>,
        value_dispose: Option<Dispose<V>>,
    ) -> Result<RawMap<K, V>, Error> {
        let size = TABLE_SIZES
            .iter()
            .copied()
            .find(|&size| size >= hint)
            .ok_or(Error::TooBig(hint))?;

        Ok(RawMap::with_size(
            size,
            hash,
            copy,
            eq,
            key_dispose,
            value_dispose,
        ))
    }

    /// Create a map over an exact table size (already on the ladder).
    fn with_size(
        size: usize,
        hash: HashFn<K>,
        copy: KeyCopy<K>,
        eq: EqFn<K>,
        key_dispose: Option<Dispose<K>>,
        value_dispose: Option<Dispose<V>>,
    ) -> RawMap<K, V> {
        RawMap {
            buckets: (0..size).map(|_| None).collect(),
            len: 0,
            hash,
            copy,
            eq,
            key_dispose,
            value_dispose,
            walk: None,
        }
    }

    /// Attach a locker, producing the locked plane around this map.
    pub fn into_map(self, locker: locker::Locker) -> crate::Map<K, V> {
        crate::Map::from_raw(self, locker)
    }

    /// The number of mappings.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the map empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The current table size (bucket count).
    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Insert a mapping from a copy of `key` to `value`.
    ///
    /// With `replace` false, an existing equal key is [`Error::Exists`] and
    /// nothing changes. With `replace` true, the existing mapping is removed
    /// first (its key and value destroyed per the mapping's own dispose
    /// functions) and the new mapping appended.
    pub fn insert(&mut self, key: &K, value: V, replace: bool) -> Result<(), Error> {
        // Grow first when the load factor has been reached, so the chains
        // stay short. Past the end of the ladder this is a no-op.
        if self.len >= self.buckets.len().saturating_mul(LOAD_FACTOR) {
            self.grow()?;
        }

        let bucket = self.locate(key)?;
        let eq = self.eq;
        let copy = self.copy;
        let key_dispose = self.key_dispose;
        let value_dispose = self.value_dispose;

        let chain = self.buckets[bucket]
            .get_or_insert_with(|| RawSeq::new(Some(Mapping::release)));

        if let Some(at) = chain.iter().position(|mapping| eq(&mapping.key, key)) {
            if !replace {
                return Err(Error::Exists);
            }

            chain.remove(at as isize)?;
            self.len -= 1;
        }

        chain.push(Mapping {
            key: copy(key),
            value,
            key_dispose,
            value_dispose,
        });
        self.len += 1;

        Ok(())
    }

    /// Insert a new mapping; an existing equal key is an error.
    pub fn add(&mut self, key: &K, value: V) -> Result<(), Error> {
        self.insert(key, value, false)
    }

    /// Insert a mapping, replacing any existing one for an equal key.
    pub fn put(&mut self, key: &K, value: V) -> Result<(), Error> {
        self.insert(key, value, true)
    }

    /// The value mapped to `key`, if any.
    pub fn get(&self, key: &K) -> Option<&V> {
        let size = self.buckets.len();
        let bucket = (self.hash)(size, key);
        if bucket >= size {
            return None;
        }

        let chain = self.buckets[bucket].as_ref()?;
        chain
            .iter()
            .find(|mapping| (self.eq)(&mapping.key, key))
            .map(|mapping| &mapping.value)
    }

    /// The value mapped to `key`, mutably, if any.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let size = self.buckets.len();
        let bucket = (self.hash)(size, key);
        if bucket >= size {
            return None;
        }

        let eq = self.eq;
        let chain = self.buckets[bucket].as_mut()?;
        chain
            .iter_mut()
            .find(|mapping| eq(&mapping.key, key))
            .map(|mapping| &mut mapping.value)
    }

    /// Does the map contain `key`?
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove the mapping for `key`, destroying its key and value per the
    /// mapping's dispose functions. [`Error::NotFound`] when absent.
    pub fn remove(&mut self, key: &K) -> Result<(), Error> {
        let bucket = self.locate(key)?;
        let eq = self.eq;

        let chain = match self.buckets[bucket] {
            Some(ref mut chain) => chain,
            None => return Err(Error::NotFound),
        };

        match chain.iter().position(|mapping| eq(&mapping.key, key)) {
            Some(at) => {
                chain.remove(at as isize)?;
                self.len -= 1;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Install (or replace) the value dispose function, in the map and in
    /// every existing mapping.
    pub fn own(&mut self, dispose: Dispose<V>) {
        if self.value_dispose == Some(dispose) {
            return;
        }

        self.value_dispose = Some(dispose);

        for chain in self.buckets.iter_mut().flatten() {
            for mapping in chain.iter_mut() {
                mapping.value_dispose = Some(dispose);
            }
        }
    }

    /// Clear the value dispose function, in the map and in every existing
    /// mapping, and return it, transferring responsibility for the values
    /// to the caller. Keys are unaffected.
    pub fn disown(&mut self) -> Option<Dispose<V>> {
        let dispose = self.value_dispose.take()?;

        for chain in self.buckets.iter_mut().flatten() {
            for mapping in chain.iter_mut() {
                mapping.value_dispose = None;
            }
        }

        Some(dispose)
    }

    /// Invoke `f` for every mapping, in iteration order (bucket, then
    /// position within the chain).
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for chain in self.buckets.iter().flatten() {
            for mapping in chain.iter() {
                f(&mapping.key, &mapping.value);
            }
        }
    }

    /// Invoke `f` for every mapping, with the value mutable.
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&K, &mut V),
    {
        for chain in self.buckets.iter_mut().flatten() {
            for mapping in chain.iter_mut() {
                f(&mapping.key, &mut mapping.value);
            }
        }
    }

    /// A new, non-owning sequence of every key, in iteration order.
    ///
    /// The snapshot borrows from the map: the borrow checker keeps it from
    /// outliving it.
    pub fn keys(&self) -> RawSeq<&K> {
        let mut out = RawSeq::new(None);
        for chain in self.buckets.iter().flatten() {
            for mapping in chain.iter() {
                out.push(&mapping.key);
            }
        }
        out
    }

    /// A new, non-owning sequence of every value, in iteration order.
    pub fn values(&self) -> RawSeq<&V> {
        let mut out = RawSeq::new(None);
        for chain in self.buckets.iter().flatten() {
            for mapping in chain.iter() {
                out.push(&mapping.value);
            }
        }
        out
    }

    /// An external cursor over this map. See [`MapCursor`](crate::MapCursor)
    /// for the lock-holding equivalent.
    pub fn cursor(&mut self) -> RawMapCursor<K, V> {
        RawMapCursor {
            map: self,
            bucket: -1,
            index: -1,
            pending: None,
        }
    }

    /// Begin, or continue, the built-in iteration: is there a mapping after
    /// the current one?
    ///
    /// As for the sequence, the anchor is created lazily and discarded on
    /// exhaustion, and the whole API needs `&mut self`.
    pub fn has_next(&mut self) -> bool {
        let (bucket, index) = match self.walk {
            Some(ref walk) => (walk.bucket, walk.index),
            None => (-1, -1),
        };

        match self.advance(bucket, index) {
            Some(next) => {
                self.walk = Some(Walk {
                    bucket,
                    index,
                    pending: Some(next),
                });
                true
            }
            None => {
                self.walk = None;
                false
            }
        }
    }

    /// Advance the built-in iteration and return the new current mapping.
    pub fn next_mapping(&mut self) -> Result<&Mapping<K, V>, Error> {
        let (bucket, index, pending) = match self.walk {
            Some(ref mut walk) => (walk.bucket, walk.index, walk.pending.take()),
            None => return Err(Error::NoCursor),
        };

        let (b, i) = match pending {
            Some(position) => position,
            None => self.advance(bucket, index).ok_or(Error::NoCursor)?,
        };

        self.walk = Some(Walk {
            bucket: b as isize,
            index: i as isize,
            pending: None,
        });

        self.mapping_at(b, i).ok_or(Error::NoCursor)
    }

    /// Advance the built-in iteration and return the new current key and
    /// value.
    pub fn next(&mut self) -> Result<(&K, &V), Error> {
        let mapping = self.next_mapping()?;
        Ok((&mapping.key, &mapping.value))
    }

    /// Remove the current mapping of the built-in iteration. The anchor
    /// steps back so the iteration revisits the slot (now holding the
    /// mapping that slid in, if any).
    pub fn remove_current(&mut self) -> Result<(), Error> {
        let (bucket, index) = match self.walk {
            Some(ref walk) if walk.index >= 0 => (walk.bucket as usize, walk.index),
            _ => return Err(Error::NoCursor),
        };

        self.remove_at(bucket, index)?;

        if let Some(ref mut walk) = self.walk {
            walk.index -= 1;
            walk.pending = None;
        }

        Ok(())
    }

    /// Abandon the built-in iteration early.
    pub fn break_iteration(&mut self) {
        self.walk = None;
    }

    /// Hash `key` and range-check the resulting bucket.
    fn locate(&self, key: &K) -> Result<usize, Error> {
        let size = self.buckets.len();
        let bucket = (self.hash)(size, key);

        if bucket >= size {
            return Err(Error::BadHash(bucket, size));
        }

        Ok(bucket)
    }

    /// Grow to the next table size, re-chaining every mapping.
    ///
    /// The mappings move wholesale, dispose functions and all, so growth
    /// neither copies keys nor changes ownership. The hash is validated
    /// against the new size in a read-only pass first: a hash that misfires
    /// fails the growth with the table untouched.
    fn grow(&mut self) -> Result<(), Error> {
        let size = self.buckets.len();
        let next = match TABLE_SIZES.iter().copied().find(|&s| s > size) {
            Some(next) => next,
            // Top of the ladder: growth is a silent no-op.
            None => return Ok(()),
        };

        let hash = self.hash;

        for chain in self.buckets.iter().flatten() {
            for mapping in chain.iter() {
                let bucket = hash(next, &mapping.key);
                if bucket >= next {
                    return Err(Error::BadHash(bucket, next));
                }
            }
        }

        let old = mem::replace(&mut self.buckets, (0..next).map(|_| None).collect());

        for chain in old.into_iter().flatten() {
            for mapping in chain.into_items() {
                let bucket = hash(next, &mapping.key);
                let chain = self.buckets[bucket]
                    .get_or_insert_with(|| RawSeq::new(Some(Mapping::release)));
                chain.push(mapping);
            }
        }

        Ok(())
    }

    /// The position after `(bucket, index)` in iteration order, skipping
    /// missing and empty chains. `(-1, -1)` means "before the first".
    pub(crate) fn advance(&self, bucket: isize, index: isize) -> Option<(usize, usize)> {
        let size = self.buckets.len();

        // Find the current (or first) existing chain.
        let mut b = if bucket < 0 { 0 } else { bucket as usize };
        while b < size && self.buckets[b].is_none() {
            b += 1;
        }
        if b == size {
            return None;
        }

        // The next mapping within it, if any.
        let len = self.buckets[b].as_ref().map_or(0, |chain| chain.len());
        let next = index + 1;
        if (next as usize) < len {
            return Some((b, next as usize));
        }

        // Otherwise the first mapping of the next existing, non-empty chain.
        loop {
            b += 1;
            while b < size && self.buckets[b].is_none() {
                b += 1;
            }
            if b == size {
                return None;
            }

            if let Some(chain) = self.buckets[b].as_ref() {
                if !chain.is_empty() {
                    return Some((b, 0));
                }
            }
        }
    }

    /// The mapping at `(bucket, index)`.
    pub(crate) fn mapping_at(&self, bucket: usize, index: usize) -> Option<&Mapping<K, V>> {
        self.buckets
            .get(bucket)?
            .as_ref()?
            .get(index as isize)
            .ok()
    }

    /// Remove the mapping at `(bucket, index)` and adjust the count.
    pub(crate) fn remove_at(&mut self, bucket: usize, index: isize) -> Result<(), Error> {
        match self.buckets.get_mut(bucket) {
            Some(Some(chain)) => {
                chain.remove(index)?;
                self.len -= 1;
                Ok(())
            }
            _ => Err(Error::NoCursor),
        }
    }
}

impl<V> RawMap<String, V> {
    /// A string-keyed map: TPOP hash, cloned keys, `==` equality.
    /// `value_dispose` is the value destructor, if the map is to own its
    /// values beyond what dropping them does.
    pub fn new(value_dispose: Option<Dispose<V>>) -> RawMap<String, V> {
        RawMap::with_size(TABLE_SIZES[0], str_hash, str_copy, str_eq, None, value_dispose)
    }

    /// A string-keyed map sized for `hint` mappings' worth of buckets.
    pub fn with_capacity(
        hint: usize,
        value_dispose: Option<Dispose<V>>,
    ) -> Result<RawMap<String, V>, Error> {
        RawMap::with_scheme(hint, str_hash, str_copy, str_eq, None, value_dispose)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for RawMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut map = f.debug_map();
        self.for_each(|key, value| {
            map.entry(key, value);
        });
        map.finish()
    }
}

/// An external cursor over a raw map.
///
/// Visits mappings in bucket order, then position within the chain, an
/// unspecified but stable order. `remove` deletes the mapping just returned
/// and steps back so the walk revisits the slot.
pub struct RawMapCursor<'a, K, V> {
    /// The map being walked.
    map: &'a mut RawMap<K, V>,
    /// Bucket of the mapping last returned; `-1` before the first.
    bucket: isize,
    /// Index within the chain of the mapping last returned.
    index: isize,
    /// The position pre-computed by `has_next`, consumed by `next`.
    pending: Option<(usize, usize)>,
}

impl<'a, K, V> RawMapCursor<'a, K, V> {
    /// Is there a mapping after the current one?
    pub fn has_next(&mut self) -> bool {
        self.pending = self.map.advance(self.bucket, self.index);
        self.pending.is_some()
    }

    /// Advance and return the next key and value, or `None` at the end.
    pub fn next(&mut self) -> Option<(&K, &V)> {
        let mapping = self.next_mapping()?;
        Some((&mapping.key, &mapping.value))
    }

    /// Advance and return the next mapping, or `None` at the end.
    pub fn next_mapping(&mut self) -> Option<&Mapping<K, V>> {
        let (b, i) = match self.pending.take() {
            Some(position) => position,
            None => self.map.advance(self.bucket, self.index)?,
        };

        self.bucket = b as isize;
        self.index = i as isize;
        self.map.mapping_at(b, i)
    }

    /// Remove the mapping last returned by `next`, destroying its key and
    /// value per the mapping's dispose functions.
    pub fn remove(&mut self) -> Result<(), Error> {
        if self.index < 0 {
            return Err(Error::NoCursor);
        }

        self.map.remove_at(self.bucket as usize, self.index)?;
        self.index -= 1;
        self.pending = None;
        Ok(())
    }
}
