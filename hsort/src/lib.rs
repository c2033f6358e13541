//! Generic in-place heap sort.
//!
//! This crate implements the classic binary heap sort over any slice, with the
//! comparator supplied by the caller. It exists as the big-array fallback for
//! sorting containers: the platform sort is faster on typical input, but heap
//! sort has a hard O(n log n) worst case and needs no scratch space, which is
//! what you want once an array is large enough for quicksort's bad cases to
//! hurt.
//!
//! Two entry points are provided: [`heapsort`] for element types that are
//! `Ord`, and [`heapsort_by`] for an arbitrary comparator (including closures
//! that carry state).
//!
//! The sort is not stable: the relative order of items that compare equal is
//! unpredictable.

use std::cmp::Ordering;

/// Sift the value at `node` down the heap covering `v[0..last]`.
///
/// `node` and `last` are 1-based, as is traditional for the parent/child
/// arithmetic (`child = 2 * node`); the slice accesses subtract one. The heap
/// is a max-heap: parents are not less than their children.
fn sift<T, F>(v: &mut [T], mut node: usize, last: usize, cmp: &mut F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    loop {
        // The left child. If it is beyond the heap, `node` is a leaf.
        let mut child = node * 2;
        if child > last {
            break;
        }

        // Pick the greater of the two children. The right child only exists
        // when the left child is not the last element of the heap.
        if child < last && cmp(&v[child], &v[child - 1]) == Ordering::Greater {
            child += 1;
        }

        // If the parent already dominates the greater child, the subtree
        // below is heap-ordered and we are done.
        if cmp(&v[node - 1], &v[child - 1]) != Ordering::Less {
            break;
        }

        v.swap(node - 1, child - 1);
        node = child;
    }
}

/// Sort `v` in place with heap sort.
///
/// Equivalent to `heapsort_by(v, T::cmp)`.
///
/// # Example
///
/// ```
/// let mut v = vec!["jkl", "ghi", "def", "abc"];
/// hsort::heapsort(&mut v);
/// assert_eq!(v, ["abc", "def", "ghi", "jkl"]);
/// ```
pub fn heapsort<T: Ord>(v: &mut [T]) {
    heapsort_by(v, T::cmp);
}

/// Sort `v` in place with heap sort, ordering items with `cmp`.
///
/// The comparator may be any closure, so callers can thread arbitrary state
/// through the comparison without a separate data pointer.
///
/// Slices shorter than two items are returned untouched.
pub fn heapsort_by<T, F>(v: &mut [T], mut cmp: F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    let n = v.len();
    if n < 2 {
        return;
    }

    // Phase 1: turn the array into a max-heap by sifting every interior node,
    // from the rightmost (n / 2) down to the second. The root is deliberately
    // skipped: the first iteration of phase 2 sifts it anyway. The bounds work
    // out the same for even and odd `n` since a lone left child is handled by
    // the `child < last` test in `sift`.
    for node in (2..=n / 2).rev() {
        sift(v, node, n, &mut cmp);
    }

    // Phase 2: each iteration makes the first item the maximum of the
    // remaining heap, then swaps it into its final position at the end. The
    // heap shrinks by one each time.
    for last in (2..=n).rev() {
        sift(v, 1, last, &mut cmp);
        v.swap(0, last - 1);
    }
}
