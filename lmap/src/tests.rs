use crate::{str_copy, str_eq, str_hash, Error, Map, RawMap};

use locker::Locker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn s(text: &str) -> String {
    text.to_string()
}

#[test]
fn insert_and_get() {
    let map: Map<String, String> = Map::new(None);

    assert_eq!(map.len().unwrap(), 0);
    map.add(&s("1"), s("7")).unwrap();
    map.add(&s("2"), s("6")).unwrap();
    assert_eq!(map.len().unwrap(), 2);

    assert_eq!(*map.get(&s("1")).unwrap().unwrap(), "7");
    assert_eq!(*map.get(&s("2")).unwrap().unwrap(), "6");
    assert!(map.get(&s("3")).unwrap().is_none());
    assert!(map.contains_key(&s("1")));
    assert!(!map.contains_key(&s("3")));
}

#[test]
fn seven_keys_in_bucket_order() {
    let map: Map<String, String> = Map::new(None);

    for (key, value) in [
        ("1", "7"),
        ("2", "6"),
        ("3", "5"),
        ("4", "4"),
        ("5", "3"),
        ("6", "2"),
        ("7", "1"),
    ] {
        map.add(&s(key), s(value)).unwrap();
    }

    assert_eq!(*map.get(&s("4")).unwrap().unwrap(), "4");

    // Iteration order is bucket order under the TPOP hash with 11 buckets:
    // "7" hashes to bucket 0, "1" to 5, "2" to 6, and so on.
    let mut transcript = String::new();
    map.for_each(|key, value| {
        if !transcript.is_empty() {
            transcript.push_str(", ");
        }
        transcript.push_str(key);
        transcript.push('=');
        transcript.push_str(value);
    })
    .unwrap();

    assert_eq!(transcript, "7=1, 1=7, 2=6, 3=5, 4=4, 5=3, 6=2");
}

#[test]
fn add_refuses_duplicates() {
    let map: Map<String, u32> = Map::new(None);

    map.add(&s("k"), 1).unwrap();
    assert_eq!(map.add(&s("k"), 2), Err(Error::Exists));

    // The failed insert changed nothing.
    assert_eq!(map.len().unwrap(), 1);
    assert_eq!(*map.get(&s("k")).unwrap().unwrap(), 1);

    // put replaces, without inflating the count.
    map.put(&s("k"), 2).unwrap();
    assert_eq!(map.len().unwrap(), 1);
    assert_eq!(*map.get(&s("k")).unwrap().unwrap(), 2);
}

#[test]
fn remove_and_not_found() {
    let map: Map<String, u32> = Map::new(None);

    map.add(&s("a"), 1).unwrap();
    map.add(&s("b"), 2).unwrap();

    map.remove(&s("a")).unwrap();
    assert_eq!(map.len().unwrap(), 1);
    assert!(map.get(&s("a")).unwrap().is_none());
    assert_eq!(map.remove(&s("a")), Err(Error::NotFound));
    assert_eq!(map.remove(&s("zzz")), Err(Error::NotFound));

    // Insert then remove restores the observable state.
    map.add(&s("c"), 3).unwrap();
    map.remove(&s("c")).unwrap();
    assert_eq!(map.len().unwrap(), 1);
    assert!(map.get(&s("c")).unwrap().is_none());
    assert_eq!(*map.get(&s("b")).unwrap().unwrap(), 2);
}

#[test]
fn growth_along_the_ladder() {
    let map: Map<String, usize> = Map::new(None);
    assert_eq!(map.buckets().unwrap(), 11);

    // The load factor is 2.0: 22 mappings fit in 11 buckets, the 23rd
    // insertion grows the table first.
    for i in 0..22 {
        map.add(&i.to_string(), i).unwrap();
    }
    assert_eq!(map.buckets().unwrap(), 11);

    map.add(&s("22"), 22).unwrap();
    assert_eq!(map.buckets().unwrap(), 23);

    for i in 23..25 {
        map.add(&i.to_string(), i).unwrap();
    }

    assert_eq!(map.len().unwrap(), 25);
    assert_eq!(map.buckets().unwrap(), 23);

    // Growth preserved every mapping, no duplicates, no losses.
    for i in 0..25 {
        assert_eq!(*map.get(&i.to_string()).unwrap().unwrap(), i);
    }
}

#[test]
fn growth_is_observation_preserving() {
    let map: Map<String, usize> = Map::new(None);

    for i in 0..100 {
        map.add(&i.to_string(), i).unwrap();
    }

    // 11 -> 23 -> 47 -> 101 by the time 100 mappings are in.
    assert_eq!(map.buckets().unwrap(), 101);
    assert_eq!(map.len().unwrap(), 100);

    let mut seen = 0;
    map.for_each(|key, value| {
        assert_eq!(key, &value.to_string());
        seen += 1;
    })
    .unwrap();
    assert_eq!(seen, 100);

    for i in 0..100 {
        assert_eq!(*map.get(&i.to_string()).unwrap().unwrap(), i);
    }
}

#[test]
fn size_hint_rounds_up_the_ladder() {
    let map: Map<String, u32> = Map::with_capacity(50, None).unwrap();
    assert_eq!(map.buckets().unwrap(), 101);

    let map: Map<String, u32> = Map::with_capacity(11, None).unwrap();
    assert_eq!(map.buckets().unwrap(), 11);

    assert_eq!(
        Map::<String, u32>::with_capacity(30_000_000, None).unwrap_err(),
        Error::TooBig(30_000_000)
    );
}

#[test]
fn dispose_accounting() {
    static KEYS: AtomicUsize = AtomicUsize::new(0);
    static VALUES: AtomicUsize = AtomicUsize::new(0);

    fn key_gone(key: String) {
        KEYS.fetch_add(1, Ordering::SeqCst);
        drop(key);
    }

    fn value_gone(value: String) {
        VALUES.fetch_add(1, Ordering::SeqCst);
        drop(value);
    }

    {
        let map: Map<String, String> = Map::with_scheme(
            0,
            str_hash,
            str_copy,
            str_eq,
            Some(key_gone),
            Some(value_gone),
            Locker::none(),
        )
        .unwrap();

        map.add(&s("a"), s("1")).unwrap();
        map.add(&s("b"), s("2")).unwrap();
        assert_eq!((KEYS.load(Ordering::SeqCst), VALUES.load(Ordering::SeqCst)), (0, 0));

        // Replacing destroys the old mapping's key and value.
        map.put(&s("a"), s("3")).unwrap();
        assert_eq!((KEYS.load(Ordering::SeqCst), VALUES.load(Ordering::SeqCst)), (1, 1));

        // So does removal.
        map.remove(&s("b")).unwrap();
        assert_eq!((KEYS.load(Ordering::SeqCst), VALUES.load(Ordering::SeqCst)), (2, 2));

        // One mapping left; destruction accounts for it.
    }

    assert_eq!((KEYS.load(Ordering::SeqCst), VALUES.load(Ordering::SeqCst)), (3, 3));
}

#[test]
fn growth_keeps_dispose_functions() {
    static VALUES: AtomicUsize = AtomicUsize::new(0);

    fn value_gone(value: String) {
        VALUES.fetch_add(1, Ordering::SeqCst);
        drop(value);
    }

    {
        let map: Map<String, String> = Map::new(Some(value_gone));

        // Push the map through a growth so every mapping has moved table.
        for i in 0..30 {
            map.add(&i.to_string(), i.to_string()).unwrap();
        }
        assert_eq!(map.buckets().unwrap(), 23);
        assert_eq!(VALUES.load(Ordering::SeqCst), 0);
    }

    // The carried dispose functions survived the move.
    assert_eq!(VALUES.load(Ordering::SeqCst), 30);
}

#[test]
fn own_and_disown() {
    static VALUES: AtomicUsize = AtomicUsize::new(0);

    fn value_gone(value: String) {
        VALUES.fetch_add(1, Ordering::SeqCst);
        drop(value);
    }

    {
        let map: Map<String, String> = Map::new(Some(value_gone));
        map.add(&s("a"), s("1")).unwrap();
        map.add(&s("b"), s("2")).unwrap();

        // Disowning hands the values back: nothing is counted from here on.
        let dispose = map.disown().unwrap();
        assert_eq!(dispose, Some(value_gone as fn(String)));
        map.remove(&s("a")).unwrap();
        assert_eq!(VALUES.load(Ordering::SeqCst), 0);

        // Owning again re-installs it into the surviving mapping.
        map.own(value_gone).unwrap();
        map.remove(&s("b")).unwrap();
        assert_eq!(VALUES.load(Ordering::SeqCst), 1);
    }

    assert_eq!(VALUES.load(Ordering::SeqCst), 1);
}

#[test]
fn get_mut_updates_in_place() {
    let map: Map<String, u32> = Map::new(None);
    map.add(&s("n"), 1).unwrap();

    {
        let mut value = map.get_mut(&s("n")).unwrap().unwrap();
        *value += 41;
    }

    assert_eq!(*map.get(&s("n")).unwrap().unwrap(), 42);
    assert!(map.get_mut(&s("missing")).unwrap().is_none());
}

#[test]
fn cursor_walks_everything() {
    let map: Map<String, usize> = Map::new(None);
    for i in 0..10 {
        map.add(&i.to_string(), i).unwrap();
    }

    // The cursor and for_each agree on the (bucket-derived) order.
    let mut by_for_each = Vec::new();
    map.for_each(|key, value| by_for_each.push((key.clone(), *value)))
        .unwrap();

    let mut by_cursor = Vec::new();
    let mut cursor = map.cursor().unwrap();
    while let Some((key, value)) = cursor.next() {
        by_cursor.push((key.clone(), *value));
    }
    drop(cursor);

    assert_eq!(by_for_each, by_cursor);
    assert_eq!(by_cursor.len(), 10);
}

#[test]
fn cursor_removes() {
    let map: Map<String, usize> = Map::new(None);
    for i in 0..10 {
        map.add(&i.to_string(), i).unwrap();
    }

    {
        let mut cursor = map.cursor().unwrap();
        assert_eq!(cursor.remove(), Err(Error::NoCursor));

        while let Some((_, &value)) = cursor.next() {
            if value % 2 == 1 {
                cursor.remove().unwrap();
            }
        }
    }

    assert_eq!(map.len().unwrap(), 5);
    for i in 0..10 {
        assert_eq!(map.get(&i.to_string()).unwrap().is_some(), i % 2 == 0);
    }
}

#[test]
fn built_in_iteration() {
    let mut map = RawMap::<String, usize>::new(None);
    for i in 0..6 {
        map.add(&i.to_string(), i).unwrap();
    }

    assert_eq!(map.next(), Err(Error::NoCursor));

    let mut seen = 0;
    while map.has_next() {
        let (key, value) = map.next().unwrap();
        assert_eq!(key, &value.to_string());
        seen += 1;
        if value % 3 == 0 {
            map.remove_current().unwrap();
        }
    }

    assert_eq!(seen, 6);
    assert_eq!(map.len(), 4);

    // Exhaustion cleared the anchor; a new pass starts from the top.
    assert!(map.has_next());
    map.break_iteration();
    assert_eq!(map.next(), Err(Error::NoCursor));
}

#[test]
fn snapshots_borrow_in_iteration_order() {
    let mut raw = RawMap::<String, usize>::new(None);
    for i in 0..8 {
        raw.add(&i.to_string(), i).unwrap();
    }

    let mut order = Vec::new();
    raw.for_each(|key, value| order.push((key.clone(), *value)));

    let keys = raw.keys();
    let values = raw.values();
    assert_eq!(keys.len(), 8);
    assert_eq!(values.len(), 8);

    for (at, (key, value)) in order.iter().enumerate() {
        assert_eq!(*keys.get(at as isize).unwrap(), key);
        assert_eq!(**values.get(at as isize).unwrap(), *value);
    }
}

#[test]
fn cloned_snapshots() {
    let map: Map<String, usize> = Map::new(None);
    for i in 0..5 {
        map.add(&i.to_string(), i).unwrap();
    }

    let keys = map.keys_cloned().unwrap();
    let values = map.values_cloned().unwrap();
    assert_eq!(keys.len(), 5);
    assert_eq!(values.len(), 5);

    // Key at position i maps to value at position i.
    for at in 0..5isize {
        let key = keys.get(at).unwrap();
        let value = values.get(at).unwrap();
        assert_eq!(*map.get(key).unwrap().unwrap(), *value);
    }
}

#[test]
fn bad_hash_is_reported() {
    fn bad_hash(size: usize, _: &String) -> usize {
        size
    }

    let map: Map<String, u32> =
        Map::with_scheme(0, bad_hash, str_copy, str_eq, None, None, Locker::none()).unwrap();

    assert_eq!(map.add(&s("k"), 1), Err(Error::BadHash(11, 11)));
    assert_eq!(map.remove(&s("k")), Err(Error::BadHash(11, 11)));
    assert!(map.get(&s("k")).unwrap().is_none());
    assert_eq!(map.len().unwrap(), 0);
}

#[test]
fn custom_scheme_hash() {
    // A one-bucket-per-length scheme: collides everything of equal length.
    fn length_hash(size: usize, key: &String) -> usize {
        key.len() % size
    }

    let map: Map<String, u32> = Map::with_scheme(
        0,
        length_hash,
        str_copy,
        str_eq,
        None,
        None,
        Locker::none(),
    )
    .unwrap();

    map.add(&s("a"), 1).unwrap();
    map.add(&s("b"), 2).unwrap();
    map.add(&s("cc"), 3).unwrap();

    // "a" and "b" share a chain; equality still tells them apart.
    assert_eq!(*map.get(&s("a")).unwrap().unwrap(), 1);
    assert_eq!(*map.get(&s("b")).unwrap().unwrap(), 2);
    assert_eq!(*map.get(&s("cc")).unwrap().unwrap(), 3);
}

#[test]
fn guards_compose_raw_operations() {
    let map: Map<String, u32> = Map::with_locker(None, Locker::mutex());

    {
        let mut guard = map.write().unwrap();
        guard.add(&s("a"), 1).unwrap();
        guard.add(&s("b"), 2).unwrap();
        assert_eq!(guard.len(), 2);
    }

    let guard = map.read().unwrap();
    assert_eq!(guard.get(&s("a")), Some(&1));
    assert_eq!(guard.get(&s("b")), Some(&2));
}

#[test]
fn spam_insert_across_threads() {
    let map: Arc<Map<String, u64>> = Arc::new(Map::with_locker(None, Locker::rwlock()));
    let mut joins = Vec::new();

    for t in 0..8u64 {
        let map = map.clone();
        joins.push(thread::spawn(move || {
            for i in 0..200 {
                let key = (t * 1000 + i).to_string();
                map.add(&key, t * 1000 + i).unwrap();
            }
        }));
    }

    for join in joins {
        join.join().unwrap();
    }

    assert_eq!(map.len().unwrap(), 1600);

    let mut joins = Vec::new();
    for t in 0..8u64 {
        let map = map.clone();
        joins.push(thread::spawn(move || {
            for i in 0..200 {
                let key = (t * 1000 + i).to_string();
                assert_eq!(*map.get(&key).unwrap().unwrap(), t * 1000 + i);
            }
        }));
    }

    for join in joins {
        join.join().unwrap();
    }
}

#[test]
fn readers_share_the_rwlock() {
    let map: Arc<Map<String, u64>> = Arc::new(Map::with_locker(None, Locker::rwlock()));
    map.add(&s("k"), 7).unwrap();

    // Two value guards held at once: both readers, no deadlock.
    let a = map.get(&s("k")).unwrap().unwrap();
    let b = map.get(&s("k")).unwrap().unwrap();
    assert_eq!(*a, 7);
    assert_eq!(*b, 7);
}
