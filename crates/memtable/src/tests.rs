use super::*;
use std::sync::Arc;
use std::thread;

fn collect(list: &SkipList) -> Vec<(String, String)> {
    let mut out = Vec::new();
    list.for_each::<_, ()>(|k, v| {
        out.push((k.to_string(), v.to_string()));
        Ok(())
    })
    .unwrap();
    out
}

// -------------------- Basic operations --------------------

#[test]
fn insert_get_overwrite() {
    let list = SkipList::new();
    list.insert("k1", "v1");
    assert_eq!(list.len(), 1);
    assert_eq!(list.get("k1").as_deref(), Some("v1"));

    list.insert("k1", "v2");
    assert_eq!(list.len(), 1, "overwrite must not add a node");
    assert_eq!(list.get("k1").as_deref(), Some("v2"));

    assert_eq!(list.get("missing"), None);
}

#[test]
fn search_reports_membership() {
    let list = SkipList::new();
    list.insert("a", "1");
    assert!(list.search("a"));
    assert!(!list.search("b"));
}

#[test]
fn remove_unsplices_node() {
    let list = SkipList::new();
    list.insert("a", "1");
    list.insert("b", "2");
    list.insert("c", "3");

    assert!(list.remove("b"));
    assert!(!list.remove("b"), "second remove finds nothing");
    assert_eq!(list.len(), 2);
    assert_eq!(list.get("b"), None);
    assert_eq!(list.get("a").as_deref(), Some("1"));
    assert_eq!(list.get("c").as_deref(), Some("3"));

    let keys: Vec<String> = collect(&list).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["a", "c"]);
}

#[test]
fn remove_everything_resets_level() {
    let list = SkipList::new();
    for i in 0..200 {
        list.insert(&format!("k{:03}", i), "v");
    }
    for i in 0..200 {
        assert!(list.remove(&format!("k{:03}", i)));
    }
    assert!(list.is_empty());
    assert_eq!(list.level(), 0);
    assert_eq!(list.approximate_size(), 0);
}

#[test]
fn reinsert_after_remove() {
    let list = SkipList::new();
    list.insert("k", "old");
    list.remove("k");
    list.insert("k", "new");
    assert_eq!(list.get("k").as_deref(), Some("new"));
    assert_eq!(list.len(), 1);
}

// -------------------- Ordering invariants --------------------

#[test]
fn traversal_is_strictly_ascending() {
    let list = SkipList::new();
    // Insert in a scrambled order.
    for i in [42, 7, 99, 0, 13, 55, 21, 88, 3, 67] {
        list.insert(&format!("key_{:02}", i), &format!("val_{}", i));
    }

    let entries = collect(&list);
    assert_eq!(entries.len(), 10);
    for pair in entries.windows(2) {
        assert!(
            pair[0].0 < pair[1].0,
            "keys out of order: {} >= {}",
            pair[0].0,
            pair[1].0
        );
    }
}

#[test]
fn upper_chains_are_subsequences() {
    let list = SkipList::new();
    for i in 0..500 {
        list.insert(&format!("k{:04}", i), "v");
    }

    let base = list.keys_at_level(0);
    assert_eq!(base.len(), 500);

    for lvl in 1..=list.level() {
        let chain = list.keys_at_level(lvl);
        let below = list.keys_at_level(lvl - 1);
        // Every chain must be an ordered subsequence of the chain below.
        let mut pos = 0;
        for key in &chain {
            match below[pos..].iter().position(|k| k == key) {
                Some(off) => pos += off + 1,
                None => panic!("level {} chain contains {} missing below", lvl, key),
            }
        }
    }
}

// -------------------- Size accounting --------------------

#[test]
fn approximate_size_tracks_bytes() {
    let list = SkipList::new();
    assert_eq!(list.approximate_size(), 0);

    list.insert("ab", "cde");
    assert_eq!(list.approximate_size(), 5);

    // Overwrite adjusts by the value-length delta; the key is counted once.
    list.insert("ab", "x");
    assert_eq!(list.approximate_size(), 3);
    list.insert("ab", "xyzw");
    assert_eq!(list.approximate_size(), 6);

    list.remove("ab");
    assert_eq!(list.approximate_size(), 0);
}

#[test]
fn tombstone_is_an_ordinary_value() {
    let list = SkipList::new();
    list.insert("k", "v");
    list.insert("k", TOMBSTONE);
    assert_eq!(list.get("k").as_deref(), Some(TOMBSTONE));
    assert_eq!(list.len(), 1);
}

// -------------------- Concurrency --------------------

#[test]
fn concurrent_writers_and_readers() {
    let list = Arc::new(SkipList::new());
    let threads = 8;
    let per_thread = 500;

    let mut handles = Vec::new();
    for t in 0..threads {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let key = format!("t{}_k{:04}", t, i);
                let value = format!("t{}_v{}", t, i);
                list.insert(&key, &value);
                // Read-your-writes on the same thread.
                assert_eq!(list.get(&key), Some(value));
                // Interleave reads of other threads' keyspace; they are
                // either absent or fully formed, never torn.
                let other = format!("t{}_k{:04}", (t + 1) % threads, i);
                if let Some(v) = list.get(&other) {
                    assert!(v.starts_with(&format!("t{}_v", (t + 1) % threads)));
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(list.len(), (threads * per_thread) as u64);
    for t in 0..threads {
        for i in 0..per_thread {
            let key = format!("t{}_k{:04}", t, i);
            assert_eq!(list.get(&key), Some(format!("t{}_v{}", t, i)));
        }
    }

    let entries = collect(&list);
    for pair in entries.windows(2) {
        assert!(pair[0].0 < pair[1].0, "ordering broken after concurrent load");
    }
}

#[test]
fn concurrent_overwrites_converge() {
    let list = Arc::new(SkipList::new());
    let mut handles = Vec::new();
    for t in 0..4 {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            for i in 0..1000 {
                list.insert("shared", &format!("writer{}_{}", t, i));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(list.len(), 1);
    let v = list.get("shared").unwrap();
    assert!(v.starts_with("writer"), "value must be one complete write: {}", v);
}
