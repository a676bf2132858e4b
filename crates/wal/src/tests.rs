use super::*;
use crc32fast::Hasher as Crc32;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn replay_all(path: &Path) -> (Vec<(String, String)>, ReplaySummary) {
    let mut out = Vec::new();
    let summary = replay(path, |k, v| out.push((k, v))).unwrap();
    (out, summary)
}

// -------------------- Append / replay --------------------

#[test]
fn append_then_replay_roundtrip() {
    let dir = tempdir().unwrap();
    let wal = WalManager::open(dir.path(), true).unwrap();

    wal.log_put("a", "1").unwrap();
    wal.log_put("b", "2").unwrap();
    wal.log_put("a", "1b").unwrap();
    drop(wal);

    let (records, summary) = replay_all(&dir.path().join(WAL_FILE_NAME));
    assert_eq!(summary.records, 3);
    assert!(!summary.truncated);
    assert_eq!(
        records,
        vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1b".to_string()),
        ]
    );
}

#[test]
fn empty_value_roundtrips() {
    let dir = tempdir().unwrap();
    let wal = WalManager::open(dir.path(), false).unwrap();
    wal.log_put("key", "").unwrap();
    wal.sync_to_disk().unwrap();
    drop(wal);

    let (records, _) = replay_all(&dir.path().join(WAL_FILE_NAME));
    assert_eq!(records, vec![("key".to_string(), String::new())]);
}

#[test]
fn values_may_contain_commas_and_newlines() {
    let dir = tempdir().unwrap();
    let wal = WalManager::open(dir.path(), true).unwrap();
    wal.log_put("k,1", "line1\nline2,with,commas").unwrap();
    drop(wal);

    let (records, _) = replay_all(&dir.path().join(WAL_FILE_NAME));
    assert_eq!(records[0].0, "k,1");
    assert_eq!(records[0].1, "line1\nline2,with,commas");
}

#[test]
fn missing_file_is_empty_replay() {
    let dir = tempdir().unwrap();
    let (records, summary) = replay_all(&dir.path().join("nonexistent.log"));
    assert!(records.is_empty());
    assert_eq!(summary.records, 0);
    assert!(!summary.truncated);
}

#[test]
fn reopen_appends_instead_of_truncating() {
    let dir = tempdir().unwrap();
    {
        let wal = WalManager::open(dir.path(), true).unwrap();
        wal.log_put("first", "1").unwrap();
    }
    {
        let wal = WalManager::open(dir.path(), true).unwrap();
        wal.log_put("second", "2").unwrap();
    }

    let (records, _) = replay_all(&dir.path().join(WAL_FILE_NAME));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].0, "first");
    assert_eq!(records[1].0, "second");
}

// -------------------- Rotation --------------------

#[test]
fn rotate_archives_and_starts_fresh() {
    let dir = tempdir().unwrap();
    let wal = WalManager::open(dir.path(), true).unwrap();

    wal.log_put("old", "epoch0").unwrap();
    wal.rotate().unwrap();
    wal.log_put("new", "epoch1").unwrap();
    drop(wal);

    // The active log holds only the post-rotation record.
    let (records, _) = replay_all(&dir.path().join(WAL_FILE_NAME));
    assert_eq!(records, vec![("new".to_string(), "epoch1".to_string())]);

    // Exactly one archived epoch exists and holds the old record.
    let archives: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("wal.log."))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(archives.len(), 1);

    let (archived, _) = replay_all(&archives[0]);
    assert_eq!(archived, vec![("old".to_string(), "epoch0".to_string())]);
}

#[test]
fn rotate_on_fresh_log_is_harmless() {
    let dir = tempdir().unwrap();
    let wal = WalManager::open(dir.path(), true).unwrap();
    wal.rotate().unwrap();
    wal.log_put("k", "v").unwrap();
    drop(wal);

    let (records, _) = replay_all(&dir.path().join(WAL_FILE_NAME));
    assert_eq!(records.len(), 1);
}

// -------------------- Corruption handling --------------------

#[test]
fn truncated_tail_recovers_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(WAL_FILE_NAME);
    {
        let wal = WalManager::open(dir.path(), true).unwrap();
        wal.log_put("kept", "yes").unwrap();
        wal.log_put("torn", "partially-written-value").unwrap();
    }

    // Chop bytes off the final record, simulating a crash mid-append.
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 7]).unwrap();

    let (records, summary) = replay_all(&path);
    assert_eq!(records, vec![("kept".to_string(), "yes".to_string())]);
    assert_eq!(summary.records, 1);
    assert!(summary.truncated, "torn tail must be reported");
}

#[test]
fn crc_mismatch_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(WAL_FILE_NAME);
    {
        let wal = WalManager::open(dir.path(), true).unwrap();
        wal.log_put("k", "v").unwrap();
    }

    // Flip a byte inside the body; the frame lengths stay intact.
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let res = replay(&path, |_, _| {});
    assert!(matches!(res, Err(WalError::Corrupt)));
}

#[test]
fn absurd_record_length_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(WAL_FILE_NAME);
    // record_len = u32::MAX, nothing else.
    std::fs::write(&path, u32::MAX.to_be_bytes()).unwrap();

    let res = replay(&path, |_, _| {});
    assert!(matches!(res, Err(WalError::Corrupt)));
}

#[test]
fn unknown_op_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(WAL_FILE_NAME);

    // Hand-build a frame with op = 9 and a valid CRC.
    let mut body = Vec::new();
    body.push(9u8);
    body.extend_from_slice(&1u32.to_be_bytes());
    body.push(b'k');
    body.extend_from_slice(&1u32.to_be_bytes());
    body.push(b'v');

    let mut hasher = Crc32::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let mut frame = Vec::new();
    frame.extend_from_slice(&((body.len() as u32) + 4).to_be_bytes());
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&body);
    std::fs::write(&path, &frame).unwrap();

    let res = replay(&path, |_, _| {});
    assert!(matches!(res, Err(WalError::Corrupt)));
}

// -------------------- Concurrency --------------------

#[test]
fn concurrent_appends_are_atomic() {
    let dir = tempdir().unwrap();
    let wal = Arc::new(WalManager::open(dir.path(), false).unwrap());

    let mut handles = Vec::new();
    for t in 0..4 {
        let wal = Arc::clone(&wal);
        handles.push(thread::spawn(move || {
            for i in 0..200 {
                wal.log_put(&format!("t{}_{}", t, i), &format!("v{}", i)).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    wal.sync_to_disk().unwrap();
    drop(wal);

    // Every record must replay intact; interleaving order is arbitrary.
    let (records, summary) = replay_all(&dir.path().join(WAL_FILE_NAME));
    assert_eq!(summary.records, 800);
    assert!(!summary.truncated);
    for (k, v) in &records {
        let (t_part, i_part) = k.split_once('_').expect("well-formed key");
        assert!(t_part.starts_with('t'));
        assert_eq!(v, &format!("v{}", i_part));
    }
}
