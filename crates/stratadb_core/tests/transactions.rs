//! Cross-component transaction scenarios, including restart and crash
//! recovery against a file-backed store.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use stratadb_core::{
    Config, CoreResult, KvStore, TransactionStore, TxStatus, UNDO_LOG_MAP,
};
use stratadb_storage::FileBackend;

fn memory_store() -> TransactionStore {
    TransactionStore::open(KvStore::open_in_memory().unwrap()).unwrap()
}

fn file_store(path: &Path) -> TransactionStore {
    let backend = FileBackend::open(path).unwrap();
    let kv = KvStore::open(Box::new(backend)).unwrap();
    TransactionStore::open(kv).unwrap()
}

fn s(v: &str) -> String {
    v.to_owned()
}

#[test]
fn read_your_writes_and_isolation() {
    let store = memory_store();

    let t1 = store.begin().unwrap();
    let m1 = t1.open_map::<String, String>("m").unwrap();
    m1.put(&s("a"), &s("1")).unwrap();
    assert_eq!(m1.get(&s("a")).unwrap(), Some(s("1")));

    let t2 = store.begin().unwrap();
    let m2 = t2.open_map::<String, String>("m").unwrap();
    assert_eq!(m2.get(&s("a")).unwrap(), None);

    t1.commit().unwrap();

    let t3 = store.begin().unwrap();
    let m3 = t3.open_map::<String, String>("m").unwrap();
    assert_eq!(m3.get(&s("a")).unwrap(), Some(s("1")));
}

#[test]
fn first_committer_wins_on_conflicting_keys() {
    let store = memory_store();

    let t1 = store.begin().unwrap();
    let m1 = t1.open_map::<String, String>("m").unwrap();
    m1.put(&s("a"), &s("1")).unwrap();

    let t2 = store.begin().unwrap();
    let m2 = t2.open_map::<String, String>("m").unwrap();
    assert!(!m2.try_put(&s("a"), &s("2")).unwrap());

    t1.commit().unwrap();
    assert!(m2.try_put(&s("a"), &s("2")).unwrap());
    t2.commit().unwrap();

    let reader = store.begin().unwrap();
    let map = reader.open_map::<String, String>("m").unwrap();
    assert_eq!(map.get(&s("a")).unwrap(), Some(s("2")));
}

#[test]
fn rollback_to_savepoint_restores_map_state() {
    let store = memory_store();

    let t1 = store.begin().unwrap();
    let m1 = t1.open_map::<String, String>("m").unwrap();
    m1.put(&s("a"), &s("1")).unwrap();
    let savepoint = t1.set_savepoint().unwrap();
    m1.put(&s("a"), &s("2")).unwrap();
    m1.put(&s("b"), &s("3")).unwrap();

    t1.rollback_to_savepoint(savepoint).unwrap();

    assert_eq!(m1.get(&s("a")).unwrap(), Some(s("1")));
    assert_eq!(m1.get(&s("b")).unwrap(), None);

    // the transaction keeps working after the partial rollback
    m1.put(&s("b"), &s("4")).unwrap();
    t1.commit().unwrap();

    let reader = store.begin().unwrap();
    let map = reader.open_map::<String, String>("m").unwrap();
    assert_eq!(map.get(&s("a")).unwrap(), Some(s("1")));
    assert_eq!(map.get(&s("b")).unwrap(), Some(s("4")));
}

#[test]
fn statement_snapshot_view() {
    let store = memory_store();

    let t1 = store.begin().unwrap();
    let m1 = t1.open_map::<String, String>("m").unwrap();
    m1.put(&s("a"), &s("1")).unwrap();
    t1.commit().unwrap();

    let t2 = store.begin().unwrap();
    let m2 = t2.open_map::<String, String>("m").unwrap();
    let stable = m2.instance(&t2, t2.set_savepoint().unwrap());
    m2.put(&s("a"), &s("2")).unwrap();

    assert_eq!(stable.get(&s("a")).unwrap(), Some(s("1")));
    assert_eq!(m2.get(&s("a")).unwrap(), Some(s("2")));
}

#[test]
fn crash_recovery_surfaces_open_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.journal");
    let crashed_id;
    {
        let store = file_store(&path);
        let t1 = store.begin().unwrap();
        crashed_id = t1.id();
        let m1 = t1.open_map::<String, String>("m").unwrap();
        m1.put(&s("a"), &s("1")).unwrap();
        // the backing store persists its pages, the transaction never
        // commits: this is the crash point
        store.kv().commit().unwrap();
    }

    let store = file_store(&path);
    let open = store.open_transactions().unwrap();
    assert_eq!(open.len(), 1);
    let t1 = &open[0];
    assert_eq!(t1.id(), crashed_id);
    assert_eq!(t1.status(), TxStatus::Open);
    // the recovered log position matches the one write before the crash
    assert_eq!(t1.set_savepoint().unwrap(), 1);

    t1.rollback().unwrap();
    assert_eq!(t1.status(), TxStatus::Closed);

    let reader = store.begin().unwrap();
    let map = reader.open_map::<String, String>("m").unwrap();
    assert_eq!(map.get(&s("a")).unwrap(), None);
    assert!(store.open_transactions().unwrap().is_empty());

    // recovered id allocation never reuses the crashed id
    assert!(reader.id() > crashed_id);
}

#[test]
fn prepared_transaction_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.journal");
    let prepared_id;
    {
        let store = file_store(&path);
        let t1 = store.begin().unwrap();
        prepared_id = t1.id();
        t1.set_name("tx1").unwrap();
        let m1 = t1.open_map::<String, String>("m").unwrap();
        m1.put(&s("a"), &s("1")).unwrap();
        t1.prepare().unwrap();
        store.close().unwrap();
    }

    let store = file_store(&path);
    let open = store.open_transactions().unwrap();
    assert_eq!(open.len(), 1);
    let t1 = &open[0];
    assert_eq!(t1.id(), prepared_id);
    assert_eq!(t1.status(), TxStatus::Prepared);
    assert_eq!(t1.name(), Some(s("tx1")));

    t1.commit().unwrap();

    let reader = store.begin().unwrap();
    let map = reader.open_map::<String, String>("m").unwrap();
    assert_eq!(map.get(&s("a")).unwrap(), Some(s("1")));
    assert!(store.open_transactions().unwrap().is_empty());
}

#[test]
fn commit_clears_the_undo_log() {
    let store = memory_store();
    let tx = store.begin().unwrap();
    let map = tx.open_map::<String, String>("m").unwrap();
    for i in 0..10 {
        map.put(&format!("k{i}"), &s("v")).unwrap();
    }
    map.remove(&s("k0")).unwrap();
    tx.commit().unwrap();

    let undo = store.kv().open_map(UNDO_LOG_MAP).unwrap();
    assert!(undo.is_empty());

    // the removed key is physically gone, the rest are visible
    let reader = store.begin().unwrap();
    let map = reader.open_map::<String, String>("m").unwrap();
    assert_eq!(map.get(&s("k0")).unwrap(), None);
    assert_eq!(map.len().unwrap(), 9);
}

#[test]
fn full_rollback_reverts_every_map() {
    let store = memory_store();

    let setup = store.begin().unwrap();
    let names = setup.open_map::<String, String>("names").unwrap();
    names.put(&s("x"), &s("before")).unwrap();
    setup.commit().unwrap();

    let tx = store.begin().unwrap();
    let names = tx.open_map::<String, String>("names").unwrap();
    let counts = tx.open_map::<String, u64>("counts").unwrap();
    names.put(&s("x"), &s("after")).unwrap();
    names.remove(&s("x")).unwrap();
    counts.put(&s("n"), &7).unwrap();
    let touched: HashSet<String> = ["names", "counts"].iter().map(|n| s(n)).collect();
    assert_eq!(tx.changed_maps(0).unwrap(), touched);
    tx.rollback().unwrap();

    let reader = store.begin().unwrap();
    let names = reader.open_map::<String, String>("names").unwrap();
    let counts = reader.open_map::<String, u64>("counts").unwrap();
    assert_eq!(names.get(&s("x")).unwrap(), Some(s("before")));
    assert_eq!(counts.get(&s("n")).unwrap(), None);

    let undo = store.kv().open_map(UNDO_LOG_MAP).unwrap();
    assert!(undo.is_empty());
}

#[test]
fn changed_maps_respects_savepoint() {
    let store = memory_store();
    let tx = store.begin().unwrap();
    let first = tx.open_map::<String, String>("first").unwrap();
    let second = tx.open_map::<String, String>("second").unwrap();

    first.put(&s("a"), &s("1")).unwrap();
    let savepoint = tx.set_savepoint().unwrap();
    second.put(&s("b"), &s("2")).unwrap();

    let after_savepoint: HashSet<String> = ["second"].iter().map(|n| s(n)).collect();
    assert_eq!(tx.changed_maps(savepoint).unwrap(), after_savepoint);
    let all: HashSet<String> = ["first", "second"].iter().map(|n| s(n)).collect();
    assert_eq!(tx.changed_maps(0).unwrap(), all);
    tx.rollback().unwrap();
}

#[test]
fn blocking_writes_succeed_once_lock_clears() {
    let store = memory_store();
    store.set_lock_timeout(Duration::from_secs(5));

    let t1 = store.begin().unwrap();
    let m1 = t1.open_map::<String, String>("m").unwrap();
    m1.put(&s("a"), &s("1")).unwrap();

    let store2 = store.clone();
    let handle = std::thread::spawn(move || -> CoreResult<()> {
        let t2 = store2.begin()?;
        let m2 = t2.open_map::<String, String>("m")?;
        // blocks until t1 commits, then wins the key
        m2.put(&s("a"), &s("2"))?;
        t2.commit()
    });

    std::thread::sleep(Duration::from_millis(10));
    t1.commit().unwrap();
    handle.join().unwrap().unwrap();

    let reader = store.begin().unwrap();
    let map = reader.open_map::<String, String>("m").unwrap();
    assert_eq!(map.get(&s("a")).unwrap(), Some(s("2")));
}

#[test]
fn disjoint_writers_commit_in_parallel() {
    let store = memory_store();

    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let store = store.clone();
            scope.spawn(move || {
                let tx = store.begin().unwrap();
                let map = tx.open_map::<u64, String>("m").unwrap();
                for i in 0..25u64 {
                    map.put(&(worker * 100 + i), &format!("w{worker}")).unwrap();
                }
                tx.commit().unwrap();
            });
        }
    });

    let reader = store.begin().unwrap();
    let map = reader.open_map::<u64, String>("m").unwrap();
    assert_eq!(map.len().unwrap(), 100);
    assert_eq!(map.get(&203).unwrap(), Some(s("w2")));
}

#[test]
fn lock_timeout_from_config() {
    let kv = KvStore::open_in_memory().unwrap();
    let store =
        TransactionStore::open_with_config(kv, Config::new().lock_timeout(Duration::from_millis(5)))
            .unwrap();
    assert_eq!(store.lock_timeout(), Duration::from_millis(5));

    let t1 = store.begin().unwrap();
    let m1 = t1.open_map::<String, String>("m").unwrap();
    m1.put(&s("a"), &s("1")).unwrap();

    let t2 = store.begin().unwrap();
    let m2 = t2.open_map::<String, String>("m").unwrap();
    assert!(m2.put(&s("a"), &s("2")).is_err());
}

#[test]
fn restart_preserves_committed_data_across_maps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.journal");
    {
        let store = file_store(&path);
        let tx = store.begin().unwrap();
        let users = tx.open_map::<u64, String>("users").unwrap();
        let tags = tx.open_map::<String, Vec<u8>>("tags").unwrap();
        users.put(&1, &s("ada")).unwrap();
        users.put(&2, &s("grace")).unwrap();
        tags.put(&s("ada"), &vec![1, 2, 3]).unwrap();
        tx.commit().unwrap();
        store.close().unwrap();
    }

    let store = file_store(&path);
    let tx = store.begin().unwrap();
    let users = tx.open_map::<u64, String>("users").unwrap();
    let tags = tx.open_map::<String, Vec<u8>>("tags").unwrap();
    assert_eq!(users.get(&1).unwrap(), Some(s("ada")));
    assert_eq!(users.get(&2).unwrap(), Some(s("grace")));
    assert_eq!(tags.get(&s("ada")).unwrap(), Some(vec![1, 2, 3]));
    assert!(store.open_transactions().unwrap().is_empty());
}
