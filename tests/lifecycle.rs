//! End-to-end lifecycle scenarios over the public API.

use basalt::{
    canonical_key, file_sha256, BasaltError, Manager, Registry, Settings, SharedHashMap,
    SharedMap, SharedSet, SharedVec,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn scoped_registry(dir: &TempDir) -> Arc<Registry> {
    Arc::new(Registry::new(
        Settings::default()
            .with_segments_dir(dir.path().join("segs"))
            .with_sweep_interval(Duration::from_millis(20)),
    ))
}

fn segment_count(dir: &TempDir) -> usize {
    match fs::read_dir(dir.path().join("segs")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn register_load_get_roundtrip() {
    let dir = TempDir::new().unwrap();
    let registry = scoped_registry(&dir);
    let manager = Manager::with_registry(Arc::clone(&registry), "ranking", 1).unwrap();

    let path = dir.path().join("ranks.snap");
    SharedVec::dump(&path, &[100u64, 200, 300]).unwrap();

    let ranks: Arc<SharedVec<u64>> = manager.register(&path).unwrap();
    assert_eq!(ranks.as_slice(), &[100, 200, 300]);

    let fetched: Arc<SharedVec<u64>> = registry.get(&path).unwrap();
    assert!(Arc::ptr_eq(&ranks, &fetched));
}

#[test]
fn second_process_attaches_without_reading_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("terms.snap");
    let set: BTreeSet<String> = ["alpha", "beta"].iter().map(|s| s.to_string()).collect();
    SharedSet::dump(&path, &set).unwrap();

    // First "process" creates and loads the segment.
    let registry_a = scoped_registry(&dir);
    let manager_a = Manager::with_registry(Arc::clone(&registry_a), "terms", 1).unwrap();
    let terms_a: Arc<SharedSet<String>> = manager_a.register(&path).unwrap();
    assert!(terms_a.contains(&"alpha".to_string()));

    // Corrupt the snapshot file: an attacher must not read it.
    fs::write(&path, b"garbage, never parsed").unwrap();

    // Second "process" (a separate registry over the same segment
    // store) joins the existing segment.
    let registry_b = Arc::new(Registry::new(
        Settings::default()
            .with_segments_dir(dir.path().join("segs"))
            .with_sweep_interval(Duration::from_millis(20)),
    ));
    let manager_b = Manager::with_registry(Arc::clone(&registry_b), "terms", 1).unwrap();
    let terms_b: Arc<SharedSet<String>> = manager_b.register(&path).unwrap();
    assert!(terms_b.contains(&"beta".to_string()));
    assert_eq!(terms_b.iter().count(), 2);
}

#[test]
fn wrong_type_get_is_rejected() {
    let dir = TempDir::new().unwrap();
    let registry = scoped_registry(&dir);
    let manager = Manager::with_registry(Arc::clone(&registry), "maps", 1).unwrap();

    let path = dir.path().join("m.snap");
    let mut map = BTreeMap::new();
    map.insert("k".to_string(), 1u64);
    SharedMap::dump(&path, &map).unwrap();

    let _m: Arc<SharedMap<String, u64>> = manager.register(&path).unwrap();

    let err = registry.get::<SharedSet<String>>(&path).unwrap_err();
    assert_eq!(err.code(), "ERR_TYPE");
    // The correctly typed handle still comes back.
    let m: Arc<SharedMap<String, u64>> = registry.get(&path).unwrap();
    assert_eq!(m.get(&"k".to_string()), Some(&1));
}

#[test]
fn default_verifier_checks_real_digests() {
    let dir = TempDir::new().unwrap();
    let registry = scoped_registry(&dir);
    let manager = Manager::with_registry(Arc::clone(&registry), "verified", 1).unwrap();

    let path = dir.path().join("hm.snap");
    let mut map = HashMap::new();
    map.insert("answer".to_string(), 42u32);
    SharedHashMap::dump(&path, &map).unwrap();

    // Wrong digest: the batch fails and registration refuses the file.
    let bad: HashMap<PathBuf, String> = [(path.clone(), "0".repeat(64))].into_iter().collect();
    let err = registry
        .verify_files(&bad, registry.settings().default_verifier, 1)
        .unwrap_err();
    assert_eq!(err.code(), "MISMATCH");
    let err = manager.register::<SharedHashMap<String, u32>>(&path).unwrap_err();
    assert_eq!(err.code(), "MISMATCH");

    // Correct digest: verification passes and registration succeeds.
    let good: HashMap<PathBuf, String> =
        [(path.clone(), file_sha256(&path).unwrap())].into_iter().collect();
    registry
        .verify_files(&good, registry.settings().default_verifier, 1)
        .unwrap();
    let hm: Arc<SharedHashMap<String, u32>> = manager.register(&path).unwrap();
    assert_eq!(hm.get(&"answer".to_string()), Some(&42));
}

#[test]
fn release_then_janitor_empties_registry_and_store() {
    let dir = TempDir::new().unwrap();
    let registry = scoped_registry(&dir);
    let manager = Manager::with_registry(Arc::clone(&registry), "g", 1).unwrap();

    let path_a = dir.path().join("a.snap");
    let path_b = dir.path().join("b.snap");
    SharedVec::dump(&path_a, &[1u32]).unwrap();
    SharedVec::dump(&path_b, &[2u32, 3]).unwrap();

    let a: Arc<SharedVec<u32>> = manager.register(&path_a).unwrap();
    let b: Arc<SharedVec<u32>> = manager.register(&path_b).unwrap();
    assert_eq!(segment_count(&dir), 2);

    // A reader still holds `b` at release time, so its entry outlives
    // the release call until the janitor notices the drop.
    drop(a);
    manager.release();
    drop(b);

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let a_gone = matches!(
            registry.get::<SharedVec<u32>>(&path_a),
            Err(BasaltError::NotRegistered { .. })
        );
        let b_gone = matches!(
            registry.get::<SharedVec<u32>>(&path_b),
            Err(BasaltError::NotRegistered { .. })
        );
        if a_gone && b_gone && segment_count(&dir) == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "janitor never emptied the registry");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn clear_by_group_spares_reserved_groups() {
    let dir = TempDir::new().unwrap();
    let registry = scoped_registry(&dir);
    let ranker = Manager::with_registry(Arc::clone(&registry), "ranker", 1).unwrap();
    let index = Manager::with_registry(Arc::clone(&registry), "index", 1).unwrap();

    let rank_path = dir.path().join("rank.snap");
    let index_path = dir.path().join("index.snap");
    SharedVec::dump(&rank_path, &[1u32]).unwrap();
    SharedVec::dump(&index_path, &[2u32]).unwrap();

    let _r: Arc<SharedVec<u32>> = ranker.register(&rank_path).unwrap();
    let i: Arc<SharedVec<u32>> = index.register(&index_path).unwrap();
    drop(i);

    let reserve = ["ranker".to_string()].into_iter().collect();
    registry.clear_by_group(&reserve, 1);

    // The doomed entry is invisible to readers at once; it lingers in
    // the table only until its manager lets go of the local reference.
    assert!(registry.get::<SharedVec<u32>>(&rank_path).is_ok());
    assert!(matches!(
        registry.get::<SharedVec<u32>>(&index_path),
        Err(BasaltError::NotReady { .. })
    ));

    index.release();
    assert!(matches!(
        registry.get::<SharedVec<u32>>(&index_path),
        Err(BasaltError::NotRegistered { .. })
    ));
    assert!(registry.get::<SharedVec<u32>>(&rank_path).is_ok());
}

#[test]
fn canonical_keys_deduplicate_spellings() {
    let dir = TempDir::new().unwrap();
    let registry = scoped_registry(&dir);
    let manager = Manager::with_registry(Arc::clone(&registry), "g", 1).unwrap();

    let path = dir.path().join("v.snap");
    SharedVec::dump(&path, &[9u8]).unwrap();

    let _v: Arc<SharedVec<u8>> = manager.register(&path).unwrap();

    // A dotted spelling of the same file resolves to the same key.
    let dotted = dir.path().join(".").join("v.snap");
    let err = manager.register::<SharedVec<u8>>(&dotted).unwrap_err();
    assert_eq!(err.code(), "ALREADY_EXISTS");

    let same: Arc<SharedVec<u8>> = registry.get(&dotted).unwrap();
    assert_eq!(same.as_slice(), &[9]);
    assert_eq!(canonical_key(&dotted).unwrap(), canonical_key(&path).unwrap());
}

#[test]
fn global_manager_smoke() {
    let manager = Manager::new("smoke").unwrap();
    let err = manager
        .register::<SharedVec<u8>>("/no/such/snapshot.snap")
        .unwrap_err();
    assert_eq!(err.code(), "PATH_INVALID");
}
