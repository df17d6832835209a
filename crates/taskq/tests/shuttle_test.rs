//! Shuttle protocol: persist/load round-trips within and across groups.

use makroq_comm::{partition, Communicator, Universe};
use makroq_taskq::shuttle;
use makroq_taskq::{DistributedVector, QueueError, SideStore, SideStoreError};

#[test]
fn persist_then_load_in_the_same_group() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(3, move |u| {
        let store = SideStore::new(&path).unwrap();
        let v = DistributedVector::from_full(&u, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        shuttle::persist(&u, &store, "blob", v).unwrap();
        // Visible to every member once persist's trailing barrier passed.
        assert!(store.contains("blob"));

        let loaded: DistributedVector = shuttle::load(&u, &store, "blob").unwrap();
        let full = loaded.to_full(&u).unwrap();
        shuttle::remove(&u, &store, "blob").unwrap();
        (full, store.is_empty().unwrap())
    });

    assert_eq!(results[0].0, Some(vec![1.0, 2.0, 3.0, 4.0, 5.0]));
    for (_, empty) in &results {
        assert!(*empty);
    }
}

#[test]
fn heavy_objects_redistribute_across_groups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    let data: Vec<f64> = (1..=6).map(|i| i as f64).collect();
    let expected = data.clone();

    let results = Universe::launch(4, move |u| {
        let store = SideStore::new(&path).unwrap();
        let sw = partition(&u, 2).unwrap();

        // Subworld 0 (universe ranks 0 and 2) produces and parks the
        // vector; the whole universe consumes it after a global barrier.
        if sw.id() == 0 {
            let v = DistributedVector::from_full(&sw, &data);
            shuttle::persist(&sw, &store, "crossing", v).unwrap();
        }
        u.barrier();

        let loaded: DistributedVector = shuttle::load(&u, &store, "crossing").unwrap();
        let shard = loaded.local().to_vec();
        let full = loaded.to_full(&u).unwrap();
        shuttle::remove(&u, &store, "crossing").unwrap();
        (shard, full)
    });

    // Six elements over four ranks: blocks of two, trailing rank empty.
    assert_eq!(results[0].0, vec![1.0, 2.0]);
    assert_eq!(results[1].0, vec![3.0, 4.0]);
    assert_eq!(results[2].0, vec![5.0, 6.0]);
    assert_eq!(results[3].0, Vec::<f64>::new());
    assert_eq!(results[0].1, Some(expected));
}

#[test]
fn loading_a_missing_name_fails_on_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();

    let results = Universe::launch(2, move |u| {
        let store = SideStore::new(&path).unwrap();
        let err = shuttle::load::<DistributedVector>(&u, &store, "nope").unwrap_err();
        matches!(
            err,
            QueueError::SideStore(SideStoreError::NotFound(name)) if name == "nope"
        )
    });
    assert!(results.iter().all(|failed| *failed));
}
