use std::sync::atomic::{AtomicUsize, Ordering};

use plexmap::router::RouteHasher;
use plexmap::{
    apply, attach, Handle, InsertPolicy, KeepExisting, Locality, MapConfig,
    Mesh, PlexError, PlexMap,
};
use tracing_test::traced_test;

fn mesh_with_bootstrap(localities: usize) -> Mesh {
    let mesh = Mesh::new(localities);
    for fabric in mesh.fabrics() {
        attach(fabric);
    }
    mesh
}

/// Deterministically pick `count` keys owned by `target`.
fn keys_owned_by<P, H>(
    map: &PlexMap<String, i64, P, H>,
    target: Locality,
    count: usize,
) -> Vec<String>
where
    P: InsertPolicy<i64>,
    H: RouteHasher<String>,
{
    let mut out = Vec::new();
    let mut i = 0u64;
    while out.len() < count {
        let key = format!("key-{i}");
        if map.owner(&key) == target {
            out.push(key);
        }
        i += 1;
    }
    out
}

fn add_amount(_key: &String, value: &mut i64, amount: &i64) {
    *value += *amount;
}

fn identity(_key: &String, _value: &mut i64, _args: &()) {}

fn bump_all(_key: &u64, value: &mut u64, amount: &u64) {
    *value += *amount;
}

fn bump_all_async(_handle: &Handle, _key: &u64, value: &mut u64, amount: &u64) {
    *value += *amount;
}

static KEY_VISITS: AtomicUsize = AtomicUsize::new(0);

fn count_key(_key: &u64, _args: &()) {
    KEY_VISITS.fetch_add(1, Ordering::Relaxed);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn insert_and_lookup_land_on_the_owning_shard() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let key = keys_owned_by(&map, Locality(1), 1).remove(0);
    map.insert(key.clone(), 7).await.unwrap();
    assert_eq!(map.lookup(&key).await.unwrap(), Some(7));

    // Exactly one shard holds the key: the owner's.
    let remote =
        PlexMap::<String, i64>::get(&mesh.fabric(1), map.global_id()).unwrap();
    assert_eq!(remote.local_len(), 1);
    assert_eq!(remote.local_lookup(&key), Some(7));
    assert_eq!(map.local_len(), 0);
    assert_eq!(map.local_lookup(&key), None);

    // The other locality sees the same value through its own view.
    assert_eq!(remote.lookup(&key).await.unwrap(), Some(7));
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn overwrite_policy_keeps_the_last_value() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    for target in [Locality(0), Locality(1)] {
        let key = keys_owned_by(&map, target, 1).remove(0);
        map.insert(key.clone(), 1).await.unwrap();
        map.insert(key.clone(), 2).await.unwrap();
        assert_eq!(map.lookup(&key).await.unwrap(), Some(2));
    }
    assert_eq!(map.size().await.unwrap(), 2);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn keep_existing_policy_discards_conflicts() {
    let mesh = mesh_with_bootstrap(2);
    let map = PlexMap::<String, i64, KeepExisting>::create(
        &mesh.fabric(0),
        MapConfig::default(),
    )
    .await
    .unwrap();

    let key = keys_owned_by(&map, Locality(1), 1).remove(0);
    map.insert(key.clone(), 1).await.unwrap();
    map.insert(key.clone(), 2).await.unwrap();
    assert_eq!(map.lookup(&key).await.unwrap(), Some(1));
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn custom_reducer_policy_merges_values() {
    #[derive(Default)]
    struct Accumulate;
    impl InsertPolicy<i64> for Accumulate {
        fn resolve(current: &mut i64, incoming: i64) {
            *current += incoming;
        }
    }

    let mesh = mesh_with_bootstrap(2);
    let map = PlexMap::<String, i64, Accumulate>::create(
        &mesh.fabric(0),
        MapConfig::default(),
    )
    .await
    .unwrap();

    let key = keys_owned_by(&map, Locality(1), 1).remove(0);
    map.insert(key.clone(), 3).await.unwrap();
    map.insert(key.clone(), 5).await.unwrap();
    assert_eq!(map.lookup(&key).await.unwrap(), Some(8));
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn erase_round_trip_and_absent_key_no_op() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    for target in [Locality(0), Locality(1)] {
        let key = keys_owned_by(&map, target, 1).remove(0);
        map.insert(key.clone(), 11).await.unwrap();
        map.erase(key.clone()).await.unwrap();
        assert_eq!(map.lookup(&key).await.unwrap(), None);
        // Erasing again is a no-op.
        map.erase(key.clone()).await.unwrap();
    }
    assert_eq!(map.size().await.unwrap(), 0);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn buffered_inserts_are_visible_after_the_collective_flush() {
    let mesh = mesh_with_bootstrap(4);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let x = keys_owned_by(&map, Locality(2), 1).remove(0);
    let y = keys_owned_by(&map, Locality(3), 1).remove(0);
    map.buffered_insert(x.clone(), 1).unwrap();
    map.buffered_insert(y.clone(), 2).unwrap();

    // Nothing shipped yet.
    assert_eq!(map.lookup(&x).await.unwrap(), None);

    map.wait_for_buffered_insert().await.unwrap();
    assert_eq!(map.lookup(&x).await.unwrap(), Some(1));
    assert_eq!(map.lookup(&y).await.unwrap(), Some(2));
    assert_eq!(map.size().await.unwrap(), 2);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn buffer_ships_on_its_own_once_the_bound_is_reached() {
    let mesh = mesh_with_bootstrap(2);
    let config = MapConfig::default().buffer_capacity(4).unwrap();
    let map = PlexMap::<String, i64>::create(&mesh.fabric(0), config)
        .await
        .unwrap();

    let keys = keys_owned_by(&map, Locality(1), 4);
    for (i, key) in keys.iter().enumerate() {
        map.buffered_insert(key.clone(), i as i64).unwrap();
    }
    // The fourth append hit the bound and shipped the batch; the install
    // precedes this lookup on the same (src, dst) link.
    assert_eq!(map.lookup(&keys[0]).await.unwrap(), Some(0));
    assert_eq!(map.size().await.unwrap(), 4);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn flush_is_idempotent_on_empty_buffers() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let key = keys_owned_by(&map, Locality(1), 1).remove(0);
    map.buffered_insert(key, 9).unwrap();
    map.wait_for_buffered_insert().await.unwrap();
    map.wait_for_buffered_insert().await.unwrap();
    assert_eq!(map.size().await.unwrap(), 1);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn buffered_async_inserts_wait_handle_then_flush() {
    let mesh = mesh_with_bootstrap(2);
    let config = MapConfig::default().buffer_capacity(2).unwrap();
    let map = PlexMap::<String, i64>::create(&mesh.fabric(0), config)
        .await
        .unwrap();

    let keys = keys_owned_by(&map, Locality(1), 5);
    let handle = Handle::new();
    for (i, key) in keys.iter().enumerate() {
        map.buffered_async_insert(&handle, key.clone(), i as i64).unwrap();
    }
    // Handle first, then the collective flush; not the other way round.
    handle.wait().await.unwrap();
    map.wait_for_buffered_insert().await.unwrap();

    for (i, key) in keys.iter().enumerate() {
        assert_eq!(map.lookup(key).await.unwrap(), Some(i as i64));
    }
    assert_eq!(map.size().await.unwrap(), 5);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn a_thousand_async_inserts_group_under_one_handle() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let handle = Handle::new();
    for i in 0..1000u64 {
        map.async_insert(&handle, i, i).unwrap();
    }
    handle.wait().await.unwrap();
    assert_eq!(map.size().await.unwrap(), 1000);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn async_lookup_slot_fills_by_handle_wait() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let local = keys_owned_by(&map, Locality(0), 1).remove(0);
    let remote = keys_owned_by(&map, Locality(1), 1).remove(0);
    map.insert(local.clone(), 5).await.unwrap();
    map.insert(remote.clone(), 6).await.unwrap();

    let handle = Handle::new();
    let found_local = map.async_lookup(&handle, &local).unwrap();
    let found_remote = map.async_lookup(&handle, &remote).unwrap();
    let missing = map
        .async_lookup(&handle, &"no-such-key".to_string())
        .unwrap();
    handle.wait().await.unwrap();

    assert_eq!(found_local.get().unwrap(), Some(5));
    assert_eq!(found_remote.get().unwrap(), Some(6));
    assert_eq!(missing.get().unwrap(), None);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn apply_mutates_under_the_owning_shard_lock() {
    let mesh = mesh_with_bootstrap(2);
    apply::register_apply::<String, i64, i64>("tests/add", add_amount);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    for target in [Locality(0), Locality(1)] {
        let key = keys_owned_by(&map, target, 1).remove(0);
        map.insert(key.clone(), 3).await.unwrap();
        map.apply(&key, "tests/add", &5i64).await.unwrap();
        assert_eq!(map.lookup(&key).await.unwrap(), Some(8));
    }
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn apply_on_an_absent_key_is_a_no_op() {
    let mesh = mesh_with_bootstrap(2);
    apply::register_apply::<String, i64, i64>("tests/add", add_amount);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let key = keys_owned_by(&map, Locality(1), 1).remove(0);
    map.apply(&key, "tests/add", &5i64).await.unwrap();
    assert_eq!(map.lookup(&key).await.unwrap(), None);
    assert_eq!(map.size().await.unwrap(), 0);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn apply_identity_leaves_the_value_unchanged() {
    let mesh = mesh_with_bootstrap(2);
    apply::register_apply::<String, i64, ()>("tests/identity", identity);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let key = keys_owned_by(&map, Locality(1), 1).remove(0);
    map.insert(key.clone(), 42).await.unwrap();
    map.apply(&key, "tests/identity", &()).await.unwrap();
    assert_eq!(map.lookup(&key).await.unwrap(), Some(42));
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn unregistered_or_mismatched_symbols_are_rejected() {
    let mesh = mesh_with_bootstrap(2);
    apply::register_apply::<String, i64, i64>("tests/add", add_amount);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let key = keys_owned_by(&map, Locality(0), 1).remove(0);
    let missing = map.apply(&key, "tests/never-registered", &0i64).await;
    assert!(matches!(missing, Err(PlexError::NoSuchFunction(_))));

    let mismatched = map.apply(&key, "tests/add", &"wrong args".to_string()).await;
    assert!(matches!(mismatched, Err(PlexError::SignatureMismatch(_))));
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn for_each_entry_visits_every_entry_exactly_once() {
    let mesh = mesh_with_bootstrap(4);
    apply::register_apply::<u64, u64, u64>("tests/bump-all", bump_all);
    let map =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    for key in 0..10u64 {
        map.insert(key, key).await.unwrap();
    }
    map.for_each_entry("tests/bump-all", &1u64).await.unwrap();

    // Visited once means incremented once.
    for key in 0..10u64 {
        assert_eq!(map.lookup(&key).await.unwrap(), Some(key + 1));
    }
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn async_for_each_entry_finishes_with_one_wait() {
    let mesh = mesh_with_bootstrap(2);
    apply::register_async_apply::<u64, u64, u64>(
        "tests/bump-all-async",
        bump_all_async,
    );
    let map =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    for key in 0..50u64 {
        map.insert(key, 0).await.unwrap();
    }
    let handle = Handle::new();
    map.async_for_each_entry(&handle, "tests/bump-all-async", &3u64)
        .unwrap();
    handle.wait().await.unwrap();

    for key in 0..50u64 {
        assert_eq!(map.lookup(&key).await.unwrap(), Some(3));
    }
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn for_each_key_sweeps_the_whole_fleet() {
    let mesh = mesh_with_bootstrap(2);
    apply::register_key_fn::<u64, ()>("tests/count-key", count_key);
    let map =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    for key in 0..25u64 {
        map.insert(key, key).await.unwrap();
    }
    KEY_VISITS.store(0, Ordering::Relaxed);
    map.for_each_key("tests/count-key", &()).await.unwrap();
    assert_eq!(KEY_VISITS.load(Ordering::Relaxed), 25);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn disjoint_concurrent_writers_union_cleanly() {
    let mesh = mesh_with_bootstrap(4);
    let map =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    let writer_a = map.clone();
    let a = tokio::spawn(async move {
        for key in 0..200u64 {
            writer_a.insert(key, key).await.unwrap();
        }
    });
    let writer_b = map.clone();
    let b = tokio::spawn(async move {
        for key in 200..400u64 {
            writer_b.insert(key, key).await.unwrap();
        }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(map.size().await.unwrap(), 400);
    assert_eq!(map.lookup(&17).await.unwrap(), Some(17));
    assert_eq!(map.lookup(&317).await.unwrap(), Some(317));
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn clear_empties_every_shard() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    assert_eq!(map.size().await.unwrap(), 0);
    for key in 0..64u64 {
        map.insert(key, key).await.unwrap();
    }
    map.clear().await.unwrap();
    assert_eq!(map.size().await.unwrap(), 0);
    assert_eq!(map.lookup(&1).await.unwrap(), None);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn single_locality_deployment_takes_the_fast_path() {
    let mesh = mesh_with_bootstrap(1);
    apply::register_apply::<String, i64, i64>("tests/add", add_amount);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();

    map.insert("a".into(), 1).await.unwrap();
    map.buffered_insert("b".into(), 2).unwrap();
    map.wait_for_buffered_insert().await.unwrap();
    map.apply(&"a".to_string(), "tests/add", &4i64).await.unwrap();

    assert_eq!(map.lookup(&"a".to_string()).await.unwrap(), Some(5));
    assert_eq!(map.lookup(&"b".to_string()).await.unwrap(), Some(2));
    // Buffers never held anything: both writes went straight to the
    // local shard.
    assert_eq!(map.local_len(), 2);
    assert_eq!(map.size().await.unwrap(), 2);

    map.erase("a".into()).await.unwrap();
    assert_eq!(map.size().await.unwrap(), 1);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn lifecycle_create_attach_destroy() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<String, i64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();
    let id = map.global_id();

    // Every locality resolves the same id to its own view.
    let other = PlexMap::<String, i64>::get(&mesh.fabric(1), id).unwrap();
    assert_eq!(other.global_id(), id);

    let key = keys_owned_by(&map, Locality(1), 1).remove(0);
    map.buffered_insert(key, 1).unwrap();
    map.destroy().await.unwrap();

    let gone = PlexMap::<String, i64>::get(&mesh.fabric(0), id);
    assert!(matches!(gone, Err(PlexError::NoInstance(_, _))));
    let gone = PlexMap::<String, i64>::get(&mesh.fabric(1), id);
    assert!(matches!(gone, Err(PlexError::NoInstance(_, _))));
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn instances_are_independent() {
    let mesh = mesh_with_bootstrap(2);
    let first =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();
    let second =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();
    assert_ne!(first.global_id(), second.global_id());

    first.insert(1, 10).await.unwrap();
    assert_eq!(second.lookup(&1).await.unwrap(), None);
    assert_eq!(second.size().await.unwrap(), 0);
    assert_eq!(first.size().await.unwrap(), 1);
}

#[traced_test]
#[tokio::test(flavor = "multi_thread")]
async fn print_all_entries_runs_on_every_locality() {
    let mesh = mesh_with_bootstrap(2);
    let map =
        PlexMap::<u64, u64>::create(&mesh.fabric(0), MapConfig::default())
            .await
            .unwrap();
    map.insert(1, 2).await.unwrap();
    map.print_all_entries().await.unwrap();
}
