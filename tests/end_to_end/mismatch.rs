//! Divergent keyspaces are detected and explained

use crate::common::*;
use kvparity::MismatchKind;

#[tokio::test]
async fn extra_key_on_one_target() {
    let servers = start_targets(2).await;
    let seeder = seeder_for(&servers, acceptance_config()).await;
    seeder.run(0.1).await.unwrap();
    servers[0].command(&["SET", "x", "1"]);

    let a = seeder.capture(&servers[0].endpoint()).await.unwrap();
    let b = seeder.capture(&servers[1].endpoint()).await.unwrap();
    assert!(!seeder.compare(a, b).await.unwrap());

    let diff = seeder.compare_report(a, b).await.unwrap();
    assert_eq!(diff.keys(), vec!["x"]);
    assert_eq!(diff.mismatches[0].kinds, vec![MismatchKind::MissingRight]);
    assert!(diff.to_string().contains("db0:x: missing on right"));
}

#[tokio::test]
async fn changed_value_is_value_mismatch() {
    let servers = start_targets(2).await;
    let seeder = seeder_for(&servers, small_config(100)).await;
    seeder.run(0.1).await.unwrap();

    let a = seeder.capture(&servers[0].endpoint()).await.unwrap();
    let key = seeder
        .snapshot(a)
        .unwrap()
        .entries
        .iter()
        .find(|(k, s)| k.db == 0 && s.value_type == ValueType::String)
        .map(|(k, _)| k.key.display())
        .expect("a string key");
    servers[1].command(&["APPEND", key.as_str(), "!"]);

    let b = seeder.capture(&servers[1].endpoint()).await.unwrap();
    let diff = seeder.compare_report(a, b).await.unwrap();
    assert_eq!(diff.keys(), vec![key.as_str()]);
    assert_eq!(diff.mismatches[0].kinds, vec![MismatchKind::ValueDiffers]);
}

#[tokio::test]
async fn different_seeds_diverge() {
    let servers = start_targets(2).await;
    let first = seeder_for(&servers[..1], small_config(100)).await;
    first.run(0.1).await.unwrap();

    let mut other = small_config(100);
    other.workload = other.workload.with_seed(7);
    let second = seeder_for(&servers[1..], other).await;
    second.run(0.1).await.unwrap();

    let handle = first.capture(&servers[0].endpoint()).await.unwrap();
    assert!(!first
        .compare_with_target(handle, &servers[1].endpoint())
        .await
        .unwrap());
}

#[tokio::test]
async fn empty_target_differs_from_seeded_one() {
    let servers = start_targets(2).await;
    let seeder = seeder_for(&servers[..1], small_config(50)).await;
    seeder.run(0.1).await.unwrap();
    let handle = seeder.capture(&servers[0].endpoint()).await.unwrap();

    assert!(!seeder
        .compare_with_target(handle, &servers[1].endpoint())
        .await
        .unwrap());
    assert_eq!(servers[1].dbsize(0), 0);
}
