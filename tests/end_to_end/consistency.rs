//! Identical workloads produce identical keyspaces

use crate::common::*;

#[tokio::test]
async fn acceptance_run_compares_equal() {
    let servers = start_targets(2).await;
    let seeder = seeder_for(&servers, acceptance_config()).await;

    let report = seeder.run(0.1).await.unwrap();
    assert!(report.converged(), "{}", report);
    assert!(report.metric.live_keys >= 900);

    let a = seeder.capture(&servers[0].endpoint()).await.unwrap();
    let b = seeder.capture(&servers[1].endpoint()).await.unwrap();
    let diff = seeder.compare_report(a, b).await.unwrap();
    assert!(diff.is_consistent(), "{}", diff);
    assert_eq!(diff.keys_compared, servers[0].dbsize(0));
    assert!(seeder
        .snapshot(a)
        .unwrap()
        .entries
        .values()
        .all(|s| s.value_type != ValueType::Json));
}

#[tokio::test]
async fn capture_without_writes_is_idempotent() {
    let servers = start_targets(1).await;
    let seeder = seeder_for(&servers, small_config(200)).await;
    seeder.run(0.1).await.unwrap();

    let first = seeder.capture(&servers[0].endpoint()).await.unwrap();
    let second = seeder.capture(&servers[0].endpoint()).await.unwrap();
    assert!(seeder.compare(first, second).await.unwrap());
    assert_eq!(
        seeder.snapshot(first).unwrap().digest(),
        seeder.snapshot(second).unwrap().digest()
    );
}

#[tokio::test]
async fn resp2_and_resp3_targets_agree() {
    let resp3 = MemoryServer::start().await.unwrap();
    let resp2 = MemoryServer::start_with(ServerOptions {
        hello: false,
        ..ServerOptions::default()
    })
    .await
    .unwrap();
    let mut config = small_config(300);
    config.workload.unsupported_types.clear();
    let seeder = Seeder::connect(&[resp3.endpoint(), resp2.endpoint()], config)
        .await
        .unwrap();
    let protocols: Vec<u8> = seeder.targets().iter().map(|t| t.protocol()).collect();
    assert_eq!(protocols, vec![3, 2]);

    seeder.run(0.1).await.unwrap();
    let a = seeder.capture(&resp3.endpoint()).await.unwrap();
    let b = seeder.capture(&resp2.endpoint()).await.unwrap();
    let diff = seeder.compare_report(a, b).await.unwrap();
    assert!(diff.is_consistent(), "{}", diff);
}

#[tokio::test]
async fn separate_seeders_with_one_seed_agree() {
    let servers = start_targets(2).await;
    let config = small_config(250);

    let first = seeder_for(&servers[..1], config.clone()).await;
    first.run(0.1).await.unwrap();
    let second = seeder_for(&servers[1..], config).await;
    second.run(0.1).await.unwrap();

    let handle = second.capture(&servers[1].endpoint()).await.unwrap();
    assert!(second
        .compare_with_target(handle, &servers[0].endpoint())
        .await
        .unwrap());
}

#[tokio::test]
async fn multiple_databases_agree() {
    let servers = start_targets(3).await;
    let mut config = small_config(400);
    config.workload = config.workload.with_dbcount(4);
    let seeder = seeder_for(&servers, config).await;
    seeder.run(0.1).await.unwrap();

    let reference = seeder.capture(&servers[0].endpoint()).await.unwrap();
    for server in &servers[1..] {
        assert!(seeder
            .compare_with_target(reference, &server.endpoint())
            .await
            .unwrap());
    }
    let dbs: std::collections::BTreeSet<u16> = seeder
        .snapshot(reference)
        .unwrap()
        .entries
        .keys()
        .map(|k| k.db)
        .collect();
    assert_eq!(dbs.len(), 4);
}
