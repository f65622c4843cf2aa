//! End-to-end smoke test against a real Chrome binary.
//!
//! Requires a local Chrome/Chromium install; run explicitly with
//! `cargo test -p umbra-browser -- --ignored`.

use std::time::Duration;
use umbra_browser::{BrowserCluster, ClusterConfig};
use umbra_stealth::FingerprintRegistry;

#[tokio::test]
#[ignore = "requires a local Chrome binary"]
async fn cluster_round_trip() {
    let config = ClusterConfig {
        max_instances: 2,
        operation_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    let cluster = BrowserCluster::new(config, FingerprintRegistry::default());
    cluster.initialize().await.expect("cluster init");

    let stats = cluster.stats().await;
    assert!(stats.instance_count >= 1);

    let html = cluster
        .handle_request("smoke-session", "about:blank")
        .await
        .expect("navigation");
    assert!(html.contains("<html"));

    let stats = cluster.stats().await;
    assert_eq!(stats.instance_count, stats.available + stats.busy);

    cluster.shutdown().await;
}
