//! Resolver path selection, equivalence and failure propagation

mod common;

use bson::oid::ObjectId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{seed_abxy, FlakyStore};
use tether::relations::{ReconcileOptions, Reconciler, ResolutionPath, ResolverConfig, StaffResolver};
use tether::{MemoryStore, TetherError};

fn ids(resolution: &[tether::db::StaffRecord]) -> Vec<ObjectId> {
    resolution.iter().map(|s| s.id).collect()
}

#[tokio::test]
async fn test_fallback_serves_unreconciled_clients() {
    let store = Arc::new(MemoryStore::new());
    let abxy = seed_abxy(&store).await;
    let resolver = StaffResolver::new(store.clone(), ResolverConfig::default());

    // X has no back-references yet
    let resolution = resolver.staff_for_client(&abxy.x).await.unwrap();
    assert_eq!(resolution.path, ResolutionPath::Fallback);
    let mut expected = vec![abxy.a, abxy.b];
    expected.sort();
    assert_eq!(ids(&resolution.staff), expected);

    // Y's index is already populated
    let resolution = resolver.staff_for_client(&abxy.y).await.unwrap();
    assert_eq!(resolution.path, ResolutionPath::Fast);
    assert_eq!(ids(&resolution.staff), vec![abxy.b]);
}

#[tokio::test]
async fn test_both_paths_agree_after_reconciliation() {
    let store = Arc::new(MemoryStore::new());
    let abxy = seed_abxy(&store).await;
    Reconciler::new(store.clone(), ReconcileOptions::default())
        .run(CancellationToken::new())
        .await
        .unwrap();

    let resolver = StaffResolver::new(store.clone(), ResolverConfig::default());
    for client_id in [abxy.x, abxy.y] {
        let resolution = resolver.staff_for_client(&client_id).await.unwrap();
        assert_eq!(resolution.path, ResolutionPath::Fast);
        let legacy = resolver.legacy_staff_for_client(&client_id).await.unwrap();
        assert_eq!(resolution.staff, legacy);
    }

    let stats = resolver.get_stats();
    assert_eq!(stats.fast_hits, 2);
    assert_eq!(stats.legacy_scans, 2);
    assert_eq!(stats.fallbacks, 0);
}

#[tokio::test]
async fn test_fast_path_timeout_is_store_timeout() {
    let store = FlakyStore::new();
    let abxy = seed_abxy(&store.inner).await;
    store.client_read_delay_ms.store(200, Ordering::SeqCst);

    let resolver = StaffResolver::new(
        store.clone(),
        ResolverConfig {
            fast_timeout: Duration::from_millis(20),
            slow_timeout: Duration::from_secs(1),
        },
    );

    let err = resolver.staff_for_client(&abxy.y).await.unwrap_err();
    assert!(matches!(err, TetherError::StoreTimeout(_)));
    assert!(err.is_retryable());
    assert_eq!(resolver.get_stats().failures, 1);
    assert_eq!(resolver.get_stats().fallbacks, 0);
}

#[tokio::test]
async fn test_fast_path_failure_is_not_masked_by_fallback() {
    let store = FlakyStore::new();
    let abxy = seed_abxy(&store.inner).await;
    FlakyStore::set(&store.down, true);

    let resolver = StaffResolver::new(store.clone(), ResolverConfig::default());
    let err = resolver.staff_for_client(&abxy.x).await.unwrap_err();
    assert!(matches!(err, TetherError::StoreUnavailable(_)));

    let stats = resolver.get_stats();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.fallbacks, 0);
}

#[tokio::test]
async fn test_slow_path_timeout_is_store_timeout() {
    let store = FlakyStore::new();
    let abxy = seed_abxy(&store.inner).await;
    store.scan_delay_ms.store(200, Ordering::SeqCst);

    let resolver = StaffResolver::new(
        store.clone(),
        ResolverConfig {
            fast_timeout: Duration::from_secs(1),
            slow_timeout: Duration::from_millis(20),
        },
    );

    // X has an empty index, so the staff scan runs and overruns its deadline
    let err = resolver.staff_for_client(&abxy.x).await.unwrap_err();
    assert!(matches!(err, TetherError::StoreTimeout(_)), "{:?}", err);
    assert!(err.is_retryable());

    // Y is served by the index alone
    let resolution = resolver.staff_for_client(&abxy.y).await.unwrap();
    assert_eq!(resolution.path, ResolutionPath::Fast);

    let stats = resolver.get_stats();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.fallbacks, 0);
    assert_eq!(stats.fast_hits, 1);
}
