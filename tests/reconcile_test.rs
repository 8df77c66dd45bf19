//! Reconciler behavior against the in-memory store

mod common;

use bson::oid::ObjectId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::{seed_abxy, staffs_of, FlakyStore};
use tether::db::{ClientRecord, StaffRecord};
use tether::relations::{audit, IssueReason, ReconcileOptions, Reconciler};
use tether::{MemoryStore, TetherError};

fn reconciler(store: Arc<MemoryStore>) -> Reconciler {
    Reconciler::new(store, ReconcileOptions::default())
}

#[tokio::test]
async fn test_abxy_backfill() {
    let store = Arc::new(MemoryStore::new());
    let ids = seed_abxy(&store).await;

    let summary = reconciler(store.clone()).run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.staff_total, 2);
    assert_eq!(summary.staff_skipped, 0);
    assert_eq!(summary.clients_updated, 2);
    assert!(summary.errors.is_empty());
    assert!(!summary.cancelled);

    let mut expected_x = vec![ids.a, ids.b];
    expected_x.sort();
    assert_eq!(staffs_of(&store, &ids.x).await, expected_x);
    assert_eq!(staffs_of(&store, &ids.y).await, vec![ids.b]);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let ids = seed_abxy(&store).await;

    reconciler(store.clone()).run(CancellationToken::new()).await.unwrap();
    let before_x = staffs_of(&store, &ids.x).await;
    let before_y = staffs_of(&store, &ids.y).await;

    let second = reconciler(store.clone()).run(CancellationToken::new()).await.unwrap();
    assert_eq!(second.clients_updated, 0);
    assert!(second.errors.is_empty());
    assert_eq!(staffs_of(&store, &ids.x).await, before_x);
    assert_eq!(staffs_of(&store, &ids.y).await, before_y);
}

#[tokio::test]
async fn test_existing_back_references_are_kept() {
    let store = Arc::new(MemoryStore::new());
    let client_id = ObjectId::new();
    let staff = StaffRecord::new(ObjectId::new()).with_clients([client_id]);
    let unrelated = ObjectId::new();
    store.insert_staff(staff.clone()).await;
    store
        .insert_client(ClientRecord::new(client_id).with_staffs([unrelated]))
        .await;

    let summary = reconciler(store.clone()).run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.clients_updated, 1);

    // Union-only: the entry with no forward edge stays
    let staffs = staffs_of(&store, &client_id).await;
    assert!(staffs.contains(&unrelated));
    assert!(staffs.contains(&staff.id));
}

#[tokio::test]
async fn test_run_restores_invariant_for_every_forward_edge() {
    let store = Arc::new(MemoryStore::new());
    let clients: Vec<ObjectId> = (0..6).map(|_| ObjectId::new()).collect();
    for client_id in &clients {
        store.insert_client(ClientRecord::new(*client_id)).await;
    }
    for i in 0..10 {
        let served = clients.iter().copied().skip(i % 3).step_by(2);
        store.insert_staff(StaffRecord::new(ObjectId::new()).with_clients(served)).await;
    }

    let report = audit(store.as_ref(), 5).await.unwrap();
    assert!(report.missing_inverse > 0);

    let options = ReconcileOptions {
        concurrency: 3,
        ..ReconcileOptions::default()
    };
    let summary = Reconciler::new(store.clone(), options)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.clients_updated, report.missing_inverse);

    let report = audit(store.as_ref(), 5).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.missing_inverse, 0);
}

#[tokio::test]
async fn test_dangling_reference_recorded_once() {
    let store = Arc::new(MemoryStore::new());
    let real = ObjectId::new();
    let ghost = ObjectId::new();
    let staff = StaffRecord::new(ObjectId::new()).with_clients([real, ghost]);
    store.insert_staff(staff.clone()).await;
    store.insert_client(ClientRecord::new(real)).await;

    let summary = reconciler(store.clone()).run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.clients_updated, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.count(IssueReason::ClientNotFound), 1);
    assert_eq!(summary.errors[0].staff_id, staff.id.to_hex());
    assert_eq!(summary.errors[0].client_id, ghost.to_hex());

    // Nothing was created for the missing client
    assert_eq!(store.client_count().await, 1);
    assert_eq!(staffs_of(&store, &real).await, vec![staff.id]);
}

#[tokio::test]
async fn test_outage_aborts_with_store_unavailable() {
    let store = FlakyStore::new();
    seed_abxy(&store.inner).await;
    FlakyStore::set(&store.down, true);

    let result = Reconciler::new(store.clone(), ReconcileOptions::default())
        .run(CancellationToken::new())
        .await;
    let err = tokio_test::assert_err!(result);
    assert!(matches!(err, TetherError::StoreUnavailable(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_cursor_loss_mid_run_aborts() {
    let store = FlakyStore::new();
    seed_abxy(&store.inner).await;
    store.stream_dies_after.store(1, Ordering::SeqCst);

    let err = Reconciler::new(store.clone(), ReconcileOptions::default())
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_database_error_mid_stream_aborts() {
    let store = FlakyStore::new();
    seed_abxy(&store.inner).await;
    store.fail_stream_with(1, || TetherError::Database("CursorNotFound".into()));

    let err = Reconciler::new(store.clone(), ReconcileOptions::default())
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TetherError::StoreUnavailable(_)), "{:?}", err);
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_undecodable_staff_record_is_skipped() {
    let store = FlakyStore::new();
    seed_abxy(&store.inner).await;
    store.fail_stream_with(1, || TetherError::Parse("Document has no _id".into()));

    let summary = Reconciler::new(store.clone(), ReconcileOptions::default())
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.staff_total, 2);
    assert_eq!(summary.staff_skipped, 1);
    assert!(!summary.cancelled);

    let report = audit(store.as_ref(), 5).await.unwrap();
    assert_eq!(report.undecodable, 1);
    assert_eq!(report.staff_scanned, 1);
}

#[tokio::test]
async fn test_audit_aborts_on_cursor_failure() {
    let store = FlakyStore::new();
    seed_abxy(&store.inner).await;
    store.fail_stream_with(1, || TetherError::StoreUnavailable("cursor lost".into()));

    let err = audit(store.as_ref(), 5).await.unwrap_err();
    assert!(matches!(err, TetherError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_cancel_mid_run_leaves_whole_records() {
    let store = FlakyStore::new();
    let mut staff = Vec::new();
    for _ in 0..10 {
        let clients = [ObjectId::new(), ObjectId::new()];
        for client_id in clients {
            store.inner.insert_client(ClientRecord::new(client_id)).await;
        }
        let record = StaffRecord::new(ObjectId::new()).with_clients(clients);
        store.inner.insert_staff(record.clone()).await;
        staff.push(record);
    }

    // Fires in the middle of the second staff record
    let cancel = CancellationToken::new();
    store.cancel_after_writes(3, cancel.clone());
    let options = ReconcileOptions {
        concurrency: 1,
        ..ReconcileOptions::default()
    };

    let first = Reconciler::new(store.clone(), options).run(cancel).await.unwrap();
    assert!(first.cancelled);
    assert!(first.staff_total < 10, "staff_total={}", first.staff_total);
    assert!(first.errors.is_empty());

    // A started record finishes: every staff is on both or neither of its clients
    let mut projected = 0;
    for record in &staff {
        let mut listed = 0;
        for client_id in &record.client_ids {
            if staffs_of(&store.inner, client_id).await.contains(&record.id) {
                listed += 1;
            }
        }
        assert!(listed == 0 || listed == 2, "staff {} half projected", record.id);
        if listed == 2 {
            projected += 1;
        }
    }
    assert_eq!(projected, first.staff_total);
    assert_eq!(first.clients_updated, 2 * projected);

    let second = Reconciler::new(store.clone(), options)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert!(!second.cancelled);
    assert_eq!(second.staff_total, 10);
    assert_eq!(first.clients_updated + second.clients_updated, 20);
    assert!(audit(store.as_ref(), 5).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_failed_updates_are_recorded_not_fatal() {
    let store = FlakyStore::new();
    let ids = seed_abxy(&store.inner).await;
    FlakyStore::set(&store.fail_client_writes, true);

    let summary = tokio_test::assert_ok!(
        Reconciler::new(store.clone(), ReconcileOptions::default())
            .run(CancellationToken::new())
            .await
    );
    assert_eq!(summary.staff_total, 2);
    assert_eq!(summary.clients_updated, 0);
    assert_eq!(summary.count(IssueReason::UpdateFailed), 3);
    assert_eq!(summary.errors.len(), 3);
    assert!(summary.errors.iter().all(|e| e.detail.is_some()));

    // The next healthy run completes the backfill
    FlakyStore::set(&store.fail_client_writes, false);
    let summary = Reconciler::new(store.clone(), ReconcileOptions::default())
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.clients_updated, 2);
    assert_eq!(staffs_of(&store.inner, &ids.y).await, vec![ids.b]);
}

#[tokio::test]
async fn test_concurrency_does_not_change_the_outcome() {
    let serial = Arc::new(MemoryStore::new());
    let parallel = Arc::new(MemoryStore::new());
    let shared_client = ObjectId::new();

    for store in [&serial, &parallel] {
        store.insert_client(ClientRecord::new(shared_client)).await;
    }
    let staff: Vec<StaffRecord> = (0..20)
        .map(|_| StaffRecord::new(ObjectId::new()).with_clients([shared_client]))
        .collect();
    for record in &staff {
        serial.insert_staff(record.clone()).await;
        parallel.insert_staff(record.clone()).await;
    }

    for (store, concurrency) in [(&serial, 1), (&parallel, 16)] {
        let options = ReconcileOptions {
            concurrency,
            ..ReconcileOptions::default()
        };
        let summary = Reconciler::new(store.clone(), options)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.clients_updated, 20);
    }

    assert_eq!(
        staffs_of(&serial, &shared_client).await,
        staffs_of(&parallel, &shared_client).await
    );
    assert_eq!(staffs_of(&parallel, &shared_client).await.len(), 20);
}

#[tokio::test]
async fn test_summary_serializes_camel_case() {
    let store = Arc::new(MemoryStore::new());
    seed_abxy(&store).await;

    let summary = reconciler(store).run(CancellationToken::new()).await.unwrap();
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["staffTotal"], 2);
    assert_eq!(json["clientsUpdated"], 2);
    assert_eq!(json["cancelled"], false);
    assert!(json["runId"].is_string());
    assert!(json["durationMs"].is_u64());
}
