//! Engine drain cycles against the real SQLite-backed queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use comanda_core::menu::{MenuItemRepositoryTrait, NewMenuItem};
use comanda_core::sync::{SyncEntity, SyncOperation, SyncQueueStore, SyncStatus};
use comanda_storage_sqlite::SqliteStore;
use comanda_sync::{
    SyncApiError, SyncEndpoint, SyncEngine, SyncEngineConfig, SyncPushOutcome, SyncPushRequest,
};

/// Endpoint that applies everything except entity ids it is told to reject.
#[derive(Default)]
struct ScriptedEndpoint {
    reject: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<SyncPushRequest>>,
}

impl ScriptedEndpoint {
    fn reject_once(&self, entity_id: &str, reason: &str) {
        self.reject
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), reason.to_string());
    }

    fn calls(&self) -> Vec<SyncPushRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncEndpoint for ScriptedEndpoint {
    async fn push(
        &self,
        request: SyncPushRequest,
    ) -> std::result::Result<SyncPushOutcome, SyncApiError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(reason) = self.reject.lock().unwrap().remove(&request.entity_id) {
            return Ok(SyncPushOutcome::Rejected { reason });
        }
        Ok(SyncPushOutcome::Applied)
    }
}

fn setup_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().to_str().unwrap()).unwrap();
    (dir, store)
}

fn fast_config() -> SyncEngineConfig {
    SyncEngineConfig {
        base_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        ..SyncEngineConfig::default()
    }
}

#[tokio::test]
async fn repository_writes_drain_to_synced() {
    let (_dir, store) = setup_store();
    let endpoint = Arc::new(ScriptedEndpoint::default());

    let menu = store.menu_items();
    let item = menu
        .insert_menu_item(NewMenuItem {
            name: "Tagliatelle".to_string(),
            category: Some("mains".to_string()),
            price: dec!(14.00),
            currency: "EUR".to_string(),
        })
        .await
        .unwrap();
    let mut renamed = item.clone();
    renamed.name = "Tagliatelle al ragu".to_string();
    menu.update_menu_item(renamed).await.unwrap();

    let queue = Arc::new(store.sync_queue());
    let engine = SyncEngine::new(queue.clone(), endpoint.clone(), fast_config());

    // Two mutations for one entity key take two cycles.
    let report = engine.run_drain_cycle().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.synced, 1);

    let report = engine.run_drain_cycle().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.synced, 1);

    let items = queue.list_for_entity(SyncEntity::MenuItem, &item.id).unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.status == SyncStatus::Synced));

    // Dispatch order follows queue id order, and keys are stable.
    let calls = endpoint.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].operation, SyncOperation::Create);
    assert_eq!(calls[1].operation, SyncOperation::Update);
    assert_ne!(calls[0].idempotency_key, calls[1].idempotency_key);
}

#[tokio::test]
async fn conflict_then_resubmit_pushes_current_snapshot() {
    let (_dir, store) = setup_store();
    let endpoint = Arc::new(ScriptedEndpoint::default());

    let menu = store.menu_items();
    let item = menu
        .insert_menu_item(NewMenuItem {
            name: "Saltimbocca".to_string(),
            category: None,
            price: dec!(19.50),
            currency: "EUR".to_string(),
        })
        .await
        .unwrap();
    endpoint.reject_once(&item.id, "remote copy is newer");

    let queue = Arc::new(store.sync_queue());
    let engine = SyncEngine::new(queue.clone(), endpoint.clone(), fast_config());

    let report = engine.run_drain_cycle().await.unwrap();
    assert_eq!(report.conflicts, 1);

    let conflicted = queue
        .list_for_entity(SyncEntity::MenuItem, &item.id)
        .unwrap();
    assert_eq!(conflicted[0].status, SyncStatus::Conflict);

    // Edit locally, then resubmit the conflicted mutation.
    let mut edited = item.clone();
    edited.name = "Saltimbocca alla romana".to_string();
    menu.update_menu_item(edited.clone()).await.unwrap();
    let new_id = queue.resubmit(conflicted[0].id).await.unwrap();

    // Drain until the update and the resubmission both settle.
    for _ in 0..3 {
        engine.run_drain_cycle().await.unwrap();
    }

    let resubmitted = queue.get_item(new_id).unwrap().unwrap();
    assert_eq!(resubmitted.status, SyncStatus::Synced);
    let payload: serde_json::Value = serde_json::from_str(&resubmitted.payload).unwrap();
    assert_eq!(payload["name"], edited.name);

    // The original conflict row is untouched history.
    let original = queue.get_item(conflicted[0].id).unwrap().unwrap();
    assert_eq!(original.status, SyncStatus::Conflict);
}
