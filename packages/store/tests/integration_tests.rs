//! Integration tests for the store crate

use async_trait::async_trait;
use mapsync_schema::frac_idx;
use mapsync_store::{
    decode_snapshot, Changeset, DocumentId, DocumentRegistry, Feature, Field, FileRepo, Layer,
    MemoryRepo, RepoError, SnapshotRepo, Store, StoreConfig, StoreError, ROOT_ID,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn load(repo: Arc<dyn SnapshotRepo>) -> Store {
    Store::load("doc".into(), repo, &CancellationToken::new())
        .await
        .unwrap()
}

async fn empty_store() -> Store {
    load(Arc::new(MemoryRepo::new())).await
}

#[tokio::test]
async fn test_empty_document() {
    let store = empty_store().await;

    let snapshot = store.to_snapshot().unwrap();
    assert!(snapshot.is_empty());
    assert_eq!(store.feature_count().unwrap(), 1);
    assert!(store.feature(ROOT_ID).unwrap().is_some());
    assert_eq!(store.children(ROOT_ID).unwrap().unwrap().len(), 0);
    assert_eq!(store.layer_count().unwrap(), 0);
}

#[tokio::test]
async fn test_first_insertion() {
    let store = empty_store().await;

    let fixes = store
        .update(&Changeset::new().with_addition(Feature::placed("f1", "", "O")))
        .unwrap();
    assert!(fixes.is_none());

    let snapshot = store.to_snapshot().unwrap();
    assert_eq!(snapshot.additions, ["f1"]);
    assert_eq!(snapshot.features["f1"], Feature::placed("f1", "", "O"));
    assert!(snapshot.deletions.is_empty());
}

#[tokio::test]
async fn test_same_key_insertion_is_fixed() {
    let store = empty_store().await;
    store
        .update(&Changeset::new().with_addition(Feature::placed("f1", "", "O")))
        .unwrap();

    let fixes = store
        .update(&Changeset::new().with_addition(Feature::placed("f2", "", "O")))
        .unwrap()
        .expect("collision should produce a fix");

    let fixed = fixes.features["f2"].idx.as_set().unwrap().clone();
    assert!(fixed.as_str() > "O");
    assert_eq!(fixes.features["f2"].parent, Field::Unspecified);
    assert_eq!(store.feature("f2").unwrap().unwrap().idx, Field::Set(fixed));
    assert_eq!(store.children(ROOT_ID).unwrap().unwrap(), ["f1", "f2"]);
}

#[tokio::test]
async fn test_root_is_immutable() {
    let store = empty_store().await;

    let rename = Changeset::new().with_feature(Feature::new(ROOT_ID).with_name("world"));
    let err = store.update(&rename).unwrap_err();
    assert!(err.is_malformed());

    let err = store.update(&Changeset::new().with_deletion(ROOT_ID)).unwrap_err();
    assert!(err.is_malformed());
    assert_eq!(store.feature(ROOT_ID).unwrap().unwrap(), Feature::new(ROOT_ID));
}

#[tokio::test]
async fn test_malformed_requests() {
    let store = empty_store().await;
    store
        .update(&Changeset::new().with_addition(Feature::placed("f1", "", "O")))
        .unwrap();

    let cases = [
        // Addition without parent and idx
        Changeset::new().with_addition(Feature::new("f2")),
        // Dangling parent
        Changeset::new().with_addition(Feature::placed("f2", "nope", "O")),
        // Patch for an unknown feature
        Changeset::new().with_feature(Feature::new("ghost").with_name("boo")),
        // Unset parent
        Changeset::new().with_feature(Feature {
            parent: Field::Unset,
            ..Feature::new("f1")
        }),
        // Key outside the alphabet
        Changeset::new().with_addition(Feature::placed("f2", "", "é")),
    ];

    for change in cases {
        let err = store.update(&change).unwrap_err();
        assert!(err.is_malformed(), "{err}");
        assert!(!err.is_fatal());
    }
    assert_eq!(store.feature_count().unwrap(), 2);
}

#[tokio::test]
async fn test_noop_patch_has_no_fixes() {
    let store = empty_store().await;
    store
        .update(&Changeset::new().with_addition(Feature::placed("f1", "", "O")))
        .unwrap();

    let before = store.to_snapshot().unwrap();
    assert!(store
        .update(&Changeset::new().with_feature(Feature::new("f1")))
        .unwrap()
        .is_none());
    assert!(store
        .update(&Changeset::new().with_feature(Feature::placed("f1", "", "O")))
        .unwrap()
        .is_none());
    assert_eq!(store.to_snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_field_patches() {
    let store = empty_store().await;
    store
        .update(&Changeset::new().with_addition(
            Feature::placed("f1", "", "O")
                .with_name("Lake")
                .with_color("#00f"),
        ))
        .unwrap();

    let patch = Feature {
        color: Field::Unset,
        ..Feature::new("f1").with_hidden(true)
    };
    assert!(store.update(&Changeset::new().with_feature(patch)).unwrap().is_none());

    let f1 = store.feature("f1").unwrap().unwrap();
    assert_eq!(f1.name, Field::Set("Lake".to_string()));
    assert_eq!(f1.color, Field::Unset);
    assert_eq!(f1.hidden, Field::Set(true));
}

#[tokio::test]
async fn test_recursive_delete_reports_descendants() {
    let store = empty_store().await;
    store
        .update(
            &Changeset::new()
                .with_addition(Feature::placed("a", "", "O"))
                .with_addition(Feature::placed("b", "a", "O"))
                .with_addition(Feature::placed("c", "b", "O"))
                .with_addition(Feature::placed("d", "", "g")),
        )
        .unwrap();

    let fixes = store
        .update(&Changeset::new().with_deletion("a"))
        .unwrap()
        .expect("unreported descendants should be fixed");
    assert_eq!(fixes.deletions.iter().collect::<Vec<_>>(), ["b", "c"]);

    for id in ["a", "b", "c"] {
        assert!(store.feature(id).unwrap().is_none());
        assert!(store.is_deleted(id).unwrap());
    }
    assert_eq!(store.children(ROOT_ID).unwrap().unwrap(), ["d"]);

    // A client that already knew about the whole subtree gets no fix
    let store = empty_store().await;
    store
        .update(
            &Changeset::new()
                .with_addition(Feature::placed("a", "", "O"))
                .with_addition(Feature::placed("b", "a", "O")),
        )
        .unwrap();
    assert!(store
        .update(&Changeset::new().with_deletion("a").with_deletion("b"))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_move_under_descendant_goes_to_root() {
    let store = empty_store().await;
    store
        .update(
            &Changeset::new()
                .with_addition(Feature::placed("a", "", "O"))
                .with_addition(Feature::placed("b", "a", "O")),
        )
        .unwrap();

    let fixes = store
        .update(&Changeset::new().with_feature(Feature::new("a").with_parent("b")))
        .unwrap()
        .unwrap();

    let fix = &fixes.features["a"];
    assert_eq!(fix.parent, Field::Set(ROOT_ID.to_string()));
    assert!(fix.idx.is_set());
    assert_eq!(store.children(ROOT_ID).unwrap().unwrap(), ["a"]);
    assert_eq!(store.children("a").unwrap().unwrap(), ["b"]);
}

#[tokio::test]
async fn test_unset_idx_moves_to_front() {
    let store = empty_store().await;
    store
        .update(
            &Changeset::new()
                .with_addition(Feature::placed("a", "", "O"))
                .with_addition(Feature::placed("b", "", "g")),
        )
        .unwrap();

    let patch = Feature {
        idx: Field::Unset,
        ..Feature::new("b")
    };
    let fixes = store.update(&Changeset::new().with_feature(patch)).unwrap().unwrap();

    assert!(fixes.features["b"].idx.as_set().unwrap().as_str() < "O");
    assert_eq!(store.children(ROOT_ID).unwrap().unwrap(), ["b", "a"]);
}

#[tokio::test]
async fn test_layers() {
    let store = empty_store().await;
    store
        .update(
            &Changeset::new()
                .with_layer(Layer::new("roads").with_idx("O").with_opacity(0.5))
                .with_layer(Layer::new("water").with_idx("g")),
        )
        .unwrap();
    assert_eq!(store.layer_order().unwrap(), ["roads", "water"]);

    let fixes = store
        .update(&Changeset::new().with_layer(Layer::new("labels").with_idx("O")))
        .unwrap()
        .unwrap();
    let fixed = fixes.layers["labels"].idx.as_set().unwrap().clone();
    assert!("O" < fixed.as_str() && fixed.as_str() < "g");
    assert_eq!(store.layer_order().unwrap(), ["roads", "labels", "water"]);

    // Opacity patch keeps position
    assert!(store
        .update(&Changeset::new().with_layer(Layer::new("roads").with_opacity(1.0)))
        .unwrap()
        .is_none());
    assert_eq!(store.layer("roads").unwrap().unwrap().opacity, Field::Set(1.0));
}

#[tokio::test]
async fn test_save_and_reload() {
    init_tracing();
    let repo = Arc::new(MemoryRepo::new());
    let cancel = CancellationToken::new();

    let store = load(repo.clone()).await;
    store
        .update(
            &Changeset::new()
                .with_addition(Feature::placed("a", "", "O").with_name("Park"))
                .with_addition(Feature::placed("b", "a", "O"))
                .with_addition(Feature::placed("c", "", "g"))
                .with_layer(Layer::new("base").with_idx("O")),
        )
        .unwrap();
    store.update(&Changeset::new().with_deletion("c")).unwrap();

    assert!(store.is_dirty().unwrap());
    assert!(store.save(&cancel).await.unwrap());
    assert!(!store.is_dirty().unwrap());
    assert!(!store.save(&cancel).await.unwrap());
    assert_eq!(repo.write_count(), 1);

    let reloaded = load(repo.clone()).await;
    assert_eq!(reloaded.to_snapshot().unwrap(), store.to_snapshot().unwrap());
    assert!(reloaded.is_deleted("c").unwrap());
    assert!(!reloaded.is_dirty().unwrap());

    let stored = decode_snapshot(&repo.blob(&"doc".into()).unwrap()).unwrap();
    assert_eq!(stored.additions, ["a", "b"]);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_fatal() {
    let repo = Arc::new(MemoryRepo::new());
    repo.insert("doc".into(), b"definitely not gzip".to_vec()).unwrap();

    let err = Store::load("doc".into(), repo, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Snapshot(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_snapshot_needing_fixes_is_fatal() {
    let repo = Arc::new(MemoryRepo::new());
    let broken = Changeset::new()
        .with_addition(Feature::placed("f1", "", "O"))
        .with_addition(Feature::placed("f2", "", "O"));
    repo.insert(
        "doc".into(),
        mapsync_store::encode_snapshot(&broken, Default::default()).unwrap(),
    )
    .unwrap();

    let err = Store::load("doc".into(), repo, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::FixesOnLoad));
}

#[tokio::test]
async fn test_malformed_snapshot_is_fatal() {
    let repo = Arc::new(MemoryRepo::new());
    let orphan = Changeset::new().with_addition(Feature::placed("f1", "missing", "O"));
    repo.insert(
        "doc".into(),
        mapsync_store::encode_snapshot(&orphan, Default::default()).unwrap(),
    )
    .unwrap();

    let err = Store::load("doc".into(), repo, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RejectedSnapshot(_)));
    assert!(err.is_fatal());
    assert!(!err.is_malformed());
}

/// Repo whose writes block until released, and whose reads of chosen
/// documents never complete
#[derive(Default)]
struct GatedRepo {
    inner: MemoryRepo,
    entered: Notify,
    release: Notify,
    stalled: Mutex<HashSet<DocumentId>>,
}

impl GatedRepo {
    fn stall_reads(&self, id: &str) {
        self.stalled.lock().unwrap().insert(id.into());
    }
}

#[async_trait]
impl SnapshotRepo for GatedRepo {
    async fn get(&self, id: &DocumentId) -> Result<Option<Vec<u8>>, RepoError> {
        let stalled = self.stalled.lock().unwrap().contains(id);
        if stalled {
            self.entered.notify_one();
            std::future::pending::<()>().await;
        }
        self.inner.get(id).await
    }

    async fn set(&self, id: &DocumentId, blob: Vec<u8>) -> Result<(), RepoError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.set(id, blob).await
    }
}

#[tokio::test]
async fn test_update_during_save_stays_dirty() {
    let repo = Arc::new(GatedRepo::default());
    let store = Arc::new(load(repo.clone()).await);
    store
        .update(&Changeset::new().with_addition(Feature::placed("a", "", "O")))
        .unwrap();

    let saving = {
        let store = store.clone();
        tokio::spawn(async move { store.save(&CancellationToken::new()).await })
    };

    repo.entered.notified().await;
    store
        .update(&Changeset::new().with_addition(Feature::placed("b", "", "g")))
        .unwrap();
    repo.release.notify_one();

    assert!(saving.await.unwrap().unwrap());
    assert!(store.is_dirty().unwrap());

    // The write that landed predates "b"
    let stored = decode_snapshot(&repo.inner.blob(&"doc".into()).unwrap()).unwrap();
    assert_eq!(stored.additions, ["a"]);
}

#[tokio::test]
async fn test_cancelled_save_keeps_dirty() {
    let repo = Arc::new(GatedRepo::default());
    let store = Arc::new(load(repo.clone()).await);
    store
        .update(&Changeset::new().with_addition(Feature::placed("a", "", "O")))
        .unwrap();

    let cancel = CancellationToken::new();
    let saving = {
        let store = store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { store.save(&cancel).await })
    };

    repo.entered.notified().await;
    cancel.cancel();

    let err = saving.await.unwrap().unwrap_err();
    assert!(matches!(err, StoreError::Cancelled));
    assert!(store.is_dirty().unwrap());
    assert_eq!(repo.inner.write_count(), 0);
}

#[tokio::test]
async fn test_update_during_evict_is_kept() {
    let repo = Arc::new(GatedRepo::default());
    let registry = Arc::new(DocumentRegistry::new(repo.clone(), StoreConfig::default()));
    let cancel = CancellationToken::new();
    let id = DocumentId::new("doc");

    registry
        .update(&id, &Changeset::new().with_addition(Feature::placed("f1", "", "O")), &cancel)
        .await
        .unwrap();

    let evicting = {
        let registry = registry.clone();
        let id = id.clone();
        tokio::spawn(async move { registry.evict(&id, &CancellationToken::new()).await })
    };
    repo.entered.notified().await;

    // The final save is in flight; this update must not be lost with it
    let updating = {
        let registry = registry.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let change = Changeset::new().with_addition(Feature::placed("f2", "", "g"));
            registry.update(&id, &change, &CancellationToken::new()).await
        })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!updating.is_finished());

    repo.release.notify_one();
    assert!(evicting.await.unwrap().unwrap());
    assert!(updating.await.unwrap().unwrap().is_none());

    // f1 came back from the final save, f2 was applied on top of it
    let store = registry.get(&id).await.unwrap();
    assert!(store.feature("f1").unwrap().is_some());
    assert!(store.feature("f2").unwrap().is_some());
    assert!(store.is_dirty().unwrap());
}

#[tokio::test]
async fn test_slow_load_does_not_block_other_documents() {
    let repo = Arc::new(GatedRepo::default());
    repo.stall_reads("slow");
    let registry = Arc::new(DocumentRegistry::new(repo.clone(), StoreConfig::default()));

    let stuck = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.open(&"slow".into(), &CancellationToken::new()).await })
    };
    repo.entered.notified().await;

    let change = Changeset::new().with_addition(Feature::placed("f1", "", "O"));
    let other = DocumentId::new("fast");
    tokio::time::timeout(
        Duration::from_secs(5),
        registry.update(&other, &change, &CancellationToken::new()),
    )
    .await
    .expect("update on another document should not wait for the slow load")
    .unwrap();

    assert!(registry.get(&other).await.is_some());
    assert!(registry.get(&"slow".into()).await.is_none());
    assert_eq!(registry.len().await, 1);

    // Saving skips the document that is still loading
    repo.release.notify_one();
    assert!(registry.save_all(&CancellationToken::new()).await.is_empty());
    assert_eq!(repo.inner.write_count(), 1);

    stuck.abort();
}

#[tokio::test]
async fn test_file_repo_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path().to_str().unwrap();
    let cancel = CancellationToken::new();
    let id = DocumentId::new("map-1");

    let registry = DocumentRegistry::with_file_repo(StoreConfig::load(cwd).unwrap(), cwd);
    registry
        .update(
            &id,
            &Changeset::new().with_addition(Feature::placed("f1", "", "O")),
            &cancel,
        )
        .await
        .unwrap();
    assert!(registry.evict(&id, &cancel).await.unwrap());
    assert!(dir.path().join("data").join("map-1.json.gz").exists());

    let repo = Arc::new(FileRepo::new(dir.path().join("data")));
    let store = Store::load(id, repo, &cancel).await.unwrap();
    assert_eq!(store.children(ROOT_ID).unwrap().unwrap(), ["f1"]);
}

#[tokio::test]
async fn test_many_features_stay_ordered() {
    let store = empty_store().await;

    // Every insert lands at the front, like repeated "move to top"
    let mut first: Option<String> = None;
    for i in 0..200 {
        let idx = frac_idx::between(None, first.as_deref()).unwrap();
        store
            .update(&Changeset::new().with_addition(Feature::placed(format!("f{i}"), "", idx.clone())))
            .unwrap();
        first = Some(idx);
    }

    let children = store.children(ROOT_ID).unwrap().unwrap();
    assert_eq!(children.len(), 200);
    assert_eq!(children[0], "f199");
    assert_eq!(children[199], "f0");
}
