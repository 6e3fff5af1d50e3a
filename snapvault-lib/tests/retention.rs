use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use snapvault_lib::common::{Backend, ByteStream, Result as StoreResult, StoreError};
use snapvault_lib::store::{InMemoryBackend, LocalBackend};
use snapvault_lib::{encode_name, SnapshotVault, VaultError};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn memory_vault() -> (SnapshotVault, InMemoryBackend) {
    let backend = InMemoryBackend::new("testprefix").unwrap();
    (SnapshotVault::new(Arc::new(backend.clone())), backend)
}

fn payload(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
}

/// Wraps an in-memory backend and injects failures by key.
struct FaultyBackend {
    inner: InMemoryBackend,
    fail_put: bool,
    fail_delete: HashSet<String>,
    vanished: HashSet<String>,
    truncated: HashSet<String>,
}

impl FaultyBackend {
    fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            fail_put: false,
            fail_delete: HashSet::new(),
            vanished: HashSet::new(),
            truncated: HashSet::new(),
        }
    }
}

#[async_trait]
impl Backend for FaultyBackend {
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        if self.fail_put {
            return Err(StoreError::Backend("quota exceeded".to_string()));
        }
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        let body = self.inner.get(key).await?;
        if !self.truncated.contains(key) {
            return Ok(body);
        }
        // Connection drops after the first chunk
        let failure = stream::once(async {
            Err::<Bytes, _>(StoreError::Backend("connection reset".to_string()))
        });
        Ok(body.take(1).chain(failure).boxed())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        if self.fail_delete.contains(key) {
            return Err(StoreError::Backend(format!("permission denied on {key}")));
        }
        if self.vanished.contains(key) {
            // Someone else removed it between our list and delete
            self.inner.delete(key).await?;
            return Err(StoreError::NotFound(key.to_string()));
        }
        self.inner.delete(key).await
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        self.inner.list().await
    }

    async fn total_size(&self) -> StoreResult<u64> {
        self.inner.total_size().await
    }

    async fn copy_prefix(&self, from: &str) -> StoreResult<()> {
        self.inner.copy_prefix(from).await
    }

    fn prefix(&self) -> &str {
        self.inner.prefix()
    }
}

#[tokio::test]
async fn test_get_latest_returns_highest_revision() {
    init_tracing();
    let (vault, _) = memory_vault();

    vault.save_bytes("3.1.0", 1, payload("first")).await.unwrap();
    let saved = vault.save_bytes("3.1.1", 2, payload("second")).await.unwrap();

    let latest = vault.get_latest().await.unwrap();
    assert_eq!(latest, encode_name("3.1.1", 2).unwrap());
    assert_eq!(latest, saved);
    assert_eq!(vault.read(&latest).await.unwrap(), payload("second"));
}

#[tokio::test]
async fn test_higher_revision_wins_over_higher_version() {
    let (vault, _) = memory_vault();

    vault.save_bytes("3.4.0", 10, payload("new version")).await.unwrap();
    vault.save_bytes("3.3.9", 11, payload("rolled back")).await.unwrap();

    let latest = vault.get_latest().await.unwrap();
    assert_eq!(latest.revision(), 11);
    assert_eq!(latest.version().as_str(), "3.3.9");
}

#[tokio::test]
async fn test_open_returns_saved_bytes() {
    let (vault, _) = memory_vault();
    let body = Bytes::from((0..=255u8).cycle().take(10_000).collect::<Vec<_>>());

    let chunks = body
        .chunks(1024)
        .map(|c| Ok::<_, std::io::Error>(c.to_vec()))
        .collect::<Vec<_>>();
    let name = vault.save("3.1.0", 7, stream::iter(chunks)).await.unwrap();

    let opened = snapvault_lib::common::collect_stream(vault.open(&name).await.unwrap())
        .await
        .unwrap();
    assert_eq!(opened, body);
}

#[tokio::test]
async fn test_purge_keeps_most_recent() {
    init_tracing();
    let (vault, backend) = memory_vault();

    vault.save_bytes("3.1.0", 1, payload("ignore")).await.unwrap();
    vault.save_bytes("3.1.0", 2, payload("ignore")).await.unwrap();

    let report = vault.purge(1).await.unwrap();
    assert_eq!(report.kept, vec![encode_name("3.1.0", 2).unwrap()]);
    assert_eq!(report.deleted, vec![encode_name("3.1.0", 1).unwrap()]);

    let left = backend.list().await.unwrap();
    assert_eq!(left, vec![encode_name("3.1.0", 2).unwrap().to_string()]);
}

#[tokio::test]
async fn test_purge_zero_deletes_every_snapshot() {
    let (vault, backend) = memory_vault();

    for rev in 1..=5 {
        vault.save_bytes("3.2.0", rev, payload("x")).await.unwrap();
    }

    let report = vault.purge(0).await.unwrap();
    assert!(report.kept.is_empty());
    assert_eq!(report.deleted.len(), 5);
    assert!(backend.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_purge_with_more_room_than_snapshots() {
    let (vault, _) = memory_vault();

    vault.save_bytes("3.2.0", 1, payload("x")).await.unwrap();
    vault.save_bytes("3.2.0", 2, payload("x")).await.unwrap();

    let report = vault.purge(10).await.unwrap();
    assert_eq!(report.kept.len(), 2);
    assert!(report.deleted.is_empty());
}

#[tokio::test]
async fn test_get_latest_on_empty_catalog() {
    let (vault, _) = memory_vault();
    assert!(matches!(vault.get_latest().await, Err(VaultError::NotFound(_))));
}

#[tokio::test]
async fn test_foreign_keys_are_ignored() {
    init_tracing();
    let (vault, backend) = memory_vault();

    backend.put("README", payload("notes")).await.unwrap();
    backend
        .put("3.1.0_1_etcd.backup", payload("legacy layout"))
        .await
        .unwrap();
    backend
        .put("nested/3.1.0_0000000000000009_etcd.backup", payload("x"))
        .await
        .unwrap();

    // Only foreign keys present
    assert!(matches!(vault.get_latest().await, Err(VaultError::NotFound(_))));

    vault.save_bytes("3.1.0", 1, payload("a")).await.unwrap();
    vault.save_bytes("3.1.0", 2, payload("b")).await.unwrap();

    let report = vault.purge(0).await.unwrap();
    assert_eq!(report.deleted.len(), 2);

    let mut left = backend.list().await.unwrap();
    left.sort();
    assert_eq!(
        left,
        vec![
            "3.1.0_1_etcd.backup",
            "README",
            "nested/3.1.0_0000000000000009_etcd.backup",
        ]
    );
}

#[tokio::test]
async fn test_purge_attempts_every_deletion() {
    init_tracing();
    let inner = InMemoryBackend::new("testprefix").unwrap();
    let mut faulty = FaultyBackend::new(inner.clone());
    faulty
        .fail_delete
        .insert(encode_name("3.1.0", 1).unwrap().to_string());
    faulty
        .fail_delete
        .insert(encode_name("3.1.0", 3).unwrap().to_string());
    let vault = SnapshotVault::new(Arc::new(faulty));

    for rev in 1..=5 {
        vault.save_bytes("3.1.0", rev, payload("x")).await.unwrap();
    }

    let err = vault.purge(1).await.unwrap_err();
    let failures = match err {
        VaultError::Aggregate(failures) => failures,
        other => panic!("expected aggregate error, got {other}"),
    };
    assert_eq!(failures.len(), 2);
    for failure in &failures {
        assert!(matches!(failure, VaultError::Store { op: "delete", .. }));
    }

    // Revisions 2 and 4 were still removed
    let mut left = inner.list().await.unwrap();
    left.sort();
    assert_eq!(
        left,
        vec![
            encode_name("3.1.0", 1).unwrap().to_string(),
            encode_name("3.1.0", 3).unwrap().to_string(),
            encode_name("3.1.0", 5).unwrap().to_string(),
        ]
    );
}

#[tokio::test]
async fn test_purge_tolerates_concurrently_removed_snapshot() {
    let inner = InMemoryBackend::new("testprefix").unwrap();
    let mut faulty = FaultyBackend::new(inner.clone());
    faulty
        .vanished
        .insert(encode_name("3.1.0", 1).unwrap().to_string());
    let vault = SnapshotVault::new(Arc::new(faulty));

    vault.save_bytes("3.1.0", 1, payload("x")).await.unwrap();
    vault.save_bytes("3.1.0", 2, payload("x")).await.unwrap();

    let report = vault.purge(1).await.unwrap();
    assert_eq!(report.deleted, vec![encode_name("3.1.0", 1).unwrap()]);
    assert_eq!(inner.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_save_surfaces_store_failure() {
    let mut faulty = FaultyBackend::new(InMemoryBackend::new("testprefix").unwrap());
    faulty.fail_put = true;
    let vault = SnapshotVault::new(Arc::new(faulty));

    let err = vault.save_bytes("3.1.0", 1, payload("x")).await.unwrap_err();
    match err {
        VaultError::Store { op, key, source } => {
            assert_eq!(op, "put");
            assert_eq!(key, encode_name("3.1.0", 1).unwrap().to_string());
            assert!(matches!(source, StoreError::Backend(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_save_rejects_bad_input_before_writing() {
    let (vault, backend) = memory_vault();

    assert!(matches!(
        vault.save_bytes("3.1.0", -4, payload("x")).await,
        Err(VaultError::InvalidInput(_))
    ));
    assert!(matches!(
        vault.save_bytes("three", 4, payload("x")).await,
        Err(VaultError::InvalidInput(_))
    ));

    let broken = stream::iter(vec![
        Ok(Bytes::from_static(b"partial")),
        Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "source closed")),
    ]);
    assert!(matches!(
        vault.save("3.1.0", 4, broken).await,
        Err(VaultError::Read(_))
    ));

    assert!(backend.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_and_delete_missing_snapshot() {
    let (vault, _) = memory_vault();
    let name = encode_name("3.1.0", 1).unwrap();

    assert!(matches!(vault.open(&name).await, Err(VaultError::NotFound(_))));
    assert!(matches!(vault.delete(&name).await, Err(VaultError::NotFound(_))));

    vault.save_bytes("3.1.0", 1, payload("x")).await.unwrap();
    vault.delete(&name).await.unwrap();
    assert!(vault.catalog().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read_surfaces_interrupted_stream() {
    let inner = InMemoryBackend::new("testprefix").unwrap();
    let name = encode_name("3.1.0", 1).unwrap();
    inner.put(name.as_str(), payload("body")).await.unwrap();

    let mut faulty = FaultyBackend::new(inner);
    faulty.truncated.insert(name.to_string());
    let vault = SnapshotVault::new(Arc::new(faulty));
    assert_eq!(vault.backend().prefix(), "testprefix");

    match vault.read(&name).await {
        Err(VaultError::Store { op, key, source }) => {
            assert_eq!(op, "get");
            assert_eq!(key, name.as_str());
            assert!(!source.is_not_found());
        }
        other => panic!("expected store error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_catalog_is_most_recent_first() {
    let (vault, _) = memory_vault();

    for (version, rev) in [("3.1.0", 3), ("3.0.9", 1), ("3.1.2", 12), ("3.1.0", 2)] {
        vault.save_bytes(version, rev, payload("x")).await.unwrap();
    }

    let revisions: Vec<i64> = vault
        .catalog()
        .await
        .unwrap()
        .iter()
        .map(|n| n.revision())
        .collect();
    assert_eq!(revisions, vec![12, 3, 2, 1]);
}

#[tokio::test]
async fn test_total_size() {
    let (vault, backend) = memory_vault();

    vault.save_bytes("3.1.0", 1, payload("12345")).await.unwrap();
    vault.save_bytes("3.1.0", 2, payload("678")).await.unwrap();
    backend.put("foreign", payload("99")).await.unwrap();

    // Everything under the prefix counts, snapshots or not
    assert_eq!(vault.total_size().await.unwrap(), 10);
}

#[tokio::test]
async fn test_concurrent_saves() {
    let (vault, _) = memory_vault();

    let handles: Vec<_> = (1..=16)
        .map(|rev| {
            let vault = vault.clone();
            tokio::spawn(async move {
                vault
                    .save_bytes("3.1.0", rev, payload(&format!("rev {rev}")))
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let latest = vault.get_latest().await.unwrap();
    assert_eq!(latest.revision(), 16);
    assert_eq!(vault.read(&latest).await.unwrap(), payload("rev 16"));
    assert_eq!(vault.catalog().await.unwrap().len(), 16);
}

#[tokio::test]
async fn test_promote_staged_prefix() {
    let live_backend = InMemoryBackend::new("live").unwrap();
    let staged_backend = live_backend.with_prefix("staged").unwrap();

    let live = SnapshotVault::new(Arc::new(live_backend));
    let staged = SnapshotVault::new(Arc::new(staged_backend));

    live.save_bytes("3.1.0", 1, payload("old")).await.unwrap();
    staged.save_bytes("3.2.0", 2, payload("restored")).await.unwrap();

    live.promote("staged").await.unwrap();

    let latest = live.get_latest().await.unwrap();
    assert_eq!(latest, encode_name("3.2.0", 2).unwrap());
    assert_eq!(live.read(&latest).await.unwrap(), payload("restored"));
    assert_eq!(staged.catalog().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_local_backend_round_trip() {
    init_tracing();
    let temp = tempdir().unwrap();
    let backend = LocalBackend::new(temp.path().to_path_buf(), "testprefix")
        .await
        .unwrap();
    let vault = SnapshotVault::new(Arc::new(backend));

    vault.save_bytes("3.1.0", 1, payload("one")).await.unwrap();
    vault.save_bytes("3.1.1", 2, payload("two")).await.unwrap();
    vault.save_bytes("3.1.1", 3, payload("three")).await.unwrap();

    let report = vault.purge(2).await.unwrap();
    assert_eq!(report.deleted, vec![encode_name("3.1.0", 1).unwrap()]);

    let latest = vault.get_latest().await.unwrap();
    assert_eq!(latest, encode_name("3.1.1", 3).unwrap());
    assert_eq!(vault.read(&latest).await.unwrap(), payload("three"));

    assert!(temp
        .path()
        .join("v1/testprefix")
        .join(latest.as_str())
        .is_file());
}
