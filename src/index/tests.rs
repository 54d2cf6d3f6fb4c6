use super::*;
use crate::test_support::HashEmbedder;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn chunk(text: &str, source: &str, index: usize) -> Chunk {
    Chunk {
        text: text.to_string(),
        source: PathBuf::from(source),
        chunk_index: index,
        start_offset: index * 800,
    }
}

fn sample_chunks() -> Vec<Chunk> {
    vec![
        chunk("The capital of France is Paris.", "france.txt", 0),
        chunk("Berlin is the capital of Germany.", "germany.txt", 0),
        chunk("Rust is a systems programming language.", "rust.txt", 0),
        chunk("Cargo is the Rust package manager.", "rust.txt", 1),
    ]
}

fn location(temp_dir: &TempDir) -> IndexLocation {
    IndexLocation::new(temp_dir.path().join("index"), "generic_data")
}

fn write_docs(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).expect("should create data dir");
    for (name, text) in files {
        fs::write(dir.join(name), text).expect("should write doc");
    }
}

#[tokio::test]
async fn build_rejects_empty_input() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);

    let result = build(&location, &[], &HashEmbedder::new(), &CancellationFlag::new()).await;

    assert!(matches!(result, Err(RagError::NoInput)));
    assert!(!location.dir.exists());
    assert!(load(&location).await.expect("load").is_none());
}

#[tokio::test]
async fn build_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let embedder = HashEmbedder::new();

    let handle = build(&location, &sample_chunks(), &embedder, &CancellationFlag::new())
        .await
        .expect("build should succeed");

    assert_eq!(handle.generation(), 1);
    assert_eq!(handle.chunk_count(), 4);
    assert_eq!(handle.manifest().document_count, 3);
    assert_eq!(handle.manifest().embedding_model, "hash-embedder");
    assert_eq!(handle.manifest().dimension, 256);
    assert!(location.manifest_path().exists());
    assert!(!location.dir.join(lock::LOCK_FILE_NAME).exists());

    let loaded = load(&location)
        .await
        .expect("load should succeed")
        .expect("index exists");
    assert_eq!(loaded.manifest(), handle.manifest());
    assert!(loaded.is_intact().await.expect("integrity check"));
}

#[tokio::test]
async fn query_returns_best_match_first() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let embedder = HashEmbedder::new();
    let handle = build(&location, &sample_chunks(), &embedder, &CancellationFlag::new())
        .await
        .expect("build should succeed");

    let results = query(&handle, "What is the capital of France?", 2, &embedder)
        .await
        .expect("query should succeed");

    assert_eq!(results.len(), 2);
    assert!(results[0].chunk.text.contains("Paris"));
    assert!(results[0].score >= results[1].score);
    assert!(query(&handle, "anything", 0, &embedder).await.expect("k=0").is_empty());
}

#[tokio::test]
async fn query_results_are_bounded_unique_and_ordered() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let embedder = HashEmbedder::new();
    let mut chunks = sample_chunks();
    // Duplicated text ties exactly; the earlier insertion must win
    chunks.push(chunk("The capital of France is Paris.", "copy.txt", 0));
    let handle = build(&location, &chunks, &embedder, &CancellationFlag::new())
        .await
        .expect("build should succeed");

    for k in 1..=7 {
        let results = query(&handle, "capital of France Paris", k, &embedder)
            .await
            .expect("query should succeed");

        assert!(results.len() <= k);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        let mut sequences: Vec<u32> = results.iter().map(|r| r.sequence).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), results.len());
    }

    let top_two = query(&handle, "capital of France Paris", 2, &embedder)
        .await
        .expect("query should succeed");
    assert_eq!(top_two[0].sequence, 0);
    assert_eq!(top_two[1].sequence, 4);
    assert_eq!(top_two[0].chunk.source, PathBuf::from("france.txt"));
}

#[tokio::test]
async fn rebuild_replaces_previous_generation() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let data_dir = temp_dir.path().join("data");
    write_docs(&data_dir, &[("france.txt", "The capital of France is Paris.")]);
    let embedder = HashEmbedder::new();
    let cancel = CancellationFlag::new();

    let first = rebuild(&location, &data_dir, &ChunkingConfig::default(), &embedder, &cancel)
        .await
        .expect("first rebuild");
    write_docs(&data_dir, &[("spain.txt", "The capital of Spain is Madrid.")]);
    let second = rebuild(&location, &data_dir, &ChunkingConfig::default(), &embedder, &cancel)
        .await
        .expect("second rebuild");

    assert_eq!(first.generation(), 1);
    assert_eq!(second.generation(), 2);
    assert_eq!(second.chunk_count(), 2);

    let generations = list_generations(&location.dir).expect("list");
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0].0, 2);
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_index() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let data_dir = temp_dir.path().join("data");
    let text = "The capital of France is Paris. ".repeat(40);
    write_docs(&data_dir, &[("france.txt", &text)]);
    let config = ChunkingConfig {
        chunk_size: 100,
        chunk_overlap: 20,
    };
    let good = HashEmbedder::new().with_batch_size(2);
    let cancel = CancellationFlag::new();

    let original = rebuild(&location, &data_dir, &config, &good, &cancel)
        .await
        .expect("initial rebuild");
    let before = query(&original, "capital of France", 3, &good)
        .await
        .expect("query");

    write_docs(&data_dir, &[("more.txt", &"Other content here. ".repeat(40))]);
    // Fails on the second batch, after the first has been written
    let failing = HashEmbedder::failing_from(2).with_batch_size(2);
    let result = rebuild(&location, &data_dir, &config, &failing, &cancel).await;

    assert!(matches!(result, Err(RagError::EmbeddingUnavailable(_))));
    assert_eq!(failing.calls(), 2);

    let reloaded = load(&location)
        .await
        .expect("load should succeed")
        .expect("previous index still present");
    assert_eq!(reloaded.generation(), original.generation());
    let after = query(&reloaded, "capital of France", 3, &good)
        .await
        .expect("query");
    assert_eq!(before, after);

    let generations = list_generations(&location.dir).expect("list");
    assert_eq!(generations.len(), 1);
    assert!(!location.dir.join(lock::LOCK_FILE_NAME).exists());
}

#[tokio::test]
async fn rebuild_without_documents_keeps_index() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let embedder = HashEmbedder::new();
    build(&location, &sample_chunks(), &embedder, &CancellationFlag::new())
        .await
        .expect("build");

    let empty_dir = temp_dir.path().join("empty");
    let result = rebuild(
        &location,
        &empty_dir,
        &ChunkingConfig::default(),
        &embedder,
        &CancellationFlag::new(),
    )
    .await;

    assert!(matches!(result, Err(RagError::NoDocumentsFound(_))));
    assert!(load(&location).await.expect("load").is_some());
}

#[tokio::test]
async fn cancelled_build_leaves_no_generation() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let result = build(&location, &sample_chunks(), &HashEmbedder::new(), &cancel).await;

    assert!(matches!(result, Err(RagError::Cancelled)));
    assert!(list_generations(&location.dir).expect("list").is_empty());
    assert!(current_manifest(&location).expect("manifest").is_none());
}

#[tokio::test]
async fn held_lock_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let _held = RebuildLock::acquire(&location.dir).expect("lock");

    let result = build(
        &location,
        &sample_chunks(),
        &HashEmbedder::new(),
        &CancellationFlag::new(),
    )
    .await;

    assert!(matches!(result, Err(RagError::IndexLocked(_))));
}

#[test]
fn stale_lock_is_replaced() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let lock_path = temp_dir.path().join(lock::LOCK_FILE_NAME);
    let file = File::create(&lock_path).expect("create lock");
    file.set_modified(SystemTime::now() - lock::STALE_LOCK_AGE - Duration::from_secs(60))
        .expect("set mtime");
    drop(file);

    let lock = RebuildLock::acquire(temp_dir.path()).expect("stale lock replaced");
    assert_eq!(lock.path(), lock_path);
    drop(lock);
    assert!(!lock_path.exists());
}

#[tokio::test]
async fn corrupt_manifest_is_reported() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    fs::create_dir_all(&location.dir).expect("mkdir");
    fs::write(location.manifest_path(), "{ not json").expect("write");

    assert!(matches!(
        load(&location).await,
        Err(RagError::IndexCorrupt { .. })
    ));

    let missing_generation = IndexManifest {
        generation: 3,
        directory: "gen-000003".to_string(),
        collection: "generic_data".to_string(),
        embedding_model: "hash-embedder".to_string(),
        dimension: 256,
        chunk_count: 1,
        document_count: 1,
        created_at: Utc::now(),
    };
    commit_manifest(&location, &missing_generation).expect("commit");
    assert!(matches!(
        load(&location).await,
        Err(RagError::IndexCorrupt { .. })
    ));
}

#[tokio::test]
async fn other_collection_is_not_loaded() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    build(&location, &sample_chunks(), &HashEmbedder::new(), &CancellationFlag::new())
        .await
        .expect("build");

    let other = IndexLocation::new(location.dir.clone(), "other_data");
    assert!(load(&other).await.expect("load").is_none());
}

#[tokio::test]
async fn clear_removes_everything() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    build(&location, &sample_chunks(), &HashEmbedder::new(), &CancellationFlag::new())
        .await
        .expect("build");

    clear(&location).expect("clear");

    assert!(!location.manifest_path().exists());
    assert!(list_generations(&location.dir).expect("list").is_empty());
    assert!(load(&location).await.expect("load").is_none());
    clear(&IndexLocation::new(temp_dir.path().join("never"), "x")).expect("clear missing");
}

#[cfg(unix)]
#[tokio::test]
async fn read_only_index_dir_is_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    fs::create_dir_all(&location.dir).expect("mkdir");
    fs::set_permissions(&location.dir, fs::Permissions::from_mode(0o555)).expect("chmod");

    // Root ignores directory permissions
    let writable = File::create(location.dir.join("probe")).is_ok();
    let result = build(
        &location,
        &sample_chunks(),
        &HashEmbedder::new(),
        &CancellationFlag::new(),
    )
    .await;
    fs::set_permissions(&location.dir, fs::Permissions::from_mode(0o755)).expect("chmod");

    if !writable {
        assert!(matches!(result, Err(RagError::PermissionDenied { .. })));
    }
}

#[tokio::test]
async fn unreadable_data_dir_is_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let data_dir = temp_dir.path().join("data");
    write_docs(&data_dir, &[("france.txt", "The capital of France is Paris.")]);
    fs::set_permissions(&data_dir, fs::Permissions::from_mode(0o000)).expect("chmod");

    // Root ignores directory permissions
    let readable = fs::read_dir(&data_dir).is_ok();
    let result = rebuild(
        &location,
        &data_dir,
        &ChunkingConfig::default(),
        &HashEmbedder::new(),
        &CancellationFlag::new(),
    )
    .await;
    fs::set_permissions(&data_dir, fs::Permissions::from_mode(0o755)).expect("chmod");

    if !readable {
        assert!(matches!(
            result,
            Err(RagError::PermissionDenied { ref path }) if path == &data_dir
        ));
    }
}

#[tokio::test]
async fn knowledge_base_swaps_generations() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let data_dir = temp_dir.path().join("data");
    let embedder = HashEmbedder::new();
    let cancel = CancellationFlag::new();

    let kb = KnowledgeBase::open(location.clone()).await.expect("open");
    assert!(!kb.is_loaded().await);
    assert!(kb.query("anything", 3, &embedder).await.expect("query").is_empty());

    write_docs(&data_dir, &[("france.txt", "The capital of France is Paris.")]);
    let manifest = kb
        .rebuild(&data_dir, &ChunkingConfig::default(), &embedder, &cancel)
        .await
        .expect("rebuild");
    assert_eq!(manifest.generation, 1);
    assert_eq!(kb.generation().await, Some(1));

    let results = kb.query("France", 3, &embedder).await.expect("query");
    assert_eq!(results.len(), 1);
    assert!(results[0].chunk.text.contains("Paris"));

    let report = kb.clear_with_documents(&data_dir).await.expect("clear");
    assert_eq!(report.removed, 1);
    assert_eq!(kb.generation().await, None);
    assert!(!location.manifest_path().exists());
    assert!(kb.query("France", 3, &embedder).await.expect("query").is_empty());
}

#[tokio::test]
async fn knowledge_base_follows_other_writers() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = location(&temp_dir);
    let embedder = HashEmbedder::new();

    let kb = KnowledgeBase::open(location.clone()).await.expect("open");
    assert_eq!(kb.sync_with_disk().await.expect("sync"), None);

    build(&location, &sample_chunks(), &embedder, &CancellationFlag::new())
        .await
        .expect("build elsewhere");

    assert_eq!(kb.sync_with_disk().await.expect("sync"), Some(1));
    assert_eq!(kb.manifest().await.map(|m| m.chunk_count), Some(4));
}
