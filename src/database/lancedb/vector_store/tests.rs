use super::*;
use tempfile::TempDir;

const TABLE: &str = "generic_data";

fn record(sequence: u32, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        id: format!("id-{sequence}"),
        vector,
        metadata: ChunkMetadata {
            source: "test.txt".to_string(),
            content: format!("This is test content for chunk {sequence}"),
            chunk_index: sequence,
            start_offset: sequence * 800,
            sequence,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        },
    }
}

async fn create_store() -> (VectorStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::create(&temp_dir.path().join("gen"), TABLE)
        .await
        .expect("should create vector store");
    (store, temp_dir)
}

#[tokio::test]
async fn new_store_is_empty() {
    let (store, _temp_dir) = create_store().await;

    assert_eq!(store.dimension(), None);
    assert_eq!(store.count_embeddings().await.expect("count"), 0);
    assert!(
        store
            .search_similar(&[1.0, 0.0], 3)
            .await
            .expect("search")
            .is_empty()
    );
}

#[tokio::test]
async fn store_batch_embeddings() {
    let (mut store, _temp_dir) = create_store().await;

    store
        .store_embeddings_batch(vec![
            record(0, vec![1.0, 0.0, 0.0]),
            record(1, vec![0.0, 1.0, 0.0]),
            record(2, vec![0.0, 0.0, 1.0]),
        ])
        .await
        .expect("should store batch");

    assert_eq!(store.dimension(), Some(3));
    assert_eq!(store.count_embeddings().await.expect("count"), 3);
    assert!(store.validate_integrity().await.expect("integrity"));
}

#[tokio::test]
async fn mixed_dimensions_are_rejected_before_writing() {
    let (mut store, _temp_dir) = create_store().await;

    let result = store
        .store_embeddings_batch(vec![record(0, vec![1.0, 0.0]), record(1, vec![1.0, 0.0, 0.0])])
        .await;

    assert!(matches!(result, Err(RagError::Database(_))));
    assert_eq!(store.dimension(), None);
    assert_eq!(store.count_embeddings().await.expect("count"), 0);

    store
        .store_embeddings_batch(vec![record(0, vec![1.0, 0.0])])
        .await
        .expect("valid batch");
    let mismatched = store
        .store_embeddings_batch(vec![record(1, vec![1.0, 0.0, 0.0])])
        .await;
    assert!(mismatched.is_err());
    assert_eq!(store.count_embeddings().await.expect("count"), 1);
}

#[tokio::test]
async fn search_orders_by_similarity() {
    let (mut store, _temp_dir) = create_store().await;

    store
        .store_embeddings_batch(vec![
            record(0, vec![0.0, 1.0]),
            record(1, vec![1.0, 0.0]),
            record(2, vec![1.0, 1.0]),
        ])
        .await
        .expect("should store batch");

    let results = store.search_similar(&[1.0, 0.1], 3).await.expect("search");

    let order: Vec<u32> = results.iter().map(|r| r.chunk_metadata.sequence).collect();
    assert_eq!(order, vec![1, 2, 0]);
    assert!(results[0].similarity_score > results[1].similarity_score);
    assert!(results[1].similarity_score > results[2].similarity_score);
}

#[tokio::test]
async fn ties_resolve_by_insertion_sequence() {
    let (mut store, _temp_dir) = create_store().await;

    // Nine identical vectors tie at every rank
    let mut records: Vec<EmbeddingRecord> = (0..9).map(|i| record(i, vec![0.5, 0.5])).collect();
    records.push(record(9, vec![1.0, 0.0]));
    // Insert out of sequence order to prove ordering does not follow storage order
    records.reverse();
    store
        .store_embeddings_batch(records)
        .await
        .expect("should store batch");

    let results = store.search_similar(&[0.5, 0.5], 3).await.expect("search");
    let order: Vec<u32> = results.iter().map(|r| r.chunk_metadata.sequence).collect();
    assert_eq!(order, vec![0, 1, 2]);

    let again = store.search_similar(&[0.5, 0.5], 3).await.expect("search");
    let repeat: Vec<u32> = again.iter().map(|r| r.chunk_metadata.sequence).collect();
    assert_eq!(order, repeat);
}

#[tokio::test]
async fn search_never_exceeds_limit_or_duplicates() {
    let (mut store, _temp_dir) = create_store().await;

    let records = (0..20)
        .map(|i| record(i, vec![1.0, i as f32 / 10.0]))
        .collect();
    store
        .store_embeddings_batch(records)
        .await
        .expect("should store batch");

    for limit in [1, 5, 20, 50] {
        let results = store.search_similar(&[1.0, 0.0], limit).await.expect("search");
        assert_eq!(results.len(), limit.min(20));

        let mut sequences: Vec<u32> = results.iter().map(|r| r.chunk_metadata.sequence).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), results.len());
    }
}

#[tokio::test]
async fn query_dimension_mismatch_is_an_error() {
    let (mut store, _temp_dir) = create_store().await;
    store
        .store_embeddings_batch(vec![record(0, vec![1.0, 0.0])])
        .await
        .expect("should store");

    assert!(store.search_similar(&[1.0, 0.0, 0.0], 1).await.is_err());
}

#[tokio::test]
async fn reopen_detects_dimension() {
    let (mut store, temp_dir) = create_store().await;
    store
        .store_embeddings_batch(vec![record(0, vec![0.1, 0.2, 0.3, 0.4])])
        .await
        .expect("should store");
    drop(store);

    let reopened = VectorStore::open(&temp_dir.path().join("gen"), TABLE)
        .await
        .expect("should reopen");

    assert_eq!(reopened.dimension(), Some(4));
    assert_eq!(reopened.count_embeddings().await.expect("count"), 1);
}

#[tokio::test]
async fn open_without_table_is_corrupt() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::create_dir_all(temp_dir.path().join("gen")).expect("mkdir");

    let missing_dir = VectorStore::open(&temp_dir.path().join("missing"), TABLE).await;
    assert!(matches!(missing_dir, Err(RagError::IndexCorrupt { .. })));

    let empty_dir = VectorStore::open(&temp_dir.path().join("gen"), TABLE).await;
    assert!(matches!(empty_dir, Err(RagError::IndexCorrupt { .. })));
}
