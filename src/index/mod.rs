//! Persistent, atomically replaceable vector index.
//!
//! An index directory holds numbered generations (`gen-000001/`, ...), each a
//! complete LanceDB database, and a `CURRENT` manifest naming the
//! authoritative one. A rebuild writes a new generation, then replaces the
//! manifest with a rename; readers only ever open what the manifest names.

#[cfg(test)]
mod tests;

pub mod lock;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{EmbeddingRecord, VectorStore};
use crate::embeddings::{Chunk, ChunkingConfig, Embedder, chunk_documents};
use crate::loader::{self, ClearReport};
use crate::{CancellationFlag, RagError, Result};

pub use lock::RebuildLock;

pub const MANIFEST_FILE_NAME: &str = "CURRENT";
const MANIFEST_TEMP_NAME: &str = "CURRENT.tmp";
const GENERATION_PREFIX: &str = "gen-";
const WRITE_PROBE_NAME: &str = ".write-probe";

/// Where an index lives and which collection it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLocation {
    pub dir: PathBuf,
    pub collection: String,
}

impl IndexLocation {
    #[inline]
    pub fn new(dir: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            collection: collection.into(),
        }
    }

    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.index_dir(), config.retrieval.collection.clone())
    }

    #[inline]
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE_NAME)
    }

    fn generation_dir_name(generation: u64) -> String {
        format!("{GENERATION_PREFIX}{generation:06}")
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.dir.join(Self::generation_dir_name(generation))
    }
}

/// Contents of the `CURRENT` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub generation: u64,
    /// Generation directory, relative to the index directory
    pub directory: String,
    pub collection: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_count: u64,
    pub document_count: usize,
    pub created_at: DateTime<Utc>,
}

/// An open, committed generation
#[derive(Debug)]
pub struct IndexHandle {
    manifest: IndexManifest,
    store: VectorStore,
}

impl IndexHandle {
    #[inline]
    pub fn generation(&self) -> u64 {
        self.manifest.generation
    }

    #[inline]
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    #[inline]
    pub fn chunk_count(&self) -> u64 {
        self.manifest.chunk_count
    }

    /// Whether the generation's table still opens and holds the committed entry count
    #[inline]
    pub async fn is_intact(&self) -> Result<bool> {
        if !self.store.validate_integrity().await? {
            return Ok(false);
        }
        Ok(self.store.count_embeddings().await? == self.manifest.chunk_count)
    }
}

/// One query hit
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity, higher is closer
    pub score: f32,
    /// Insertion position within the index
    pub sequence: u32,
}

/// Embed `chunks` into a fresh generation and make it current.
///
/// Empty input is `NoInput` and leaves the directory untouched.
#[inline]
pub async fn build(
    location: &IndexLocation,
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    cancel: &CancellationFlag,
) -> Result<IndexHandle> {
    if chunks.is_empty() {
        return Err(RagError::NoInput);
    }

    probe_writable(&location.dir)?;
    let lock = RebuildLock::acquire(&location.dir)?;

    let handle = build_generation(location, chunks, embedder, cancel, &lock).await?;
    remove_stale_generations(location, handle.generation());
    Ok(handle)
}

/// Open the index the manifest names.
///
/// `None` when there is no manifest, when it was built for another
/// collection, or when the collection holds no entries.
#[inline]
pub async fn load(location: &IndexLocation) -> Result<Option<IndexHandle>> {
    let Some(manifest) = read_manifest(location)? else {
        debug!("No index manifest in {}", location.dir.display());
        return Ok(None);
    };

    if manifest.collection != location.collection {
        warn!(
            "Index in {} holds collection {:?}, not {:?}; rebuild to use it",
            location.dir.display(),
            manifest.collection,
            location.collection
        );
        return Ok(None);
    }

    let store_dir = location.dir.join(&manifest.directory);
    let store = VectorStore::open(&store_dir, &manifest.collection).await?;

    let count = store
        .count_embeddings()
        .await
        .map_err(|e| RagError::IndexCorrupt {
            path: store_dir.clone(),
            message: e.to_string(),
        })?;
    if count == 0 {
        return Ok(None);
    }

    info!(
        "Loaded index generation {} ({} chunks from {} documents)",
        manifest.generation, count, manifest.document_count
    );
    Ok(Some(IndexHandle { manifest, store }))
}

/// Replace the index with one built from the documents in `directory`.
///
/// On any failure the previous index stays current and queryable.
#[inline]
pub async fn rebuild(
    location: &IndexLocation,
    directory: &Path,
    chunking: &ChunkingConfig,
    embedder: &dyn Embedder,
    cancel: &CancellationFlag,
) -> Result<IndexHandle> {
    let (handle, _lock) = rebuild_locked(location, directory, chunking, embedder, cancel).await?;
    remove_stale_generations(location, handle.generation());
    Ok(handle)
}

/// Load, chunk and commit `directory` as a new generation.
///
/// The lock is handed back so the caller can finish its cleanup under it.
async fn rebuild_locked(
    location: &IndexLocation,
    directory: &Path,
    chunking: &ChunkingConfig,
    embedder: &dyn Embedder,
    cancel: &CancellationFlag,
) -> Result<(IndexHandle, RebuildLock)> {
    let chunks = prepare_chunks(directory, chunking)?;

    probe_writable(&location.dir)?;
    let lock = RebuildLock::acquire(&location.dir)?;

    let handle = build_generation(location, &chunks, embedder, cancel, &lock).await?;
    Ok((handle, lock))
}

/// Embed `query_text` and return up to `k` nearest chunks, closest first
#[inline]
pub async fn query(
    handle: &IndexHandle,
    query_text: &str,
    k: usize,
    embedder: &dyn Embedder,
) -> Result<Vec<RetrievedChunk>> {
    if k == 0 {
        return Ok(Vec::new());
    }

    let vector = embedder.embed(query_text)?;
    let results = handle.store.search_similar(&vector, k).await?;

    debug!(
        "Query matched {} chunks in generation {}",
        results.len(),
        handle.generation()
    );

    Ok(results
        .into_iter()
        .map(|result| RetrievedChunk {
            chunk: result.chunk_metadata.to_chunk(),
            score: result.similarity_score,
            sequence: result.chunk_metadata.sequence,
        })
        .collect())
}

/// Remove the manifest, then every generation
#[inline]
pub fn clear(location: &IndexLocation) -> Result<()> {
    if !location.dir.exists() {
        return Ok(());
    }

    let _lock = RebuildLock::acquire(&location.dir)?;
    clear_files(location)
}

/// Delete the index, then every document in `data_dir`, under one lock.
///
/// When the lock is held elsewhere nothing is deleted.
#[inline]
pub fn clear_with_documents(location: &IndexLocation, data_dir: &Path) -> Result<ClearReport> {
    let _lock = RebuildLock::acquire(&location.dir)?;
    clear_files(location)?;
    Ok(loader::clear_documents(data_dir))
}

fn clear_files(location: &IndexLocation) -> Result<()> {
    remove_file_if_exists(&location.manifest_path())?;
    remove_file_if_exists(&location.dir.join(MANIFEST_TEMP_NAME))?;

    for (_, path) in list_generations(&location.dir)? {
        fs::remove_dir_all(&path).map_err(|e| RagError::from_io(e, &path))?;
        debug!("Removed generation {}", path.display());
    }

    info!("Cleared index in {}", location.dir.display());
    Ok(())
}

/// Load and chunk the documents in `directory`
fn prepare_chunks(directory: &Path, chunking: &ChunkingConfig) -> Result<Vec<Chunk>> {
    if directory.is_dir() {
        fs::read_dir(directory).map_err(|e| RagError::from_io(e, directory))?;
    }

    let report = loader::load_documents(directory);
    if report.is_empty() {
        return Err(RagError::NoDocumentsFound(directory.to_path_buf()));
    }

    let chunks = chunk_documents(&report.documents, chunking)
        .map_err(|e| RagError::Config(e.to_string()))?;
    if chunks.is_empty() {
        return Err(RagError::NoInput);
    }

    info!(
        "Prepared {} chunks from {} documents",
        chunks.len(),
        report.documents.len()
    );
    Ok(chunks)
}

/// Write a new generation and commit it; the caller holds the rebuild lock
async fn build_generation(
    location: &IndexLocation,
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    cancel: &CancellationFlag,
    lock: &RebuildLock,
) -> Result<IndexHandle> {
    let previous = read_manifest(location).unwrap_or_else(|e| {
        warn!("Ignoring unreadable manifest: {}", e);
        None
    });
    let generation = next_generation(location, previous.as_ref())?;
    let directory = IndexLocation::generation_dir_name(generation);
    let store_dir = location.dir.join(&directory);

    info!(
        "Building index generation {} with {} chunks",
        generation,
        chunks.len()
    );

    let written = write_generation(&store_dir, location, chunks, embedder, cancel, lock).await;
    let store = match written.and_then(|store| lock.heartbeat().map(|()| store)) {
        Ok(store) => store,
        Err(e) => {
            discard_generation(&store_dir);
            return Err(e);
        }
    };

    let manifest = IndexManifest {
        generation,
        directory,
        collection: location.collection.clone(),
        embedding_model: embedder.model_name().to_string(),
        dimension: store.dimension().unwrap_or_default(),
        chunk_count: chunks.len() as u64,
        document_count: chunks
            .iter()
            .map(|c| c.source.as_path())
            .collect::<HashSet<_>>()
            .len(),
        created_at: Utc::now(),
    };

    if let Err(e) = commit_manifest(location, &manifest) {
        discard_generation(&store_dir);
        return Err(e);
    }

    info!(
        "Committed index generation {} ({} chunks)",
        generation, manifest.chunk_count
    );
    Ok(IndexHandle { manifest, store })
}

async fn write_generation(
    store_dir: &Path,
    location: &IndexLocation,
    chunks: &[Chunk],
    embedder: &dyn Embedder,
    cancel: &CancellationFlag,
    lock: &RebuildLock,
) -> Result<VectorStore> {
    let mut store = VectorStore::create(store_dir, &location.collection).await?;
    let created_at = Utc::now().to_rfc3339();
    let batch_size = embedder.batch_size().max(1);

    let mut sequence: u32 = 0;
    for batch in chunks.chunks(batch_size) {
        cancel.check()?;
        lock.heartbeat()?;

        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != batch.len() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        let records = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let record = EmbeddingRecord::from_chunk(chunk, vector, sequence, &created_at);
                sequence += 1;
                record
            })
            .collect();

        store.store_embeddings_batch(records).await?;
        debug!("Indexed {} of {} chunks", sequence, chunks.len());
    }

    Ok(store)
}

fn discard_generation(store_dir: &Path) {
    if let Err(e) = fs::remove_dir_all(store_dir) {
        if e.kind() != ErrorKind::NotFound {
            warn!(
                "Failed to remove partial generation {}: {}",
                store_dir.display(),
                e
            );
        }
    } else {
        debug!("Removed partial generation {}", store_dir.display());
    }
}

fn read_manifest(location: &IndexLocation) -> Result<Option<IndexManifest>> {
    let path = location.manifest_path();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RagError::from_io(e, &path)),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| RagError::IndexCorrupt {
            path,
            message: format!("unreadable manifest: {e}"),
        })
}

/// Write the manifest beside the live one, then rename over it
fn commit_manifest(location: &IndexLocation, manifest: &IndexManifest) -> Result<()> {
    let temp_path = location.dir.join(MANIFEST_TEMP_NAME);
    let content = serde_json::to_string_pretty(manifest)
        .map_err(|e| RagError::Other(anyhow::Error::new(e).context("Failed to encode manifest")))?;

    let mut file = File::create(&temp_path).map_err(|e| RagError::from_io(e, &temp_path))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| RagError::from_io(e, &temp_path))?;
    drop(file);

    fs::rename(&temp_path, location.manifest_path())
        .map_err(|e| RagError::from_io(e, location.manifest_path()))
}

/// One past the highest generation seen in the manifest or on disk
fn next_generation(location: &IndexLocation, previous: Option<&IndexManifest>) -> Result<u64> {
    let on_disk = list_generations(&location.dir)?
        .into_iter()
        .map(|(generation, _)| generation)
        .max()
        .unwrap_or(0);
    let committed = previous.map_or(0, |m| m.generation);
    Ok(on_disk.max(committed) + 1)
}

fn list_generations(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RagError::from_io(e, dir)),
    };

    let mut generations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RagError::from_io(e, dir))?;
        let name = entry.file_name();
        let Some(number) = name
            .to_str()
            .and_then(|n| n.strip_prefix(GENERATION_PREFIX))
            .and_then(|n| n.parse::<u64>().ok())
        else {
            continue;
        };
        if entry.path().is_dir() {
            generations.push((number, entry.path()));
        }
    }

    generations.sort();
    Ok(generations)
}

/// Delete every generation except `keep`; failures are logged, not fatal
fn remove_stale_generations(location: &IndexLocation, keep: u64) {
    let generations = match list_generations(&location.dir) {
        Ok(generations) => generations,
        Err(e) => {
            warn!("Could not list old generations: {}", e);
            return;
        }
    };

    for (generation, path) in generations {
        if generation == keep {
            continue;
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => debug!("Removed old generation {}", path.display()),
            Err(e) => warn!("Failed to remove old generation {}: {}", path.display(), e),
        }
    }
}

/// Fail early with `PermissionDenied` when the index directory cannot be written
fn probe_writable(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| RagError::from_io(e, dir))?;

    let probe = dir.join(WRITE_PROBE_NAME);
    File::create(&probe).map_err(|e| RagError::from_io(e, dir))?;
    remove_file_if_exists(&probe)
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RagError::from_io(e, path)),
    }
}

/// Status of the index on disk, without opening it
#[inline]
pub fn current_manifest(location: &IndexLocation) -> Result<Option<IndexManifest>> {
    read_manifest(location)
}

/// The active index of a running process.
///
/// Queries share a read lock. Rebuilds build the new generation without
/// holding it, so queries keep answering from the old generation until the
/// write lock is taken for the swap.
#[derive(Debug)]
pub struct KnowledgeBase {
    location: IndexLocation,
    current: RwLock<Option<IndexHandle>>,
}

impl KnowledgeBase {
    /// Open whatever index `location` currently holds
    #[inline]
    pub async fn open(location: IndexLocation) -> Result<Self> {
        let handle = load(&location).await?;
        Ok(Self {
            location,
            current: RwLock::new(handle),
        })
    }

    #[inline]
    pub fn location(&self) -> &IndexLocation {
        &self.location
    }

    /// Generation of the loaded index, `None` when there is no knowledge base
    #[inline]
    pub async fn generation(&self) -> Option<u64> {
        self.current.read().await.as_ref().map(IndexHandle::generation)
    }

    #[inline]
    pub async fn manifest(&self) -> Option<IndexManifest> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|handle| handle.manifest().clone())
    }

    #[inline]
    pub async fn is_loaded(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Nearest chunks for `query_text`; empty when no index is loaded
    #[inline]
    pub async fn query(
        &self,
        query_text: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<RetrievedChunk>> {
        let current = self.current.read().await;
        match current.as_ref() {
            Some(handle) => query(handle, query_text, k, embedder).await,
            None => Ok(Vec::new()),
        }
    }

    /// Rebuild from `directory` and swap the result in
    #[inline]
    pub async fn rebuild(
        &self,
        directory: &Path,
        chunking: &ChunkingConfig,
        embedder: &dyn Embedder,
        cancel: &CancellationFlag,
    ) -> Result<IndexManifest> {
        let (handle, _lock) =
            rebuild_locked(&self.location, directory, chunking, embedder, cancel).await?;
        let manifest = handle.manifest().clone();

        let previous = self.current.write().await.replace(handle);
        drop(previous);
        remove_stale_generations(&self.location, manifest.generation);

        Ok(manifest)
    }

    /// Drop the loaded index and delete it together with every document in `data_dir`
    #[inline]
    pub async fn clear_with_documents(&self, data_dir: &Path) -> Result<ClearReport> {
        let mut current = self.current.write().await;
        let report = clear_with_documents(&self.location, data_dir)?;
        *current = None;
        Ok(report)
    }

    /// Pick up a generation committed by another process.
    ///
    /// Returns the generation now loaded.
    #[inline]
    pub async fn sync_with_disk(&self) -> Result<Option<u64>> {
        let on_disk = read_manifest(&self.location)?.map(|m| m.generation);
        if on_disk == self.generation().await {
            return Ok(on_disk);
        }

        let handle = load(&self.location).await?;
        let generation = handle.as_ref().map(IndexHandle::generation);
        *self.current.write().await = handle;
        info!("Knowledge base changed on disk, now at generation {:?}", generation);
        Ok(generation)
    }
}
