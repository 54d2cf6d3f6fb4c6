#[cfg(test)]
mod tests;

use super::{ChunkMetadata, EmbeddingRecord};
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Vector database store using LanceDB for exact similarity search.
///
/// One store holds one collection (a single table) inside one directory.
pub struct VectorStore {
    connection: Connection,
    path: PathBuf,
    table_name: String,
    vector_dimension: Option<usize>,
}

/// Search result from vector similarity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_metadata: ChunkMetadata,
    pub similarity_score: f32,
    pub distance: f32,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("path", &self.path)
            .field("table_name", &self.table_name)
            .field("vector_dimension", &self.vector_dimension)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Create a new, empty store in `path`.
    ///
    /// The table itself is created on the first insert, once the vector
    /// dimension is known.
    #[inline]
    pub async fn create(path: &Path, table_name: &str) -> Result<Self> {
        debug!("Creating LanceDB store at path: {:?}", path);

        std::fs::create_dir_all(path).map_err(|e| RagError::from_io(e, path))?;

        let connection = Self::connect(path).await.map_err(|e| {
            RagError::Database(format!("Failed to connect to LanceDB: {}", e))
        })?;

        Ok(Self {
            connection,
            path: path.to_path_buf(),
            table_name: table_name.to_string(),
            vector_dimension: None,
        })
    }

    /// Open an existing store; a missing or unreadable table is reported as corruption
    #[inline]
    pub async fn open(path: &Path, table_name: &str) -> Result<Self> {
        debug!("Opening LanceDB store at path: {:?}", path);

        let corrupt = |message: String| RagError::IndexCorrupt {
            path: path.to_path_buf(),
            message,
        };

        if !path.is_dir() {
            return Err(corrupt("store directory is missing".to_string()));
        }

        let connection = Self::connect(path).await.map_err(|e| {
            error!("Failed to connect to LanceDB: {}", e);
            corrupt(format!("failed to connect: {e}"))
        })?;

        let mut store = Self {
            connection,
            path: path.to_path_buf(),
            table_name: table_name.to_string(),
            vector_dimension: None,
        };

        let dimension = store
            .detect_existing_vector_dimension()
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        store.vector_dimension = Some(dimension);

        info!(
            "Opened vector store {} with {} dimensions",
            store.table_name, dimension
        );
        Ok(store)
    }

    async fn connect(path: &Path) -> lancedb::Result<Connection> {
        let uri = format!("file://{}", path.display());
        lancedb::connect(&uri).execute().await
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dimension of the stored vectors, once known
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.vector_dimension
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open existing table: {}", e)))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return usize::try_from(*size).map_err(|_| {
                        RagError::Database(format!("Invalid vector dimension {size}"))
                    });
                }
            }
        }

        Err(RagError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: i32) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim,
                ),
                false,
            ),
            Field::new("source", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("start_offset", DataType::UInt32, false),
            Field::new("sequence", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    /// Store multiple embeddings in a batch.
    ///
    /// The whole batch is rejected, before anything is written, when its
    /// vectors disagree in dimension with each other or with the table.
    #[inline]
    pub async fn store_embeddings_batch(&mut self, records: Vec<EmbeddingRecord>) -> Result<()> {
        let Some(first) = records.first() else {
            debug!("No embeddings to store");
            return Ok(());
        };

        debug!("Storing batch of {} embeddings", records.len());

        let vector_dim = first.vector.len();
        if vector_dim == 0 {
            return Err(RagError::Database("Embedding vectors are empty".to_string()));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != vector_dim) {
            return Err(RagError::Database(format!(
                "Mixed embedding dimensions in batch: {} and {}",
                vector_dim,
                bad.vector.len()
            )));
        }
        if let Some(expected) = self.vector_dimension {
            if expected != vector_dim {
                return Err(RagError::Database(format!(
                    "Embedding dimension {} does not match the store's dimension {}",
                    vector_dim, expected
                )));
            }
        }

        let vector_dim_i32 = i32::try_from(vector_dim)
            .map_err(|_| RagError::Database(format!("Vector dimension {vector_dim} too large")))?;
        let record_batch = Self::create_record_batch(&records, vector_dim, vector_dim_i32)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema.clone());

        if self.vector_dimension.is_none() {
            info!(
                "Creating table {} with {} dimensions",
                self.table_name, vector_dim
            );
            self.connection
                .create_empty_table(&self.table_name, schema)
                .execute()
                .await
                .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;
            self.vector_dimension = Some(vector_dim);
        }

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))?;

        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert embeddings: {}", e)))?;

        debug!("Stored {} embeddings", records.len());
        Ok(())
    }

    /// Create a RecordBatch from embedding records
    fn create_record_batch(
        records: &[EmbeddingRecord],
        vector_dim: usize,
        vector_dim_i32: i32,
    ) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut sources = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut start_offsets = Vec::with_capacity(len);
        let mut sequences = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            sources.push(record.metadata.source.as_str());
            contents.push(record.metadata.content.as_str());
            chunk_indices.push(record.metadata.chunk_index);
            start_offsets.push(record.metadata.start_offset);
            sequences.push(record.metadata.sequence);
            created_ats.push(record.metadata.created_at.as_str());
        }

        let schema = Self::create_schema(vector_dim_i32);

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim_i32, Arc::new(values_array), None)
                .map_err(|e| {
                    RagError::Database(format!("Failed to create vector array: {}", e))
                })?;

        let arrays: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(UInt32Array::from(start_offsets)),
            Arc::new(UInt32Array::from(sequences)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Exact cosine search returning at most `limit` results.
    ///
    /// Results are ordered by ascending distance, then ascending insertion
    /// sequence. When the last slot is tied with entries outside the fetched
    /// window, the window is widened until the tie is fully visible, so the
    /// same query always returns the same entries.
    #[inline]
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", limit);

        if limit == 0 || self.vector_dimension.is_none() {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.vector_dimension {
            if expected != query_vector.len() {
                return Err(RagError::Database(format!(
                    "Query dimension {} does not match the store's dimension {}",
                    query_vector.len(),
                    expected
                )));
            }
        }

        let mut window = limit + 1;
        loop {
            let mut results = self.fetch_nearest(query_vector, window).await?;
            results.sort_by(compare_results);

            let window_full = results.len() == window;
            let boundary_tied = results.len() > limit
                && results.last().map(|r| r.distance) == Some(results[limit - 1].distance);

            if window_full && boundary_tied {
                debug!("Tie at result {}, widening window to {}", limit, window * 2);
                window *= 2;
                continue;
            }

            results.truncate(limit);
            return Ok(results);
        }
    }

    async fn fetch_nearest(&self, query_vector: &[f32], window: usize) -> Result<Vec<SearchResult>> {
        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))?;

        let results = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .bypass_vector_index()
            .limit(window)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        Self::parse_search_results_stream(results).await
    }

    /// Parse search results from LanceDB stream into SearchResult structs
    async fn parse_search_results_stream(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<SearchResult>> {
        let mut search_results = Vec::new();

        while let Some(batch_result) = results
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            search_results.extend(Self::parse_search_batch(&batch_result)?);
        }

        debug!("Parsed {} search results from stream", search_results.len());
        Ok(search_results)
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let sources = string_column(batch, "source")?;
        let contents = string_column(batch, "content")?;
        let chunk_indices = u32_column(batch, "chunk_index")?;
        let start_offsets = u32_column(batch, "start_offset")?;
        let sequences = u32_column(batch, "sequence")?;
        let created_ats = string_column(batch, "created_at")?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let mut search_results = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let chunk_metadata = ChunkMetadata {
                source: sources.value(row).to_string(),
                content: contents.value(row).to_string(),
                chunk_index: chunk_indices.value(row),
                start_offset: start_offsets.value(row),
                sequence: sequences.value(row),
                created_at: created_ats.value(row).to_string(),
            };

            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            // Cosine distance to similarity (higher is better)
            let similarity_score = 1.0 - distance;

            search_results.push(SearchResult {
                chunk_metadata,
                similarity_score,
                distance,
            });
        }

        Ok(search_results)
    }

    /// Get the total number of embeddings stored
    #[inline]
    pub async fn count_embeddings(&self) -> Result<u64> {
        if self.vector_dimension.is_none() {
            return Ok(0);
        }

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))?;

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;

        Ok(count as u64)
    }

    /// Validate database integrity
    ///
    /// # Returns
    /// * `Result<bool>` - True if the table opens and can be counted
    #[inline]
    pub async fn validate_integrity(&self) -> Result<bool> {
        debug!("Validating database integrity");

        let table_names = match self.connection.table_names().execute().await {
            Ok(names) => names,
            Err(e) => {
                error!("Failed to list tables during integrity check: {}", e);
                return Ok(false);
            }
        };

        if !table_names.contains(&self.table_name) {
            warn!("Table {} missing during integrity check", self.table_name);
            return Ok(false);
        }

        match self.connection.open_table(&self.table_name).execute().await {
            Ok(table) => match table.count_rows(None).await {
                Ok(count) => {
                    debug!("Database integrity check passed, {} rows found", count);
                    Ok(true)
                }
                Err(e) => {
                    error!("Failed to count rows during integrity check: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                error!("Failed to open table during integrity check: {}", e);
                Ok(false)
            }
        }
    }
}

/// Nearest first; equal distances keep insertion order
fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.chunk_metadata.sequence.cmp(&b.chunk_metadata.sequence))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {name} column type")))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::Database(format!("Invalid {name} column type")))
}
