use crate::chunking::{split_documents, SplitReport, TextSplitter};
use crate::error::IngestError;
use crate::models::{Chunk, Document, DEFAULT_BATCH_SIZE};
use crate::traits::VectorCollection;
use tracing::{debug, info, warn};

pub struct IngestionReport {
    pub requested: usize,
    pub stored: usize,
    pub batches: usize,
    pub ids: Vec<String>,
}

/// Splits documents and writes the chunks to a collection in fixed-size batches.
pub struct IngestionOrchestrator<'a> {
    splitter: &'a dyn TextSplitter,
    collection: &'a dyn VectorCollection,
    batch_size: usize,
}

impl<'a> IngestionOrchestrator<'a> {
    pub fn new(splitter: &'a dyn TextSplitter, collection: &'a dyn VectorCollection) -> Self {
        Self {
            splitter,
            collection,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Documents that cannot be split are skipped and listed in the report.
    pub fn split(&self, documents: &[Document]) -> SplitReport {
        let report = split_documents(self.splitter, documents);
        for skipped in &report.skipped_documents {
            warn!(source = %skipped.source, reason = %skipped.reason, "skipped document");
        }
        info!(
            documents = documents.len(),
            chunk_count = report.chunks.len(),
            skipped = report.skipped_documents.len(),
            "split documents"
        );
        report
    }

    /// Writes `ceil(len / batch_size)` batches in order, stopping at the first failure.
    pub async fn store(&self, chunks: &[Chunk]) -> Result<IngestionReport, IngestError> {
        if self.batch_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "batch size must be greater than zero".to_string(),
            ));
        }

        info!(
            collection = %self.collection.name(),
            chunk_count = chunks.len(),
            batch_size = self.batch_size,
            "about to store split documents"
        );

        let mut ids = Vec::with_capacity(chunks.len());
        let mut batches = 0;
        for (index, batch) in chunks.chunks(self.batch_size).enumerate() {
            let start = index * self.batch_size;
            let end = start + batch.len();

            let batch_ids = self.collection.add_batch(batch).await.map_err(|error| {
                let (stage, source) = error.into_stage();
                IngestError::Batch {
                    index,
                    start,
                    end,
                    stage,
                    source,
                }
            })?;

            if batch_ids.len() != batch.len() {
                return Err(IngestError::CountMismatch {
                    requested: batch.len(),
                    stored: batch_ids.len(),
                });
            }

            debug!(batch = index, start, end, "stored batch");
            ids.extend(batch_ids);
            batches += 1;
        }

        info!(requested = chunks.len(), stored = ids.len(), batches, "stored split documents");

        Ok(IngestionReport {
            requested: chunks.len(),
            stored: ids.len(),
            batches,
            ids,
        })
    }
}
