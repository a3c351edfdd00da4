use crate::error::QueryError;
use crate::models::{RetrievalOptions, RetrievedChunk};
use crate::traits::VectorCollection;
use std::sync::Arc;
use tracing::debug;

/// Nearest-neighbour lookup with a similarity floor.
#[derive(Clone)]
pub struct Retriever {
    collection: Arc<dyn VectorCollection>,
    options: RetrievalOptions,
}

impl Retriever {
    pub fn new(collection: Arc<dyn VectorCollection>, options: RetrievalOptions) -> Self {
        Self {
            collection,
            options,
        }
    }

    /// Results ordered by descending score. An empty result is not an error.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidArgument("question is empty".to_string()));
        }

        let mut results = self
            .collection
            .query(question, self.options.top_k)
            .await
            .map_err(QueryError::from_query)?;

        let found = results.len();
        if let Some(threshold) = self.options.score_threshold {
            results.retain(|result| result.score >= threshold);
        }
        results.sort_by(|left, right| right.score.total_cmp(&left.score));
        results.truncate(self.options.top_k);

        debug!(
            collection = %self.collection.name(),
            found,
            kept = results.len(),
            "retrieved documents"
        );
        Ok(results)
    }
}
