use crate::{Chunk, ProviderError, RetrievedChunk};
use async_trait::async_trait;

/// A named vector collection bound to an embedding model.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Embeds and stores `chunks`, returning one id per chunk in order.
    async fn add_batch(&self, chunks: &[Chunk]) -> Result<Vec<String>, ProviderError>;

    /// Nearest neighbours of `text`, most similar first, with similarity scores.
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<RetrievedChunk>, ProviderError>;
}
