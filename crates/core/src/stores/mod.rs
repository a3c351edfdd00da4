pub mod chroma;
pub mod qdrant;

pub use chroma::ChromaCollection;
pub use qdrant::QdrantCollection;

use crate::config::{StoreConfig, StoreKind};
use crate::embeddings::Embedder;
use crate::models::{Chunk, DistanceMetric, OpenMode};
use crate::traits::VectorCollection;
use crate::ProviderError;
use std::sync::Arc;
use tracing::debug;

/// Opens the configured backend with cosine distance.
pub async fn open_collection(
    config: &StoreConfig,
    embedder: Arc<dyn Embedder>,
    mode: OpenMode,
) -> Result<Arc<dyn VectorCollection>, ProviderError> {
    debug!(
        store = %config.kind,
        collection = %config.collection,
        embedding_model = %embedder.model(),
        "opening collection"
    );
    let endpoint = config.url.as_str();
    let collection: Arc<dyn VectorCollection> = match config.kind {
        StoreKind::Chroma => Arc::new(
            ChromaCollection::open(
                endpoint,
                &config.collection,
                embedder,
                DistanceMetric::Cosine,
                mode,
            )
            .await?,
        ),
        StoreKind::Qdrant => Arc::new(
            QdrantCollection::open(
                endpoint,
                &config.collection,
                embedder,
                DistanceMetric::Cosine,
                mode,
            )
            .await?,
        ),
    };
    Ok(collection)
}

/// Embeds chunk contents in one call. Failures are tagged as embedding failures.
pub(crate) async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &[Chunk],
) -> Result<(Vec<String>, Vec<Vec<f32>>), ProviderError> {
    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
    let embeddings = embedder
        .embed_batch(&texts)
        .await
        .map_err(ProviderError::embedding)?;
    if embeddings.len() != texts.len() {
        return Err(ProviderError::embedding(ProviderError::BackendResponse {
            backend: embedder.model().to_string(),
            details: format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                texts.len()
            ),
        }));
    }
    Ok((texts, embeddings))
}
