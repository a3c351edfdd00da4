use crate::embeddings::Embedder;
use crate::models::{Chunk, DistanceMetric, Metadata, OpenMode, RetrievedChunk};
use crate::stores::embed_chunks;
use crate::traits::VectorCollection;
use crate::ProviderError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

/// A Qdrant collection. Created on the first write, once the embedding
/// dimension is known.
pub struct QdrantCollection {
    endpoint: String,
    collection: String,
    client: Client,
    embedder: Arc<dyn Embedder>,
    metric: DistanceMetric,
    ready: OnceCell<()>,
}

impl QdrantCollection {
    pub async fn open(
        endpoint: &str,
        collection: &str,
        embedder: Arc<dyn Embedder>,
        metric: DistanceMetric,
        mode: OpenMode,
    ) -> Result<Self, ProviderError> {
        let store = Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            client: Client::new(),
            embedder,
            metric,
            ready: OnceCell::new(),
        };

        if store.exists().await? {
            store.ready.set(()).ok();
        } else if mode == OpenMode::Existing {
            return Err(ProviderError::CollectionNotFound(collection.to_string()));
        }

        Ok(store)
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    async fn exists(&self) -> Result<bool, ProviderError> {
        let response = self.client.get(self.collection_url()).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(ProviderError::BackendResponse {
                backend: "qdrant".to_string(),
                details: status.to_string(),
            }),
        }
    }

    async fn ensure_collection(&self, vector_size: usize) -> Result<(), ProviderError> {
        self.ready
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .put(self.collection_url())
                    .json(&json!({
                        "vectors": {
                            "size": vector_size,
                            "distance": self.metric.qdrant_distance(),
                        }
                    }))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(ProviderError::BackendResponse {
                        backend: "qdrant".to_string(),
                        details: response.status().to_string(),
                    });
                }

                info!(collection = %self.collection, vector_size, "created qdrant collection");
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl VectorCollection for QdrantCollection {
    fn name(&self) -> &str {
        &self.collection
    }

    async fn add_batch(&self, chunks: &[Chunk]) -> Result<Vec<String>, ProviderError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let (_, embeddings) = embed_chunks(self.embedder.as_ref(), chunks).await?;

        let vector_size = embeddings[0].len();
        self.ensure_collection(vector_size).await?;

        let mut ids = Vec::with_capacity(chunks.len());
        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != vector_size {
                    return Err(ProviderError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        vector_size
                    )));
                }

                let id = Uuid::new_v4().to_string();
                ids.push(id.clone());

                Ok(json!({
                    "id": id,
                    "vector": embedding,
                    "payload": {
                        "content": chunk.content,
                        "metadata": chunk.metadata,
                    },
                }))
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(ids)
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<RetrievedChunk>, ProviderError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder
            .embed(text)
            .await
            .map_err(ProviderError::embedding)?;
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::CollectionNotFound(self.collection.clone()));
        }
        if !response.status().is_success() {
            return Err(ProviderError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = match hit.pointer("/id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => String::new(),
            };
            let content = hit
                .pointer("/payload/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let metadata: Metadata = hit
                .pointer("/payload/metadata")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);

            result.push(RetrievedChunk {
                id,
                content,
                metadata,
                score: score as f32,
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(CharacterNgramEmbedder { dimensions: 8 })
    }

    #[tokio::test]
    async fn collection_is_created_lazily_with_first_vector_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs"))
            .and(body_partial_json(json!({
                "vectors": {"size": 8, "distance": "Cosine"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs/points"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(2)
            .mount(&server)
            .await;

        let collection = QdrantCollection::open(
            &server.uri(),
            "docs",
            embedder(),
            DistanceMetric::Cosine,
            OpenMode::GetOrCreate,
        )
        .await
        .unwrap();

        let metadata = Metadata::from([("source".to_string(), "a.md".to_string())]);
        let first = collection
            .add_batch(&[Chunk::new("one", metadata.clone())])
            .await
            .unwrap();
        let second = collection
            .add_batch(&[Chunk::new("two", metadata)])
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn existing_mode_requires_the_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = QdrantCollection::open(
            &server.uri(),
            "docs",
            embedder(),
            DistanceMetric::Cosine,
            OpenMode::Existing,
        )
        .await;

        assert!(matches!(result, Err(ProviderError::CollectionNotFound(_))));
    }

    #[tokio::test]
    async fn search_maps_payload_back_to_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/collections/docs/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{
                    "id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26",
                    "score": 0.91,
                    "payload": {"content": "pump pressure", "metadata": {"source": "pump.md"}}
                }]
            })))
            .mount(&server)
            .await;

        let collection = QdrantCollection::open(
            &server.uri(),
            "docs",
            embedder(),
            DistanceMetric::Cosine,
            OpenMode::Existing,
        )
        .await
        .unwrap();

        let hits = collection.query("pump", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "pump pressure");
        assert_eq!(hits[0].source(), "pump.md");
        assert!((hits[0].score - 0.91).abs() < 1e-6);
    }
}
