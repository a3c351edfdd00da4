use crate::embeddings::Embedder;
use crate::models::{Chunk, DistanceMetric, Metadata, OpenMode, RetrievedChunk};
use crate::stores::embed_chunks;
use crate::traits::VectorCollection;
use crate::ProviderError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TENANT: &str = "default_tenant";
pub const DEFAULT_DATABASE: &str = "default_database";

/// A Chroma collection reached over the v2 HTTP API.
pub struct ChromaCollection {
    client: Client,
    collection_url: String,
    name: String,
    embedder: Arc<dyn Embedder>,
}

impl ChromaCollection {
    pub async fn open(
        endpoint: &str,
        name: &str,
        embedder: Arc<dyn Embedder>,
        metric: DistanceMetric,
        mode: OpenMode,
    ) -> Result<Self, ProviderError> {
        Self::open_in(
            endpoint,
            DEFAULT_TENANT,
            DEFAULT_DATABASE,
            name,
            embedder,
            metric,
            mode,
        )
        .await
    }

    pub async fn open_in(
        endpoint: &str,
        tenant: &str,
        database: &str,
        name: &str,
        embedder: Arc<dyn Embedder>,
        metric: DistanceMetric,
        mode: OpenMode,
    ) -> Result<Self, ProviderError> {
        let client = Client::new();
        let collections_url = format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            endpoint.trim_end_matches('/'),
            tenant,
            database
        );

        let response = match mode {
            OpenMode::Existing => {
                client
                    .get(format!("{collections_url}/{name}"))
                    .send()
                    .await?
            }
            OpenMode::GetOrCreate => {
                client
                    .post(&collections_url)
                    .json(&json!({
                        "name": name,
                        "metadata": { "hnsw:space": metric.chroma_space() },
                        "get_or_create": true,
                    }))
                    .send()
                    .await?
            }
        };

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::CollectionNotFound(name.to_string()));
        }
        let parsed = success_json(response).await?;

        let id = parsed
            .pointer("/id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::BackendResponse {
                backend: "chroma".to_string(),
                details: "collection response has no id".to_string(),
            })?;

        debug!(collection = %name, id = %id, "opened chroma collection");

        Ok(Self {
            client,
            collection_url: format!("{collections_url}/{id}"),
            name: name.to_string(),
            embedder,
        })
    }
}

async fn success_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::BackendResponse {
            backend: "chroma".to_string(),
            details: format!("{status}: {body}"),
        });
    }
    Ok(response.json().await?)
}

fn metadata_from_value(value: Option<&Value>) -> Metadata {
    value
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .map(|(key, value)| {
                    let text = match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), text)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn metadata_to_value(metadata: &Metadata) -> Value {
    let object: Map<String, Value> = metadata
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    Value::Object(object)
}

#[async_trait]
impl VectorCollection for ChromaCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add_batch(&self, chunks: &[Chunk]) -> Result<Vec<String>, ProviderError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let (texts, embeddings) = embed_chunks(self.embedder.as_ref(), chunks).await?;

        let ids: Vec<String> = chunks
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect();
        let metadatas: Vec<Value> = chunks
            .iter()
            .map(|chunk| metadata_to_value(&chunk.metadata))
            .collect();

        let response = self
            .client
            .post(format!("{}/add", self.collection_url))
            .json(&json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": texts,
                "metadatas": metadatas,
            }))
            .send()
            .await?;

        success_json(response).await?;
        Ok(ids)
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<RetrievedChunk>, ProviderError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder
            .embed(text)
            .await
            .map_err(ProviderError::embedding)?;
        let response = self
            .client
            .post(format!("{}/query", self.collection_url))
            .json(&json!({
                "query_embeddings": [embedding],
                "n_results": top_k,
                "include": ["documents", "metadatas", "distances"],
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::CollectionNotFound(self.name.clone()));
        }
        let parsed = success_json(response).await?;

        let ids = parsed
            .pointer("/ids/0")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().enumerate() {
            let distance = parsed
                .pointer(&format!("/distances/0/{index}"))
                .and_then(Value::as_f64)
                .ok_or_else(|| ProviderError::BackendResponse {
                    backend: "chroma".to_string(),
                    details: format!("result {index} has no distance"),
                })?;
            let content = parsed
                .pointer(&format!("/documents/0/{index}"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let metadata = metadata_from_value(parsed.pointer(&format!("/metadatas/0/{index}")));

            results.push(RetrievedChunk {
                id: id.as_str().unwrap_or_default().to_string(),
                content,
                metadata,
                score: 1.0 - distance as f32,
            });
        }

        Ok(results)
    }
}
