use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type Metadata = BTreeMap<String, String>;

pub const SOURCE_KEY: &str = "source";
pub const SOURCE_URL_KEY: &str = "source_url";
pub const TITLE_KEY: &str = "title";

pub const DEFAULT_CHUNK_SIZE: usize = 1_500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 300;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// A loaded document with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// A split of a document. Metadata is the parent's, unchanged.
pub type Chunk = Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl RetrievedChunk {
    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Yes,
    No,
}

/// The only response shape the grader accepts: an object whose single key
/// is `score`, holding `"yes"` or `"no"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct GraderVerdict {
    pub score: Verdict,
}

impl TryFrom<Map<String, Value>> for GraderVerdict {
    type Error = String;

    fn try_from(object: Map<String, Value>) -> Result<Self, Self::Error> {
        if object.len() != 1 {
            return Err(format!("expected a single `score` key, got {} keys", object.len()));
        }
        let score = match object.get("score") {
            Some(Value::String(score)) if score == "yes" => Verdict::Yes,
            Some(Value::String(score)) if score == "no" => Verdict::No,
            Some(other) => return Err(format!("score must be \"yes\" or \"no\", got {other}")),
            None => return Err("missing key `score`".to_string()),
        };
        Ok(Self { score })
    }
}

/// Similarity scores are derived as `1 - distance`, which assumes cosine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
}

impl DistanceMetric {
    pub fn chroma_space(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
        }
    }

    pub fn qdrant_distance(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "Cosine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    GetOrCreate,
    Existing,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub score_threshold: Option<f32>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            score_threshold: Some(DEFAULT_SCORE_THRESHOLD),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_accepts_only_the_single_score_key() {
        let yes: GraderVerdict = serde_json::from_str(r#"{"score":"yes"}"#).unwrap();
        assert_eq!(yes.score, Verdict::Yes);

        assert!(serde_json::from_str::<GraderVerdict>(r#"{"score":"Yes"}"#).is_err());
        assert!(serde_json::from_str::<GraderVerdict>(r#"{"score":true}"#).is_err());
        assert!(
            serde_json::from_str::<GraderVerdict>(r#"{"score":"no","reason":"x"}"#).is_err()
        );
        assert!(serde_json::from_str::<GraderVerdict>(r#"{}"#).is_err());
    }

    #[test]
    fn verdict_rejects_sequences() {
        for array in [r#"["yes"]"#, r#"["no"]"#, r#"[["yes"]]"#] {
            assert!(
                serde_json::from_str::<GraderVerdict>(array).is_err(),
                "{array} should not parse"
            );
        }
    }

    #[test]
    fn source_defaults_to_empty() {
        let document = Document::new("body", Metadata::new());
        assert_eq!(document.source(), "");
    }
}
