use std::fmt;
use thiserror::Error;

/// Pipeline stage a provider failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Collection,
    Grading,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Embedding => "embedding",
            Stage::Collection => "vector collection",
            Stage::Grading => "grading",
            Stage::Generation => "answer generation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("invalid option: {0}")]
    Invalid(String),

    #[error("unable to read config file {path}: {reason}")]
    File { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("collection [{0}] does not exist")]
    CollectionNotFound(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("embedding failed: {0}")]
    Embedding(#[source] Box<ProviderError>),
}

impl ProviderError {
    /// Marks a failure of the embedder a store calls into.
    pub fn embedding(error: ProviderError) -> Self {
        ProviderError::Embedding(Box::new(error))
    }

    /// The stage a store failure belongs to, with the embedding wrapper removed.
    pub fn into_stage(self) -> (Stage, ProviderError) {
        match self {
            ProviderError::Embedding(inner) => (Stage::Embedding, *inner),
            other => (Stage::Collection, other),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unable to loop through directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("unable to load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("failed to split document [{source_path}]: {reason}")]
    Split { source_path: String, reason: String },

    #[error("{stage} failed: {source}")]
    Provider {
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    #[error("failed to store batch {index} (chunks {start}..{end}) during {stage}: {source}")]
    Batch {
        index: usize,
        start: usize,
        end: usize,
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    #[error("requested {requested} chunks to be stored but the store returned {stored} ids")]
    CountMismatch { requested: usize, stored: usize },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("collection [{0}] does not exist")]
    CollectionNotFound(String),

    #[error("failed to query collection: {0}")]
    Query(#[source] ProviderError),

    #[error("{stage} failed: {source}")]
    Provider {
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    #[error("unable to parse grading response {output:?}: {reason}")]
    GraderParse { output: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl QueryError {
    /// Maps a failed collection query, keeping a missing collection and
    /// embedding failures distinct.
    pub fn from_query(error: ProviderError) -> Self {
        match error.into_stage() {
            (_, ProviderError::CollectionNotFound(name)) => QueryError::CollectionNotFound(name),
            (Stage::Embedding, source) => QueryError::Provider {
                stage: Stage::Embedding,
                source,
            },
            (_, other) => QueryError::Query(other),
        }
    }
}
