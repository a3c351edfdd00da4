use crate::error::ConfigError;
use crate::models::{
    IngestionOptions, RetrievalOptions, DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_OVERLAP,
    DEFAULT_CHUNK_SIZE, DEFAULT_SCORE_THRESHOLD, DEFAULT_TOP_K,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

pub const DEFAULT_DATABASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_GRADING_CONCURRENCY: usize = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Chroma,
    Qdrant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitterKind {
    #[default]
    Markdown,
    Recursive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    #[default]
    Markdown,
    Notion,
}

macro_rules! named_kind {
    ($kind:ty, $what:literal, $($variant:path => $name:literal),+) => {
        impl fmt::Display for $kind {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $($variant => $name),+
                };
                f.write_str(name)
            }
        }

        impl FromStr for $kind {
            type Err = ConfigError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(ConfigError::Invalid(format!(
                        concat!("unknown ", $what, " `{}`"),
                        other
                    ))),
                }
            }
        }
    };
}

named_kind!(StoreKind, "store", StoreKind::Chroma => "chroma", StoreKind::Qdrant => "qdrant");
named_kind!(SplitterKind, "splitter", SplitterKind::Markdown => "markdown", SplitterKind::Recursive => "recursive");
named_kind!(LoaderKind, "loader", LoaderKind::Markdown => "markdown", LoaderKind::Notion => "notion");

/// Where the vector collection lives.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: Url,
    pub collection: String,
}

/// Embedding provider settings shared by every command.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub ollama_url: Url,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub document_path: PathBuf,
    pub loader: LoaderKind,
    pub base_source_url: Option<Url>,
    pub splitter: SplitterKind,
    pub options: IngestionOptions,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub question: String,
    pub retrieval: RetrievalOptions,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone)]
pub struct AskConfig {
    pub query: QueryConfig,
    pub model: String,
    pub grading_concurrency: usize,
}

/// Options shared by every command, after flag, env and file merging.
/// `None` means "use the built-in default" unless the option is required.
#[derive(Debug, Clone, Default)]
pub struct CommonSettings {
    pub database_name: Option<String>,
    pub database_url: Option<String>,
    pub store: Option<StoreKind>,
    pub ollama_url: Option<String>,
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestSettings {
    pub common: CommonSettings,
    pub document_path: Option<PathBuf>,
    pub loader: Option<LoaderKind>,
    pub base_source_url: Option<String>,
    pub splitter: Option<SplitterKind>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QuerySettings {
    pub common: CommonSettings,
    pub question: Option<String>,
    pub top_k: Option<usize>,
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct AskSettings {
    pub query: QuerySettings,
    pub model: Option<String>,
    pub grading_concurrency: Option<usize>,
}

impl IngestSettings {
    pub fn validate(self) -> Result<IngestConfig, ConfigError> {
        let document_path = self
            .document_path
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(ConfigError::Missing("document-path"))?;

        let options = IngestionOptions {
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: self.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        };
        if options.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if options.chunk_overlap >= options.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                options.chunk_overlap, options.chunk_size
            )));
        }
        if options.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch size must be greater than zero".to_string(),
            ));
        }

        let base_source_url = non_empty(self.base_source_url)
            .map(|value| parse_url("base-source-url", &value))
            .transpose()?;

        Ok(IngestConfig {
            document_path,
            loader: self.loader.unwrap_or_default(),
            base_source_url,
            splitter: self.splitter.unwrap_or_default(),
            options,
            store: self.common.store()?,
            embedding: self.common.embedding()?,
        })
    }
}

impl QuerySettings {
    pub fn validate(self) -> Result<QueryConfig, ConfigError> {
        let question = non_empty(self.question).ok_or(ConfigError::Missing("question"))?;
        let store = self.common.store()?;

        let top_k = self.top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 {
            return Err(ConfigError::Invalid(
                "result count must be greater than zero".to_string(),
            ));
        }
        if let Some(threshold) = self.score_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::Invalid(format!(
                    "score threshold {threshold} is outside [0, 1]"
                )));
            }
        }

        Ok(QueryConfig {
            question,
            retrieval: RetrievalOptions {
                top_k,
                score_threshold: self.score_threshold,
            },
            store,
            embedding: self.common.embedding()?,
        })
    }
}

impl AskSettings {
    /// Unlike `query`, `ask` filters with the default threshold when none is given.
    pub fn validate(mut self) -> Result<AskConfig, ConfigError> {
        self.query.score_threshold = self
            .query
            .score_threshold
            .or(Some(DEFAULT_SCORE_THRESHOLD));
        let query = self.query.validate()?;
        let model = non_empty(self.model).ok_or(ConfigError::Missing("model"))?;

        let grading_concurrency = self
            .grading_concurrency
            .unwrap_or(DEFAULT_GRADING_CONCURRENCY);
        if grading_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "grading concurrency must be greater than zero".to_string(),
            ));
        }

        Ok(AskConfig {
            query,
            model,
            grading_concurrency,
        })
    }
}

impl CommonSettings {
    fn store(&self) -> Result<StoreConfig, ConfigError> {
        let collection = non_empty(self.database_name.clone())
            .ok_or(ConfigError::Missing("database-name"))?;
        let url = parse_url(
            "database-url",
            self.database_url.as_deref().unwrap_or(DEFAULT_DATABASE_URL),
        )?;
        Ok(StoreConfig {
            kind: self.store.unwrap_or_default(),
            url,
            collection,
        })
    }

    fn embedding(&self) -> Result<EmbeddingConfig, ConfigError> {
        let ollama_url = parse_url(
            "ollama-url",
            self.ollama_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
        )?;
        let model = non_empty(self.embedding_model.clone())
            .unwrap_or_else(|| crate::embeddings::DEFAULT_EMBEDDING_MODEL.to_string());
        Ok(EmbeddingConfig { ollama_url, model })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_url(option: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim())
        .map_err(|error| ConfigError::Invalid(format!("{option} `{value}`: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common() -> CommonSettings {
        CommonSettings {
            database_name: Some("handbook".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn ingest_defaults_match_the_documented_values() {
        let config = IngestSettings {
            common: common(),
            document_path: Some(PathBuf::from("docs")),
            ..Default::default()
        }
        .validate()
        .unwrap();

        assert_eq!(config.options.chunk_size, 1_500);
        assert_eq!(config.options.chunk_overlap, 300);
        assert_eq!(config.options.batch_size, 50);
        assert_eq!(config.store.url.as_str(), "http://localhost:8000/");
        assert_eq!(config.store.kind, StoreKind::Chroma);
        assert_eq!(config.embedding.ollama_url.as_str(), "http://localhost:11434/");
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.splitter, SplitterKind::Markdown);
        assert!(config.base_source_url.is_none());
    }

    #[test]
    fn missing_required_options_are_named() {
        let error = IngestSettings {
            common: common(),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(error, ConfigError::Missing("document-path")));

        let error = QuerySettings {
            question: Some("what?".to_string()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(error, ConfigError::Missing("database-name")));

        let error = AskSettings {
            query: QuerySettings {
                common: common(),
                question: Some("what?".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(error, ConfigError::Missing("model")));

        let error = QuerySettings {
            common: common(),
            question: Some("   ".to_string()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(error, ConfigError::Missing("question")));
    }

    #[test]
    fn rejects_invalid_chunking() {
        for (size, overlap, batch) in [(0, 0, 50), (100, 100, 50), (100, 150, 50), (100, 10, 0)] {
            let result = IngestSettings {
                common: common(),
                document_path: Some(PathBuf::from("docs")),
                chunk_size: Some(size),
                chunk_overlap: Some(overlap),
                batch_size: Some(batch),
                ..Default::default()
            }
            .validate();
            assert!(
                matches!(result, Err(ConfigError::Invalid(_))),
                "size {size} overlap {overlap} batch {batch}"
            );
        }
    }

    #[test]
    fn rejects_bad_urls_and_thresholds() {
        let result = QuerySettings {
            common: CommonSettings {
                database_url: Some("not a url".to_string()),
                ..common()
            },
            question: Some("q".to_string()),
            ..Default::default()
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = QuerySettings {
            common: common(),
            question: Some("q".to_string()),
            score_threshold: Some(1.5),
            ..Default::default()
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = QuerySettings {
            common: common(),
            question: Some("q".to_string()),
            top_k: Some(0),
            ..Default::default()
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn query_is_unfiltered_but_ask_uses_the_default_threshold() {
        let query = QuerySettings {
            common: common(),
            question: Some("q".to_string()),
            ..Default::default()
        };
        assert_eq!(query.clone().validate().unwrap().retrieval.score_threshold, None);

        let ask = AskSettings {
            query,
            model: Some("llama3".to_string()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(ask.query.retrieval.score_threshold, Some(0.5));
        assert_eq!(ask.query.retrieval.top_k, 5);
        assert_eq!(ask.grading_concurrency, 1);
    }

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!("Qdrant".parse::<StoreKind>().unwrap(), StoreKind::Qdrant);
        assert_eq!("recursive".parse::<SplitterKind>().unwrap(), SplitterKind::Recursive);
        assert_eq!("notion".parse::<LoaderKind>().unwrap(), LoaderKind::Notion);
        assert!("pinecone".parse::<StoreKind>().is_err());
        assert_eq!(StoreKind::Chroma.to_string(), "chroma");
    }
}
