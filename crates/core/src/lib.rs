pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod grader;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod stores;
pub mod synthesizer;
pub mod traits;

pub use chunking::{
    split_document, split_documents, ChunkingConfig, MarkdownSplitter, RecursiveCharacterSplitter,
    SkippedDocument, SplitReport, TextSplitter,
};
pub use config::{
    AskConfig, AskSettings, CommonSettings, EmbeddingConfig, IngestConfig, IngestSettings,
    LoaderKind, QueryConfig, QuerySettings, SplitterKind, StoreConfig, StoreKind,
};
pub use embeddings::{
    embedder_for, CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL,
};
pub use error::{ConfigError, IngestError, ProviderError, QueryError, Stage};
pub use grader::RelevanceGrader;
pub use ingest::{IngestionOrchestrator, IngestionReport};
pub use llm::{FragmentStream, LanguageModel, OllamaChatModel, Prompt, ResponseFormat};
pub use loader::{DocumentLoader, MarkdownDirectoryLoader, NotionExportLoader};
pub use models::{
    Chunk, DistanceMetric, Document, IngestionOptions, Metadata, OpenMode, RetrievalOptions,
    RetrievedChunk, Verdict,
};
pub use orchestrator::{AskCoordinator, AskOutcome};
pub use retriever::Retriever;
pub use stores::{open_collection, ChromaCollection, QdrantCollection};
pub use synthesizer::{AnswerStream, AnswerSynthesizer};
pub use traits::VectorCollection;
