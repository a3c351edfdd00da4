mod config_file;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use config_file::FileConfig;
use futures::StreamExt;
use rag_core::{
    embedder_for, open_collection, AnswerSynthesizer, AskConfig, AskCoordinator, AskOutcome,
    AskSettings, ChunkingConfig, CommonSettings, DocumentLoader, IngestConfig, IngestError,
    IngestSettings, IngestionOrchestrator, LoaderKind, MarkdownDirectoryLoader, MarkdownSplitter,
    NotionExportLoader, OllamaChatModel, OpenMode, QueryConfig, QueryError, QuerySettings,
    RecursiveCharacterSplitter, RelevanceGrader, Retriever, SplitterKind, Stage, StoreKind,
    TextSplitter,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rag", version, about = "Retrieval augmented generation over markdown documents")]
struct Cli {
    /// TOML file with default options (default is $HOME/.rag.toml)
    #[arg(long, global = true, env = "RAG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct StoreArgs {
    /// URL of vector database [default: http://localhost:8000]
    #[arg(short = 'd', long, env = "RAG_DATABASE_URL")]
    database_url: Option<String>,

    /// Name of vector database collection
    #[arg(short = 'n', long, env = "RAG_DATABASE_NAME")]
    database_name: Option<String>,

    /// Vector database backend: chroma or qdrant [default: chroma]
    #[arg(long, env = "RAG_STORE")]
    store: Option<StoreKind>,

    /// Ollama base URL [default: http://localhost:11434]
    #[arg(long, env = "RAG_OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Name of embedding model, `ngram` for the offline embedder [default: nomic-embed-text]
    #[arg(short = 'e', long, env = "RAG_EMBEDDING_MODEL")]
    embedding_model: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Split markdown documents and store them in a vector database.
    Ingest {
        #[command(flatten)]
        store: StoreArgs,

        /// File or folder that contains markdown documents.
        #[arg(short = 'f', long)]
        document_path: Option<PathBuf>,

        /// Base URL used to build a `source_url` for each document.
        #[arg(long, env = "RAG_BASE_SOURCE_URL")]
        base_source_url: Option<String>,

        /// Document layout: markdown or notion [default: markdown]
        #[arg(long)]
        loader: Option<LoaderKind>,

        /// Splitting policy: markdown or recursive [default: markdown]
        #[arg(long)]
        splitter: Option<SplitterKind>,

        /// Chunk size for splitter [default: 1500]
        #[arg(long)]
        splitter_chunk_size: Option<usize>,

        /// Chunk overlap for splitter [default: 300]
        #[arg(long)]
        splitter_chunk_overlap: Option<usize>,

        /// Chunks per vector database write [default: 50]
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Print the nearest document sections for a question.
    Query {
        #[command(flatten)]
        store: StoreArgs,

        #[arg(short = 'q', long)]
        question: Option<String>,

        /// Number of results [default: 5]
        #[arg(long)]
        result_count: Option<usize>,

        /// Hide results below this similarity.
        #[arg(long)]
        score_threshold: Option<f32>,
    },
    /// Answer a question using only relevant document sections.
    Ask {
        #[command(flatten)]
        store: StoreArgs,

        #[arg(short = 'q', long)]
        question: Option<String>,

        /// Name of the answer generation model
        #[arg(short = 'm', long, env = "RAG_MODEL")]
        model: Option<String>,

        /// Number of sections to retrieve [default: 5]
        #[arg(long)]
        result_count: Option<usize>,

        /// Minimum similarity of a retrieved section [default: 0.5]
        #[arg(long)]
        score_threshold: Option<f32>,

        /// Grading calls in flight at once [default: 1]
        #[arg(long)]
        grading_concurrency: Option<usize>,
    },
}

enum Validated {
    Ingest(IngestConfig),
    Query(QueryConfig),
    Ask(AskConfig),
}

fn common_settings(args: StoreArgs, file: &FileConfig) -> CommonSettings {
    CommonSettings {
        database_name: args.database_name.or_else(|| file.database_name.clone()),
        database_url: args.database_url.or_else(|| file.database_url.clone()),
        store: args.store.or(file.store),
        ollama_url: args.ollama_url.or_else(|| file.ollama_url.clone()),
        embedding_model: args
            .embedding_model
            .or_else(|| file.embedding_model.clone()),
    }
}

fn validate(command: Command, file: &FileConfig) -> Result<Validated, rag_core::ConfigError> {
    let validated = match command {
        Command::Ingest {
            store,
            document_path,
            base_source_url,
            loader,
            splitter,
            splitter_chunk_size,
            splitter_chunk_overlap,
            batch_size,
        } => Validated::Ingest(
            IngestSettings {
                common: common_settings(store, file),
                document_path,
                loader,
                base_source_url,
                splitter,
                chunk_size: splitter_chunk_size,
                chunk_overlap: splitter_chunk_overlap,
                batch_size,
            }
            .validate()?,
        ),
        Command::Query {
            store,
            question,
            result_count,
            score_threshold,
        } => Validated::Query(
            QuerySettings {
                common: common_settings(store, file),
                question,
                top_k: result_count,
                score_threshold,
            }
            .validate()?,
        ),
        Command::Ask {
            store,
            question,
            model,
            result_count,
            score_threshold,
            grading_concurrency,
        } => Validated::Ask(
            AskSettings {
                query: QuerySettings {
                    common: common_settings(store, file),
                    question,
                    top_k: result_count,
                    score_threshold,
                },
                model: model.or_else(|| file.model.clone()),
                grading_concurrency,
            }
            .validate()?,
        ),
    };
    Ok(validated)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let file = FileConfig::load(cli.config.as_deref())?;
    let validated = validate(cli.command, &file)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "rag boot"
    );

    match validated {
        Validated::Ingest(config) => run_ingest(config).await,
        Validated::Query(config) => run_query(config).await,
        Validated::Ask(config) => run_ask(config).await,
    }
}

async fn run_ingest(config: IngestConfig) -> anyhow::Result<()> {
    let loader: Box<dyn DocumentLoader> = match config.loader {
        LoaderKind::Markdown => Box::new(MarkdownDirectoryLoader::new(
            &config.document_path,
            config.base_source_url.clone(),
        )),
        LoaderKind::Notion => {
            if config.base_source_url.is_some() {
                warn!("base source url is ignored for notion exports");
            }
            Box::new(NotionExportLoader::new(&config.document_path)?)
        }
    };

    let documents = loader.load()?;
    println!("retrieved [{}] documents", documents.len());

    let chunking = ChunkingConfig::try_from(config.options)?;
    let splitter: Box<dyn TextSplitter> = match config.splitter {
        SplitterKind::Markdown => Box::new(MarkdownSplitter::new(chunking)?),
        SplitterKind::Recursive => Box::new(RecursiveCharacterSplitter::new(chunking)),
    };

    let embedder = embedder_for(&config.embedding);
    let collection = open_collection(&config.store, embedder, OpenMode::GetOrCreate)
        .await
        .map_err(|source| IngestError::Provider {
            stage: Stage::Collection,
            source,
        })?;
    info!(
        store = %config.store.kind,
        collection = %config.store.collection,
        "vector database ready"
    );

    let orchestrator = IngestionOrchestrator::new(splitter.as_ref(), collection.as_ref())
        .with_batch_size(config.options.batch_size);
    let split = orchestrator.split(&documents);

    if !split.skipped_documents.is_empty() {
        warn!(
            skipped = split.skipped_documents.len(),
            "some documents could not be split"
        );
        for skipped in &split.skipped_documents {
            println!("skipped [{}]: {}", skipped.source, skipped.reason);
        }
    }

    println!("{}", about_to_store(split.chunks.len(), &config));
    let report = orchestrator.store(&split.chunks).await?;

    println!(
        "stored [{}] of [{}] split documents at {}",
        report.stored,
        report.requested,
        Utc::now().to_rfc3339()
    );
    Ok(())
}

fn about_to_store(count: usize, config: &IngestConfig) -> String {
    format!(
        "about to store [{count}] split documents in collection [{}] using [{}] embeddings...",
        config.store.collection, config.embedding.model
    )
}

async fn run_query(config: QueryConfig) -> anyhow::Result<()> {
    let embedder = embedder_for(&config.embedding);
    let collection = open_collection(&config.store, embedder, OpenMode::Existing)
        .await
        .map_err(QueryError::from_query)?;

    let results = Retriever::new(collection, config.retrieval)
        .retrieve(&config.question)
        .await
        .with_context(|| format!("failed to query collection [{}]", config.store.collection))?;

    for (index, result) in results.iter().enumerate() {
        println!("Result {}", index + 1);
        println!("Document ID: {}", result.id);
        println!("Score: {:.6}", result.score);
        println!("Source: {}", result.source());
        println!("Document: {}\n", result.content);
    }

    Ok(())
}

async fn run_ask(config: AskConfig) -> anyhow::Result<()> {
    let query = &config.query;
    let embedder = embedder_for(&query.embedding);
    let collection = open_collection(&query.store, embedder, OpenMode::Existing)
        .await
        .map_err(QueryError::from_query)?;

    let model = Arc::new(OllamaChatModel::new(
        query.embedding.ollama_url.as_str(),
        config.model.clone(),
    ));
    let coordinator = AskCoordinator::new(
        Retriever::new(collection, query.retrieval),
        RelevanceGrader::new(model.clone()).with_concurrency(config.grading_concurrency),
        AnswerSynthesizer::new(model),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping answer");
            on_interrupt.cancel();
        }
    });

    match coordinator.ask(&query.question, cancel).await? {
        AskOutcome::NoReferenceDocuments => println!("No reference documents found"),
        AskOutcome::NoRelevantDocuments { retrieved } => {
            println!("Found {retrieved} document sections from database");
            println!("No relevant documents found");
        }
        AskOutcome::Answer {
            retrieved,
            retained,
            mut fragments,
        } => {
            println!("Found {retrieved} document sections from database");
            println!(
                "About to answer your question using {} relevant document sections...\n\n",
                retained.len()
            );

            let mut stdout = tokio::io::stdout();
            while let Some(fragment) = fragments.next().await {
                stdout.write_all(fragment?.as_bytes()).await?;
                stdout.flush().await?;
            }
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn flags_win_over_the_config_file() {
        let file = FileConfig {
            database_url: Some("http://from-file:8000".to_string()),
            database_name: Some("file-collection".to_string()),
            model: Some("file-model".to_string()),
            ..Default::default()
        };
        let command = parse(&[
            "rag",
            "ask",
            "-q",
            "How do I reset the pump?",
            "-n",
            "handbook",
            "-m",
            "llama3",
        ]);

        let Validated::Ask(config) = validate(command, &file).unwrap() else {
            panic!("expected ask");
        };
        assert_eq!(config.model, "llama3");
        assert_eq!(config.query.store.collection, "handbook");
        assert_eq!(config.query.store.url.as_str(), "http://from-file:8000/");
        assert_eq!(config.query.retrieval.score_threshold, Some(0.5));
    }

    #[test]
    fn missing_required_option_fails_before_any_work() {
        let command = parse(&["rag", "query", "-q", "anything"]);
        let result = validate(command, &FileConfig::default());
        assert!(matches!(
            result,
            Err(rag_core::ConfigError::Missing("database-name"))
        ));
    }

    #[test]
    fn ingest_options_reach_the_config() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "# T\nbody").unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let command = parse(&[
            "rag",
            "ingest",
            "-f",
            &path,
            "-n",
            "docs",
            "--store",
            "qdrant",
            "--splitter",
            "recursive",
            "--splitter-chunk-size",
            "800",
            "--splitter-chunk-overlap",
            "100",
            "--base-source-url",
            "https://example.com/docs",
        ]);

        let Validated::Ingest(config) = validate(command, &FileConfig::default()).unwrap() else {
            panic!("expected ingest");
        };
        assert_eq!(config.store.kind, StoreKind::Qdrant);
        assert_eq!(config.splitter, SplitterKind::Recursive);
        assert_eq!(config.options.chunk_size, 800);
        assert_eq!(config.options.chunk_overlap, 100);
        assert_eq!(
            config.base_source_url.map(|url| url.to_string()),
            Some("https://example.com/docs".to_string())
        );
    }

    #[test]
    fn ingest_announces_the_chunk_count_before_storing() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let command = parse(&["rag", "ingest", "-f", &path, "-n", "docs", "-e", "ngram"]);

        let Validated::Ingest(config) = validate(command, &FileConfig::default()).unwrap() else {
            panic!("expected ingest");
        };
        assert_eq!(
            about_to_store(42, &config),
            "about to store [42] split documents in collection [docs] using [ngram] embeddings..."
        );
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        let command = parse(&[
            "rag",
            "ingest",
            "-f",
            "docs",
            "-n",
            "docs",
            "--splitter-chunk-size",
            "100",
            "--splitter-chunk-overlap",
            "100",
        ]);
        assert!(validate(command, &FileConfig::default()).is_err());
    }
}
