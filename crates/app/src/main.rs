use chrono::Utc;
use clap::{Parser, Subcommand};
use rag_pipeline_core::{
    build_embedder, build_generator, load_documents, BackendKind, FileParser, FilesystemStorage,
    IndexingPipeline, MemoryBackend, PipelineConfig, QdrantBackend, QueryPipeline, ResetStatus,
    VectorBackend, VectorStoreManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rag-pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file, layered under RAG_* environment variables
    #[arg(long, env = "RAG_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Collection name, overrides the configured one
    #[arg(long, env = "RAG_COLLECTION_OVERRIDE")]
    collection: Option<String>,

    /// Vector store base URL, overrides the configured one
    #[arg(long, env = "RAG_VECTOR_STORE_URL")]
    vector_store_url: Option<String>,

    /// Directory holding one sub-directory per bucket
    #[arg(long, env = "RAG_STORAGE_ROOT", default_value = ".")]
    storage_root: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, chunk, embed and store objects from a bucket.
    Index {
        /// Bucket (sub-directory of the storage root).
        #[arg(long)]
        bucket: String,
        /// Object keys to index; every object in the bucket when omitted.
        #[arg(long = "key")]
        keys: Vec<String>,
    },
    /// Answer a question from the indexed chunks.
    Query {
        #[arg(long)]
        text: String,
        /// Number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Drop the collection and every record in it.
    Reset,
    /// Print the number of stored records.
    Count,
    /// Remove all records of one document or of one source file.
    Delete {
        #[arg(long, conflicts_with = "file_name", required_unless_present = "file_name")]
        document_id: Option<String>,
        /// Source file name as it was indexed, e.g. `nested/manual.pdf`.
        #[arg(long)]
        file_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(collection) = cli.collection {
        config.collection_name = collection;
    }
    if let Some(url) = cli.vector_store_url {
        config.vector_store.endpoint = url;
    }
    config.validate()?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        collection = %config.collection_name,
        backend = ?config.vector_store.backend,
        "rag-pipeline boot"
    );

    let storage = FilesystemStorage::new(cli.storage_root);
    match config.vector_store.backend {
        BackendKind::Memory => {
            warn!("memory backend selected; records do not outlive this process");
            run(cli.command, &config, Arc::new(MemoryBackend::new()), &storage).await
        }
        BackendKind::Qdrant => {
            let backend = QdrantBackend::new(
                &config.vector_store.endpoint,
                config.vector_store.timeout(),
            )?;
            run(cli.command, &config, Arc::new(backend), &storage).await
        }
    }
}

async fn run<B: VectorBackend>(
    command: Command,
    config: &PipelineConfig,
    backend: Arc<B>,
    storage: &FilesystemStorage,
) -> anyhow::Result<()> {
    let store = VectorStoreManager::open(backend, config.collection_name.clone()).await?;

    match command {
        Command::Index { bucket, keys } => {
            let keys = if keys.is_empty() {
                storage.list_keys(&bucket)?
            } else {
                keys
            };
            if keys.is_empty() {
                anyhow::bail!("bucket {bucket} has no objects to index");
            }

            let documents = load_documents(storage, &FileParser, &bucket, &keys).await?;
            let embedder = build_embedder(&config.embedding, &config.model_dimensions)?;
            let pipeline = IndexingPipeline::from_model_table(embedder, &config.model_dimensions)?;

            let report = pipeline
                .index_with_cancel(&store, &documents, &config.chunking, &cancel_on_interrupt())
                .await?;

            println!(
                "{} chunks from {} documents indexed into {} at {}",
                report.chunks_indexed,
                report.documents_indexed,
                report.collection,
                report.completed_at.to_rfc3339()
            );
        }
        Command::Query { text, top_k } => {
            let embedder = build_embedder(&config.embedding, &config.model_dimensions)?;
            let generator = build_generator(&config.generation)?;
            let pipeline =
                QueryPipeline::new(embedder, generator).with_default_top_k(config.retrieval.top_k);

            let result = pipeline.query(&store, &text, top_k).await?;

            println!("query: {}", result.query);
            for (rank, hit) in result.matched_chunks.iter().enumerate() {
                let page = hit
                    .page_number
                    .map(|page| page.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "[{}] score={:.4} file={} page={} document_id={} sequence={}",
                    rank + 1,
                    hit.score,
                    hit.file_name,
                    page,
                    hit.origin_document_id,
                    hit.sequence_index
                );
                println!("  chunk_text:\n{}", hit.chunk_text);
            }
            println!("answer:\n{}", result.answer_text);
        }
        Command::Reset => match store.reset().await? {
            ResetStatus::Dropped => println!("collection {} dropped", store.name()),
            ResetStatus::NothingToReset => {
                println!("collection {} does not exist, nothing to reset", store.name())
            }
        },
        Command::Count => {
            println!("{} records in {}", store.count().await?, store.name());
        }
        Command::Delete {
            document_id,
            file_name,
        } => match (document_id, file_name) {
            (Some(document_id), _) => {
                let removed = store.delete_document(&document_id).await?;
                println!("{removed} records removed for document {document_id}");
            }
            (None, Some(file_name)) => {
                let removed = store.delete_file(&file_name).await?;
                println!("{removed} records removed for file {file_name}");
            }
            (None, None) => anyhow::bail!("delete needs --document-id or --file-name"),
        },
    }

    Ok(())
}

/// Cancelled on Ctrl-C; indexing stops before the next document.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current document");
            trigger.cancel();
        }
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_accepts_a_file_name() {
        let cli = Cli::try_parse_from(["rag-pipeline", "delete", "--file-name", "manual.pdf"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Delete { document_id: None, file_name: Some(ref name) } if name == "manual.pdf"
        ));
    }

    #[test]
    fn delete_needs_exactly_one_target() {
        assert!(Cli::try_parse_from(["rag-pipeline", "delete"]).is_err());
        assert!(Cli::try_parse_from([
            "rag-pipeline",
            "delete",
            "--document-id",
            "abc",
            "--file-name",
            "manual.pdf",
        ])
        .is_err());
    }
}
