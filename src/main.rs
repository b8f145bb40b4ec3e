//! # ragdocs CLI
//!
//! Thin command-line front end for the retrieval engine. The engine itself
//! is a library; this binary only loads configuration, wires up the HTTP
//! collaborators, and prints results.
//!
//! ## Usage
//!
//! ```bash
//! ragdocs --config ./config/ragdocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragdocs ask "<question>"` | Answer a question from the ingested corpus |
//! | `ragdocs chunks <doc-id>` | List a document's chunks from both collections |
//! | `ragdocs config-check` | Validate the configuration file |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use ragdocs::cache::QueryCache;
use ragdocs::models::Query;
use ragdocs::pipeline::RetrievalEngine;

/// ragdocs: question answering over ingested documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with the vector store, embedding, generation, and retrieval settings.
#[derive(Parser)]
#[command(
    name = "ragdocs",
    about = "Hybrid retrieval and ranking engine for documentation question answering",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragdocs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the ingested corpus.
    ///
    /// Analyzes the question, retrieves and ranks evidence from the prose
    /// and code collections, and prints the generated answer followed by
    /// its sources.
    Ask {
        /// The question to answer.
        question: String,

        /// Restrict retrieval to a single document id.
        #[arg(long)]
        doc: Option<String>,

        /// Number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the retrieved sources after the answer.
        #[arg(long)]
        sources: bool,
    },

    /// List a document's chunks from both collections, in document order.
    Chunks {
        /// Document id to inspect.
        doc_id: String,

        /// Maximum number of chunks to list per collection.
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },

    /// Validate the configuration file and print the effective settings.
    ConfigCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Missing config file falls back to defaults for `ask`; config-check
    // reports the error instead.
    let config = match &cli.command {
        Commands::ConfigCheck => ragdocs::load_config(&cli.config)?,
        _ => ragdocs::load_config(&cli.config).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "using default configuration");
            ragdocs::Config::default()
        }),
    };

    match cli.command {
        Commands::Ask {
            question,
            doc,
            top_k,
            sources,
        } => {
            let cache = QueryCache::new(config.cache.capacity);
            let cache_enabled = config.cache.enabled;
            let default_top_k = config.retrieval.top_k;

            let engine = Arc::new(RetrievalEngine::from_config(config)?);

            let query = Query {
                text: question.clone(),
                doc_id: doc.clone(),
                top_k: top_k.unwrap_or(default_top_k),
            };

            let outcome = if cache_enabled {
                match cache.get(&question, doc.as_deref()) {
                    Some(cached) => cached,
                    None => {
                        let outcome = engine.answer(&query).await;
                        cache.put(&question, doc.as_deref(), outcome.clone());
                        outcome
                    }
                }
            } else {
                engine.answer(&query).await
            };

            println!("{}", outcome.answer);

            if sources && !outcome.sources.is_empty() {
                println!("\nSources:");
                for (i, source) in outcome.sources.iter().enumerate() {
                    let heading = source.heading.as_deref().unwrap_or("(no heading)");
                    println!(
                        "{}. [{:.2}] {} / {}",
                        i + 1,
                        source.relevance_score,
                        source.source_file,
                        heading
                    );
                }
            }
        }
        Commands::Chunks { doc_id, limit } => {
            use ragdocs::store::{QdrantStore, VectorStore};

            let store = QdrantStore::new(config.vector_store.clone())?;
            let mut chunks = store
                .scroll(&config.vector_store.prose_collection, Some(&doc_id), limit)
                .await?;
            chunks.extend(
                store
                    .scroll(&config.vector_store.code_collection, Some(&doc_id), limit)
                    .await?,
            );
            chunks.sort_by_key(|c| c.start);

            if chunks.is_empty() {
                println!("No chunks found for document {}", doc_id);
            } else {
                println!("{} chunks for document {}:", chunks.len(), doc_id);
                for chunk in &chunks {
                    let kind = match chunk.kind {
                        ragdocs::ChunkKind::Prose => "prose",
                        ragdocs::ChunkKind::Code => "code",
                    };
                    let heading = chunk.heading.as_deref().unwrap_or("(no heading)");
                    println!(
                        "  [{}..{}] {} {} / {}",
                        chunk.start, chunk.end, kind, chunk.chunk_id, heading
                    );
                }
            }
        }
        Commands::ConfigCheck => {
            println!("Configuration OK:");
            println!("  vector store: {}", config.vector_store.url);
            println!(
                "  collections: {} / {}",
                config.vector_store.prose_collection, config.vector_store.code_collection
            );
            println!("  embedding: {}", config.embedding.url);
            println!("  generation: {}", config.generation.provider);
            println!("  top_k: {}", config.retrieval.top_k);
        }
    }

    Ok(())
}
