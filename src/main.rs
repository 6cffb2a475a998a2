use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use docs_mcp::chunker::Chunker;
use docs_mcp::config::{ConfigResolver, Settings};
use docs_mcp::embedder::Embedder;
use docs_mcp::indexer::Indexer;
use docs_mcp::loader::DocumentLoader;
use docs_mcp::ratelimit::RateLimiter;
use docs_mcp::searcher::Searcher;
use docs_mcp::server::{self, AppState, ProductState};
use docs_mcp::session::SessionPool;
use docs_mcp::store::VectorStore;

/// Documentation retrieval service speaking MCP over HTTP.
#[derive(Parser)]
#[command(name = "docs-mcp", version, about = "Hybrid documentation search with per-product MCP endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index for one product (or every configured one).
    Index {
        /// Product id; omit to index everything in $PRODUCT.
        product: Option<String>,

        /// Drop and recreate the collection before indexing.
        #[arg(long)]
        force: bool,

        /// Ignore any existing checkpoint and start from chunk zero.
        #[arg(long)]
        restart: bool,
    },

    /// Serve the MCP endpoints.
    Serve {
        /// Bind host (defaults to $HOST).
        #[arg(long)]
        host: Option<String>,

        /// Bind port (defaults to $PORT).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("configuration error")?;
    docs_mcp::logging::init(&settings.log_level);

    match cli.command {
        Commands::Index {
            product,
            force,
            restart,
        } => run_index(&settings, product, force, restart).await,
        Commands::Serve { host, port } => run_serve(&settings, host, port).await,
    }
}

fn shared_clients(settings: &Settings) -> (Arc<Embedder>, Arc<VectorStore>) {
    let limiter = Arc::new(RateLimiter::new(
        settings.voyage_rpm_limit,
        settings.voyage_tpm_limit,
    ));
    let embedder = Arc::new(Embedder::new(
        settings.voyage_api_key.clone(),
        settings.voyage_embed_model.clone(),
        settings.voyage_rerank_model.clone(),
        limiter,
        settings.batch_size,
    ));
    let store = Arc::new(VectorStore::new(
        &settings.qdrant_url,
        settings.qdrant_api_key.clone(),
    ));
    (embedder, store)
}

async fn run_index(
    settings: &Settings,
    product: Option<String>,
    force: bool,
    restart: bool,
) -> Result<()> {
    let resolver = ConfigResolver::new(&settings.products_dir);
    let (embedder, store) = shared_clients(settings);

    let products = match product {
        Some(p) => vec![p],
        None => settings.products.clone(),
    };

    for product_id in &products {
        let config = resolver
            .resolve(product_id, &settings.doc_lang)
            .with_context(|| format!("resolving product {product_id}"))?;

        tracing::info!(
            product = %product_id,
            collection = %config.collection,
            chunker = ?config.chunker,
            "indexing product"
        );

        let base_dir = settings.raw_data_dir.join(&config.raw_data);
        let loader = DocumentLoader::new(&base_dir)
            .with_context(|| format!("opening document directory for {product_id}"))?;
        let documents = loader.load_all(&config.doc_subdirs);
        if documents.is_empty() {
            tracing::warn!(product = %product_id, "no documents found, skipping");
            continue;
        }

        let chunker = Chunker::new(config.chunker, settings.chunk_size, settings.min_chunk_size);
        let chunks = chunker.chunk_documents(&documents);

        let checkpoint_path = settings.checkpoint_path(product_id);
        if restart && checkpoint_path.exists() {
            std::fs::remove_file(&checkpoint_path)
                .with_context(|| format!("removing checkpoint {}", checkpoint_path.display()))?;
            tracing::info!(product = %product_id, "checkpoint discarded (--restart)");
        }

        let indexer = Indexer::new(
            &embedder,
            &store,
            config.collection.clone(),
            settings.batch_size,
            &checkpoint_path,
        );
        indexer
            .init_collection(force)
            .await
            .with_context(|| format!("initializing collection {}", config.collection))?;
        let report = indexer
            .run(&chunks)
            .await
            .with_context(|| format!("indexing {product_id}"))?;

        println!(
            "{product_id}: {} chunks ({} indexed, {} skipped) in {} ms",
            report.total, report.succeeded, report.skipped, report.duration_ms
        );

        if let Ok(info) = store.collection_info(&config.collection).await {
            println!(
                "{}: {} points, status {}",
                config.collection, info.points_count, info.status
            );
        }
    }

    Ok(())
}

async fn run_serve(settings: &Settings, host: Option<String>, port: Option<u16>) -> Result<()> {
    let resolver = ConfigResolver::new(&settings.products_dir);
    let (embedder, store) = shared_clients(settings);

    let mut products = BTreeMap::new();
    for product_id in &settings.products {
        let config = resolver
            .resolve(product_id, &settings.doc_lang)
            .with_context(|| format!("resolving product {product_id}"))?;
        let searcher = Arc::new(Searcher::new(
            embedder.clone(),
            store.clone(),
            config.clone(),
            settings.min_detect_len,
            settings.rrf_k,
        ));
        products.insert(
            product_id.clone(),
            ProductState { config, searcher },
        );
    }

    let state = Arc::new(AppState {
        products,
        sessions: Arc::new(SessionPool::new()),
    });

    let host = host.unwrap_or_else(|| settings.host.clone());
    let port = port.unwrap_or(settings.port);
    server::run(state, &host, port).await
}
