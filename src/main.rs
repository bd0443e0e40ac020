use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{info, warn};

use contract_archive_server::config::Settings;
use contract_archive_server::database::{DbPool, Repository};
use contract_archive_server::handlers;
use contract_archive_server::lexical::LexicalIndex;
use contract_archive_server::pdf::PdfRasterizer;
use contract_archive_server::services::adapters::{
    ChatLlmAdapter, EmbeddingAdapter, RerankerAdapter, VisionOcrAdapter,
};
use contract_archive_server::services::{PipelineOrchestrator, RagService};
use contract_archive_server::state::AppState;
use contract_archive_server::utils::error::set_debug_mode;
use contract_archive_server::utils::keywords::DefaultKeywordExtractor;
use contract_archive_server::utils::limiters::Limiters;
use contract_archive_server::vector::VectorIndex;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,contract_archive_server=debug".to_string()),
        )
        .json()
        .with_target(true)
        .with_current_span(true)
        .init();

    let settings = Settings::load().context("failed to load configuration")?;
    set_debug_mode(settings.server.debug);
    info!(host = %settings.server.host, port = settings.server.port, "configuration loaded");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("failed to connect to the database")?;
    sqlx::migrate!("./migrations")
        .run(db_pool.get_pool())
        .await
        .context("failed to run database migrations")?;
    info!("database ready");

    std::fs::create_dir_all(&settings.upload.upload_dir)?;
    std::fs::create_dir_all(Path::new(&settings.upload.upload_dir).join("tmp"))?;

    let repository = Arc::new(Repository::new(db_pool.clone()));
    let rasterizer = Arc::new(PdfRasterizer::new().context("failed to bind pdfium")?);

    let vision_ocr: Arc<dyn contract_archive_server::services::adapters::VisionOcr> =
        Arc::new(VisionOcrAdapter::new(settings.ocr.clone()));
    let embedder: Arc<dyn contract_archive_server::services::adapters::Embedder> =
        Arc::new(EmbeddingAdapter::new(settings.embedding.clone()));
    let reranker: Arc<dyn contract_archive_server::services::adapters::Reranker> =
        Arc::new(RerankerAdapter::new(settings.reranker.clone()));
    let chat_llm: Arc<dyn contract_archive_server::services::adapters::ChatLlm> =
        Arc::new(ChatLlmAdapter::new(settings.llm.clone()));

    let lexical = Arc::new(LexicalIndex::new(&settings.elasticsearch));
    if let Err(e) = lexical.ensure_indices().await {
        warn!(error = %e, "failed to ensure lexical indices at startup, continuing without them");
    }

    let vector_index = Arc::new(
        VectorIndex::load(Path::new(&settings.vector.index_dir), settings.vector.dimension)
            .context("failed to load vector index")?,
    );

    let keyword_extractor: Arc<dyn contract_archive_server::utils::keywords::KeywordExtractor> =
        Arc::new(DefaultKeywordExtractor);

    let limiters = Arc::new(Limiters::new(&settings.pipeline));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        repository.clone(),
        settings.clone(),
        rasterizer.clone(),
        vision_ocr.clone(),
        embedder.clone(),
        lexical.clone(),
        vector_index.clone(),
        keyword_extractor.clone(),
        limiters.clone(),
    ));
    orchestrator
        .recover_stale_on_startup()
        .await
        .context("failed to recover stale pipeline state")?;

    let rag_service = Arc::new(RagService::new(
        repository.clone(),
        embedder.clone(),
        lexical.clone(),
        vector_index.clone(),
        reranker.clone(),
        chat_llm.clone(),
        settings.clone(),
    ));

    let state = AppState {
        settings: settings.clone(),
        db_pool,
        repository,
        rasterizer,
        vision_ocr,
        embedder,
        reranker,
        chat_llm,
        lexical,
        vector_index,
        keyword_extractor,
        limiters,
        orchestrator,
        rag_service,
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("invalid server.host/server.port")?;

    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = if state
        .settings
        .server
        .cors_allowed_origins
        .iter()
        .any(|o| o == "*")
    {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .settings
            .server
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .nest("/api/v1", handlers::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().include_headers(false)))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
