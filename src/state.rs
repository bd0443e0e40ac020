use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Settings;
use crate::database::{DbPool, Repository};
use crate::lexical::LexicalIndex;
use crate::pdf::PdfRasterizer;
use crate::services::adapters::{ChatLlm, Embedder, Reranker, VisionOcr};
use crate::services::{PipelineOrchestrator, RagService};
use crate::utils::keywords::KeywordExtractor;
use crate::utils::limiters::Limiters;
use crate::vector::VectorIndex;

/// Shared, axum-extractable state injected into every handler (§5): the
/// database pool, the four remote-model adapters, the lexical and vector
/// indices, the C8 orchestrator, the C9 query pipeline, and settings.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub db_pool: DbPool,
    pub repository: Arc<Repository>,
    pub rasterizer: Arc<PdfRasterizer>,
    pub vision_ocr: Arc<dyn VisionOcr>,
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Arc<dyn Reranker>,
    pub chat_llm: Arc<dyn ChatLlm>,
    pub lexical: Arc<LexicalIndex>,
    pub vector_index: Arc<VectorIndex>,
    pub keyword_extractor: Arc<dyn KeywordExtractor>,
    pub limiters: Arc<Limiters>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub rag_service: Arc<RagService>,
}

impl FromRef<AppState> for Settings {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}
