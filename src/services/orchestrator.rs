use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::chunker::{Chunker, ChunkerConfig};
use crate::config::Settings;
use crate::database::models::{STATUS_COMPLETED, STATUS_FAILED, STATUS_PENDING, STATUS_PROCESSING};
use crate::database::Repository;
use crate::document::DocumentParser;
use crate::lexical::{ContentDocument, ContractDocument, LexicalIndex};
use crate::ocr::{clean_page_content, html_to_text, merge_pages, PageResult};
use crate::pdf::PdfRasterizer;
use crate::services::adapters::{Embedder, VisionOcr};
use crate::utils::error::ApiError;
use crate::utils::keywords::KeywordExtractor;
use crate::utils::limiters::Limiters;
use crate::vector::{VectorIndex, VectorRef};

/// Per-contract state machine driving OCR → chunking → lexical sync →
/// vector sync (§4.8 C8). Dispatched as a `tokio::spawn` task per
/// contract upload; every stage persists its `*_RUNNING`-equivalent
/// status *before* the heavy work starts, so status queries stay
/// accurate even mid-stage (§4.8 "Entry to any `*_RUNNING` persists...").
pub struct PipelineOrchestrator {
    repository: Arc<Repository>,
    settings: Settings,
    rasterizer: Arc<PdfRasterizer>,
    vision_ocr: Arc<dyn VisionOcr>,
    embedder: Arc<dyn Embedder>,
    lexical: Arc<LexicalIndex>,
    vector_index: Arc<VectorIndex>,
    keyword_extractor: Arc<dyn KeywordExtractor>,
    limiters: Arc<Limiters>,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<Repository>,
        settings: Settings,
        rasterizer: Arc<PdfRasterizer>,
        vision_ocr: Arc<dyn VisionOcr>,
        embedder: Arc<dyn Embedder>,
        lexical: Arc<LexicalIndex>,
        vector_index: Arc<VectorIndex>,
        keyword_extractor: Arc<dyn KeywordExtractor>,
        limiters: Arc<Limiters>,
    ) -> Self {
        Self {
            repository,
            settings,
            rasterizer,
            vision_ocr,
            embedder,
            lexical,
            vector_index,
            keyword_extractor,
            limiters,
        }
    }

    /// On startup: marks any contract left in a `*_RUNNING`-equivalent
    /// status as `failed` (§9 "Asynchrony & background jobs" — restart-
    /// then-retry is the supported recovery path, not mid-stage resume).
    pub async fn recover_stale_on_startup(&self) -> anyhow::Result<()> {
        let failed = self.repository.fail_stale_processing_contracts().await?;
        if failed > 0 {
            warn!(count = failed, "marked stale processing contracts as failed on startup");
        }
        Ok(())
    }

    /// Drives the full state machine for one contract. `force` resets
    /// chunk rows/statuses and issues `VectorIndex::remove_by_contract`
    /// before re-running (§4.8 `Reprocess(force=true)`). Without `force`,
    /// a contract already at `completed` for a stage is left untouched —
    /// replaying the pipeline on an already-completed contract performs
    /// no writes (§8 "Pipeline idempotence").
    pub async fn process_contract(&self, contract_id: i64, force: bool) -> Result<(), ApiError> {
        let _document_permit = self
            .limiters
            .documents
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ApiError::Internal("document semaphore closed".to_string()))?;

        if force {
            self.reset_for_reprocess(contract_id).await?;
        }

        self.run_ocr_stage(contract_id).await?;
        self.run_chunk_stage(contract_id).await?;
        self.run_ft_sync_stage(contract_id).await?;
        self.run_vector_stage(contract_id).await?;

        Ok(())
    }

    /// Runs only the OCR stage (§6 `POST .../process-ocr`). Thin wrapper
    /// around the same stage the full pipeline drives, so status
    /// semantics (idempotent-if-completed, `*_RUNNING` persisted first)
    /// stay identical whether triggered standalone or as part of
    /// `process_contract`.
    pub async fn run_ocr_only(&self, contract_id: i64) -> Result<(), ApiError> {
        self.run_ocr_stage(contract_id).await
    }

    /// Runs only the chunking stage (§6 `POST .../process-content`).
    pub async fn run_content_only(&self, contract_id: i64) -> Result<(), ApiError> {
        self.run_chunk_stage(contract_id).await
    }

    /// Runs only the lexical-sync stage (§6 `/elasticsearch/{id}/sync`).
    pub async fn run_ft_sync_only(&self, contract_id: i64) -> Result<(), ApiError> {
        self.run_ft_sync_stage(contract_id).await
    }

    async fn reset_for_reprocess(&self, contract_id: i64) -> Result<(), ApiError> {
        self.vector_index.remove_by_contract(contract_id).map_err(|e| {
            ApiError::Internal(format!("failed to clear vector mapping: {e}"))
        })?;
        self.repository.reset_chunk_vector_status(contract_id).await?;
        self.repository
            .update_ocr_status(contract_id, STATUS_PENDING, None, None)
            .await?;
        self.repository
            .update_content_status(contract_id, STATUS_PENDING)
            .await?;
        self.repository
            .update_vector_status(contract_id, STATUS_PENDING)
            .await?;
        self.repository
            .update_es_sync_status(contract_id, STATUS_PENDING)
            .await?;
        Ok(())
    }

    /// OCR stage: PDF → page images → concurrent vision-model calls
    /// (bounded by the per-document `ocr_pages` semaphore, default W=5)
    /// → per-page sanitization → multi-page merge/dedup (§4.2–§4.4).
    /// Idempotent: a contract already at `ocr_status=completed` is
    /// skipped.
    async fn run_ocr_stage(&self, contract_id: i64) -> Result<(), ApiError> {
        let contract = self
            .repository
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("contract {contract_id} not found")))?;

        if contract.ocr_status == STATUS_COMPLETED {
            return Ok(());
        }

        self.repository
            .update_ocr_status(contract_id, STATUS_PROCESSING, None, None)
            .await?;

        let result = self.do_ocr(&contract.stored_path, &contract.file_format).await;

        match result {
            Ok((html, text)) => {
                let processed_dir = Path::new(&self.settings.upload.upload_dir).join("processed");
                if let Err(e) = std::fs::create_dir_all(&processed_dir) {
                    self.repository
                        .update_ocr_status(contract_id, STATUS_FAILED, None, None)
                        .await?;
                    return Err(ApiError::Io(e.to_string()));
                }

                let stem = Path::new(&contract.original_filename)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("document")
                    .to_string();

                let html_path = processed_dir.join(format!("{stem}_content.html"));
                let text_path = processed_dir.join(format!("{stem}_content.txt"));

                std::fs::write(&html_path, &html)?;
                std::fs::write(&text_path, &text)?;

                self.repository
                    .update_ocr_status(
                        contract_id,
                        STATUS_COMPLETED,
                        Some(&html_path.to_string_lossy()),
                        Some(&text_path.to_string_lossy()),
                    )
                    .await?;

                info!(contract_id, "ocr stage completed");
                Ok(())
            }
            Err(e) => {
                error!(contract_id, error = %e, "ocr stage failed");
                self.repository
                    .update_ocr_status(contract_id, STATUS_FAILED, None, None)
                    .await?;
                Err(e)
            }
        }
    }

    async fn do_ocr(&self, stored_path: &str, file_format: &str) -> Result<(String, String), ApiError> {
        let path = Path::new(stored_path);
        let format = file_format.to_lowercase();

        if format == "pdf" {
            let temp_root = Path::new(&self.settings.upload.upload_dir).join("temp_ocr");
            std::fs::create_dir_all(&temp_root)?;

            let image_paths = self
                .rasterizer
                .rasterize(path, &temp_root)
                .map_err(|e| ApiError::Internal(format!("PDF rasterization failed: {e}")))?;

            let total_pages = image_paths.len();
            let page_futures = image_paths.iter().enumerate().map(|(idx, image_path)| {
                let page_num = idx + 1;
                let semaphore = self.limiters.ocr_pages.clone();
                let vision_ocr = self.vision_ocr.clone();
                let image_path = image_path.clone();
                let phrases = self.settings.sanitizer.thought_preamble_phrases.clone();

                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let bytes = match tokio::fs::read(&image_path).await {
                        Ok(b) => b,
                        Err(e) => {
                            return PageResult {
                                page_num,
                                html: String::new(),
                                success: false,
                            }
                            .with_error(e.to_string());
                        }
                    };

                    match vision_ocr.recognize(&bytes, page_num, total_pages).await {
                        Ok(raw_html) => {
                            let cleaned = clean_page_content(&raw_html, &phrases);
                            PageResult {
                                page_num,
                                success: !cleaned.is_empty() || raw_html.is_empty(),
                                html: cleaned,
                            }
                        }
                        Err(e) => PageResult {
                            page_num,
                            html: String::new(),
                            success: false,
                        }
                        .with_error(e.to_string()),
                    }
                }
            });

            let page_results: Vec<PageResult> = join_all(page_futures).await;
            self.rasterizer.cleanup(&image_paths);

            let merged_html = merge_pages(&page_results);
            let merged_text = html_to_text(&merged_html);
            Ok((merged_html, merged_text))
        } else if matches!(format.as_str(), "jpg" | "jpeg" | "png") {
            let bytes = tokio::fs::read(path).await?;
            let raw_html = self.vision_ocr.recognize(&bytes, 1, 1).await?;
            let phrases = &self.settings.sanitizer.thought_preamble_phrases;
            let cleaned = clean_page_content(&raw_html, phrases);
            let text = html_to_text(&cleaned);
            Ok((cleaned, text))
        } else {
            let parsed = DocumentParser::parse(path)
                .map_err(|e| ApiError::Internal(format!("document parse failed: {e}")))?;
            let html = format!("<p>{}</p>", escape_html(&parsed.content));
            Ok((html, parsed.content))
        }
    }

    /// Chunking stage: recursive split of the merged text into
    /// retrieval-sized chunks, replacing any prior chunk rows in one
    /// transaction (§4.5, §5 "Ordering guarantees").
    async fn run_chunk_stage(&self, contract_id: i64) -> Result<(), ApiError> {
        let contract = self
            .repository
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("contract {contract_id} not found")))?;

        if contract.content_status == STATUS_COMPLETED {
            return Ok(());
        }
        if contract.ocr_status != STATUS_COMPLETED {
            return Err(ApiError::Conflict(
                "cannot chunk a contract whose OCR stage is not completed".to_string(),
            ));
        }

        self.repository
            .update_content_status(contract_id, STATUS_PROCESSING)
            .await?;

        let text_path = contract
            .text_content_path
            .clone()
            .ok_or_else(|| ApiError::Internal("missing text_content_path".to_string()))?;

        let result = self.do_chunk(&text_path);

        match result {
            Ok(chunk_rows) => {
                self.repository.replace_chunks(contract_id, &chunk_rows).await?;
                self.repository
                    .update_content_status(contract_id, STATUS_COMPLETED)
                    .await?;
                info!(contract_id, chunk_count = chunk_rows.len(), "chunk stage completed");
                Ok(())
            }
            Err(e) => {
                error!(contract_id, error = %e, "chunk stage failed");
                self.repository
                    .update_content_status(contract_id, STATUS_FAILED)
                    .await?;
                Err(e)
            }
        }
    }

    fn do_chunk(&self, text_path: &str) -> Result<Vec<(i32, String, String, i32)>, ApiError> {
        let text = std::fs::read_to_string(text_path)?;

        let cfg = ChunkerConfig {
            chunk_size: self.settings.chunking.chunk_size,
            chunk_overlap: self.settings.chunking.chunk_overlap,
            separators: self.settings.chunking.separators.clone(),
        };
        let chunker = Chunker::new(&cfg, self.keyword_extractor.as_ref());
        let outputs = chunker.chunk(&text);

        Ok(outputs
            .into_iter()
            .map(|c| {
                let chunk_type = if c.content.contains("【表格内容】") {
                    "table"
                } else {
                    "paragraph"
                };
                (
                    c.chunk_index as i32,
                    c.content.clone(),
                    chunk_type.to_string(),
                    c.chunk_length as i32,
                )
            })
            .collect())
    }

    /// Full-text sync stage: bulk upsert the contract document and every
    /// chunk document into the lexical index (§4.6).
    async fn run_ft_sync_stage(&self, contract_id: i64) -> Result<(), ApiError> {
        let contract = self
            .repository
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("contract {contract_id} not found")))?;

        if contract.elasticsearch_sync_status == STATUS_COMPLETED {
            return Ok(());
        }
        if contract.content_status != STATUS_COMPLETED {
            return Err(ApiError::Conflict(
                "cannot sync a contract whose chunk stage is not completed".to_string(),
            ));
        }

        self.repository
            .update_es_sync_status(contract_id, STATUS_PROCESSING)
            .await?;

        let chunks = self.repository.get_chunks_by_contract(contract_id).await?;

        let summary: String = chunks
            .iter()
            .take(3)
            .map(|c| c.content_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let keywords = self
            .keyword_extractor
            .extract(&format!("{} {summary}", contract.contract_name), 10);

        let contract_doc = ContractDocument {
            contract_id: contract.id,
            contract_number: contract.contract_number.clone(),
            contract_name: contract.contract_name.clone(),
            contract_type: contract.contract_type.clone(),
            keywords,
            summary,
            file_name: contract.original_filename.clone(),
            upload_time: contract.upload_time,
            created_at: contract.created_at,
        };

        let sync_result: Result<(), ApiError> = async {
            self.lexical.index_contract(&contract_doc).await?;
            for chunk in &chunks {
                let doc = ContentDocument {
                    chunk_id: chunk.id,
                    contract_id: contract.id,
                    contract_number: contract.contract_number.clone(),
                    contract_name: contract.contract_name.clone(),
                    file_name: contract.original_filename.clone(),
                    file_format: contract.file_format.clone(),
                    upload_time: contract.upload_time,
                    contract_type: contract.contract_type.clone(),
                    chunk_index: chunk.chunk_index,
                    content_text: chunk.content_text.clone(),
                    chunk_type: chunk.chunk_type.clone(),
                    chunk_size: chunk.chunk_size,
                    created_at: chunk.created_at,
                };
                self.lexical.index_chunk(&doc).await?;
            }
            Ok(())
        }
        .await;

        match sync_result {
            Ok(()) => {
                self.repository
                    .update_es_sync_status(contract_id, STATUS_COMPLETED)
                    .await?;
                info!(contract_id, "ft-sync stage completed");
                Ok(())
            }
            Err(e) => {
                error!(contract_id, error = %e, "ft-sync stage failed");
                self.repository
                    .update_es_sync_status(contract_id, STATUS_FAILED)
                    .await?;
                Err(e)
            }
        }
    }

    /// Vector stage: embed every chunk, L2-normalize, append to the flat
    /// index, and persist `vector_id` back onto each chunk (§4.7).
    async fn run_vector_stage(&self, contract_id: i64) -> Result<(), ApiError> {
        let contract = self
            .repository
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("contract {contract_id} not found")))?;

        if contract.vector_status == STATUS_COMPLETED {
            return Ok(());
        }
        if contract.content_status != STATUS_COMPLETED {
            return Err(ApiError::Conflict(
                "cannot vectorize a contract whose chunk stage is not completed".to_string(),
            ));
        }

        self.repository
            .update_vector_status(contract_id, STATUS_PROCESSING)
            .await?;

        let chunks = self.repository.get_chunks_by_contract(contract_id).await?;
        let pending: Vec<_> = chunks
            .into_iter()
            .filter(|c| c.vector_id.is_none())
            .collect();

        if pending.is_empty() {
            self.repository
                .update_vector_status(contract_id, STATUS_COMPLETED)
                .await?;
            return Ok(());
        }

        let texts: Vec<String> = pending.iter().map(|c| c.content_text.clone()).collect();

        let result: Result<(), ApiError> = async {
            let vectors = self.embedder.embed(&texts).await?;
            let refs: Vec<VectorRef> = pending
                .iter()
                .map(|c| VectorRef {
                    contract_id: contract.id,
                    chunk_id: c.id,
                    chunk_index: c.chunk_index,
                })
                .collect();

            let slot_ids = self
                .vector_index
                .add_vectors(vectors, refs)
                .map_err(|e| ApiError::Internal(format!("vector index add failed: {e}")))?;

            for (chunk, slot_id) in pending.iter().zip(slot_ids) {
                self.repository
                    .set_chunk_vector_id(chunk.id, &slot_id.to_string())
                    .await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.repository
                    .update_vector_status(contract_id, STATUS_COMPLETED)
                    .await?;
                info!(contract_id, "vector stage completed");
                Ok(())
            }
            Err(e) => {
                error!(contract_id, error = %e, "vector stage failed");
                self.repository
                    .update_vector_status(contract_id, STATUS_FAILED)
                    .await?;
                Err(e)
            }
        }
    }

    /// Cascading delete: removes DB rows (cascades to chunks), the
    /// lexical index entries, and the vector mapping entries for one
    /// contract (§6 `DELETE /contracts/{id}`).
    pub async fn delete_contract(&self, contract_id: i64) -> Result<bool, ApiError> {
        self.lexical.delete_contract(contract_id).await?;
        self.vector_index
            .remove_by_contract(contract_id)
            .map_err(|e| ApiError::Internal(format!("failed to clear vector mapping: {e}")))?;
        Ok(self.repository.delete_contract(contract_id).await?)
    }
}

trait WithError {
    fn with_error(self, message: String) -> Self;
}

impl WithError for PageResult {
    fn with_error(self, message: String) -> Self {
        warn!(page_num = self.page_num, error = %message, "ocr page failed");
        self
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
