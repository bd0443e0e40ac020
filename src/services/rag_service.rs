use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::database::models::QaSessionTurn;
use crate::database::Repository;
use crate::lexical::LexicalIndex;
use crate::services::adapters::{ChatLlm, ChatLlmParams, Embedder, Reranker};
use crate::utils::error::ApiError;
use crate::vector::VectorIndex;

const SYSTEM_PROMPT: &str =
    "你是一名专业的合同助理。只根据提供的内容回答问题，如果内容不足以回答，请明确说明。";
const FALLBACK_ANSWER: &str = "抱歉，暂时无法生成回答。";
const NO_CONTEXT_ANSWER: &str = "未在已有合同内容中找到相关信息。";

/// One chunk surviving the merge step of C9, carrying whichever signals
/// the retrieval paths that found it were able to attach (§4.9 step 4).
#[derive(Debug, Clone)]
struct MergedChunk {
    chunk_id: i64,
    contract_id: i64,
    contract_name: String,
    contract_number: String,
    chunk_index: i32,
    content_text: String,
    lexical_score: Option<f32>,
    vector_similarity: Option<f32>,
    rerank_score: Option<f32>,
    rerank_position: Option<usize>,
}

/// The hybrid query pipeline (§4.9 C9): parallel lexical + semantic
/// retrieve, deduplicating merge, cross-encoder rerank, context assembly,
/// LLM call, session persistence. Any stage may fail without aborting the
/// pipeline (§7) — the next stage simply operates on whatever is
/// available.
pub struct RagService {
    repository: Arc<Repository>,
    embedder: Arc<dyn Embedder>,
    lexical: Arc<LexicalIndex>,
    vector_index: Arc<VectorIndex>,
    reranker: Arc<dyn Reranker>,
    chat_llm: Arc<dyn ChatLlm>,
    settings: Settings,
}

impl RagService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<Repository>,
        embedder: Arc<dyn Embedder>,
        lexical: Arc<LexicalIndex>,
        vector_index: Arc<VectorIndex>,
        reranker: Arc<dyn Reranker>,
        chat_llm: Arc<dyn ChatLlm>,
        settings: Settings,
    ) -> Self {
        Self {
            repository,
            embedder,
            lexical,
            vector_index,
            reranker,
            chat_llm,
            settings,
        }
    }

    /// Runs the full 9-step pipeline and returns the persisted turn.
    pub async fn ask(
        &self,
        question: &str,
        session_id: Option<String>,
    ) -> Result<QaSessionTurn, ApiError> {
        let overall_start = Instant::now();

        // Step 1: session bookkeeping.
        let session_id = session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.repository.ensure_session(&session_id).await?;
        let message_order = self.repository.count_turns(&session_id).await? as i32 + 1;

        // Steps 2 & 3: lexical and semantic retrieve run in parallel.
        let lexical_limit = self.settings.pipeline.lexical_search_limit;
        let vector_top_k = self.settings.pipeline.vector_search_top_k;

        let lexical_start = Instant::now();
        let semantic_start = Instant::now();

        let (lexical_hits, semantic_result) = tokio::join!(
            self.lexical.search_contents(question, None, lexical_limit),
            self.semantic_retrieve(question, vector_top_k),
        );
        let lexical_elapsed_ms = lexical_start.elapsed().as_millis() as u64;

        let (semantic_chunks, semantic_elapsed_ms, semantic_error) = match semantic_result {
            Ok(chunks) => (chunks, semantic_start.elapsed().as_millis() as u64, None),
            Err(e) => {
                warn!(error = %e, "semantic retrieve failed, continuing with keyword results only");
                (Vec::new(), semantic_start.elapsed().as_millis() as u64, Some(e.to_string()))
            }
        };

        let lexical_count = lexical_hits.len();
        let semantic_count = semantic_chunks.len();

        // Step 4: merge, keyed by chunk id. Lexical entries populated first.
        let mut merged: HashMap<i64, MergedChunk> = HashMap::new();
        for hit in &lexical_hits {
            merged.insert(
                hit.chunk_id,
                MergedChunk {
                    chunk_id: hit.chunk_id,
                    contract_id: hit.contract_id,
                    contract_name: hit.contract_name.clone().unwrap_or_default(),
                    contract_number: hit.contract_number.clone().unwrap_or_default(),
                    chunk_index: hit.chunk_index,
                    content_text: hit.content_text.clone(),
                    lexical_score: Some(hit.score),
                    vector_similarity: None,
                    rerank_score: None,
                    rerank_position: None,
                },
            );
        }
        for sem in &semantic_chunks {
            merged
                .entry(sem.chunk_id)
                .and_modify(|existing| {
                    existing.vector_similarity = Some(sem.score);
                    if sem.content_text.len() > existing.content_text.len() {
                        existing.content_text = sem.content_text.clone();
                    }
                    if existing.contract_name.is_empty() {
                        existing.contract_name = sem.contract_name.clone();
                    }
                    if existing.contract_number.is_empty() {
                        existing.contract_number = sem.contract_number.clone();
                    }
                })
                .or_insert_with(|| MergedChunk {
                    chunk_id: sem.chunk_id,
                    contract_id: sem.contract_id,
                    contract_name: sem.contract_name.clone(),
                    contract_number: sem.contract_number.clone(),
                    chunk_index: sem.chunk_index,
                    content_text: sem.content_text.clone(),
                    lexical_score: None,
                    vector_similarity: Some(sem.score),
                    rerank_score: None,
                    rerank_position: None,
                });
        }

        let mut candidates: Vec<MergedChunk> = merged.into_values().collect();
        candidates.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));

        // Step 5: rerank.
        let rerank_start = Instant::now();
        let mut rerank_status = "skipped";
        if !candidates.is_empty() {
            let docs: Vec<String> = candidates.iter().map(|c| c.content_text.clone()).collect();
            let top_k = self.settings.pipeline.rerank_top_k.min(candidates.len());
            match self.reranker.rank(question, &docs, Some(top_k)).await {
                Ok(ranked) => {
                    let mut reordered = Vec::with_capacity(ranked.len());
                    for (position, r) in ranked.into_iter().enumerate() {
                        if let Some(mut chunk) = candidates.get(r.orig_index).cloned() {
                            chunk.rerank_score = Some(r.score);
                            chunk.rerank_position = Some(position);
                            reordered.push(chunk);
                        }
                    }
                    candidates = reordered;
                    rerank_status = "ok";
                }
                Err(e) => {
                    warn!(error = %e, "rerank failed, keeping merge order");
                    rerank_status = "failed";
                }
            }
        }
        let rerank_elapsed_ms = rerank_start.elapsed().as_millis() as u64;

        // Step 6: context assembly — top min(6, N), each truncated to 800 chars.
        let context_limit = self.settings.pipeline.context_chunk_limit.min(candidates.len());
        let char_limit = self.settings.pipeline.context_chunk_char_limit;
        let context_chunks: Vec<&MergedChunk> = candidates.iter().take(context_limit).collect();

        let context_text = if context_chunks.is_empty() {
            String::new()
        } else {
            context_chunks
                .iter()
                .map(|c| {
                    let truncated: String = c.content_text.chars().take(char_limit).collect();
                    format!(
                        "【合同：{} (编号 {})，段落 {}】\n{}",
                        c.contract_name, c.contract_number, c.chunk_index, truncated
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        // Step 7: LLM generation.
        let llm_start = Instant::now();
        let (answer, llm_status, input_tokens, output_tokens, finish_reason) =
            if context_chunks.is_empty() {
                (NO_CONTEXT_ANSWER.to_string(), "no_context", 0u32, 0u32, None)
            } else {
                let user_prompt = format!("已检索到以下合同内容：\n\n{context_text}\n\n问题：{question}");
                match self
                    .chat_llm
                    .complete(
                        SYSTEM_PROMPT,
                        &user_prompt,
                        ChatLlmParams {
                            max_tokens: self.settings.llm.max_tokens,
                            temperature: self.settings.llm.temperature,
                            top_p: self.settings.llm.top_p,
                        },
                    )
                    .await
                {
                    Ok(result) => (
                        result.text,
                        "ok",
                        result.input_tokens,
                        result.output_tokens,
                        result.finish_reason,
                    ),
                    Err(e) => {
                        warn!(error = %e, "chat-llm call failed, using fallback answer");
                        (FALLBACK_ANSWER.to_string(), "failed", 0, 0, None)
                    }
                }
            };
        let llm_elapsed_ms = llm_start.elapsed().as_millis() as u64;

        // Step 8: assemble turn record.
        let search_method = match (lexical_count > 0, semantic_count > 0) {
            (true, true) => Some("hybrid"),
            (true, false) => Some("keyword"),
            (false, true) => Some("semantic"),
            (false, false) => None,
        };

        let mut source_contracts: Vec<i64> = Vec::new();
        let mut source_chunks: Vec<i64> = Vec::new();
        for chunk in &context_chunks {
            if !source_contracts.contains(&chunk.contract_id) {
                source_contracts.push(chunk.contract_id);
            }
            source_chunks.push(chunk.chunk_id);
        }

        let pipeline_trace = json!({
            "lexical": { "count": lexical_count, "elapsed_ms": lexical_elapsed_ms },
            "semantic": {
                "count": semantic_count,
                "elapsed_ms": semantic_elapsed_ms,
                "error": semantic_error,
            },
            "merge": { "candidate_count": candidates.len() },
            "rerank": { "status": rerank_status, "elapsed_ms": rerank_elapsed_ms },
            "context": { "chunks_used": context_chunks.len() },
            "llm": {
                "status": llm_status,
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
                "finish_reason": finish_reason,
                "elapsed_ms": llm_elapsed_ms,
            },
            "response_time_ms": overall_start.elapsed().as_millis() as u64,
        });

        let response_time_ms = overall_start.elapsed().as_millis() as i64;

        let turn = self
            .repository
            .insert_turn(
                &session_id,
                message_order,
                question,
                &answer,
                serde_json::to_value(&source_contracts)?,
                serde_json::to_value(&source_chunks)?,
                pipeline_trace,
                search_method,
                response_time_ms,
            )
            .await?;

        self.repository
            .insert_search_log(
                Some(&session_id),
                question,
                search_method,
                candidates_len_i32(context_chunks.len()),
                response_time_ms,
            )
            .await
            .ok();

        // Step 9: backfill session_title on the first turn of a session.
        if message_order == 1 {
            let title: String = question.chars().take(50).collect();
            self.repository.set_session_title(&session_id, &title).await?;
        }

        info!(
            session_id = %session_id,
            message_order,
            search_method = ?search_method,
            response_time_ms,
            "qa turn completed"
        );

        Ok(turn)
    }

    async fn semantic_retrieve(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<SemanticChunk>, ApiError> {
        let embeddings = self.embedder.embed(&[question.to_string()]).await?;
        let query_vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("embedding returned no vector for query".to_string()))?;

        let hits = self
            .vector_index
            .search(&query_vector, top_k)
            .map_err(|e| ApiError::Internal(format!("vector search failed: {e}")))?;

        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids: Vec<i64> = hits.iter().map(|h| h.vector_ref.chunk_id).collect();
        let rows = self.repository.get_chunks_with_contract_by_ids(&chunk_ids).await?;
        let rows_by_id: HashMap<i64, _> = rows.into_iter().map(|(c, ct)| (c.id, (c, ct))).collect();

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some((chunk, contract)) = rows_by_id.get(&hit.vector_ref.chunk_id) {
                out.push(SemanticChunk {
                    chunk_id: chunk.id,
                    contract_id: contract.id,
                    contract_name: contract.contract_name.clone(),
                    contract_number: contract.contract_number.clone(),
                    chunk_index: chunk.chunk_index,
                    content_text: chunk.content_text.clone(),
                    score: hit.score,
                });
            }
        }
        Ok(out)
    }
}

fn candidates_len_i32(n: usize) -> i32 {
    n as i32
}

struct SemanticChunk {
    chunk_id: i64,
    contract_id: i64,
    contract_name: String,
    contract_number: String,
    chunk_index: i32,
    content_text: String,
    score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::*;

    fn test_settings() -> Settings {
        Settings {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                debug: false,
                log_level: "info".into(),
                cors_allowed_origins: vec![],
                secret_key: "test".into(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/test".into(),
                pool_max_size: 1,
                pool_timeout_seconds: 1,
            },
            upload: UploadConfig {
                upload_dir: "/tmp".into(),
                max_file_size_bytes: 1,
                supported_formats: vec![],
            },
            ocr: OcrConfig {
                base_url: "http://localhost".into(),
                api_key: "x".into(),
                model: "m".into(),
                max_output_tokens: 1,
                temperature: 0.0,
                timeout_seconds: 1,
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost".into(),
                api_key: "x".into(),
                model: "m".into(),
                dimension: 2,
                timeout_seconds: 1,
                batch_size: 1,
            },
            reranker: RerankerConfig {
                base_url: "http://localhost".into(),
                api_key: "x".into(),
                model: "m".into(),
                timeout_seconds: 1,
            },
            llm: LlmConfig {
                base_url: "http://localhost".into(),
                api_key: "x".into(),
                model: "m".into(),
                timeout_seconds: 1,
                max_tokens: 800,
                temperature: 0.7,
                top_p: 0.9,
            },
            elasticsearch: ElasticsearchConfig {
                enabled: false,
                host: "localhost".into(),
                port: 9200,
                scheme: "http".into(),
            },
            vector: VectorConfig {
                index_dir: "/tmp".into(),
                dimension: 2,
                top_k: 5,
            },
            chunking: ChunkingConfig {
                chunk_size: 1000,
                chunk_overlap: 200,
                separators: vec!["\n".into()],
            },
            pipeline: PipelineConfig {
                ocr_worker_pool_size: 1,
                max_concurrent_documents: 1,
                lexical_search_limit: 15,
                vector_search_top_k: 15,
                rerank_top_k: 10,
                context_chunk_limit: 6,
                context_chunk_char_limit: 800,
                adapter_acquire_timeout_seconds: 30,
            },
            sanitizer: SanitizerConfig {
                thought_preamble_phrases: vec![],
            },
        }
    }

    #[test]
    fn search_method_classification_matches_spec() {
        assert_eq!(
            match (true, true) {
                (true, true) => Some("hybrid"),
                (true, false) => Some("keyword"),
                (false, true) => Some("semantic"),
                (false, false) => None,
            },
            Some("hybrid")
        );
    }

    #[test]
    fn empty_vector_index_and_disabled_lexical_client_are_inert() {
        // The pipeline's stage helpers (semantic_retrieve, lexical search)
        // must tolerate an empty store without erroring, so that an empty
        // merge falls through to the no-context fallback answer rather
        // than panicking (§8 scenario 6).
        let settings = test_settings();
        let tmp = tempfile::tempdir().unwrap();
        let vector_index =
            VectorIndex::load(tmp.path(), settings.vector.dimension).unwrap();
        let lexical = LexicalIndex::new(&settings.elasticsearch);

        assert!(!lexical.is_enabled());
        assert_eq!(vector_index.len(), 0);
        assert!(vector_index.search(&[0.0, 0.0], 5).unwrap().is_empty());
    }
}
