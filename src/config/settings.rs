use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub ocr: OcrConfig,
    pub embedding: EmbeddingConfig,
    pub reranker: RerankerConfig,
    pub llm: LlmConfig,
    pub elasticsearch: ElasticsearchConfig,
    pub vector: VectorConfig,
    pub chunking: ChunkingConfig,
    pub pipeline: PipelineConfig,
    pub sanitizer: SanitizerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub log_level: String,
    pub cors_allowed_origins: Vec<String>,
    pub secret_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadConfig {
    pub upload_dir: String,
    pub max_file_size_bytes: u64,
    pub supported_formats: Vec<String>,
}

/// Vision-OCR model adapter configuration (C1 — VisionOCR.Recognize).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OcrConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_seconds: u64,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RerankerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ElasticsearchConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub scheme: String,
}

impl ElasticsearchConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// In-process flat index (C7). `index_dir` holds `contract_vectors.index`
/// and `vector_mapping.json` side by side.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorConfig {
    pub index_dir: String,
    pub dimension: usize,
    pub top_k: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    pub ocr_worker_pool_size: usize,
    pub max_concurrent_documents: usize,
    pub lexical_search_limit: usize,
    pub vector_search_top_k: usize,
    pub rerank_top_k: usize,
    pub context_chunk_limit: usize,
    pub context_chunk_char_limit: usize,
    pub adapter_acquire_timeout_seconds: u64,
}

/// Model-specific "thought preamble" phrase blocklist for the OCR cleaner
/// (§4.3 step 2). Kept in config because it is tied to the particular
/// vision model in use, not to the pipeline's logic.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SanitizerConfig {
    pub thought_preamble_phrases: Vec<String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    pub fn config_path(&self) -> PathBuf {
        PathBuf::from("config/settings.toml")
    }
}
