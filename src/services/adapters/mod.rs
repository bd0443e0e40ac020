pub mod chat_llm;
pub mod embedding;
pub mod reranker;
pub mod vision_ocr;

pub use chat_llm::{ChatLlm, ChatLlmAdapter, ChatLlmResult};
pub use embedding::{Embedder, EmbeddingAdapter};
pub use reranker::{RankedDoc, Reranker, RerankerAdapter};
pub use vision_ocr::{VisionOcr, VisionOcrAdapter};
