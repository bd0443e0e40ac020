pub mod adapters;
pub mod orchestrator;
pub mod rag_service;

pub use orchestrator::PipelineOrchestrator;
pub use rag_service::RagService;
