pub mod chat_service;
pub mod config_service;
pub mod llm_client;
pub mod sse;
pub mod transcript_store;
