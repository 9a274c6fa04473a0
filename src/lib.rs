pub mod models;
pub mod services;

pub use models::{Message, Role};
pub use services::chat_service::{ChatEvent, ChatSession};
pub use services::llm_client::{ByteStream, ChatTransport, LlmClient, TransportError};
pub use services::sse::{SseDecoder, StreamFrame};
pub use services::transcript_store::{FileTranscriptStore, StoreError, TranscriptStore};
