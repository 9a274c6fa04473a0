use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::models::{Message, Role};
use crate::services::llm_client::{ChatTransport, TransportError};
use crate::services::sse::{SseDecoder, StreamFrame};
use crate::services::transcript_store::TranscriptStore;

/// Shown when a freshly loaded conversation is empty. In-memory only; it is
/// never written to the transcript store.
pub const WELCOME_MESSAGE: &str = "Hello! I'm the Grantline assistant. Ask me anything about our grant programs, funding rounds, or your application.";

const RATE_LIMIT_MESSAGE: &str =
    "The assistant is receiving too many requests right now. Please wait a moment and try again.";
const PAYMENT_REQUIRED_MESSAGE: &str =
    "The assistant is unavailable because the account is out of credits.";
const GENERIC_FAILURE_MESSAGE: &str =
    "Something went wrong while contacting the assistant. Please try again.";

/// Updates delivered to the UI while a turn is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// One streamed fragment, already folded into the open assistant message.
    Delta(String),
    /// The turn finished; carries the final assistant content.
    Completed(String),
    /// The turn failed before any assistant text arrived; carries the
    /// user-facing message. The optimistic user message has been rolled back.
    Failed(String),
}

/// One user's conversation with the assistant. Owns the ordered message
/// history and drives at most one request/response turn at a time.
pub struct ChatSession {
    user_id: String,
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn TranscriptStore>,
    messages: Arc<Mutex<Vec<Message>>>,
    in_flight: Arc<AtomicBool>,
}

impl ChatSession {
    /// Start a session from an already-loaded history.
    pub fn new(
        user_id: impl Into<String>,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn TranscriptStore>,
        history: Vec<Message>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            transport,
            store,
            messages: Arc::new(Mutex::new(history)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load the user's transcript and start a session. A brand-new
    /// conversation is seeded with a welcome message that is never persisted.
    /// A load failure is logged and treated as an empty history.
    pub async fn open(
        user_id: impl Into<String>,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn TranscriptStore>,
    ) -> Self {
        let user_id = user_id.into();
        let history = match store.load_history(&user_id).await {
            Ok(history) => history,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load transcript, starting empty");
                Vec::new()
            }
        };

        let session = Self::new(user_id, transport, store, history);
        {
            let mut messages = session.messages.lock().unwrap();
            if messages.is_empty() {
                messages.push(Message::assistant(WELCOME_MESSAGE));
            }
        }
        session
    }

    /// Snapshot of the conversation in insertion order.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    /// True while a turn is in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Submit one user message and start a turn. Returns the event stream for
    /// progressive rendering, or `None` when the trimmed text is empty or a
    /// turn is already in flight (a silent no-op, not queued).
    pub fn send(&self, text: &str) -> Option<mpsc::Receiver<ChatEvent>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        // Optimistic append; rolled back if the turn fails before any
        // assistant text arrives.
        self.messages.lock().unwrap().push(Message::user(text));

        let (tx, rx) = mpsc::channel(64);
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let messages = Arc::clone(&self.messages);
        let in_flight = Arc::clone(&self.in_flight);
        let user_id = self.user_id.clone();
        let user_text = text.to_string();

        tokio::spawn(async move {
            run_turn(transport, store, &user_id, &messages, &user_text, &tx).await;
            in_flight.store(false, Ordering::SeqCst);
        });

        Some(rx)
    }
}

/// Drive one turn to completion: open the stream, fold deltas into the open
/// assistant message in delivery order, then finalize and persist.
async fn run_turn(
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn TranscriptStore>,
    user_id: &str,
    messages: &Mutex<Vec<Message>>,
    user_text: &str,
    tx: &mpsc::Sender<ChatEvent>,
) {
    let history = messages.lock().unwrap().clone();

    let mut stream = match transport.open_stream(&history).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "chat request rejected");
            rollback_user_message(messages);
            let _ = tx.send(ChatEvent::Failed(user_facing_message(&err))).await;
            return;
        }
    };

    let mut decoder = SseDecoder::new();
    let mut assistant_open = false;

    'read: while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for frame in decoder.feed(&bytes) {
                    match frame {
                        StreamFrame::Delta(fragment) => {
                            apply_fragment(messages, &mut assistant_open, &fragment);
                            let _ = tx.send(ChatEvent::Delta(fragment)).await;
                        }
                        StreamFrame::Done => break 'read,
                    }
                }
            }
            Err(err) => {
                if assistant_open {
                    // Partial output beats no output; keep what arrived.
                    tracing::warn!(error = %err, "stream interrupted, keeping partial response");
                    break 'read;
                }
                tracing::warn!(error = %err, "stream failed before any content");
                rollback_user_message(messages);
                let _ = tx.send(ChatEvent::Failed(user_facing_message(&err))).await;
                return;
            }
        }
    }

    if !decoder.is_done() {
        for frame in decoder.finish() {
            if let StreamFrame::Delta(fragment) = frame {
                apply_fragment(messages, &mut assistant_open, &fragment);
                let _ = tx.send(ChatEvent::Delta(fragment)).await;
            }
        }
    }

    if !assistant_open {
        // The stream ended without producing a single fragment.
        rollback_user_message(messages);
        let _ = tx
            .send(ChatEvent::Failed(GENERIC_FAILURE_MESSAGE.to_string()))
            .await;
        return;
    }

    let final_content = messages
        .lock()
        .unwrap()
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default();

    // Best-effort persistence: failures are logged, never surfaced, and never
    // roll back the in-memory conversation.
    if let Err(err) = store.append_message(user_id, Role::User, user_text).await {
        tracing::warn!(error = %err, "failed to persist user message");
    }
    if let Err(err) = store
        .append_message(user_id, Role::Assistant, &final_content)
        .await
    {
        tracing::warn!(error = %err, "failed to persist assistant message");
    }

    let _ = tx.send(ChatEvent::Completed(final_content)).await;
}

fn apply_fragment(messages: &Mutex<Vec<Message>>, assistant_open: &mut bool, fragment: &str) {
    let mut messages = messages.lock().unwrap();
    if !*assistant_open {
        messages.push(Message::assistant(""));
        *assistant_open = true;
    }
    if let Some(last) = messages.last_mut() {
        last.content.push_str(fragment);
    }
}

fn rollback_user_message(messages: &Mutex<Vec<Message>>) {
    messages.lock().unwrap().pop();
}

fn user_facing_message(err: &TransportError) -> String {
    match err {
        TransportError::RateLimited => RATE_LIMIT_MESSAGE,
        TransportError::PaymentRequired => PAYMENT_REQUIRED_MESSAGE,
        TransportError::Request(_) | TransportError::Stream(_) => GENERIC_FAILURE_MESSAGE,
    }
    .to_string()
}
