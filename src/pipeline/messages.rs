//! Structured and binary events emitted to the embedding application's
//! transport sinks.

use crate::tracer::Metrics;
use serde::{Deserialize, Serialize};

/// Structured, JSON-tagged events a session emits over `send_structured`.
///
/// Serialized with `#[serde(tag = "type")]`, matching the wire shape the
/// embedding application's WebSocket layer (out of scope here) forwards to
/// clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredEvent {
    /// A partial (possibly non-final) transcription update.
    SttPartial { text: String, is_final: bool },
    /// The endpoint-decoded final transcription for the turn.
    SttFinal { text: String, is_final: bool },
    /// A chunk of assistant text produced by the LLM.
    AssistantText { text: String },
    /// End-of-turn latency metrics.
    Metrics {
        #[serde(flatten)]
        metrics: Metrics,
    },
}

/// Sink for [`StructuredEvent`]s (`send_structured`). Send failures are
/// treated as fatal to the session.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: StructuredEvent) -> crate::error::Result<()>;
}

/// Sink for opaque synthesized-audio frames (`send_binary`), emitted in
/// arrival order. Send failures are treated as fatal to the session.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    async fn send(&self, frame: Vec<u8>) -> crate::error::Result<()>;
}
