//! Abstract contracts for the STT, LLM, TTS and VAD collaborators.
//!
//! The orchestrator only ever talks to these traits. Concrete recognition
//! and generation backends (Whisper-style STT, a transformer LLM, a
//! neural TTS, an energy or Silero VAD, ...) are out of scope for this
//! crate and are injected by the embedding application.

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

use crate::error::Result;

/// A boxed, owned stream of `T`, used for the chunked outputs of the LLM
/// and TTS contracts.
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Timing metadata for a single recognized token within an [`SttPartial`].
#[derive(Debug, Clone, PartialEq)]
pub struct TokenTiming {
    /// The recognized token text.
    pub token: String,
    /// Start time of the token, in seconds from segment start.
    pub start_time_sec: f64,
    /// End time of the token, in seconds from segment start.
    pub end_time_sec: f64,
}

/// A streaming transcription update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SttPartial {
    /// The transcribed text so far.
    pub text: String,
    /// Ordered per-token timing, if the backend provides it.
    pub tokens: Vec<TokenTiming>,
    /// Whether this update is the endpoint-decoded final for the segment.
    pub is_final: bool,
    /// Whether the text appears to end a clause/sentence (heuristic).
    pub maybe_sentence_boundary: bool,
}

impl SttPartial {
    /// Build a final partial carrying only `text`, matching the "malformed
    /// STT partial" tolerance in the error-handling policy: a missing text
    /// field becomes an empty string rather than a raised error.
    pub fn final_with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens: Vec::new(),
            is_final: true,
            maybe_sentence_boundary: true,
        }
    }
}

/// Streaming speech-to-text contract.
///
/// Implementations may be stateful across `feed` calls. Only the listen
/// loop ever holds a reference to an `Stt`, so its methods take `&mut self`.
#[async_trait]
pub trait Stt: Send {
    /// Non-blocking ingest of a raw PCM audio frame.
    async fn feed(&mut self, pcm_bytes: &[u8], sample_rate: u32) -> Result<()>;

    /// Drain whatever partials are currently buffered. Each call returns
    /// only what has accumulated since the previous call ("each call
    /// yields currently-buffered partials, then ends; restartable").
    fn drain_partials(&mut self) -> Vec<SttPartial>;

    /// Block until the endpoint-decoded final transcription is available.
    async fn get_final(&mut self) -> Result<SttPartial>;
}

/// Streaming large language model contract.
///
/// Shared (`Arc<dyn Llm>`) across the listen loop (which spawns generations)
/// and the LLM runner task, so methods take `&self`.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Begin a streamed generation for `prompt`. The returned stream is
    /// finite and chunked; dropping it before exhaustion cancels generation.
    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<String>>;
}

/// Streaming text-to-speech contract.
///
/// Shared (`Arc<dyn Tts>`) across the speak loop and the barge-in
/// controller, so methods take `&self`.
#[async_trait]
pub trait Tts: Send + Sync {
    /// Begin streaming synthesized PCM audio for `text`.
    async fn stream(&self, text: &str) -> Result<BoxStream<Vec<u8>>>;

    /// Idempotent, fast stop of any in-flight synthesis.
    async fn stop(&self) -> Result<()>;
}

/// Voice activity detector contract.
///
/// Only the listen loop ever holds a reference to a `Vad`, so its methods
/// take `&mut self`.
pub trait Vad: Send {
    /// Returns `true` if `pcm_bytes` contains speech.
    fn is_voice(&mut self, pcm_bytes: &[u8]) -> bool;

    /// Consume-on-read: returns `true` once per detected endpoint, then
    /// resets that flag until the next endpoint.
    fn endpointed(&mut self) -> bool;

    /// Clear endpoint state for a new turn.
    fn reset(&mut self);
}
