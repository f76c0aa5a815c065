//! Turnkeep: a realtime full-duplex voice-conversation session orchestrator.
//!
//! This crate provides the state machine and concurrency fabric that
//! coordinate one conversational session:
//! `inbound audio → VAD & STT → LLM → speech queue → TTS → outbound audio`
//!
//! # Architecture
//!
//! - **Contracts**: abstract STT/LLM/TTS/VAD traits the orchestrator
//!   consumes; concrete recognition and generation backends are injected
//!   by the embedding application and are out of scope for this crate.
//! - **Tracer**: per-session latency instrumentation.
//! - **Pipeline**: the listen loop, LLM runner, speak loop and barge-in
//!   controller that drive one session, tied together by
//!   [`pipeline::handle_session`].

pub mod config;
pub mod contracts;
pub mod error;
pub mod pipeline;
pub mod tracer;

pub use config::SessionConfig;
pub use contracts::{BoxStream, Llm, SttPartial, Stt, Tts, Vad};
pub use error::{OrchestratorError, Result};
pub use pipeline::{handle_session, AudioSink, EventSink, SessionState, StructuredEvent};
pub use tracer::{Metrics, Tracer};
