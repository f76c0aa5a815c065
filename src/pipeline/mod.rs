//! The session orchestrator: state, structured events, and the
//! listen/LLM-runner/speak/barge-in activities that drive a single
//! conversational session.

pub mod coordinator;
pub mod messages;
pub mod session;

pub use coordinator::{handle_session, AudioSource};
pub use messages::{AudioSink, EventSink, StructuredEvent};
pub use session::{SessionShared, SessionState, SpeechItem, SpeechQueue};
