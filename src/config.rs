//! Configuration types for the session orchestrator.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};

/// Construction-time configuration recognized by the core.
///
/// All other tuning (frame size, VAD thresholds, model identifiers) belongs
/// to the external STT/LLM/TTS/VAD collaborators, not the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sample rate (Hz) passed to `Stt::feed`.
    pub sample_rate: u32,
    /// Capacity of the bounded speech queue between the LLM runner and the speak loop.
    pub speech_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            speech_queue_capacity: 8,
        }
    }
}

impl SessionConfig {
    /// Parse a [`SessionConfig`] from TOML text, falling back to defaults for
    /// any field not present.
    ///
    /// # Errors
    ///
    /// Returns an error if `text` is not valid TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| OrchestratorError::Config(e.to_string()))
    }
}
