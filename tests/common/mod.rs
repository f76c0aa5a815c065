//! Scripted stand-ins for STT/LLM/TTS/VAD plus recording sinks, used to
//! drive the end-to-end scenarios in `tests/orchestrator.rs`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;
use turnkeep::pipeline::{AudioSink, AudioSource, EventSink, StructuredEvent};
use turnkeep::{BoxStream, Llm, Result, Stt, SttPartial, Tts, Vad};

/// STT implementation that yields a fixed sequence of partials and a fixed
/// final, draining the whole buffered sequence on the first
/// `drain_partials` call.
pub struct ScriptedStt {
    partials: VecDeque<SttPartial>,
    final_partial: SttPartial,
    pub feed_count: Arc<AtomicUsize>,
}

impl ScriptedStt {
    pub fn new(partials: Vec<SttPartial>, final_partial: SttPartial) -> Self {
        Self {
            partials: partials.into(),
            final_partial,
            feed_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Stt for ScriptedStt {
    async fn feed(&mut self, _pcm_bytes: &[u8], _sample_rate: u32) -> Result<()> {
        self.feed_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn drain_partials(&mut self) -> Vec<SttPartial> {
        self.partials.drain(..).collect()
    }

    async fn get_final(&mut self) -> Result<SttPartial> {
        Ok(self.final_partial.clone())
    }
}

struct ExitGuard(Arc<AtomicUsize>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// LLM implementation yielding a fixed sequence of chunks, optionally
/// delayed between chunks so a test can observe "generation has started"
/// before injecting further input. `enter_count`/`exit_count` let a test
/// assert the "at most one generation live" invariant directly; `prompts`
/// records every prompt actually submitted to `generate_stream`, so a test
/// can assert a coalesced-away intermediate prompt was never run.
pub struct ScriptedLlm {
    chunks: Vec<String>,
    delay: Duration,
    pub enter_count: Arc<AtomicUsize>,
    pub exit_count: Arc<AtomicUsize>,
    pub prompts: Arc<Mutex<Vec<String>>>,
    pub started: Arc<Notify>,
}

impl ScriptedLlm {
    pub fn new(chunks: Vec<&str>) -> Self {
        Self::with_delay(chunks, Duration::ZERO)
    }

    pub fn with_delay(chunks: Vec<&str>, delay: Duration) -> Self {
        Self {
            chunks: chunks.into_iter().map(String::from).collect(),
            delay,
            enter_count: Arc::new(AtomicUsize::new(0)),
            exit_count: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    async fn generate_stream(&self, prompt: &str) -> Result<BoxStream<String>> {
        self.enter_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().expect("prompts lock poisoned").push(prompt.to_string());
        let chunks = self.chunks.clone();
        let delay = self.delay;
        let guard = ExitGuard(self.exit_count.clone());
        let started = self.started.clone();
        let stream = async_stream::stream! {
            let _guard = guard;
            started.notify_waiters();
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield chunk;
            }
        };
        Ok(Box::pin(stream))
    }
}

/// TTS implementation yielding scripted audio payloads per input text,
/// falling back to a single default frame for unmapped text. `calls`
/// records the text passed to every `stream` invocation in order.
pub struct ScriptedTts {
    chunk_map: HashMap<String, Vec<Vec<u8>>>,
    pub stop_called: Arc<AtomicUsize>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub stream_started: Arc<Notify>,
}

impl ScriptedTts {
    pub fn new(chunk_map: HashMap<String, Vec<Vec<u8>>>) -> Self {
        Self {
            chunk_map,
            stop_called: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            stream_started: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Tts for ScriptedTts {
    async fn stream(&self, text: &str) -> Result<BoxStream<Vec<u8>>> {
        self.calls.lock().expect("calls lock poisoned").push(text.to_string());
        let chunks = self
            .chunk_map
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![b"audio".to_vec()]);
        let stream_started = self.stream_started.clone();
        let stream = async_stream::stream! {
            stream_started.notify_waiters();
            for chunk in chunks {
                yield chunk;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn stop(&self) -> Result<()> {
        self.stop_called.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// VAD implementation driven by a fixed voice/silence script, endpointing
/// once `chunks_seen` reaches `endpoint_after` (0 disables endpointing).
pub struct ScriptedVad {
    script: VecDeque<bool>,
    endpoint_after: usize,
    chunks_seen: usize,
}

impl ScriptedVad {
    pub fn new(script: Vec<bool>, endpoint_after: usize) -> Self {
        Self {
            script: script.into(),
            endpoint_after,
            chunks_seen: 0,
        }
    }
}

impl Vad for ScriptedVad {
    fn is_voice(&mut self, _pcm_bytes: &[u8]) -> bool {
        self.chunks_seen += 1;
        self.script.pop_front().unwrap_or(false)
    }

    fn endpointed(&mut self) -> bool {
        self.endpoint_after != 0 && self.chunks_seen >= self.endpoint_after
    }

    fn reset(&mut self) {}
}

/// Build an [`AudioSource`] from a fixed list of frames.
pub fn audio_source_from(frames: Vec<Vec<u8>>) -> AudioSource {
    Box::pin(tokio_stream::iter(frames))
}

/// Build an [`AudioSource`] a test can feed frames into on demand, closing
/// the source by dropping the sender.
pub fn channel_audio_source() -> (mpsc::UnboundedSender<Vec<u8>>, AudioSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Box::pin(UnboundedReceiverStream::new(rx)))
}

/// An [`EventSink`] that records every event it receives, for assertions.
#[derive(Default, Clone)]
pub struct RecordingEventSink {
    pub events: Arc<Mutex<Vec<StructuredEvent>>>,
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn send(&self, event: StructuredEvent) -> Result<()> {
        self.events.lock().expect("events lock poisoned").push(event);
        Ok(())
    }
}

/// An [`AudioSink`] that records every binary frame it receives.
#[derive(Default, Clone)]
pub struct RecordingAudioSink {
    pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl AudioSink for RecordingAudioSink {
    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.frames.lock().expect("frames lock poisoned").push(frame);
        Ok(())
    }
}
