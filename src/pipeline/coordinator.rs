//! The listen loop, LLM runner, speak loop and barge-in controller that
//! together drive one session, plus the `handle_session` driver that wires
//! them up.

use std::sync::{Arc, Mutex as StdMutex};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::contracts::{BoxStream, Llm, Stt, Tts, Vad};
use crate::error::{OrchestratorError, Result};
use crate::pipeline::messages::{AudioSink, EventSink, StructuredEvent};
use crate::pipeline::session::{PromptDecision, SessionShared, SessionState, SpeechItem};
use crate::tracer::{Metrics, Tracer};

/// A lazy sequence of raw PCM audio frames, e.g. signed 16-bit
/// little-endian mono at the session's configured sample rate.
pub type AudioSource = BoxStream<Vec<u8>>;

type Tr = Arc<StdMutex<Tracer>>;
type FatalSlot = Arc<StdMutex<Option<OrchestratorError>>>;

fn report_fatal(fatal: &FatalSlot, cancel: &CancellationToken, err: OrchestratorError) {
    let mut slot = fatal.lock().expect("fatal slot lock poisoned");
    if slot.is_none() {
        *slot = Some(err);
    }
    cancel.cancel();
}

async fn send_structured(
    events: &Arc<dyn EventSink>,
    fatal: &FatalSlot,
    cancel: &CancellationToken,
    event: StructuredEvent,
) -> bool {
    match events.send(event).await {
        Ok(()) => true,
        Err(e) => {
            report_fatal(fatal, cancel, OrchestratorError::Transport(e.to_string()));
            false
        }
    }
}

async fn send_binary(
    audio_out: &Arc<dyn AudioSink>,
    fatal: &FatalSlot,
    cancel: &CancellationToken,
    frame: Vec<u8>,
) -> bool {
    match audio_out.send(frame).await {
        Ok(()) => true,
        Err(e) => {
            report_fatal(fatal, cancel, OrchestratorError::Transport(e.to_string()));
            false
        }
    }
}

/// Evaluate a candidate prompt against the gating policy and, if it should
/// start now, spawn the single LLM runner activity for it. The listen loop
/// is the sole owner of `in_flight`, which is how "at most one generation
/// active" stays trivially true.
#[allow(clippy::too_many_arguments)]
fn maybe_start_llm(
    text: &str,
    in_flight: &mut Option<JoinHandle<()>>,
    shared: &Arc<SessionShared>,
    llm: &Arc<dyn Llm>,
    events: &Arc<dyn EventSink>,
    tracer: &Tr,
    fatal: &FatalSlot,
    cancel: &CancellationToken,
) {
    match shared.evaluate_prompt(text) {
        PromptDecision::Start(prompt) => {
            let shared = shared.clone();
            let llm = llm.clone();
            let events = events.clone();
            let tracer = tracer.clone();
            let fatal = fatal.clone();
            let cancel = cancel.clone();
            *in_flight = Some(tokio::spawn(async move {
                run_llm_runner(prompt, shared, llm, events, tracer, fatal, cancel).await;
            }));
        }
        PromptDecision::Coalesced | PromptDecision::Suppressed => {}
    }
}

/// The LLM runner activity (§4.5). Loops internally over coalesced pending
/// prompts rather than recursing into a new task, so there is always
/// exactly one join handle for the session's in-flight generation.
async fn run_llm_runner(
    first_prompt: String,
    shared: Arc<SessionShared>,
    llm: Arc<dyn Llm>,
    events: Arc<dyn EventSink>,
    tracer: Tr,
    fatal: FatalSlot,
    cancel: CancellationToken,
) {
    let mut prompt = first_prompt;
    loop {
        shared.llm_started(&prompt);

        let mut stream = match llm.generate_stream(&prompt).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "LLM generation failed to start");
                match shared.llm_completed() {
                    Some(next) => {
                        prompt = next;
                        continue;
                    }
                    None => return,
                }
            }
        };

        let mut first_chunk = true;
        while let Some(chunk) = stream.next().await {
            if shared.stop_signal_set() {
                break;
            }
            if first_chunk {
                tracer.lock().expect("tracer lock poisoned").mark_once("llm_first_token");
                shared.set_state(SessionState::Speaking);
                first_chunk = false;
            }
            if !send_structured(
                &events,
                &fatal,
                &cancel,
                StructuredEvent::AssistantText { text: chunk.clone() },
            )
            .await
            {
                break;
            }
            shared.queue.enqueue(SpeechItem::Chunk(chunk)).await;
        }

        match shared.llm_completed() {
            Some(next) => prompt = next,
            None => return,
        }
    }
}

/// Barge-in controller (§4.7), invoked by the listen loop when it observes
/// a voice frame while the session is `Speaking`.
async fn run_barge_in(shared: &Arc<SessionShared>, tts: &Arc<dyn Tts>) {
    shared.set_state(SessionState::Interrupted);
    shared.set_stop_signal();
    if let Err(e) = tts.stop().await {
        warn!(error = %e, "TTS stop failed during barge-in");
    }
    shared.clear_for_barge_in();
    shared.queue.drain_unstarted();
}

/// The speak loop (§4.6): drains the speech queue for the session's
/// lifetime, streaming each chunk through TTS until a sentinel arrives.
async fn run_speak_loop(
    shared: Arc<SessionShared>,
    tts: Arc<dyn Tts>,
    audio_out: Arc<dyn AudioSink>,
    tracer: Tr,
    fatal: FatalSlot,
    cancel: CancellationToken,
) {
    loop {
        match shared.queue.recv().await {
            SpeechItem::Sentinel => {
                shared.queue.ack();
                break;
            }
            SpeechItem::Chunk(text) => {
                if !cancel.is_cancelled() {
                    match tts.stream(&text).await {
                        Ok(mut stream) => {
                            while let Some(chunk) = stream.next().await {
                                if shared.stop_signal_set() {
                                    break;
                                }
                                tracer.lock().expect("tracer lock poisoned").mark_once("tts_first_audio");
                                if !send_binary(&audio_out, &fatal, &cancel, chunk).await {
                                    break;
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "TTS stream failed"),
                    }
                }
                shared.queue.ack();
            }
        }
    }
}

/// The listen loop (§4.4): consumes inbound audio frames, drives VAD and
/// STT, emits transcription events, and triggers LLM generations.
#[allow(clippy::too_many_arguments)]
async fn run_listen_loop(
    mut audio_source: AudioSource,
    mut stt: Box<dyn Stt>,
    mut vad: Box<dyn Vad>,
    llm: Arc<dyn Llm>,
    tts: Arc<dyn Tts>,
    shared: Arc<SessionShared>,
    events: Arc<dyn EventSink>,
    tracer: Tr,
    fatal: FatalSlot,
    cancel: CancellationToken,
    sample_rate: u32,
) {
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = audio_source.next() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let is_voice = vad.is_voice(&frame);

        if is_voice && shared.state() == SessionState::Speaking {
            run_barge_in(&shared, &tts).await;
        }

        if is_voice {
            shared.begin_new_turn_if_needed();
            shared.set_state(SessionState::Listening);

            if let Err(e) = stt.feed(&frame, sample_rate).await {
                warn!(error = %e, "STT feed failed");
            }

            for partial in stt.drain_partials() {
                tracer.lock().expect("tracer lock poisoned").mark_once("stt_first_partial");
                if !send_structured(
                    &events,
                    &fatal,
                    &cancel,
                    StructuredEvent::SttPartial {
                        text: partial.text.clone(),
                        is_final: partial.is_final,
                    },
                )
                .await
                {
                    break;
                }
                if partial.maybe_sentence_boundary {
                    maybe_start_llm(
                        &partial.text,
                        &mut in_flight,
                        &shared,
                        &llm,
                        &events,
                        &tracer,
                        &fatal,
                        &cancel,
                    );
                }
            }
        } else if let Err(e) = stt.feed(&frame, sample_rate).await {
            warn!(error = %e, "STT feed failed");
        }

        if vad.endpointed() {
            match stt.get_final().await {
                Ok(finalized) => {
                    tracer.lock().expect("tracer lock poisoned").mark_once("stt_final");
                    send_structured(
                        &events,
                        &fatal,
                        &cancel,
                        StructuredEvent::SttFinal {
                            text: finalized.text.clone(),
                            is_final: true,
                        },
                    )
                    .await;
                    maybe_start_llm(
                        &finalized.text,
                        &mut in_flight,
                        &shared,
                        &llm,
                        &events,
                        &tracer,
                        &fatal,
                        &cancel,
                    );
                }
                Err(e) => warn!(error = %e, "STT get_final failed"),
            }
            vad.reset();
            shared.mark_awaiting_new_turn();
        }
    }

    if let Some(handle) = in_flight.take() {
        shared.set_stop_signal();
        let _ = handle.await;
    }
}

/// Drive one session end to end (§4.8): spawn the listen and speak loops,
/// await their completion in the documented order, and report derived
/// metrics. Returns `Err` only for fatal transport-sink failures; every
/// service-level failure is absorbed into a state transition instead.
#[allow(clippy::too_many_arguments)]
pub async fn handle_session(
    audio_source: AudioSource,
    stt: Box<dyn Stt>,
    vad: Box<dyn Vad>,
    llm: Arc<dyn Llm>,
    tts: Arc<dyn Tts>,
    events: Arc<dyn EventSink>,
    audio_out: Arc<dyn AudioSink>,
    config: SessionConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let shared = Arc::new(SessionShared::new(config.speech_queue_capacity));
    let tracer: Tr = Arc::new(StdMutex::new(Tracer::new()));
    let fatal: FatalSlot = Arc::new(StdMutex::new(None));
    let session_id = tracer.lock().expect("tracer lock poisoned").session_id();

    info!(%session_id, "session starting");
    tracer.lock().expect("tracer lock poisoned").mark("turn_start");

    let speak_handle = tokio::spawn(run_speak_loop(
        shared.clone(),
        tts.clone(),
        audio_out.clone(),
        tracer.clone(),
        fatal.clone(),
        cancel.clone(),
    ));

    let listen_handle = tokio::spawn(run_listen_loop(
        audio_source,
        stt,
        vad,
        llm,
        tts.clone(),
        shared.clone(),
        events.clone(),
        tracer.clone(),
        fatal.clone(),
        cancel.clone(),
        config.sample_rate,
    ));

    listen_handle
        .await
        .map_err(|e| OrchestratorError::Channel(e.to_string()))?;

    shared.queue.joined().await;
    shared.queue.enqueue(SpeechItem::Sentinel).await;

    speak_handle
        .await
        .map_err(|e| OrchestratorError::Channel(e.to_string()))?;

    tracer.lock().expect("tracer lock poisoned").mark("turn_end");
    let metrics = tracer.lock().expect("tracer lock poisoned").metrics();
    if metrics != Metrics::default() {
        let _ = events.send(StructuredEvent::Metrics { metrics }).await;
    }
    tracer.lock().expect("tracer lock poisoned").dump();

    info!(%session_id, "session stopped");

    if let Some(err) = fatal.lock().expect("fatal slot lock poisoned").take() {
        return Err(err);
    }
    Ok(())
}
