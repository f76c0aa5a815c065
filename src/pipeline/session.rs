//! Per-session state: the state machine, the bounded speech queue, and the
//! prompt-gating policy, all gathered behind locks whose critical sections
//! never span an `.await` point (see the concurrency note in the crate
//! root docs).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// The session's conversational state.
///
/// `Idle` is a pre-construction marker only; a running session never
/// transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Interrupted,
}

/// An item carried on the [`SpeechQueue`]: either a chunk of assistant text
/// awaiting synthesis, or the sentinel that tells the speak loop to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechItem {
    Chunk(String),
    Sentinel,
}

/// A bounded FIFO of [`SpeechItem`]s with a single producer (the LLM
/// runner) and a single consumer (the speak loop), plus an "all consumed
/// and acknowledged" join barrier the session driver awaits before tearing
/// down, mirroring `asyncio.Queue`'s `join`/`task_done` pair.
pub struct SpeechQueue {
    capacity: usize,
    items: Mutex<VecDeque<SpeechItem>>,
    not_empty: Notify,
    not_full: Notify,
    unacked: std::sync::atomic::AtomicUsize,
    drained: Notify,
}

impl SpeechQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::new()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            unacked: std::sync::atomic::AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Append an item, waiting for room if the queue is at capacity.
    pub async fn enqueue(&self, item: SpeechItem) {
        loop {
            let not_full = self.not_full.notified();
            {
                let mut items = self.items.lock().expect("speech queue lock poisoned");
                if items.len() < self.capacity {
                    items.push_back(item);
                    self.unacked.fetch_add(1, Ordering::SeqCst);
                    self.not_empty.notify_one();
                    return;
                }
            }
            not_full.await;
        }
    }

    /// Remove and return the next item, waiting if the queue is empty.
    pub async fn recv(&self) -> SpeechItem {
        loop {
            let not_empty = self.not_empty.notified();
            {
                let mut items = self.items.lock().expect("speech queue lock poisoned");
                if let Some(item) = items.pop_front() {
                    self.not_full.notify_one();
                    return item;
                }
            }
            not_empty.await;
        }
    }

    /// Mark one previously-dequeued item as fully handled (played to
    /// completion or discarded by barge-in). Must be called exactly once
    /// per item returned from [`Self::recv`] or removed by
    /// [`Self::drain_unstarted`].
    pub fn ack(&self) {
        let prev = self.unacked.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every enqueued item has been acknowledged.
    pub async fn joined(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register as a waiter before checking the condition: `ack`
            // signals via `notify_waiters`, which stores no permit, so
            // without `enable()` a drop to zero between the check and the
            // await would be missed and this would hang forever.
            notified.as_mut().enable();
            if self.unacked.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Remove and acknowledge every item still sitting in the buffer
    /// without having been dequeued by the speak loop. Used by the
    /// barge-in controller; the item the speak loop is actively
    /// synthesizing has already left the buffer via [`Self::recv`] and is
    /// instead cut short by the stop-signal.
    pub fn drain_unstarted(&self) {
        let drained = {
            let mut items = self.items.lock().expect("speech queue lock poisoned");
            let n = items.len();
            items.clear();
            n
        };
        self.not_full.notify_waiters();
        for _ in 0..drained {
            self.ack();
        }
    }
}

/// Outcome of evaluating a candidate prompt against the gating policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptDecision {
    /// Start an LLM generation for this text now.
    Start(String),
    /// Replaced the pending-prompts buffer; nothing starts immediately.
    Coalesced,
    /// The text was a prefix/duplicate/empty and is ignored outright.
    Suppressed,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    active_prompt: Option<String>,
    last_prompt_text: Option<String>,
    awaiting_new_turn: bool,
    pending: Option<String>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: SessionState::Listening,
            active_prompt: None,
            last_prompt_text: None,
            awaiting_new_turn: false,
            pending: None,
        }
    }
}

/// State shared across the listen loop, the LLM runner and the barge-in
/// controller: the session state machine, the prompt-gating fields, and
/// the one-shot stop-signal. All of it lives behind a single lock so that
/// a gating decision (which reads and writes several fields at once) is
/// atomic with respect to the other activities, without ever holding the
/// lock across an `.await`.
pub struct SessionShared {
    inner: Mutex<Inner>,
    stop_signal: AtomicBool,
    pub queue: SpeechQueue,
}

impl SessionShared {
    pub fn new(speech_queue_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            stop_signal: AtomicBool::new(false),
            queue: SpeechQueue::new(speech_queue_capacity),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().expect("session lock poisoned").state
    }

    pub fn set_state(&self, state: SessionState) {
        self.inner.lock().expect("session lock poisoned").state = state;
    }

    /// Step (c) of the listen loop: on the first voice frame of a new
    /// turn, clear `last_prompt_text` so duplicate suppression does not
    /// leak across turns.
    pub fn begin_new_turn_if_needed(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.awaiting_new_turn {
            inner.last_prompt_text = None;
            inner.awaiting_new_turn = false;
        }
    }

    /// Evaluate a candidate prompt against the gating policy (spec'd
    /// `maybe_start_llm` steps 1-4), mutating the pending/active/last
    /// fields as needed.
    pub fn evaluate_prompt(&self, text: &str) -> PromptDecision {
        let text = text.trim();
        if text.is_empty() {
            return PromptDecision::Suppressed;
        }
        let mut inner = self.inner.lock().expect("session lock poisoned");

        if let Some(active) = &inner.active_prompt {
            if text.starts_with(active.as_str()) {
                return PromptDecision::Suppressed;
            }
        }
        if !inner.awaiting_new_turn && inner.last_prompt_text.as_deref() == Some(text) {
            return PromptDecision::Suppressed;
        }
        if matches!(inner.state, SessionState::Thinking | SessionState::Speaking) {
            if inner.pending.as_deref() != Some(text) {
                inner.pending = Some(text.to_string());
            }
            return PromptDecision::Coalesced;
        }
        PromptDecision::Start(text.to_string())
    }

    /// Record that an LLM generation is starting for `prompt`.
    pub fn llm_started(&self, prompt: &str) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.active_prompt = Some(prompt.to_string());
        inner.last_prompt_text = Some(prompt.to_string());
        inner.awaiting_new_turn = false;
        inner.state = SessionState::Thinking;
    }

    /// LLM generation has completed (normally or via the stop-signal).
    /// Clears `active_prompt`, clears the stop-signal, and either returns
    /// the next pending prompt to run or settles the state back to
    /// `Listening`.
    pub fn llm_completed(&self) -> Option<String> {
        self.stop_signal.store(false, Ordering::SeqCst);
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.active_prompt = None;
        if let Some(next) = inner.pending.take() {
            Some(next)
        } else {
            inner.state = SessionState::Listening;
            inner.awaiting_new_turn = true;
            None
        }
    }

    /// Listen loop step (e): mark that the next voice frame begins a new
    /// turn, so duplicate suppression resets.
    pub fn mark_awaiting_new_turn(&self) {
        self.inner.lock().expect("session lock poisoned").awaiting_new_turn = true;
    }

    /// Barge-in controller step 3: clear pending/active/last prompt state.
    pub fn clear_for_barge_in(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.pending = None;
        inner.active_prompt = None;
        inner.last_prompt_text = None;
        inner.awaiting_new_turn = false;
    }

    pub fn set_stop_signal(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    pub fn stop_signal_set(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }
}
