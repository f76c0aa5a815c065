//! Per-session event log and derived latency metrics.

use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// Kind of a recorded trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Mark,
    Start,
    End,
}

#[derive(Debug, Clone)]
struct TraceEvent {
    t: Instant,
    kind: EventKind,
    name: &'static str,
}

/// Derived latency metrics for a single conversational turn, in
/// milliseconds from `turn_start`. Fields whose source mark was never
/// recorded are `None` and omitted from the emitted JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_first_partial_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_final_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_first_token_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_first_audio_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_total_ms: Option<u64>,
}

impl Metrics {
    /// `true` if every populated field observes `stt_first_partial_ms <=
    /// stt_final_ms <= llm_first_token_ms <= tts_first_audio_ms <=
    /// turn_total_ms` for whichever of those are present.
    pub fn is_monotonic(&self) -> bool {
        let present: Vec<u64> = [
            self.stt_first_partial_ms,
            self.stt_final_ms,
            self.llm_first_token_ms,
            self.tts_first_audio_ms,
            self.turn_total_ms,
        ]
        .into_iter()
        .flatten()
        .collect();
        present.windows(2).all(|w| w[0] <= w[1])
    }
}

/// Collects timestamped events for one session and derives latency metrics.
///
/// Timestamps always come from [`Instant`]; wall-clock time is never used
/// for metric differences.
pub struct Tracer {
    session_id: Uuid,
    events: Vec<TraceEvent>,
}

impl Tracer {
    /// Create a tracer with a freshly generated session identifier.
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            events: Vec::new(),
        }
    }

    /// The session identifier this tracer's events are tagged with.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Record a timestamped event.
    pub fn mark(&mut self, name: &'static str) {
        self.events.push(TraceEvent {
            t: Instant::now(),
            kind: EventKind::Mark,
            name,
        });
    }

    /// Record `name` only if it has not already been marked. Backs the
    /// "first time only" markers (`stt_first_partial`, `stt_final`,
    /// `llm_first_token`, `tts_first_audio`). Returns `true` if this call
    /// actually recorded a new mark.
    pub fn mark_once(&mut self, name: &'static str) -> bool {
        if self.mark_time(name).is_some() {
            return false;
        }
        self.mark(name);
        true
    }

    /// Record a span start; the returned guard records the matching end
    /// when dropped.
    pub fn span(&mut self, name: &'static str) -> SpanGuard<'_> {
        self.events.push(TraceEvent {
            t: Instant::now(),
            kind: EventKind::Start,
            name,
        });
        SpanGuard {
            tracer: self,
            name,
        }
    }

    fn mark_time(&self, name: &str) -> Option<Instant> {
        self.events
            .iter()
            .find(|e| e.kind == EventKind::Mark && e.name == name)
            .map(|e| e.t)
    }

    fn diff_ms(&self, start: &str, end: &str) -> Option<u64> {
        let t0 = self.mark_time(start)?;
        let t1 = self.mark_time(end)?;
        Some(t1.saturating_duration_since(t0).as_millis() as u64)
    }

    /// Compute latency metrics for the turn, omitting any whose source
    /// mark was never recorded.
    pub fn metrics(&self) -> Metrics {
        Metrics {
            stt_first_partial_ms: self.diff_ms("turn_start", "stt_first_partial"),
            stt_final_ms: self.diff_ms("turn_start", "stt_final"),
            llm_first_token_ms: self.diff_ms("turn_start", "llm_first_token"),
            tts_first_audio_ms: self.diff_ms("turn_start", "tts_first_audio"),
            turn_total_ms: self.diff_ms("turn_start", "turn_end"),
        }
    }

    /// Emit the full event log as a structured `tracing` event.
    pub fn dump(&self) {
        let base = self.events.first().map(|e| e.t).unwrap_or_else(Instant::now);
        let events: Vec<serde_json::Value> = self
            .events
            .iter()
            .map(|e| {
                serde_json::json!({
                    "type": match e.kind {
                        EventKind::Mark => "mark",
                        EventKind::Start => "start",
                        EventKind::End => "end",
                    },
                    "name": e.name,
                    "t_ms": e.t.saturating_duration_since(base).as_millis() as u64,
                })
            })
            .collect();
        tracing::info!(
            session_id = %self.session_id,
            events = %serde_json::Value::Array(events),
            "session trace"
        );
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard recording a span's end timestamp when dropped.
pub struct SpanGuard<'a> {
    tracer: &'a mut Tracer,
    name: &'static str,
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        self.tracer.events.push(TraceEvent {
            t: Instant::now(),
            kind: EventKind::End,
            name: self.name,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn metrics_omit_unrecorded_marks() {
        let mut t = Tracer::new();
        t.mark("turn_start");
        t.mark("stt_first_partial");
        t.mark("turn_end");
        let m = t.metrics();
        assert!(m.stt_first_partial_ms.is_some());
        assert!(m.turn_total_ms.is_some());
        assert!(m.stt_final_ms.is_none());
        assert!(m.llm_first_token_ms.is_none());
        assert!(m.tts_first_audio_ms.is_none());
    }

    #[test]
    fn metrics_are_monotonic_in_recorded_order() {
        let mut t = Tracer::new();
        t.mark("turn_start");
        sleep(Duration::from_millis(2));
        t.mark("stt_first_partial");
        sleep(Duration::from_millis(2));
        t.mark("stt_final");
        sleep(Duration::from_millis(2));
        t.mark("llm_first_token");
        sleep(Duration::from_millis(2));
        t.mark("tts_first_audio");
        sleep(Duration::from_millis(2));
        t.mark("turn_end");
        assert!(t.metrics().is_monotonic());
    }

    #[test]
    fn mark_once_does_not_move_the_timestamp() {
        let mut t = Tracer::new();
        t.mark("turn_start");
        assert!(t.mark_once("stt_final"));
        sleep(Duration::from_millis(5));
        assert!(!t.mark_once("stt_final"));
        let first = t.diff_ms("turn_start", "stt_final");
        sleep(Duration::from_millis(5));
        assert!(!t.mark_once("stt_final"));
        let second = t.diff_ms("turn_start", "stt_final");
        assert_eq!(first, second);
    }

    #[test]
    fn span_guard_records_start_and_end() {
        let mut t = Tracer::new();
        {
            let _span = t.span("work");
        }
        assert_eq!(
            t.events
                .iter()
                .filter(|e| e.name == "work")
                .map(|e| e.kind)
                .collect::<Vec<_>>(),
            vec![EventKind::Start, EventKind::End]
        );
    }
}
