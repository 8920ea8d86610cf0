//! # Stabilization Layer
//!
//! Turns the noisy stream of per-window recognitions into caption events
//! that only ever improve. Because consecutive windows overlap, the same
//! phrase is recognized several times; the stabilizer exploits that
//! repetition instead of fighting it.
//!
//! Two modes:
//! - **confidence**: every recognition is forwarded as a provisional
//!   partial; a fragment observed `stability_threshold` times (across all
//!   sessions, via the counter store) is promoted to final. Fragments that
//!   look like silence or are too short are forwarded but never counted.
//! - **diff**: each window's text is token-diffed against the previous
//!   window's; only the new suffix past the common prefix is emitted, as
//!   final. Re-recognizing identical text emits nothing.
//!
//! Windows arriving out of order (possible with several workers) are
//! discarded if they start before the newest window already merged; text
//! never regresses to an older reading.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::StabilizerConfig;
use crate::transcription::engine::Segment;

use super::correction::{clean_annotations, content_len, normalize_fragment, Corrector};
use super::store::CounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionKind {
    Partial,
    Final,
}

/// One caption event sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionEvent {
    #[serde(rename = "type")]
    pub kind: CaptionKind,
    pub text: String,
}

impl CaptionEvent {
    fn partial(text: String) -> Self {
        Self {
            kind: CaptionKind::Partial,
            text,
        }
    }

    fn finalized(text: String) -> Self {
        Self {
            kind: CaptionKind::Final,
            text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizerMode {
    Confidence,
    Diff,
}

impl FromStr for StabilizerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confidence" => Ok(Self::Confidence),
            "diff" => Ok(Self::Diff),
            other => Err(anyhow!(
                "Unknown stabilizer mode '{}' (expected 'confidence' or 'diff')",
                other
            )),
        }
    }
}

#[derive(Default)]
struct StabilizerState {
    /// Start offset of the newest window merged so far.
    newest_start: Option<u64>,
    /// Full window text of the previous merge (diff mode).
    last_full_text: String,
    /// Most recent emission, for repeated-final suppression.
    last_emitted: Option<CaptionEvent>,
    /// Most recently finalized text, fed back as the engine hint.
    last_final: Option<String>,
}

pub struct Stabilizer {
    mode: StabilizerMode,
    threshold: u64,
    no_speech_ceiling: f32,
    min_fragment_chars: usize,
    corrector: Corrector,
    store: Arc<dyn CounterStore>,
    state: Mutex<StabilizerState>,
}

impl Stabilizer {
    pub fn new(config: &StabilizerConfig, store: Arc<dyn CounterStore>) -> anyhow::Result<Self> {
        Ok(Self {
            mode: config.stabilizer_mode()?,
            threshold: config.stability_threshold,
            no_speech_ceiling: config.no_speech_ceiling,
            min_fragment_chars: config.min_fragment_chars,
            corrector: Corrector::new(config.similarity_threshold, config.correction_top_k),
            store,
            state: Mutex::new(StabilizerState::default()),
        })
    }

    /// Text to bias the next engine call with.
    pub fn continuation_hint(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        match self.mode {
            StabilizerMode::Confidence => state.last_final.clone(),
            StabilizerMode::Diff => {
                if state.last_full_text.is_empty() {
                    None
                } else {
                    Some(state.last_full_text.clone())
                }
            }
        }
    }

    /// Merge one window's recognitions, producing zero or more events.
    pub fn ingest(&self, start_sample: u64, segments: &[Segment]) -> Vec<CaptionEvent> {
        let mut state = self.state.lock().unwrap();

        // A window older than the newest merged one would roll text back.
        if let Some(newest) = state.newest_start {
            if start_sample < newest {
                debug!(start_sample, newest, "Discarding out-of-order window");
                return Vec::new();
            }
        }
        state.newest_start = Some(start_sample);

        match self.mode {
            StabilizerMode::Confidence => self.merge_confidence(&mut state, segments),
            StabilizerMode::Diff => self.merge_diff(&mut state, segments),
        }
    }

    fn merge_confidence(
        &self,
        state: &mut StabilizerState,
        segments: &[Segment],
    ) -> Vec<CaptionEvent> {
        let mut events = Vec::new();

        for segment in segments {
            let cleaned = clean_annotations(&segment.text);
            if cleaned.is_empty() {
                continue;
            }

            // Likely silence: show it, never let it stabilize.
            if segment.no_speech_prob > self.no_speech_ceiling {
                push_event(state, &mut events, CaptionEvent::partial(cleaned));
                continue;
            }

            let normalized = normalize_fragment(&cleaned);
            if content_len(&normalized) < self.min_fragment_chars {
                push_event(state, &mut events, CaptionEvent::partial(cleaned));
                continue;
            }

            let corrected = self.corrector.correct(&normalized, self.store.as_ref());

            // The normalized form is only the counting key; the client sees
            // the recognizer's own text, unless a substitution rewrote it.
            let display = if corrected != normalized {
                corrected.clone()
            } else {
                cleaned
            };

            let count = match self.store.increment(&corrected) {
                Ok(count) => count,
                Err(error) => {
                    // Store trouble degrades to provisional output only.
                    warn!(%error, "Counter store unavailable, emitting partial");
                    push_event(state, &mut events, CaptionEvent::partial(display));
                    continue;
                }
            };

            if count >= self.threshold {
                state.last_final = Some(display.clone());
                push_event(state, &mut events, CaptionEvent::finalized(display));
            } else {
                push_event(state, &mut events, CaptionEvent::partial(display));
            }
        }

        events
    }

    fn merge_diff(&self, state: &mut StabilizerState, segments: &[Segment]) -> Vec<CaptionEvent> {
        let full_text = segments
            .iter()
            .map(|segment| clean_annotations(&segment.text))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if full_text.is_empty() {
            return Vec::new();
        }

        let previous: Vec<&str> = state.last_full_text.split_whitespace().collect();
        let current: Vec<&str> = full_text.split_whitespace().collect();

        let mut common = 0;
        while common < previous.len()
            && common < current.len()
            && previous[common] == current[common]
        {
            common += 1;
        }

        let suffix = current[common..].join(" ");
        state.last_full_text = full_text;

        if suffix.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        push_event(state, &mut events, CaptionEvent::finalized(suffix));
        events
    }
}

/// Append an event unless it repeats the previous final, or would demote
/// text that has already been finalized. Repeated provisional observations
/// are forwarded every time; the client uses them as the live caption line
/// while the count builds toward the threshold.
fn push_event(state: &mut StabilizerState, events: &mut Vec<CaptionEvent>, event: CaptionEvent) {
    if event.kind == CaptionKind::Final && state.last_emitted.as_ref() == Some(&event) {
        return;
    }
    if event.kind == CaptionKind::Partial && state.last_final.as_deref() == Some(&event.text[..]) {
        return;
    }
    state.last_emitted = Some(event.clone());
    events.push(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::stabilize::store::MemoryStore;
    use anyhow::Result;

    fn config(mode: &str, threshold: u64) -> StabilizerConfig {
        StabilizerConfig {
            mode: mode.to_string(),
            stability_threshold: threshold,
            ..AppConfig::default().stabilizer
        }
    }

    fn speech(text: &str) -> Vec<Segment> {
        vec![Segment {
            text: text.to_string(),
            start: 0.0,
            end: 1.0,
            no_speech_prob: 0.1,
        }]
    }

    fn silence(text: &str) -> Vec<Segment> {
        vec![Segment {
            text: text.to_string(),
            start: 0.0,
            end: 1.0,
            no_speech_prob: 0.95,
        }]
    }

    fn new_stabilizer(mode: &str, threshold: u64) -> Stabilizer {
        Stabilizer::new(&config(mode, threshold), Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_fragment_finalizes_at_threshold() {
        let stabilizer = new_stabilizer("confidence", 3);

        // Each of the first two observations re-forwards the provisional
        // caption; only the third promotes.
        let first = stabilizer.ingest(0, &speech("안녕하세요"));
        assert_eq!(first, vec![CaptionEvent::partial("안녕하세요".to_string())]);

        let second = stabilizer.ingest(100, &speech("안녕하세요"));
        assert_eq!(second, vec![CaptionEvent::partial("안녕하세요".to_string())]);

        let third = stabilizer.ingest(200, &speech("안녕하세요"));
        assert_eq!(third, vec![CaptionEvent::finalized("안녕하세요".to_string())]);
    }

    #[test]
    fn test_confidence_mode_preserves_display_text() {
        let stabilizer = new_stabilizer("confidence", 2);

        // Counting runs on the normalized key, but the client sees the
        // recognizer's own casing and punctuation.
        let first = stabilizer.ingest(0, &speech("Hello, World!"));
        assert_eq!(first, vec![CaptionEvent::partial("Hello, World!".to_string())]);

        let second = stabilizer.ingest(100, &speech("Hello, World!"));
        assert_eq!(second, vec![CaptionEvent::finalized("Hello, World!".to_string())]);
    }

    #[test]
    fn test_finalized_text_never_demotes() {
        let stabilizer = new_stabilizer("confidence", 2);

        stabilizer.ingest(0, &speech("안녕하세요"));
        let promoted = stabilizer.ingest(100, &speech("안녕하세요"));
        assert_eq!(promoted[0].kind, CaptionKind::Final);

        // Later observations of the same text stay final
        let again = stabilizer.ingest(200, &speech("안녕하세요"));
        assert!(again.is_empty() || again.iter().all(|e| e.kind == CaptionKind::Final));
    }

    #[test]
    fn test_no_speech_fragments_never_stabilize() {
        let stabilizer = new_stabilizer("confidence", 2);

        for start in 0..5u64 {
            let events = stabilizer.ingest(start * 100, &silence("흠"));
            assert!(events.iter().all(|e| e.kind == CaptionKind::Partial));
        }
    }

    #[test]
    fn test_short_fragments_never_stabilize() {
        let stabilizer = new_stabilizer("confidence", 2);

        // Below the 3-character content gate
        for start in 0..5u64 {
            let events = stabilizer.ingest(start * 100, &speech("네"));
            assert!(events.iter().all(|e| e.kind == CaptionKind::Partial));
        }
    }

    #[test]
    fn test_blank_audio_annotation_is_dropped() {
        let stabilizer = new_stabilizer("confidence", 2);
        let events = stabilizer.ingest(0, &speech("[BLANK_AUDIO]"));
        assert!(events.is_empty());
    }

    #[test]
    fn test_near_miss_spelling_counts_toward_canonical_form() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let stabilizer = Stabilizer::new(&config("confidence", 3), Arc::clone(&store)).unwrap();

        stabilizer.ingest(0, &speech("서울역에서"));
        stabilizer.ingest(100, &speech("서울역에서"));
        // Third observation arrives mis-spaced; correction maps it onto the
        // canonical spelling and that key reaches the threshold
        let events = stabilizer.ingest(200, &speech("서울 역에서"));

        assert_eq!(events, vec![CaptionEvent::finalized("서울역에서".to_string())]);
    }

    #[test]
    fn test_out_of_order_window_is_discarded() {
        let stabilizer = new_stabilizer("confidence", 3);

        stabilizer.ingest(1000, &speech("최신 텍스트"));
        let stale = stabilizer.ingest(500, &speech("오래된 텍스트"));
        assert!(stale.is_empty());
    }

    #[test]
    fn test_diff_mode_emits_only_new_suffix() {
        let stabilizer = new_stabilizer("diff", 3);

        let first = stabilizer.ingest(0, &speech("the quick brown"));
        assert_eq!(first, vec![CaptionEvent::finalized("the quick brown".to_string())]);

        let second = stabilizer.ingest(100, &speech("the quick brown fox"));
        assert_eq!(second, vec![CaptionEvent::finalized("fox".to_string())]);
    }

    #[test]
    fn test_diff_mode_identical_text_is_idempotent() {
        let stabilizer = new_stabilizer("diff", 3);

        stabilizer.ingest(0, &speech("같은 문장입니다"));
        let repeat = stabilizer.ingest(100, &speech("같은 문장입니다"));
        assert!(repeat.is_empty());
    }

    #[test]
    fn test_diff_mode_divergent_reading_emits_from_split_point() {
        let stabilizer = new_stabilizer("diff", 3);

        stabilizer.ingest(0, &speech("the quick brown fox"));
        let revised = stabilizer.ingest(100, &speech("the quick red fox jumps"));
        assert_eq!(revised, vec![CaptionEvent::finalized("red fox jumps".to_string())]);
    }

    #[test]
    fn test_continuation_hint_tracks_finals() {
        let stabilizer = new_stabilizer("confidence", 2);
        assert!(stabilizer.continuation_hint().is_none());

        stabilizer.ingest(0, &speech("안녕하세요"));
        stabilizer.ingest(100, &speech("안녕하세요"));
        assert_eq!(stabilizer.continuation_hint().as_deref(), Some("안녕하세요"));
    }

    #[test]
    fn test_store_failure_degrades_to_partial() {
        struct BrokenStore;
        impl CounterStore for BrokenStore {
            fn increment(&self, _text: &str) -> Result<u64> {
                Err(anyhow!("disk full"))
            }
            fn lookup(&self, _text: &str) -> Result<u64> {
                Ok(0)
            }
            fn top(&self, _limit: usize) -> Result<Vec<super::super::store::CountRecord>> {
                Ok(Vec::new())
            }
        }

        let stabilizer =
            Stabilizer::new(&config("confidence", 1), Arc::new(BrokenStore)).unwrap();
        let events = stabilizer.ingest(0, &speech("안녕하세요"));
        assert_eq!(events, vec![CaptionEvent::partial("안녕하세요".to_string())]);
    }

    #[test]
    fn test_event_serialization() {
        let event = CaptionEvent::finalized("안녕하세요".to_string());
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"final","text":"안녕하세요"}"#);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "confidence".parse::<StabilizerMode>().unwrap(),
            StabilizerMode::Confidence
        );
        assert_eq!("diff".parse::<StabilizerMode>().unwrap(), StabilizerMode::Diff);
        assert!("hybrid".parse::<StabilizerMode>().is_err());
    }
}
