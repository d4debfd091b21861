//! Utterance Assembler (C3): merges streaming STT partials into a cumulative
//! caption, picks the best final transcript, and dedupes repeated finals.

use crate::voice_core::config::AssemblerConfig;
use std::time::{Duration, Instant};

/// Assembles one utterance's worth of partial/final transcript events.
#[derive(Debug)]
pub struct UtteranceAssembler {
    config: AssemblerConfig,
    parts: Vec<String>,
    last_final_normalized: Option<String>,
    last_final_at: Option<Instant>,
}

impl UtteranceAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            config,
            parts: Vec::new(),
            last_final_normalized: None,
            last_final_at: None,
        }
    }

    /// Reset assembler state for a new utterance, preserving dedupe memory
    /// of the previous final (the dedupe window spans utterance boundaries).
    pub fn reset_parts(&mut self) {
        self.parts.clear();
    }

    /// Feed a partial transcript. Returns the current joined caption.
    pub fn push_partial(&mut self, new_text: &str) -> String {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return self.caption();
        }

        match self.parts.last().cloned() {
            None => self.parts.push(new_text.to_string()),
            Some(last_part) => {
                if is_cumulative_refinement(&last_part, new_text, self.config.cumulative_prefix_ratio) {
                    *self.parts.last_mut().unwrap() = new_text.to_string();
                } else if last_part.ends_with(new_text) || new_text.ends_with(last_part.as_str()) {
                    // tail-overlap dedupe: drop the new fragment entirely
                } else {
                    self.parts.push(new_text.to_string());
                }
            }
        }

        self.caption()
    }

    /// Current merged caption, with whitespace collapsed.
    pub fn caption(&self) -> String {
        collapse_whitespace(&self.parts.join(" "))
    }

    pub fn parts_len(&self) -> usize {
        self.parts.len()
    }

    /// Choose between the STT-reported final and the assembler's joined
    /// caption, per the word-count/length comparator in §4.3.
    pub fn select_final<'a>(&self, candidate_final: &'a str) -> String {
        let candidate_joined = self.caption();
        pick_best_final(candidate_final, &candidate_joined).to_string()
    }

    /// Decide whether a newly-arrived final transcript should be surfaced or
    /// dropped as a duplicate of the last one emitted for this session.
    ///
    /// Returns `true` if the final should be surfaced (and records it as the
    /// new "last final" for future dedupe checks).
    pub fn accept_final(&mut self, text: &str, now: Instant) -> bool {
        let normalized = normalize(text);

        if let (Some(last), Some(last_at)) = (&self.last_final_normalized, self.last_final_at) {
            if *last == normalized
                && now.duration_since(last_at) < Duration::from_millis(self.config.final_dedupe_window_ms)
            {
                return false;
            }
        }

        self.last_final_normalized = Some(normalized);
        self.last_final_at = Some(now);
        true
    }
}

fn normalize(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cumulative iff `len(new) >= len(last)` AND (`new` starts with `last`, OR
/// `new` contains a prefix of `last` at least `ceil(ratio * len(last))` chars long).
fn is_cumulative_refinement(last_part: &str, new_text: &str, ratio: f64) -> bool {
    if new_text.len() < last_part.len() {
        return false;
    }
    if new_text.starts_with(last_part) {
        return true;
    }

    let required = (ratio * last_part.chars().count() as f64).ceil() as usize;
    if required == 0 {
        return true;
    }
    let prefix: String = last_part.chars().take(required).collect();
    new_text.starts_with(prefix.as_str())
}

/// Pick the final by `(word_count, char_length)`, higher word count wins,
/// ties broken by longer string.
fn pick_best_final<'a>(a: &'a str, b: &'a str) -> &'a str {
    let wc = |s: &str| s.split_whitespace().count();
    let (wa, wb) = (wc(a), wc(b));
    if wa != wb {
        if wa > wb { a } else { b }
    } else if a.len() >= b.len() {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> UtteranceAssembler {
        UtteranceAssembler::new(AssemblerConfig::default())
    }

    #[test]
    fn cumulative_merge() {
        let mut a = assembler();
        a.push_partial("he");
        a.push_partial("hel");
        let caption = a.push_partial("hello");
        assert_eq!(caption, "hello");
        assert_eq!(a.parts_len(), 1);
    }

    #[test]
    fn new_segment_with_no_overlap() {
        let mut a = assembler();
        a.push_partial("hello");
        let caption = a.push_partial("world");
        assert_eq!(caption, "hello world");
        assert_eq!(a.parts_len(), 2);
    }

    #[test]
    fn tail_overlap_dedupe() {
        let mut a = assembler();
        a.push_partial("hello wor");
        let caption = a.push_partial("hello world");
        assert_eq!(caption, "hello world");
        assert_eq!(a.parts_len(), 1);
    }

    #[test]
    fn final_selection_prefers_more_words() {
        let a = assembler();
        assert_eq!(pick_best_final("hi", "hi there"), "hi there");
        let _ = a; // keep fixture symmetry with other tests
    }

    #[test]
    fn dedupe_within_window_drops_repeat() {
        let mut a = assembler();
        let t0 = Instant::now();
        assert!(a.accept_final("thanks", t0));
        assert!(!a.accept_final("thanks", t0 + Duration::from_millis(500)));
    }

    #[test]
    fn dedupe_outside_window_allows_repeat() {
        let mut a = assembler();
        let t0 = Instant::now();
        assert!(a.accept_final("thanks", t0));
        assert!(a.accept_final("thanks", t0 + Duration::from_millis(3001)));
    }

    #[test]
    fn dedupe_is_case_and_whitespace_insensitive() {
        let mut a = assembler();
        let t0 = Instant::now();
        assert!(a.accept_final("Hello  there", t0));
        assert!(!a.accept_final("hello there", t0 + Duration::from_millis(10)));
    }
}
