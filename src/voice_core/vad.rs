//! Voice Activity Detection & Turn Controller (C4).
//!
//! Energy-threshold hysteresis state machine, driven by wall-clock sample
//! windows instead of fixed-size audio frames, per the external-provider
//! pipeline where capture cadence is reported by the client rather than
//! derived from a local sample rate.

use crate::voice_core::config::VadConfig;

/// Current turn state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Below the speech threshold; not capturing an utterance.
    Idle,
    /// Above the speech threshold at some point and not yet endpointed.
    Speaking,
}

/// Why an utterance was endpointed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Continuous silence held for `silence_hold_ms`.
    Silence,
    /// `max_utterance_ms` elapsed since speech onset.
    MaxDuration,
}

/// An event produced by feeding one sample window into the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// Speech onset: the orchestrator should open a new utterance.
    SpeechStarted,
    /// The current utterance has ended.
    UtteranceEnded(EndReason),
}

/// Drives the Idle/Speaking turn state machine one sample window at a time.
#[derive(Debug)]
pub struct TurnController {
    config: VadConfig,
    state: TurnState,
    silence_accum_ms: u64,
    speech_elapsed_ms: u64,
}

impl TurnController {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: TurnState::Idle,
            silence_accum_ms: 0,
            speech_elapsed_ms: 0,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Feed one energy sample (RMS on the same 0-255 scale as the
    /// configured thresholds), representing `sample_window_ms` of audio.
    pub fn push_sample(&mut self, rms: f32) -> Option<TurnEvent> {
        match self.state {
            TurnState::Idle => {
                if rms >= self.config.speech_threshold {
                    self.state = TurnState::Speaking;
                    self.silence_accum_ms = 0;
                    self.speech_elapsed_ms = self.config.sample_window_ms;
                    Some(TurnEvent::SpeechStarted)
                } else {
                    None
                }
            }
            TurnState::Speaking => {
                self.speech_elapsed_ms += self.config.sample_window_ms;

                if rms >= self.config.speech_threshold {
                    self.silence_accum_ms = 0;
                } else if rms < self.config.silence_threshold {
                    self.silence_accum_ms += self.config.sample_window_ms;
                }
                // Between the two thresholds: hold, neither resets nor
                // accumulates silence (hysteresis dead zone).

                if self.silence_accum_ms >= self.config.silence_hold_ms {
                    self.reset();
                    return Some(TurnEvent::UtteranceEnded(EndReason::Silence));
                }
                if self.speech_elapsed_ms >= self.config.max_utterance_ms {
                    self.reset();
                    return Some(TurnEvent::UtteranceEnded(EndReason::MaxDuration));
                }
                None
            }
        }
    }

    /// Force-end the current utterance, e.g. on an explicit client
    /// `end_of_turn` control message.
    pub fn force_end(&mut self) -> Option<TurnEvent> {
        if self.state == TurnState::Speaking {
            self.reset();
            Some(TurnEvent::UtteranceEnded(EndReason::Silence))
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.state = TurnState::Idle;
        self.silence_accum_ms = 0;
        self.speech_elapsed_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> TurnController {
        TurnController::new(VadConfig::default())
    }

    #[test]
    fn loud_sample_starts_speech() {
        let mut c = controller();
        assert_eq!(c.push_sample(40.0), Some(TurnEvent::SpeechStarted));
        assert_eq!(c.state(), TurnState::Speaking);
    }

    #[test]
    fn quiet_samples_stay_idle() {
        let mut c = controller();
        for _ in 0..10 {
            assert_eq!(c.push_sample(5.0), None);
        }
        assert_eq!(c.state(), TurnState::Idle);
    }

    #[test]
    fn continuous_silence_ends_utterance_after_hold() {
        let mut c = controller();
        c.push_sample(40.0); // start speech
        let window = c.config.sample_window_ms;
        let windows_needed = c.config.silence_hold_ms / window + 1;

        let mut ended = None;
        for _ in 0..windows_needed {
            if let Some(ev) = c.push_sample(5.0) {
                ended = Some(ev);
                break;
            }
        }
        assert_eq!(ended, Some(TurnEvent::UtteranceEnded(EndReason::Silence)));
        assert_eq!(c.state(), TurnState::Idle);
    }

    #[test]
    fn dead_zone_samples_do_not_reset_or_accumulate_silence() {
        let mut c = controller();
        c.push_sample(40.0); // start speech
        // between silence_threshold (15.0) and speech_threshold (35.0)
        for _ in 0..1000 {
            assert_eq!(c.push_sample(25.0), None);
        }
        assert_eq!(c.state(), TurnState::Speaking);
        assert_eq!(c.silence_accum_ms, 0);
    }

    #[test]
    fn brief_dip_does_not_end_utterance() {
        let mut c = controller();
        c.push_sample(40.0);
        c.push_sample(5.0); // one quiet window, well under the hold time
        assert_eq!(c.push_sample(40.0), None); // speech resumes, silence resets
        assert_eq!(c.state(), TurnState::Speaking);
    }

    #[test]
    fn max_duration_ends_utterance_even_without_silence() {
        let mut c = controller();
        c.push_sample(40.0);
        let window = c.config.sample_window_ms;
        let windows_needed = c.config.max_utterance_ms / window + 1;

        let mut ended = None;
        for _ in 0..windows_needed {
            if let Some(ev) = c.push_sample(40.0) {
                ended = Some(ev);
                break;
            }
        }
        assert_eq!(
            ended,
            Some(TurnEvent::UtteranceEnded(EndReason::MaxDuration))
        );
    }

    #[test]
    fn force_end_while_speaking_emits_silence_end() {
        let mut c = controller();
        c.push_sample(40.0);
        assert_eq!(
            c.force_end(),
            Some(TurnEvent::UtteranceEnded(EndReason::Silence))
        );
        assert_eq!(c.state(), TurnState::Idle);
    }

    #[test]
    fn force_end_while_idle_is_noop() {
        let mut c = controller();
        assert_eq!(c.force_end(), None);
    }
}
