//! TTS playback protocol (C6): re-frames provider audio chunks for the
//! client and tracks per-response sequencing/truncation bookkeeping.

use crate::voice_core::framing::encode_frame;
use serde::Serialize;

/// One outbound audio frame, ready to be sent as a WebSocket binary message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackFrame {
    pub response_id: String,
    pub seq: u64,
    pub bytes: Vec<u8>,
}

/// Control-channel companion messages sent alongside binary audio frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackControl {
    AudioStarted { response_id: String },
    AudioEnded { response_id: String, bytes_sent: usize, truncated: bool },
}

/// Tracks sequencing and truncation state for one response's audio stream.
pub struct PlaybackTracker {
    response_id: String,
    seq: u64,
    bytes_sent: usize,
    started: bool,
    allow_final_audio: bool,
    /// Provider A re-frames every chunk as a WAVC envelope; provider B's MP3
    /// bytes travel raw, matching the provider's own wire format (§4.1, §6.1).
    framed: bool,
}

impl PlaybackTracker {
    pub fn new(response_id: String, allow_final_audio: bool, framed: bool) -> Self {
        Self { response_id, seq: 0, bytes_sent: 0, started: false, allow_final_audio, framed }
    }

    /// Re-frame one non-final chunk as an outbound playback frame, emitting
    /// an `AudioStarted` control message the first time this is called.
    pub fn push_chunk(&mut self, payload: &[u8]) -> (Option<PlaybackControl>, Option<PlaybackFrame>) {
        let started_event = if !self.started {
            self.started = true;
            Some(PlaybackControl::AudioStarted { response_id: self.response_id.clone() })
        } else {
            None
        };

        if payload.is_empty() {
            return (started_event, None);
        }

        self.bytes_sent += payload.len();
        let bytes = if self.framed { encode_frame(payload) } else { payload.to_vec() };
        let frame = PlaybackFrame { response_id: self.response_id.clone(), seq: self.seq, bytes };
        self.seq += 1;
        (started_event, Some(frame))
    }

    /// Finalize the stream, returning the closing control message. When the
    /// provider doesn't honor `final_audio` markers, `truncated` reports
    /// whether playback ended without ever sending a chunk.
    pub fn finish(&self) -> PlaybackControl {
        PlaybackControl::AudioEnded {
            response_id: self.response_id.clone(),
            bytes_sent: self.bytes_sent,
            truncated: !self.allow_final_audio && self.bytes_sent == 0 && self.started,
        }
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_chunk_emits_started_event() {
        let mut tracker = PlaybackTracker::new("r1".to_string(), false, true);
        let (started, frame) = tracker.push_chunk(&[1, 2, 3]);
        assert!(matches!(started, Some(PlaybackControl::AudioStarted { .. })));
        assert!(frame.is_some());
        assert_eq!(frame.unwrap().seq, 0);
    }

    #[test]
    fn subsequent_chunks_dont_repeat_started_event() {
        let mut tracker = PlaybackTracker::new("r1".to_string(), false, true);
        tracker.push_chunk(&[1]);
        let (started, frame) = tracker.push_chunk(&[2]);
        assert!(started.is_none());
        assert_eq!(frame.unwrap().seq, 1);
    }

    #[test]
    fn empty_chunk_yields_no_frame() {
        let mut tracker = PlaybackTracker::new("r1".to_string(), false, true);
        let (_, frame) = tracker.push_chunk(&[]);
        assert!(frame.is_none());
    }

    #[test]
    fn finish_reports_bytes_sent() {
        let mut tracker = PlaybackTracker::new("r1".to_string(), true, true);
        tracker.push_chunk(&[1, 2, 3, 4]);
        let control = tracker.finish();
        match control {
            PlaybackControl::AudioEnded { bytes_sent, truncated, .. } => {
                assert_eq!(bytes_sent, 4);
                assert!(!truncated);
            }
            _ => panic!("expected AudioEnded"),
        }
    }

    #[test]
    fn truncated_when_started_but_nothing_sent_and_provider_disallows_final_audio() {
        let mut tracker = PlaybackTracker::new("r1".to_string(), false, true);
        tracker.push_chunk(&[]); // marks started, sends nothing
        let control = tracker.finish();
        match control {
            PlaybackControl::AudioEnded { truncated, .. } => assert!(truncated),
            _ => panic!("expected AudioEnded"),
        }
    }

    #[test]
    fn unframed_provider_sends_payload_bytes_unchanged() {
        let mut tracker = PlaybackTracker::new("r1".to_string(), true, false);
        let (_, frame) = tracker.push_chunk(&[9, 9, 9]);
        assert_eq!(frame.unwrap().bytes, vec![9, 9, 9]);
    }
}
