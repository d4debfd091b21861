//! Custom TTS frame envelope (C2): `"WAVC" | uint32_be length | payload[length]`.
//!
//! Provider A's downlink concatenates zero or more of these frames. Provider
//! B's downlink is raw MP3 and needs no parser — see [`super::playback`].

use crate::voice_core::error::VoiceError;

const MAGIC: &[u8; 4] = b"WAVC";
const HEADER_LEN: usize = 8;

/// One decoded TTS payload plus the byte offset it was found at, used for
/// `(offset, len)` dedupe against retry overlap in the provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavcFrame {
    pub offset: usize,
    pub payload: Vec<u8>,
}

/// Incremental parser for the WAVC stream. Feed it arbitrarily-chunked bytes
/// via [`WavcParser::push`]; it yields complete payloads as they become
/// available, regardless of how the underlying transport split them.
#[derive(Debug, Default)]
pub struct WavcParser {
    buf: Vec<u8>,
    /// Absolute offset of `buf[0]` within the overall stream.
    base_offset: usize,
    max_frame_payload: usize,
    seen: std::collections::HashSet<(usize, usize)>,
}

impl WavcParser {
    pub fn new(max_frame_payload: usize) -> Self {
        Self {
            buf: Vec::new(),
            base_offset: 0,
            max_frame_payload,
            seen: std::collections::HashSet::new(),
        }
    }

    /// Feed more bytes and drain as many complete frames as are available.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<WavcFrame>, VoiceError> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            // Scan for the magic at the front of the buffer.
            let magic_pos = self
                .buf
                .windows(MAGIC.len())
                .position(|w| w == MAGIC);

            let Some(pos) = magic_pos else {
                // No magic found. If the buffer has grown past a safe
                // retention window, drop the stale prefix but keep the last
                // 7 bytes in case the magic spans a read boundary.
                if self.buf.len() > MAGIC.len() {
                    let keep_from = self.buf.len() - (MAGIC.len() - 1);
                    self.advance(keep_from);
                }
                break;
            };

            if pos > 0 {
                self.advance(pos);
            }

            if self.buf.len() < HEADER_LEN {
                break; // wait for more bytes to read the length
            }

            let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;

            if len == 0 {
                // Zero-length frame: malformed, skip past the header and keep scanning.
                self.advance(HEADER_LEN);
                continue;
            }
            if len > self.max_frame_payload {
                return Err(VoiceError::TtsProtocolError(format!(
                    "frame length {len} exceeds max {}",
                    self.max_frame_payload
                )));
            }

            let total = HEADER_LEN + len;
            if self.buf.len() < total {
                break; // wait for the rest of the payload
            }

            let offset = self.base_offset;
            let payload = self.buf[HEADER_LEN..total].to_vec();
            self.advance(total);

            if self.seen.insert((offset, len)) {
                out.push(WavcFrame { offset, payload });
            }
        }

        Ok(out)
    }

    /// Drop the final truncated tail (e.g. on stream close). Returns the
    /// number of bytes discarded, for diagnostics/`tts_truncated` reporting.
    pub fn discard_truncated_tail(&mut self) -> usize {
        let n = self.buf.len();
        self.buf.clear();
        n
    }

    fn advance(&mut self, n: usize) {
        self.buf.drain(..n);
        self.base_offset += n;
    }
}

/// Encode a single WAV payload as one WAVC frame (used by test fixtures and
/// by any server-side re-framing path).
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn build_stream(payloads: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in payloads {
            out.extend(encode_frame(p));
        }
        out
    }

    #[test]
    fn parses_whole_stream_in_one_push() {
        let payloads = vec![vec![1, 2, 3], vec![4; 10], vec![9]];
        let stream = build_stream(&payloads);

        let mut parser = WavcParser::new(1024 * 1024);
        let frames = parser.push(&stream).unwrap();

        assert_eq!(frames.len(), 3);
        for (f, p) in frames.iter().zip(payloads.iter()) {
            assert_eq!(&f.payload, p);
        }
    }

    #[test]
    fn framing_round_trip_any_byte_split() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let n = rng.random_range(1..8);
            let payloads: Vec<Vec<u8>> = (0..n)
                .map(|_| {
                    let len = rng.random_range(1..2048);
                    (0..len).map(|_| rng.random::<u8>()).collect()
                })
                .collect();
            let stream = build_stream(&payloads);

            let mut parser = WavcParser::new(4 * 1024 * 1024);
            let mut got = Vec::new();
            let mut i = 0;
            while i < stream.len() {
                let chunk_len = rng.random_range(1..=7usize.max(stream.len() - i).min(37));
                let end = (i + chunk_len).min(stream.len());
                got.extend(parser.push(&stream[i..end]).unwrap());
                i = end;
            }

            assert_eq!(got.len(), payloads.len());
            for (f, p) in got.iter().zip(payloads.iter()) {
                assert_eq!(&f.payload, p);
            }
        }
    }

    #[test]
    fn byte_at_a_time_split_still_yields_all_frames() {
        let payloads = vec![vec![0xAA; 5], vec![0xBB; 300]];
        let stream = build_stream(&payloads);

        let mut parser = WavcParser::new(1024 * 1024);
        let mut got = Vec::new();
        for b in &stream {
            got.extend(parser.push(&[*b]).unwrap());
        }

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].payload, payloads[0]);
        assert_eq!(got[1].payload, payloads[1]);
    }

    #[test]
    fn oversize_length_is_rejected() {
        let mut bad = Vec::new();
        bad.extend_from_slice(MAGIC);
        bad.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());

        let mut parser = WavcParser::new(2 * 1024 * 1024);
        let err = parser.push(&bad).unwrap_err();
        assert!(matches!(err, VoiceError::TtsProtocolError(_)));
    }

    #[test]
    fn zero_length_frame_is_skipped() {
        let mut stream = Vec::new();
        stream.extend_from_slice(MAGIC);
        stream.extend_from_slice(&0u32.to_be_bytes());
        stream.extend(encode_frame(&[1, 2, 3]));

        let mut parser = WavcParser::new(1024);
        let frames = parser.push(&stream).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![1, 2, 3]);
    }

    #[test]
    fn magic_spanning_a_read_boundary_is_recovered() {
        let full = build_stream(&[vec![7, 7, 7]]);
        let (first, second) = full.split_at(2);

        let mut parser = WavcParser::new(1024);
        let mut out = parser.push(first).unwrap();
        out.extend(parser.push(second).unwrap());

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, vec![7, 7, 7]);
    }

    #[test]
    fn duplicate_offset_len_is_deduped() {
        // Simulate a provider retry that re-delivers the same (offset, len)
        // frame: parse it once, rewind the offset counter, and parse the
        // identical bytes again.
        let frame = encode_frame(&[1, 2, 3]);

        let mut parser = WavcParser::new(1024);
        let first = parser.push(&frame).unwrap();
        assert_eq!(first.len(), 1);

        parser.base_offset = 0;
        let second = parser.push(&frame).unwrap();
        assert!(second.is_empty(), "retried frame at the same offset must be dropped");
    }
}
