//! Speech-to-text service interface
//!
//! The recognition engine is external: bytes in, best-effort text out. The
//! only audio handling done here is framing headerless PCM as WAV, which is
//! what engines expect.

use async_trait::async_trait;

/// Outcome of one transcription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcription {
    Text(String),
    /// The engine heard nothing it could transcribe
    NoSpeech,
    /// The engine failed; the string is its diagnostic
    Failed(String),
}

impl Transcription {
    pub fn text(&self) -> Option<&str> {
        match self {
            Transcription::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Bytes-in, text-out recognition engine
///
/// Engines are blocking in practice; implementations should move the work
/// off the async executor themselves.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe WAV-framed audio
    async fn transcribe(&self, wav: &[u8]) -> Transcription;
}

pub mod wav {
    //! Minimal RIFF/WAVE framing for 16-bit PCM

    /// Size of the canonical 44-byte PCM header
    pub const HEADER_SIZE: usize = 44;

    /// Sample rate used when the caller has none
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Whether `bytes` already starts with a RIFF/WAVE header
    pub fn is_wav(bytes: &[u8]) -> bool {
        bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
    }

    /// Prepend a PCM WAV header to little-endian 16-bit samples
    pub fn frame_pcm16(samples: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
        let bits_per_sample: u16 = 16;
        let block_align = channels * (bits_per_sample / 8);
        let byte_rate = sample_rate * u32::from(block_align);
        let data_len = samples.len() as u32;

        let mut out = Vec::with_capacity(HEADER_SIZE + samples.len());
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits_per_sample.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend_from_slice(samples);
        out
    }

    /// Playback length of 16-bit PCM in seconds
    pub fn pcm16_duration_seconds(sample_bytes: usize, sample_rate: u32, channels: u16) -> f64 {
        let frame_bytes = u64::from(channels) * 2;
        if frame_bytes == 0 || sample_rate == 0 {
            return 0.0;
        }
        (sample_bytes as u64 / frame_bytes) as f64 / f64::from(sample_rate)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_framed_pcm_is_recognised() {
            let framed = frame_pcm16(&[0u8; 320], DEFAULT_SAMPLE_RATE, 1);
            assert_eq!(framed.len(), HEADER_SIZE + 320);
            assert!(is_wav(&framed));
            assert!(!is_wav(&[0u8; 320]));
            assert_eq!(&framed[40..44], &320u32.to_le_bytes());
        }

        #[test]
        fn test_duration() {
            assert_eq!(pcm16_duration_seconds(32_000, 16_000, 1), 1.0);
            assert_eq!(pcm16_duration_seconds(32_000, 16_000, 2), 0.5);
            assert_eq!(pcm16_duration_seconds(100, 0, 1), 0.0);
        }
    }
}
