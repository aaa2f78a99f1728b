//! # Audio Clips
//!
//! One `AudioClip` is the synthesized audio for one speakable unit. The speech
//! service returns `LINEAR16` audio either as bare PCM or wrapped in a RIFF/WAV
//! container; both are normalized here into raw 16-bit little-endian PCM plus the
//! format needed to play it.

use crate::audio::adapter::MonoToStereo;
use crate::error::{ResponderError, ResponderResult};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Cursor;

/// Raw 16-bit little-endian PCM with its channel count and sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Build a clip from a speech service payload.
    ///
    /// ## Parameters:
    /// - **payload**: Audio bytes as returned by the speech service
    /// - **sample_rate**: Rate requested from the service, used for bare PCM
    ///
    /// WAV payloads carry their own format and must contain 16-bit samples.
    pub fn from_synthesized(payload: Vec<u8>, sample_rate: u32) -> ResponderResult<Self> {
        if payload.is_empty() {
            return Err(ResponderError::UpstreamEmpty(
                "speech service returned no audio".to_string(),
            ));
        }

        if !payload.starts_with(b"RIFF") {
            return Ok(Self {
                data: payload,
                channels: 1,
                sample_rate,
            });
        }

        let (header, body) = wav::read(&mut Cursor::new(payload))
            .map_err(|e| ResponderError::UpstreamError(format!("invalid WAV payload: {}", e)))?;

        let samples = match body {
            wav::BitDepth::Sixteen(samples) => samples,
            _ => {
                return Err(ResponderError::UpstreamError(format!(
                    "unsupported WAV bit depth: {}",
                    header.bits_per_sample
                )))
            }
        };

        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            // Writing into a Vec cannot fail
            let _ = data.write_i16::<LittleEndian>(sample);
        }

        Ok(Self {
            data,
            channels: header.channel_count,
            sample_rate: header.sampling_rate,
        })
    }

    /// Return the clip in dual-channel form.
    ///
    /// Stereo clips pass through unchanged. A truncated trailing sample is
    /// reported alongside the converted clip instead of failing playback.
    pub fn into_stereo(self) -> (Self, Option<ResponderError>) {
        if self.channels != 1 {
            return (self, None);
        }

        let (data, status) = MonoToStereo::convert(&self.data);
        let clip = Self {
            data,
            channels: 2,
            sample_rate: self.sample_rate,
        };
        (clip, status.err())
    }

    /// Playback length in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        let bytes_per_second = self.sample_rate as u64 * self.channels as u64 * 2;
        if bytes_per_second == 0 {
            return 0;
        }
        self.data.len() as u64 * 1000 / bytes_per_second
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
