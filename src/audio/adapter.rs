//! # Audio Format Adapter
//!
//! Streaming transform from single-channel 16-bit little-endian PCM into
//! dual-channel 16-bit little-endian PCM. Every input sample is written twice,
//! once per channel.
//!
//! ## Chunk boundaries:
//! Input may arrive in chunks of any length, including odd lengths that split a
//! sample in half. The dangling byte is carried over and prefixed to the next
//! chunk, so splitting the input never changes the output.

use crate::error::{ResponderError, ResponderResult};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

/// Stateful mono to stereo converter.
///
/// ## Usage Example:
/// ```rust
/// let mut adapter = MonoToStereo::new();
/// let mut out = adapter.push(&first_chunk);
/// out.extend(adapter.push(&second_chunk));
/// adapter.finish()?;
/// ```
#[derive(Debug, Default)]
pub struct MonoToStereo {
    /// Low byte of a sample whose high byte has not arrived yet
    carry: Option<u8>,
}

impl MonoToStereo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one chunk of mono bytes, returning the stereo bytes ready so far.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut input: Vec<u8>;
        let bytes: &[u8] = match self.carry.take() {
            Some(low) => {
                input = Vec::with_capacity(chunk.len() + 1);
                input.push(low);
                input.extend_from_slice(chunk);
                &input
            }
            None => chunk,
        };

        let whole = bytes.len() - bytes.len() % 2;
        if whole < bytes.len() {
            self.carry = Some(bytes[whole]);
        }

        let mut output = Vec::with_capacity(whole * 2);
        for pair in bytes[..whole].chunks_exact(2) {
            let sample = LittleEndian::read_i16(pair);
            // Writing into a Vec cannot fail
            let _ = output.write_i16::<LittleEndian>(sample);
            let _ = output.write_i16::<LittleEndian>(sample);
        }
        output
    }

    /// End of stream. Fails with `TruncatedSample` if half a sample was left over.
    ///
    /// The dangling byte is discarded either way; callers log the error and move on.
    pub fn finish(&mut self) -> ResponderResult<()> {
        match self.carry.take() {
            Some(_) => Err(ResponderError::TruncatedSample { dropped_bytes: 1 }),
            None => Ok(()),
        }
    }

    /// Convert a complete mono buffer in one call.
    pub fn convert(data: &[u8]) -> (Vec<u8>, ResponderResult<()>) {
        let mut adapter = Self::new();
        let output = adapter.push(data);
        (output, adapter.finish())
    }
}
