//! # Audio Module
//!
//! Audio handling between the speech service and the voice transport.
//!
//! ## Key Components:
//! - **Format Adapter**: Streaming mono to stereo conversion for 16-bit PCM
//! - **Audio Clip**: Synthesized audio for one speakable unit, with its format
//!
//! ## Audio Format Requirements (voice transport):
//! - **Sample Rate**: 48kHz (48,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Stereo (2 channels, interleaved)
//! - **Encoding**: Little-endian signed integers

pub mod adapter; // Mono to stereo sample duplication
pub mod clip;    // Synthesized clip and WAV unwrapping

pub use clip::AudioClip;
