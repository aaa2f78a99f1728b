//! # Speech Module
//!
//! - **client**: Remote speech synthesis behind the `SpeechSynthesizer` trait
//! - **dispatcher**: Per-response worker that synthesizes units in order and
//!   hands the clips to the voice session for playback

pub mod client;
pub mod dispatcher;

pub use client::{GoogleSpeechClient, SpeechSynthesizer};
pub use dispatcher::SynthesisDispatcher;

#[cfg(test)]
pub mod testing;
