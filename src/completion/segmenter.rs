//! # Speakable Unit Segmentation
//!
//! Cuts streamed response text into units that can be synthesized on their own,
//! without waiting for the whole response.
//!
//! ## Boundaries:
//! - **Plain**: the earliest of `". "`, `"! "`, `"? "`, `"; "` in the buffer
//! - **Markup**: the closing `</speak>` tag
//!
//! Each unit runs up to and including its delimiter, so concatenating every
//! unit (plus the final remainder) reproduces the response byte-for-byte.

use crate::config::InputFormat;

const PLAIN_DELIMITERS: [&str; 4] = [". ", "! ", "? ", "; "];
const MARKUP_DELIMITERS: [&str; 1] = ["</speak>"];

/// A finalized span of response text, consumed once by the synthesis dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakableUnit {
    /// Position within the response, starting at 0
    pub index: usize,
    pub text: String,
    pub format: InputFormat,
}

/// Stateful segmenter for one response stream.
///
/// ## Usage Example:
/// ```rust
/// let mut segmenter = Segmenter::new(InputFormat::Plain);
/// for unit in segmenter.push("Hello there. How") { /* dispatch */ }
/// let last = segmenter.finish(); // Some("How")
/// ```
#[derive(Debug)]
pub struct Segmenter {
    format: InputFormat,
    buffer: String,
    next_index: usize,
}

impl Segmenter {
    pub fn new(format: InputFormat) -> Self {
        Self {
            format,
            buffer: String::new(),
            next_index: 0,
        }
    }

    fn delimiters(&self) -> &'static [&'static str] {
        match self.format {
            InputFormat::Plain => &PLAIN_DELIMITERS,
            InputFormat::Markup => &MARKUP_DELIMITERS,
        }
    }

    /// Append a text delta and return every unit it completes, in order.
    pub fn push(&mut self, delta: &str) -> Vec<SpeakableUnit> {
        self.buffer.push_str(delta);

        let mut units = Vec::new();
        while let Some(end) = self.next_boundary() {
            let rest = self.buffer.split_off(end);
            let text = std::mem::replace(&mut self.buffer, rest);
            units.push(self.make_unit(text));
        }
        units
    }

    /// End of stream: the non-empty remainder becomes the final unit.
    pub fn finish(&mut self) -> Option<SpeakableUnit> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        Some(self.make_unit(text))
    }

    /// Byte offset just past the earliest delimiter in the buffer.
    fn next_boundary(&self) -> Option<usize> {
        self.delimiters()
            .iter()
            .filter_map(|d| self.buffer.find(d).map(|pos| (pos, pos + d.len())))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, end)| end)
    }

    fn make_unit(&mut self, text: String) -> SpeakableUnit {
        let unit = SpeakableUnit {
            index: self.next_index,
            text,
            format: self.format,
        };
        self.next_index += 1;
        unit
    }
}

/// Segment a complete text in one pass.
#[cfg(test)]
pub fn segment_all(format: InputFormat, text: &str) -> Vec<SpeakableUnit> {
    let mut segmenter = Segmenter::new(format);
    let mut units = segmenter.push(text);
    units.extend(segmenter.finish());
    units
}
