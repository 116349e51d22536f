//! Frame reassembly for delimiter-based wire protocols
//!
//! Inbound bytes arrive in arbitrary chunks; a [`FrameSplitter`] buffers
//! them and extracts complete frames delimited by an optional start
//! sequence and a mandatory end sequence.

use tracing::debug;

/// Receive buffer ceiling. A buffer that grows past this without yielding
/// a frame is considered desynchronized and is dropped wholesale.
pub const MAX_BUFFER_SIZE: usize = 4096;

/// Frame delimiter configuration for one channel.
///
/// The end sequence drives extraction: without one, the splitter buffers
/// up to the ceiling and never emits a frame. The start sequence is
/// optional; when present, anything before it is discarded.
#[derive(Debug, Clone, Default)]
pub struct Framing {
    /// Optional start-of-frame byte sequence
    pub start: Option<Vec<u8>>,
    /// End-of-frame byte sequence (required for extraction to make progress)
    pub end: Option<Vec<u8>>,
}

impl Framing {
    /// Frames delimited by an end sequence only (e.g. CR or CRLF)
    pub fn end_delimited(end: &[u8]) -> Self {
        Self {
            start: None,
            end: Some(end.to_vec()),
        }
    }

    /// Frames bracketed by a start and an end sequence (e.g. STX/ETX)
    pub fn bracketed(start: &[u8], end: &[u8]) -> Self {
        Self {
            start: Some(start.to_vec()),
            end: Some(end.to_vec()),
        }
    }
}

/// Streaming splitter that turns raw byte chunks into discrete frames.
///
/// Owned by a channel's inbound task; not shared across threads.
pub struct FrameSplitter {
    framing: Framing,
    buffer: Vec<u8>,
    /// Whether a start sequence has been consumed and the frame body is
    /// being collected. Always false when no start sequence is configured.
    synced: bool,
}

impl FrameSplitter {
    /// Create a splitter for the given delimiters
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            synced: false,
        }
    }

    /// Append a chunk and return every frame completed by it.
    ///
    /// The extracted payload excludes both delimiters. Yields the same
    /// frames regardless of how the input is chunked.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            if let Some(start) = self.framing.start.as_deref().filter(|s| !s.is_empty()) {
                if !self.synced {
                    let Some(idx) = find_sequence(&self.buffer, start) else {
                        break; // start marker not here yet
                    };
                    if idx > 0 {
                        debug!(dropped = idx, "discarding bytes before start sequence");
                    }
                    self.buffer.drain(..idx + start.len());
                    self.synced = true;
                }
            }

            let Some(end) = self.framing.end.as_deref().filter(|e| !e.is_empty()) else {
                break; // no end sequence configured: never extract
            };
            let Some(idx) = find_sequence(&self.buffer, end) else {
                break; // frame incomplete
            };

            frames.push(self.buffer[..idx].to_vec());
            self.buffer.drain(..idx + end.len());
            self.synced = false;
        }

        if self.buffer.len() > MAX_BUFFER_SIZE {
            debug!(
                len = self.buffer.len(),
                "receive buffer exceeded ceiling without a frame, clearing"
            );
            self.clear();
        }

        frames
    }

    /// Drop all buffered bytes and resynchronize
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.synced = false;
    }

    /// Number of bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Find the first occurrence of `seq` in `buffer`
fn find_sequence(buffer: &[u8], seq: &[u8]) -> Option<usize> {
    if seq.is_empty() || buffer.len() < seq.len() {
        return None;
    }
    buffer.windows(seq.len()).position(|w| w == seq)
}
