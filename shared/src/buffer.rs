use crate::{payload_width, DELIMITER};

/// Reassembles frames from a TCP byte stream.
///
/// A segment is complete once the next delimiter arrives, or as soon as it
/// holds the full fixed width of its tag. Anything before the first delimiter
/// is noise and dropped.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Returns every complete frame body (delimiter stripped, trimmed), in order.
    pub fn drain_frames(&mut self) -> Vec<String> {
        let pending = std::mem::take(&mut self.pending);
        let mut frames = Vec::new();

        let Some(start) = pending.find(DELIMITER) else {
            return frames;
        };

        let mut segments: Vec<&str> = pending[start + DELIMITER.len_utf8()..]
            .split(DELIMITER)
            .collect();
        let tail = segments.pop().unwrap_or_default();

        for segment in segments {
            let segment = segment.trim();
            if !segment.is_empty() {
                frames.push(segment.to_string());
            }
        }

        if is_complete(tail) {
            let tail = tail.trim();
            if !tail.is_empty() {
                frames.push(tail.to_string());
            }
        } else {
            self.pending = format!("{DELIMITER}{tail}");
        }

        frames
    }

    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}

fn is_complete(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    // A lone digit may be the start of an identity prefix.
    if bytes.len() == 1 && bytes[0].is_ascii_digit() {
        return false;
    }
    let prefix = if bytes.len() >= 2 && bytes[..2].iter().all(u8::is_ascii_digit) {
        2
    } else {
        0
    };
    let Some(&tag) = bytes.get(prefix) else {
        return false;
    };
    match payload_width(tag as char) {
        Some(width) => bytes.len() >= prefix + 1 + width,
        // Unknown tags are handed on so the decoder can reject them.
        None => true,
    }
}
