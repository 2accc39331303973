//! Incremental decoder for `text/event-stream` bodies.
//!
//! Network chunks split lines at arbitrary byte offsets, so the decoder keeps
//! the unfinished tail between pushes and only yields complete `data:` lines.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decode_line(&line) {
                let done = event == SseEvent::Done;
                events.push(event);
                if done {
                    self.finished = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    /// Flushes a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.finished || self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.finished = true;
        self.decode_line(&line)
    }

    fn decode_line(&self, raw: &[u8]) -> Option<SseEvent> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);

        // Blank lines end an event; lines starting with ':' are keep-alives.
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let payload = line.strip_prefix("data:")?.trim_start();
        if payload == "[DONE]" {
            Some(SseEvent::Done)
        } else if payload.is_empty() {
            None
        } else {
            Some(SseEvent::Data(payload.to_string()))
        }
    }
}
