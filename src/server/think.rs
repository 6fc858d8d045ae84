//! Splits model output into visible text and `<think>` reasoning.
//!
//! Tags may arrive cut across provider chunks (`"<thi"` + `"nk>"`), so a
//! possible tag prefix at the end of the input is held back until the next
//! chunk decides it.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Reasoning(String),
}

#[derive(Debug, Default)]
pub struct ThinkTagSplitter {
    pending: String,
    in_thinking_section: bool,
    after_close: bool,
}

impl ThinkTagSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        self.pending.push_str(chunk);
        let mut segments = Vec::new();

        loop {
            let tag = if self.in_thinking_section { CLOSE_TAG } else { OPEN_TAG };
            if let Some(pos) = self.pending.find(tag) {
                let before: String = self.pending.drain(..pos).collect();
                self.pending.drain(..tag.len());
                self.emit(before, &mut segments);
                self.in_thinking_section = !self.in_thinking_section;
                self.after_close = !self.in_thinking_section;
                continue;
            }

            let keep = partial_tag_len(&self.pending, tag);
            let ready: String = self.pending.drain(..self.pending.len() - keep).collect();
            self.emit(ready, &mut segments);
            break;
        }

        segments
    }

    /// Flushes held-back text once the provider stream has ended.
    pub fn finish(&mut self) -> Vec<Segment> {
        let rest = std::mem::take(&mut self.pending);
        let mut segments = Vec::new();
        self.emit(rest, &mut segments);
        segments
    }

    fn emit(&mut self, text: String, segments: &mut Vec<Segment>) {
        if self.in_thinking_section {
            if !text.is_empty() {
                segments.push(Segment::Reasoning(text));
            }
            return;
        }

        let text = if self.after_close {
            let trimmed = text.trim_start_matches(['\r', '\n']);
            if trimmed.is_empty() {
                return;
            }
            self.after_close = false;
            trimmed.to_string()
        } else {
            text
        };
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| text.ends_with(&tag[..k]))
        .unwrap_or(0)
}
