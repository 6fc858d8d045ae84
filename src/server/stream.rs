//! Converts a provider chunk stream into UI message stream chunks.

use async_stream::stream;
use futures::{ Stream, StreamExt };
use log::{ debug, error, info };

use super::think::{ Segment, ThinkTagSplitter };
use crate::llm::chat::ChunkStream;
use crate::models::stream::{ UiMessageChunk, MASKED_ERROR_TEXT };

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub extract_reasoning: bool,
    pub expose_errors: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { extract_reasoning: true, expose_errors: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartKind {
    Text,
    Reasoning,
}

/// Opens text and reasoning parts lazily and closes the current one whenever
/// the kind of output switches.
#[derive(Default)]
struct PartWriter {
    open: Option<(PartKind, String)>,
    next_id: usize,
}

impl PartWriter {
    fn write(&mut self, segment: Segment) -> Vec<UiMessageChunk> {
        let (kind, delta) = match segment {
            Segment::Text(text) => (PartKind::Text, text),
            Segment::Reasoning(text) => (PartKind::Reasoning, text),
        };
        if delta.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::with_capacity(3);
        if self.open.as_ref().map(|(open, _)| *open) != Some(kind) {
            chunks.extend(self.close());
            let id = match kind {
                PartKind::Text => format!("text-{}", self.next_id),
                PartKind::Reasoning => format!("reasoning-{}", self.next_id),
            };
            self.next_id += 1;
            chunks.push(match kind {
                PartKind::Text => UiMessageChunk::TextStart { id: id.clone() },
                PartKind::Reasoning => UiMessageChunk::ReasoningStart { id: id.clone() },
            });
            self.open = Some((kind, id));
        }

        if let Some((_, id)) = &self.open {
            let id = id.clone();
            chunks.push(match kind {
                PartKind::Text => UiMessageChunk::TextDelta { id, delta },
                PartKind::Reasoning => UiMessageChunk::ReasoningDelta { id, delta },
            });
        }
        chunks
    }

    fn close(&mut self) -> Option<UiMessageChunk> {
        self.open.take().map(|(kind, id)| {
            match kind {
                PartKind::Text => UiMessageChunk::TextEnd { id },
                PartKind::Reasoning => UiMessageChunk::ReasoningEnd { id },
            }
        })
    }
}

/// Logs when the response is dropped before the provider stream finished,
/// which is what happens when the client goes away mid-generation.
struct DisconnectGuard {
    message_id: String,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            info!("Client disconnected during message {}; provider stream released", self.message_id);
        }
    }
}

/// Wraps the outcome of opening a provider stream into the chunk sequence a
/// UI client expects: `start`, `start-step`, the parts, then either
/// `finish-step`/`finish` or a single `error`.
pub fn ui_message_stream(
    message_id: String,
    upstream: ChunkStream,
    options: StreamOptions
) -> impl Stream<Item = UiMessageChunk> + Send {
    stream! {
        let mut upstream = upstream;
        let mut guard = DisconnectGuard { message_id: message_id.clone(), finished: false };
        let mut writer = PartWriter::default();
        let mut splitter = options.extract_reasoning.then(ThinkTagSplitter::new);

        yield UiMessageChunk::Start { message_id: Some(message_id.clone()) };
        yield UiMessageChunk::StartStep;

        while let Some(item) = upstream.next().await {
            match item {
                Ok(text) => {
                    let segments = match splitter.as_mut() {
                        Some(splitter) => splitter.push(&text),
                        None => vec![Segment::Text(text)],
                    };
                    for segment in segments {
                        for chunk in writer.write(segment) {
                            yield chunk;
                        }
                    }
                }
                Err(e) => {
                    error!("Provider stream failed for message {}: {}", message_id, e);
                    let error_text = if options.expose_errors {
                        e.to_string()
                    } else {
                        MASKED_ERROR_TEXT.to_string()
                    };
                    guard.finished = true;
                    yield UiMessageChunk::Error { error_text };
                    return;
                }
            }
        }

        if let Some(splitter) = splitter.as_mut() {
            for segment in splitter.finish() {
                for chunk in writer.write(segment) {
                    yield chunk;
                }
            }
        }
        if let Some(chunk) = writer.close() {
            yield chunk;
        }

        debug!("Message {} complete", message_id);
        guard.finished = true;
        yield UiMessageChunk::FinishStep;
        yield UiMessageChunk::Finish;
    }
}
