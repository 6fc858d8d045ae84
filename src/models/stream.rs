use serde::{ Serialize, Deserialize };

/// Response header announcing the UI message stream framing.
pub const UI_MESSAGE_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const UI_MESSAGE_STREAM_VERSION: &str = "v1";

/// Payload of the final SSE frame.
pub const DONE_MARKER: &str = "[DONE]";

/// Error text sent to clients when provider errors are not exposed.
pub const MASKED_ERROR_TEXT: &str = "An error occurred.";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiMessageChunk {
    Start {
        #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    FinishStep,
    Finish,
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    Abort,
}

/// What one SSE `data:` payload of a UI message stream decodes to.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Chunk(UiMessageChunk),
    Done,
}

impl StreamFrame {
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        let data = data.trim();
        if data == DONE_MARKER {
            return Ok(StreamFrame::Done);
        }
        serde_json::from_str(data).map(StreamFrame::Chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_use_wire_names() {
        let start = UiMessageChunk::Start { message_id: Some("msg-1".into()) };
        assert_eq!(serde_json::to_string(&start).unwrap(), r#"{"type":"start","messageId":"msg-1"}"#);

        let delta = UiMessageChunk::TextDelta { id: "text-0".into(), delta: "Hi".into() };
        assert_eq!(
            serde_json::to_string(&delta).unwrap(),
            r#"{"type":"text-delta","id":"text-0","delta":"Hi"}"#
        );

        let error = UiMessageChunk::Error { error_text: "boom".into() };
        assert_eq!(serde_json::to_string(&error).unwrap(), r#"{"type":"error","errorText":"boom"}"#);

        assert_eq!(serde_json::to_string(&UiMessageChunk::FinishStep).unwrap(), r#"{"type":"finish-step"}"#);
    }

    #[test]
    fn parses_frames() {
        assert_eq!(StreamFrame::parse("[DONE]").unwrap(), StreamFrame::Done);
        assert_eq!(
            StreamFrame::parse(r#"{"type":"start"}"#).unwrap(),
            StreamFrame::Chunk(UiMessageChunk::Start { message_id: None })
        );
        assert_eq!(
            StreamFrame::parse(r#"{"type":"reasoning-delta","id":"r","delta":"x"}"#).unwrap(),
            StreamFrame::Chunk(UiMessageChunk::ReasoningDelta { id: "r".into(), delta: "x".into() })
        );
        assert!(StreamFrame::parse(r#"{"type":"nope"}"#).is_err());
    }
}
