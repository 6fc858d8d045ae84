use serde::{ Deserialize, Serialize };
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartState {
    Streaming,
    Done,
}

/// One piece of a message. Only text and reasoning are produced by the relay;
/// the other variants are accepted from clients so full histories round-trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<PartState>,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<PartState>,
    },
    File {
        #[serde(rename = "mediaType")]
        media_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    StepStart,
    #[serde(other)]
    Unsupported,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into(), state: Some(PartState::Done) }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            MessagePart::Text { state: Some(PartState::Streaming), .. } |
                MessagePart::Reasoning { state: Some(PartState::Streaming), .. }
        )
    }

    pub(crate) fn mark_done(&mut self) {
        match self {
            MessagePart::Text { state, .. } | MessagePart::Reasoning { state, .. } => {
                *state = Some(PartState::Done);
            }
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl UiMessage {
    pub fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self { id: Uuid::new_v4().to_string(), role, parts }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::text(text)])
    }

    /// Concatenation of every text part, in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| {
                match part {
                    MessagePart::Text { text, .. } => Some(text.as_str()),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        !self.parts.iter().any(MessagePart::is_streaming)
    }

    pub(crate) fn finalize(&mut self) {
        for part in &mut self.parts {
            part.mark_done();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestTrigger {
    SubmitMessage,
    RegenerateMessage,
}

/// Body of `POST /api/chat`: the whole conversation, newest message last.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub messages: Vec<UiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<RequestTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Body of `POST /api/completion`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
}
