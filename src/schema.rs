//! Wire types shared by the proxy server and the client session: chat
//! messages, request bodies for the JSON endpoints, and the `StreamEvent`
//! frame union carried over SSE.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry. Ids are client-generated and opaque; timestamps
/// are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: epoch_millis(),
        }
    }
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body of `POST /api/chat/stream` and `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

/// Body of `POST /api/html/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlRequest {
    #[serde(rename = "conversationContext")]
    pub conversation_context: String,
    #[serde(rename = "lastUserMessage")]
    pub last_user_message: String,
    #[serde(rename = "currentHtml", default)]
    pub current_html: Option<String>,
}

/// Response of the non-streaming `POST /api/chat` fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub message: String,
    pub html: Option<String>,
}

// ---------------------------------------------------------------------------
// SSE frame union
// ---------------------------------------------------------------------------

/// One JSON object per SSE frame. For a given request, the `*_chunk`
/// payloads concatenate in arrival order to exactly the text carried by
/// the matching `*_end` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ChatStart,
    ChatChunk {
        content: String,
    },
    ChatEnd {
        #[serde(rename = "fullMessage")]
        full_message: String,
    },
    HtmlStart,
    HtmlChunk {
        content: String,
    },
    HtmlEnd {
        #[serde(rename = "fullHtml")]
        full_html: Option<String>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_chat_message_new_generates_unique_ids() {
        let a = ChatMessage::new(Role::User, "hi");
        let b = ChatMessage::new(Role::User, "hi");
        assert_ne!(a.id, b.id);
        assert!(a.timestamp > 0);
    }

    #[test]
    fn test_chat_message_round_trip() {
        let json = r#"{"id":"m-1","role":"user","content":"Сколько стоит?","timestamp":1724800000000}"#;
        let msg: ChatMessage = serde_json::from_str(json).expect("deser failed");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Сколько стоит?");
        let back = serde_json::to_string(&msg).expect("ser failed");
        assert!(back.contains("\"role\":\"user\""));
    }

    #[test]
    fn test_chat_request_deserializes() {
        let json = r#"{"messages":[{"id":"1","role":"user","content":"hi","timestamp":1}]}"#;
        let req: ChatRequest = serde_json::from_str(json).expect("deser failed");
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_chat_request_rejects_bad_role() {
        let json = r#"{"messages":[{"id":"1","role":"system","content":"hi","timestamp":1}]}"#;
        assert!(serde_json::from_str::<ChatRequest>(json).is_err());
    }

    #[test]
    fn test_html_request_camel_case_fields() {
        let json = r#"{"conversationContext":"u: hi","lastUserMessage":"hi","currentHtml":"<div></div>"}"#;
        let req: HtmlRequest = serde_json::from_str(json).expect("deser failed");
        assert_eq!(req.conversation_context, "u: hi");
        assert_eq!(req.current_html.as_deref(), Some("<div></div>"));
    }

    #[test]
    fn test_html_request_current_html_optional() {
        let json = r#"{"conversationContext":"","lastUserMessage":"hi"}"#;
        let req: HtmlRequest = serde_json::from_str(json).expect("deser failed");
        assert!(req.current_html.is_none());
    }

    #[test]
    fn test_stream_event_tags() {
        assert_eq!(
            serde_json::to_string(&StreamEvent::ChatStart).unwrap(),
            r#"{"type":"chat_start"}"#
        );
        assert_eq!(
            serde_json::to_string(&StreamEvent::ChatChunk {
                content: "Та".to_string()
            })
            .unwrap(),
            r#"{"type":"chat_chunk","content":"Та"}"#
        );
    }

    #[test]
    fn test_stream_event_end_field_names() {
        let json = serde_json::to_string(&StreamEvent::ChatEnd {
            full_message: "done".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"fullMessage\":\"done\""));

        let json = serde_json::to_string(&StreamEvent::HtmlEnd { full_html: None }).unwrap();
        assert_eq!(json, r#"{"type":"html_end","fullHtml":null}"#);
    }

    #[test]
    fn test_stream_event_html_end_null_round_trip() {
        let ev: StreamEvent = serde_json::from_str(r#"{"type":"html_end","fullHtml":null}"#)
            .expect("deser failed");
        assert_eq!(ev, StreamEvent::HtmlEnd { full_html: None });
    }

    #[test]
    fn test_stream_event_error_round_trip() {
        let ev: StreamEvent =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).expect("deser failed");
        assert_eq!(
            ev,
            StreamEvent::Error {
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_stream_event_unknown_type_rejected() {
        assert!(serde_json::from_str::<StreamEvent>(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn test_ai_response_null_html() {
        let json = serde_json::to_string(&AiResponse {
            message: "hi".to_string(),
            html: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"message":"hi","html":null}"#);
    }
}
