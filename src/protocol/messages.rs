//! JSON message types for the realtime transcription protocol.
//!
//! Events are tagged by a `type` field using dotted names, e.g.
//! `input_audio_buffer.append`. Inbound events the client does not know
//! fold into `Unknown` so new server event types never break parsing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Events sent by the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Append base64-encoded 16-bit little-endian PCM to the remote buffer.
    #[serde(rename = "input_audio_buffer.append")]
    Append { audio: String },
    /// Finalize the remote buffer and request a transcription.
    #[serde(rename = "input_audio_buffer.commit")]
    Commit,
    /// Discard the remote buffer contents.
    #[serde(rename = "input_audio_buffer.clear")]
    Clear,
}

impl ClientEvent {
    /// Build an append event from raw PCM samples.
    pub fn append_pcm(samples: &[i16]) -> Self {
        ClientEvent::Append {
            audio: BASE64.encode(crate::buffer::to_le_bytes(samples)),
        }
    }

    /// Serialize to a JSON string for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Events received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: RemoteSession },
    #[serde(rename = "session.updated")]
    SessionUpdated { session: RemoteSession },
    #[serde(rename = "input_audio_buffer.committed")]
    Committed,
    #[serde(rename = "response.created")]
    ResponseCreated,
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseBody },
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    /// Any event type this client does not understand.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Server-side session descriptor from session.created/session.updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Payload of a response.done event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

/// One item of response output. Servers vary in the field name used for
/// the transcribed text, so `transcript` is accepted as an alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OutputItem {
    #[serde(default, alias = "transcript", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ResponseBody {
    /// The transcribed text, taken from the first output item that has any.
    pub fn transcript(&self) -> Option<&str> {
        self.output.iter().find_map(|item| item.text.as_deref())
    }
}

/// Payload of an error event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Client event tests

    #[test]
    fn test_append_wire_format() {
        let event = ClientEvent::Append {
            audio: "AAEC".to_string(),
        };
        let json = event.to_json().expect("should serialize");
        assert_eq!(
            json,
            r#"{"type":"input_audio_buffer.append","audio":"AAEC"}"#
        );
    }

    #[test]
    fn test_commit_wire_format() {
        let json = ClientEvent::Commit.to_json().expect("should serialize");
        assert_eq!(json, r#"{"type":"input_audio_buffer.commit"}"#);
    }

    #[test]
    fn test_clear_wire_format() {
        let json = ClientEvent::Clear.to_json().expect("should serialize");
        assert_eq!(json, r#"{"type":"input_audio_buffer.clear"}"#);
    }

    #[test]
    fn test_append_pcm_encodes_little_endian_base64() {
        let event = ClientEvent::append_pcm(&[0x0102, -1]);
        match event {
            ClientEvent::Append { audio } => {
                let decoded = BASE64.decode(&audio).expect("valid base64");
                assert_eq!(decoded, vec![0x02, 0x01, 0xff, 0xff]);
            }
            _ => panic!("expected Append"),
        }
    }

    // Server event tests

    #[test]
    fn test_parse_session_created() {
        let json = r#"{"type":"session.created","session":{"id":"sess_123","model":"base-v2"}}"#;
        let event = ServerEvent::from_json(json).expect("should parse");
        assert_eq!(
            event,
            ServerEvent::SessionCreated {
                session: RemoteSession {
                    id: "sess_123".to_string(),
                    model: Some("base-v2".to_string()),
                }
            }
        );
    }

    #[test]
    fn test_parse_session_created_without_model() {
        let json = r#"{"type":"session.created","session":{"id":"sess_123"}}"#;
        let event = ServerEvent::from_json(json).expect("should parse");
        match event {
            ServerEvent::SessionCreated { session } => {
                assert_eq!(session.id, "sess_123");
                assert_eq!(session.model, None);
            }
            _ => panic!("expected SessionCreated"),
        }
    }

    #[test]
    fn test_parse_committed() {
        let json = r#"{"type":"input_audio_buffer.committed"}"#;
        let event = ServerEvent::from_json(json).expect("should parse");
        assert_eq!(event, ServerEvent::Committed);
    }

    #[test]
    fn test_parse_response_done_with_transcript() {
        let json = r#"{"type":"response.done","response":{"status":"completed","output":[{"text":"hello world"}]}}"#;
        let event = ServerEvent::from_json(json).expect("should parse");
        match event {
            ServerEvent::ResponseDone { response } => {
                assert_eq!(response.status.as_deref(), Some("completed"));
                assert_eq!(response.transcript(), Some("hello world"));
            }
            _ => panic!("expected ResponseDone"),
        }
    }

    #[test]
    fn test_parse_response_done_transcript_field_alias() {
        let json =
            r#"{"type":"response.done","response":{"output":[{"transcript":"hi there"}]}}"#;
        let event = ServerEvent::from_json(json).expect("should parse");
        match event {
            ServerEvent::ResponseDone { response } => {
                assert_eq!(response.transcript(), Some("hi there"));
            }
            _ => panic!("expected ResponseDone"),
        }
    }

    #[test]
    fn test_parse_response_done_empty_output() {
        let json = r#"{"type":"response.done","response":{}}"#;
        let event = ServerEvent::from_json(json).expect("should parse");
        match event {
            ServerEvent::ResponseDone { response } => {
                assert_eq!(response.transcript(), None);
            }
            _ => panic!("expected ResponseDone"),
        }
    }

    #[test]
    fn test_parse_error_event() {
        let json = r#"{"type":"error","error":{"message":"buffer too small","code":"invalid_request"}}"#;
        let event = ServerEvent::from_json(json).expect("should parse");
        assert_eq!(
            event,
            ServerEvent::Error {
                error: ErrorBody {
                    message: "buffer too small".to_string(),
                    code: Some("invalid_request".to_string()),
                }
            }
        );
    }

    #[test]
    fn test_unknown_event_type_parses_to_unknown() {
        let json = r#"{"type":"conversation.item.created","item":{"id":"it_1"}}"#;
        let event = ServerEvent::from_json(json).expect("should parse");
        assert_eq!(event, ServerEvent::Unknown);
    }

    #[test]
    fn test_missing_type_field_is_an_error() {
        let json = r#"{"session":{"id":"sess_123"}}"#;
        assert!(ServerEvent::from_json(json).is_err());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(ServerEvent::from_json("not json at all").is_err());
    }
}
