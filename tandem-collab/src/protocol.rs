//! JSON wire protocol for collaboration rooms.
//!
//! Every frame is a WebSocket text message carrying an adjacently tagged
//! envelope:
//! ```text
//! { "type": "update_document", "payload": { "documentId": "...", "changes": [...] } }
//! ```
//!
//! Outbound (client → server) and inbound (server → client) messages are
//! closed enums, so dispatch is an exhaustive `match`. A frame whose `type`
//! is unknown or whose payload is missing a required field fails to decode;
//! callers drop it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::position::Position;

// ───────────────────────────────────────────────────────────────────
// Data model
// ───────────────────────────────────────────────────────────────────

/// Selected range; `start` should precede `end` in document order.
///
/// The ordering is not enforced: a backwards selection from a peer is
/// stored and forwarded as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: Position,
    pub end: Position,
}

/// Caret plus optional selection, in line/column coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl CursorPosition {
    pub fn caret(position: Position) -> Self {
        Self {
            line: position.line,
            column: position.column,
            selection: None,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

/// One connected identity in a room.
///
/// `id` is assigned by the server for the lifetime of one join; `user_id`
/// is the durable identity and may repeat across two sessions of the same
/// user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
}

/// Profile announced when joining a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub status: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Server copy of a document. `version` is advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub version: u64,
}

// ───────────────────────────────────────────────────────────────────
// Outbound payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    /// Previously granted id, `null` on a first join.
    pub participant_id: Option<String>,
    pub participant: ParticipantProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDocument {
    pub room_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Replace,
}

/// A positional change. This client only ever emits whole-document
/// replacements (`position` 0, `length` = previous char length).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub position: usize,
    pub length: usize,
    pub content: String,
    pub user_id: String,
}

impl DocumentChange {
    pub fn replace_all(previous_len: usize, content: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Replace,
            position: 0,
            length: previous_len,
            content: content.into(),
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocument {
    pub document_id: String,
    pub changes: Vec<DocumentChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCursor {
    pub cursor: CursorPosition,
}

// ───────────────────────────────────────────────────────────────────
// Inbound payloads
// ───────────────────────────────────────────────────────────────────

/// The joining participant as echoed back in `joined`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedParticipant {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedDocument {
    pub content: String,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Joined {
    #[serde(default)]
    pub participant: JoinedParticipant,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<JoinedDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantLeft {
    pub participant_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdated {
    pub content: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMoved {
    pub participant_id: String,
    pub cursor: CursorPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

// ───────────────────────────────────────────────────────────────────
// Envelopes
// ───────────────────────────────────────────────────────────────────

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom(JoinRoom),
    SyncDocument(SyncDocument),
    UpdateDocument(UpdateDocument),
    UpdateCursor(UpdateCursor),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom(_) => "join_room",
            ClientMessage::SyncDocument(_) => "sync_document",
            ClientMessage::UpdateDocument(_) => "update_document",
            ClientMessage::UpdateCursor(_) => "update_cursor",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined(Joined),
    ParticipantJoined(Participant),
    ParticipantLeft(ParticipantLeft),
    DocumentSync(DocumentSnapshot),
    DocumentUpdated(DocumentUpdated),
    CursorMoved(CursorMoved),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Joined(_) => "joined",
            ServerMessage::ParticipantJoined(_) => "participant_joined",
            ServerMessage::ParticipantLeft(_) => "participant_left",
            ServerMessage::DocumentSync(_) => "document_sync",
            ServerMessage::DocumentUpdated(_) => "document_updated",
            ServerMessage::CursorMoved(_) => "cursor_moved",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }
}

fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn profile() -> ParticipantProfile {
        ParticipantProfile {
            user_id: "u1".into(),
            username: "Alice".into(),
            role: "editor".into(),
            status: "online".into(),
            permissions: vec!["read".into(), "write".into()],
        }
    }

    #[test]
    fn test_join_room_wire_shape() {
        let msg = ClientMessage::JoinRoom(JoinRoom {
            room_id: "r1".into(),
            participant_id: None,
            participant: profile(),
        });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "join_room");
        assert_eq!(value["payload"]["roomId"], "r1");
        assert_eq!(value["payload"]["participantId"], Value::Null);
        assert_eq!(value["payload"]["participant"]["userId"], "u1");
        assert_eq!(value["payload"]["participant"]["permissions"], json!(["read", "write"]));
    }

    #[test]
    fn test_update_document_wire_shape() {
        let msg = ClientMessage::UpdateDocument(UpdateDocument {
            document_id: "doc".into(),
            changes: vec![DocumentChange::replace_all(3, "hello", "u1")],
        });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["type"], "update_document");
        assert_eq!(
            value["payload"]["changes"][0],
            json!({ "type": "replace", "position": 0, "length": 3, "content": "hello", "userId": "u1" })
        );
    }

    #[test]
    fn test_update_cursor_omits_missing_selection() {
        let msg = ClientMessage::UpdateCursor(UpdateCursor {
            cursor: CursorPosition::caret(Position::new(2, 4)),
        });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["payload"], json!({ "cursor": { "line": 2, "column": 4 } }));
    }

    #[test]
    fn test_decode_joined_with_minimal_payload() {
        let text = r#"{"type":"joined","payload":{"participant":{"id":"p-1"}}}"#;
        match ServerMessage::decode(text).unwrap() {
            ServerMessage::Joined(joined) => {
                assert_eq!(joined.participant.id.as_deref(), Some("p-1"));
                assert!(joined.participants.is_empty());
                assert!(joined.document.is_none());
            }
            other => panic!("expected joined, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_joined_full_payload() {
        let text = json!({
            "type": "joined",
            "payload": {
                "participant": { "id": "p-1", "userId": "u1", "username": "Alice" },
                "participants": [
                    { "id": "p-1", "userId": "u1", "username": "Alice" },
                    { "id": "p-2", "userId": "u2", "username": "Bob", "color": "#ff0000",
                      "cursor": { "line": 1, "column": 2 } }
                ],
                "document": { "content": "hi", "version": 4 }
            }
        })
        .to_string();

        let ServerMessage::Joined(joined) = ServerMessage::decode(&text).unwrap() else {
            panic!("expected joined");
        };
        assert_eq!(joined.participants.len(), 2);
        assert_eq!(joined.participants[1].color.as_deref(), Some("#ff0000"));
        assert_eq!(joined.participants[1].cursor.unwrap().position(), Position::new(1, 2));
        assert_eq!(joined.document.unwrap().version, 4);
    }

    #[test]
    fn test_decode_cursor_moved_with_selection() {
        let text = json!({
            "type": "cursor_moved",
            "payload": {
                "participantId": "p-2",
                "cursor": {
                    "line": 1, "column": 3,
                    "selection": { "start": { "line": 1, "column": 0 }, "end": { "line": 1, "column": 3 } }
                },
                "username": "Bob"
            }
        })
        .to_string();

        let ServerMessage::CursorMoved(moved) = ServerMessage::decode(&text).unwrap() else {
            panic!("expected cursor_moved");
        };
        assert_eq!(moved.participant_id, "p-2");
        assert_eq!(moved.cursor.selection.unwrap().end, Position::new(1, 3));
        assert!(moved.color.is_none());
        assert_eq!(moved.username.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        // document_updated without userId
        let text = r#"{"type":"document_updated","payload":{"content":"x"}}"#;
        assert!(ServerMessage::decode(text).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let text = r#"{"type":"explode","payload":{}}"#;
        assert!(ServerMessage::decode(text).is_err());
        assert!(ServerMessage::decode("not json").is_err());
    }

    #[test]
    fn test_server_message_kind_matches_tag() {
        let msg = ServerMessage::ParticipantLeft(ParticipantLeft { participant_id: "p".into() });
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], msg.kind());
    }
}
