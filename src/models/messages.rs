use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::presence::{CursorPosition, PresenceEntry};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinDocumentMessage {
    pub document_id: String,
    pub document_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LeaveDocumentMessage {
    pub document_id: String,
    pub document_type: String,
}

/// A whole-document replacement. The content tree is opaque to the
/// collaboration layer; it is relayed and persisted without inspection.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContentChangeMessage {
    pub document_id: String,
    pub document_type: String,
    pub content: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorPositionMessage {
    pub document_id: String,
    pub document_type: String,
    pub position: CursorPosition,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdateMessage {
    pub content: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdateMessage {
    pub user_id: String,
    pub user_name: String,
    pub user_initials: String,
    pub position: CursorPosition,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsersMessage {
    pub users: Vec<PresenceEntry>,
}

/// Messages a client sends to the coordination server.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join-document")]
    Join(JoinDocumentMessage),
    #[serde(rename = "leave-document")]
    Leave(LeaveDocumentMessage),
    #[serde(rename = "content-change")]
    ContentChange(ContentChangeMessage),
    #[serde(rename = "cursor-position")]
    CursorPosition(CursorPositionMessage),
}

/// Messages the coordination server pushes to clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "content-update")]
    ContentUpdate(ContentUpdateMessage),
    #[serde(rename = "cursor-update")]
    CursorUpdate(CursorUpdateMessage),
    #[serde(rename = "active-users")]
    ActiveUsers(ActiveUsersMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_message_tag_round_trip() {
        let msg = ClientMessage::Join(JoinDocumentMessage {
            document_id: "d1".into(),
            document_type: "project".into(),
        });
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains(r#""type":"join-document""#));
        assert!(text.contains(r#""documentId":"d1""#));

        match serde_json::from_str::<ClientMessage>(&text).unwrap() {
            ClientMessage::Join(join) => assert_eq!(join.document_type, "project"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn content_change_carries_opaque_tree() {
        let text = r#"{
            "type": "content-change",
            "documentId": "d1",
            "documentType": "project",
            "content": {"doc": {"blocks": [{"text": "hello"}]}}
        }"#;
        match serde_json::from_str::<ClientMessage>(text).unwrap() {
            ClientMessage::ContentChange(change) => {
                assert_eq!(change.content["doc"]["blocks"][0]["text"], json!("hello"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_fails_to_parse() {
        let text = r#"{"type": "rename-document", "documentId": "d1"}"#;
        assert!(serde_json::from_str::<ClientMessage>(text).is_err());
    }

    #[test]
    fn cursor_update_without_position_fails_to_parse() {
        let text = r#"{"type": "cursor-update", "userId": "u1", "userName": "Ana", "userInitials": "A"}"#;
        assert!(serde_json::from_str::<ServerMessage>(text).is_err());
    }
}
