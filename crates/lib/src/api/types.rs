//! REST and webhook wire types (camelCase JSON).

use serde::{Deserialize, Serialize};

/// Webhook filter for new conversation items.
pub const FILTER_CONVERSATION_ADD_ITEM: &str = "CONVERSATION.ADD_ITEM";

/// Event type for presence webhooks.
pub const EVENT_USER_PRESENCE_CHANGE: &str = "USER.USER_PRESENCE_CHANGE";

/// Body of `POST /conversations/{convId}/messages`.
#[derive(Debug, Clone, Serialize)]
pub struct PostTextRequest<'a> {
    pub content: &'a str,
}

/// Body of `POST /webhooks`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterWebhookRequest<'a> {
    pub url: &'a str,
    pub filter: Vec<&'a str>,
}

/// Body of `POST /webhooks/presence`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPresenceWebhookRequest<'a> {
    pub url: &'a str,
    pub user_ids: Vec<&'a str>,
}

/// A registered webhook as returned by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub filter: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

/// Subset of `GET /users/profile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

/// Availability state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Presence {
    Available,
    Busy,
    Away,
    Dnd,
    Offline,
    #[serde(other)]
    Unknown,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Available => "AVAILABLE",
            Presence::Busy => "BUSY",
            Presence::Away => "AWAY",
            Presence::Dnd => "DND",
            Presence::Offline => "OFFLINE",
            Presence::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence of one user (REST response item and presence webhook payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub user_id: String,
    pub state: Presence,
    #[serde(default)]
    pub status_message: Option<String>,
}

/// Text part of a conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemText {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub subject: Option<String>,
}

/// A conversation item (`POST .../messages` response and `CONVERSATION.ADD_ITEM` payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationItem {
    pub item_id: String,
    /// "TEXT", "RTC", "SYSTEM", ...
    #[serde(rename = "type", default)]
    pub typ: String,
    pub conv_id: String,
    #[serde(default)]
    pub creator_id: Option<String>,
    /// Unix ms.
    #[serde(default)]
    pub creation_time: Option<i64>,
    #[serde(default)]
    pub text: Option<ItemText>,
}

impl ConversationItem {
    pub fn is_text(&self) -> bool {
        self.typ.eq_ignore_ascii_case("TEXT")
    }

    /// Message body, empty when the item carries no text.
    pub fn content(&self) -> &str {
        self.text.as_ref().map(|t| t.content.as_str()).unwrap_or("")
    }

    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.creation_time
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
    }
}

/// Inbound webhook body: `{ "type", "item" | "newState" }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type", default)]
    pub typ: String,
    #[serde(default)]
    pub item: Option<ConversationItem>,
    #[serde(default, alias = "presenceState")]
    pub new_state: Option<PresenceState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_parses_known_and_unknown_states() {
        let p: Vec<Presence> =
            serde_json::from_str(r#"["AVAILABLE","BUSY","AWAY","DND","OFFLINE","INVISIBLE"]"#)
                .unwrap();
        assert_eq!(
            p,
            vec![
                Presence::Available,
                Presence::Busy,
                Presence::Away,
                Presence::Dnd,
                Presence::Offline,
                Presence::Unknown
            ]
        );
        assert_eq!(Presence::Dnd.to_string(), "DND");
    }

    #[test]
    fn add_item_event_exposes_text_content() {
        let body = r#"{
            "type": "CONVERSATION.ADD_ITEM",
            "item": {
                "itemId": "i-1",
                "type": "TEXT",
                "convId": "c-1",
                "creatorId": "u-2",
                "creationTime": 1553126400000,
                "text": { "content": "hello \"device\"" }
            }
        }"#;
        let ev: WebhookEvent = serde_json::from_str(body).unwrap();
        assert_eq!(ev.typ, FILTER_CONVERSATION_ADD_ITEM);
        let item = ev.item.unwrap();
        assert!(item.is_text());
        assert_eq!(item.content(), "hello \"device\"");
        assert_eq!(
            item.created_at().map(|t| t.to_rfc3339()),
            Some("2019-03-21T00:00:00+00:00".to_string())
        );
    }

    #[test]
    fn presence_event_accepts_both_field_names() {
        let a: WebhookEvent = serde_json::from_str(
            r#"{"type":"USER.USER_PRESENCE_CHANGE","newState":{"userId":"u","state":"BUSY"}}"#,
        )
        .unwrap();
        let b: WebhookEvent = serde_json::from_str(
            r#"{"type":"USER.USER_PRESENCE_CHANGE","presenceState":{"userId":"u","state":"AWAY"}}"#,
        )
        .unwrap();
        assert_eq!(a.new_state.unwrap().state, Presence::Busy);
        assert_eq!(b.new_state.unwrap().state, Presence::Away);
    }

    #[test]
    fn post_text_request_escapes_content() {
        let body = serde_json::to_string(&PostTextRequest {
            content: "say \"hi\"",
        })
        .unwrap();
        assert_eq!(body, r#"{"content":"say \"hi\""}"#);
    }
}
