//! Circuit REST API: URL building, request envelopes and response types.

mod rest;
mod types;

pub use rest::{CircuitError, RestClient};
pub use types::{
    ConversationItem, ItemText, Presence, PresenceState, UserProfile, Webhook, WebhookEvent,
    EVENT_USER_PRESENCE_CHANGE, FILTER_CONVERSATION_ADD_ITEM,
};
