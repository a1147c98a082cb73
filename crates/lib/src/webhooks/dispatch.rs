//! Dispatch table: inbound webhook events to registered callbacks.
//!
//! Text items are delivered only for the current conversation and never for items the
//! client posted itself. Presence changes are delivered per subscribed user id.

use crate::api::{
    ConversationItem, PresenceState, WebhookEvent, EVENT_USER_PRESENCE_CHANGE,
    FILTER_CONVERSATION_ADD_ITEM,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Path the platform POSTs new conversation items to.
pub const NEW_TEXT_ITEM_PATH: &str = "/newTextItem";
/// Path the platform POSTs presence changes to.
pub const PRESENCE_PATH: &str = "/presence";

/// Most recent posted item ids kept for echo suppression.
const POSTED_ITEMS_CAPACITY: usize = 64;

/// Runs inside the webhook request handler; must not block. Hand slow work to a task or channel.
pub type TextItemCallback = Arc<dyn Fn(ConversationItem) + Send + Sync>;
/// Runs inside the webhook request handler; must not block.
pub type PresenceCallback = Arc<dyn Fn(PresenceState) + Send + Sync>;

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    Ignored(&'static str),
}

/// Registered callbacks and the ids used to filter events. Shared between client and server.
#[derive(Default)]
pub struct Dispatcher {
    conversation_id: RwLock<Option<String>>,
    own_user_id: RwLock<Option<String>>,
    posted_items: RwLock<VecDeque<String>>,
    on_text_item: RwLock<Option<TextItemCallback>>,
    on_presence: RwLock<HashMap<String, PresenceCallback>>,
}

impl Dispatcher {
    pub fn new(conversation_id: Option<String>) -> Self {
        Self {
            conversation_id: RwLock::new(conversation_id),
            ..Self::default()
        }
    }

    /// Set the current conversation. A blank id clears it.
    pub async fn set_conversation_id(&self, conv_id: impl Into<String>) {
        let conv_id = conv_id.into();
        *self.conversation_id.write().await = Some(conv_id.trim().to_string()).filter(|c| !c.is_empty());
    }

    pub async fn conversation_id(&self) -> Option<String> {
        self.conversation_id.read().await.clone()
    }

    /// User id of the authenticated account; its own items are not echoed back.
    pub async fn set_own_user_id(&self, user_id: impl Into<String>) {
        *self.own_user_id.write().await = Some(user_id.into());
    }

    pub async fn own_user_id(&self) -> Option<String> {
        self.own_user_id.read().await.clone()
    }

    /// Remember an item this client posted so its webhook echo is dropped.
    /// Learns the own user id from the item creator when it is not known yet.
    pub async fn remember_posted(&self, item: &ConversationItem) {
        {
            let mut posted = self.posted_items.write().await;
            if posted.len() == POSTED_ITEMS_CAPACITY {
                posted.pop_front();
            }
            posted.push_back(item.item_id.clone());
        }
        if let Some(creator) = item.creator_id.as_deref() {
            let mut own = self.own_user_id.write().await;
            if own.is_none() {
                log::debug!("own user id learned from posted item: {}", creator);
                *own = Some(creator.to_string());
            }
        }
    }

    /// Replace the text item callback.
    pub async fn set_on_text_item(&self, callback: TextItemCallback) {
        *self.on_text_item.write().await = Some(callback);
    }

    /// Set the presence callback for one user. Returns true if the user was already subscribed.
    pub async fn set_on_presence(&self, user_id: impl Into<String>, callback: PresenceCallback) -> bool {
        self.on_presence
            .write()
            .await
            .insert(user_id.into(), callback)
            .is_some()
    }

    pub async fn presence_user_ids(&self) -> Vec<String> {
        self.on_presence.read().await.keys().cloned().collect()
    }

    /// Deliver a `CONVERSATION.ADD_ITEM` event to the text item callback if it passes the filters.
    pub async fn dispatch_text_item(&self, event: WebhookEvent) -> Dispatch {
        if event.typ != FILTER_CONVERSATION_ADD_ITEM {
            return Dispatch::Ignored("not an add-item event");
        }
        let Some(item) = event.item else {
            return Dispatch::Ignored("event has no item");
        };
        if !item.is_text() {
            return Dispatch::Ignored("item is not a text item");
        }
        match self.conversation_id.read().await.as_deref() {
            Some(conv) if conv == item.conv_id => {}
            _ => return Dispatch::Ignored("item belongs to another conversation"),
        }
        if self.posted_items.read().await.contains(&item.item_id) {
            return Dispatch::Ignored("item was posted by this client");
        }
        if let (Some(own), Some(creator)) = (
            self.own_user_id.read().await.as_deref(),
            item.creator_id.as_deref(),
        ) {
            if own == creator {
                return Dispatch::Ignored("item was posted by this client");
            }
        }
        let callback = self.on_text_item.read().await.clone();
        let Some(callback) = callback else {
            return Dispatch::Ignored("no text item callback registered");
        };
        log::info!("received text item {}: {}", item.item_id, item.content());
        callback(item);
        Dispatch::Delivered
    }

    /// Deliver a `USER.USER_PRESENCE_CHANGE` event to the callback registered for that user.
    pub async fn dispatch_presence(&self, event: WebhookEvent) -> Dispatch {
        if event.typ != EVENT_USER_PRESENCE_CHANGE {
            return Dispatch::Ignored("not a presence event");
        }
        let Some(state) = event.new_state else {
            return Dispatch::Ignored("event has no presence state");
        };
        let callback = self.on_presence.read().await.get(&state.user_id).cloned();
        let Some(callback) = callback else {
            return Dispatch::Ignored("user is not subscribed");
        };
        log::info!("presence of {} changed to {}", state.user_id, state.state);
        callback(state);
        Dispatch::Delivered
    }
}
