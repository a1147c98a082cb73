//! Webhooks: embedded HTTP server and the dispatch table mapping inbound paths to callbacks.
//!
//! The platform POSTs `CONVERSATION.ADD_ITEM` events to `/newTextItem` and presence
//! changes to `/presence`; everything else is answered 404.

mod dispatch;
mod server;

pub use dispatch::{
    Dispatch, Dispatcher, PresenceCallback, TextItemCallback, NEW_TEXT_ITEM_PATH, PRESENCE_PATH,
};
pub use server::{router, WebhookServer};
