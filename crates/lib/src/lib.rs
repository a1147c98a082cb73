//! Circuit client library: post chat messages into a Circuit conversation and receive
//! webhook-driven events (new text items, presence changes) through an embedded HTTP server.

pub mod api;
pub mod client;
pub mod config;
pub mod webhooks;

pub use api::{CircuitError, ConversationItem, Presence, PresenceState};
pub use client::CircuitClient;
