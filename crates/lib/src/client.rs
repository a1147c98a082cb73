//! `CircuitClient`: post text messages and subscribe to text items and presence changes.
//!
//! The webhook server is started lazily on the first callback registration. [`CircuitClient::run`]
//! keeps serving until SIGINT/SIGTERM or [`CircuitClient::shutdown`], then removes the webhooks
//! this client registered.

use crate::api::{
    CircuitError, ConversationItem, Presence, PresenceState, RestClient, Webhook,
    FILTER_CONVERSATION_ADD_ITEM,
};
use crate::config::{self, Config};
use crate::webhooks::{Dispatcher, WebhookServer, NEW_TEXT_ITEM_PATH, PRESENCE_PATH};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

pub struct CircuitClient {
    config: Config,
    rest: RestClient,
    dispatcher: Arc<Dispatcher>,
    server: Mutex<Option<WebhookServer>>,
    registered: Mutex<Registrations>,
    shutdown: Notify,
}

/// Webhooks registered by this client, removed on shutdown. One per callback slot.
#[derive(Default)]
struct Registrations {
    text: Option<Webhook>,
    presence: HashMap<String, Webhook>,
}

impl Registrations {
    fn drain_ids(&mut self) -> Vec<String> {
        self.text
            .take()
            .into_iter()
            .chain(self.presence.drain().map(|(_, w)| w))
            .map(|w| w.id)
            .collect()
    }
}

impl CircuitClient {
    /// Build a client without touching the network. Fails when no credentials are configured.
    pub fn new(config: Config) -> Result<Self, CircuitError> {
        let rest = RestClient::new(&config.circuit)?;
        Ok(Self::with_rest_client(config, rest))
    }

    /// Build a client around an existing REST client (custom endpoint or auth).
    pub fn with_rest_client(config: Config, rest: RestClient) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            config
                .circuit
                .conversation_id
                .clone()
                .filter(|c| !c.trim().is_empty()),
        ));
        Self {
            config,
            rest,
            dispatcher,
            server: Mutex::new(None),
            registered: Mutex::new(Registrations::default()),
            shutdown: Notify::new(),
        }
    }

    /// Build a client, delete webhooks left over from earlier runs and look up the own user id.
    /// Network failures here are logged; the client is still usable.
    pub async fn connect(config: Config) -> Result<Self, CircuitError> {
        let client = Self::new(config)?;
        match client.rest.delete_all_webhooks().await {
            Ok(()) => log::info!("deleted all circuit webhooks"),
            Err(e) => log::warn!("deleting webhooks failed: {}", e),
        }
        match client.rest.get_user_profile().await {
            Ok(profile) => {
                log::info!("authenticated as user {}", profile.user_id);
                client.dispatcher.set_own_user_id(profile.user_id).await;
            }
            Err(e) => log::warn!("fetching user profile failed: {}", e),
        }
        Ok(client)
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Switch the current conversation. A blank id clears it.
    pub async fn set_conversation_id(&self, conv_id: impl Into<String>) {
        self.dispatcher.set_conversation_id(conv_id).await;
    }

    pub async fn conversation_id(&self) -> Option<String> {
        self.dispatcher.conversation_id().await
    }

    async fn require_conversation(&self) -> Result<String, CircuitError> {
        self.conversation_id()
            .await
            .ok_or(CircuitError::MissingConversation)
    }

    /// Post a text message to the current conversation.
    pub async fn post_text_message(&self, text: &str) -> Result<ConversationItem, CircuitError> {
        let conv_id = self.require_conversation().await.map_err(|e| {
            log::warn!("cannot post message without conversation id");
            e
        })?;
        let item = self.rest.post_text_message(&conv_id, text).await?;
        log::info!("posted text item {} to {}", item.item_id, conv_id);
        self.dispatcher.remember_posted(&item).await;
        Ok(item)
    }

    /// Current presence of a user.
    pub async fn get_user_presence(&self, user_id: &str) -> Result<Presence, CircuitError> {
        Ok(self.rest.get_user_presence(user_id).await?.state)
    }

    /// Invoke `callback` for every text item added to the current conversation by someone else.
    /// Starts the webhook server if needed and registers a `CONVERSATION.ADD_ITEM` webhook.
    /// Calling it again only swaps the callback; the existing webhook is kept.
    pub async fn set_on_new_text_item_callback<F>(&self, callback: F) -> Result<Webhook, CircuitError>
    where
        F: Fn(ConversationItem) + Send + Sync + 'static,
    {
        if self.conversation_id().await.is_none() {
            log::warn!("cannot register for text items without conversation id");
            return Err(CircuitError::MissingConversation);
        }
        let mut registered = self.registered.lock().await;
        if let Some(webhook) = &registered.text {
            self.dispatcher.set_on_text_item(Arc::new(callback)).await;
            log::debug!("replaced text item callback, keeping webhook {}", webhook.id);
            return Ok(webhook.clone());
        }

        let callback_url = self.callback_url(NEW_TEXT_ITEM_PATH)?;
        self.ensure_server().await?;
        let webhook = self
            .rest
            .register_webhook(&callback_url, &[FILTER_CONVERSATION_ADD_ITEM])
            .await?;
        log::info!("registered text item webhook {} -> {}", webhook.id, callback_url);
        self.dispatcher.set_on_text_item(Arc::new(callback)).await;
        registered.text = Some(webhook.clone());
        drop(registered);
        self.log_webhooks().await;
        Ok(webhook)
    }

    /// Invoke `callback` whenever the presence of `user_id` changes.
    /// One webhook is registered per user; calling it again for the same user swaps the callback.
    pub async fn set_on_user_presence_change<F>(
        &self,
        user_id: &str,
        callback: F,
    ) -> Result<Webhook, CircuitError>
    where
        F: Fn(PresenceState) + Send + Sync + 'static,
    {
        let mut registered = self.registered.lock().await;
        if let Some(webhook) = registered.presence.get(user_id) {
            self.dispatcher.set_on_presence(user_id, Arc::new(callback)).await;
            log::debug!("replaced presence callback for {}, keeping webhook {}", user_id, webhook.id);
            return Ok(webhook.clone());
        }

        let callback_url = self.callback_url(PRESENCE_PATH)?;
        self.ensure_server().await?;
        let webhook = self
            .rest
            .register_presence_webhook(&callback_url, &[user_id])
            .await?;
        log::info!("registered presence webhook {} for {}", webhook.id, user_id);
        self.dispatcher.set_on_presence(user_id, Arc::new(callback)).await;
        registered.presence.insert(user_id.to_string(), webhook.clone());
        drop(registered);
        self.log_webhooks().await;
        Ok(webhook)
    }

    /// Address the webhook server is bound to, once started.
    pub async fn server_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|s| s.local_addr())
    }

    /// Serve webhooks until SIGINT/SIGTERM or [`CircuitClient::shutdown`], then clean up.
    pub async fn run(&self) {
        if self.server.lock().await.is_none() {
            log::warn!("no callbacks registered; waiting for shutdown without a webhook server");
        }
        tokio::select! {
            _ = shutdown_signal() => {},
            _ = self.shutdown.notified() => {},
        }
        log::info!("shutting down circuit client");
        self.close().await;
    }

    /// Ask a pending [`CircuitClient::run`] to return.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Delete the webhooks registered by this client and stop the server.
    pub async fn close(&self) {
        let ids = self.registered.lock().await.drain_ids();
        for id in ids {
            if let Err(e) = self.rest.delete_webhook(&id).await {
                log::debug!("deleting webhook {} on shutdown: {}", id, e);
            }
        }
        if let Some(server) = self.server.lock().await.take() {
            server.stop().await;
        }
    }

    fn callback_url(&self, path: &str) -> Result<String, CircuitError> {
        let base = config::resolve_webhook_url(&self.config).ok_or(CircuitError::MissingWebhookUrl)?;
        Ok(format!("{}{}", base, path))
    }

    async fn ensure_server(&self) -> Result<(), CircuitError> {
        let mut server = self.server.lock().await;
        if server.is_none() {
            let started = WebhookServer::start(
                &self.config.webhooks.bind,
                self.config.webhooks.port,
                self.dispatcher.clone(),
            )
            .await
            .map_err(CircuitError::Server)?;
            *server = Some(started);
        }
        Ok(())
    }

    async fn log_webhooks(&self) {
        match self.rest.list_webhooks().await {
            Ok(hooks) => {
                for h in hooks {
                    log::debug!("webhook {} -> {} {:?}", h.id, h.url, h.filter);
                }
            }
            Err(e) => log::debug!("listing webhooks failed: {}", e),
        }
    }
}

/// Completes on SIGINT or SIGTERM. A handler that cannot be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}
