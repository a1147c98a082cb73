//! Circuit REST API v2 client (`https://<domain>/rest/v2`).

use crate::api::types::{
    ConversationItem, PostTextRequest, PresenceState, RegisterPresenceWebhookRequest,
    RegisterWebhookRequest, UserProfile, Webhook,
};
use crate::config::{self, CircuitConfig};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

const REST_API_VERSION_PATH: &str = "/rest/v2";
const CONVERSATIONS_PATH: &str = "/conversations/";
const MESSAGES_PATH: &str = "/messages";
const WEBHOOKS_PATH: &str = "/webhooks";
const PRESENCE_WEBHOOKS_PATH: &str = "/webhooks/presence";
const USER_PROFILE_PATH: &str = "/users/profile";
const USER_PRESENCE_PATH: &str = "/users/presence";

#[derive(Debug, thiserror::Error)]
pub enum CircuitError {
    #[error("circuit request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("circuit api error: {status} {body}")]
    Api { status: StatusCode, body: String },
    #[error("circuit credentials not configured")]
    MissingCredentials,
    #[error("no conversation id set")]
    MissingConversation,
    #[error("no public webhook url configured")]
    MissingWebhookUrl,
    #[error("no presence reported for user {0}")]
    UnknownUser(String),
    #[error("webhook server failed: {0}")]
    Server(#[source] std::io::Error),
}

/// Client for the Circuit REST API. Cheap to clone.
#[derive(Clone)]
pub struct RestClient {
    base_url: String,
    authorization: String,
    client: reqwest::Client,
}

impl RestClient {
    /// Build from config; fails when no credentials resolve.
    pub fn new(config: &CircuitConfig) -> Result<Self, CircuitError> {
        let authorization =
            config::resolve_authorization(config).ok_or(CircuitError::MissingCredentials)?;
        Ok(Self::with_authorization(
            config::resolve_base_url(config),
            authorization,
        ))
    }

    /// Build with an explicit base URL (scheme + host) and Authorization header value.
    pub fn with_authorization(base_url: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authorization: authorization.into(),
            client: reqwest::Client::new(),
        }
    }

    /// `<base>/rest/v2`
    pub fn api_url(&self) -> String {
        format!("{}{}", self.base_url, REST_API_VERSION_PATH)
    }

    pub fn messages_url(&self, conv_id: &str) -> String {
        format!(
            "{}{}{}{}",
            self.api_url(),
            CONVERSATIONS_PATH,
            conv_id,
            MESSAGES_PATH
        )
    }

    pub fn webhooks_url(&self) -> String {
        format!("{}{}", self.api_url(), WEBHOOKS_PATH)
    }

    pub fn presence_webhooks_url(&self) -> String {
        format!("{}{}", self.api_url(), PRESENCE_WEBHOOKS_PATH)
    }

    pub fn user_profile_url(&self) -> String {
        format!("{}{}", self.api_url(), USER_PROFILE_PATH)
    }

    pub fn user_presence_url(&self) -> String {
        format!("{}{}", self.api_url(), USER_PRESENCE_PATH)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
    }

    /// Send and map non-2xx responses to `CircuitError::Api`.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, CircuitError> {
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CircuitError::Api { status, body });
        }
        Ok(res)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, CircuitError> {
        let res = self.send(req).await?;
        Ok(res.json().await?)
    }

    /// POST `{"content": text}` to the conversation. Returns the created item.
    pub async fn post_text_message(
        &self,
        conv_id: &str,
        text: &str,
    ) -> Result<ConversationItem, CircuitError> {
        let url = self.messages_url(conv_id);
        log::debug!("posting text message to {}", url);
        let req = self
            .request(reqwest::Method::POST, &url)
            .json(&PostTextRequest { content: text });
        self.send_json(req).await
    }

    /// DELETE /webhooks: removes every webhook registered by this user.
    pub async fn delete_all_webhooks(&self) -> Result<(), CircuitError> {
        let url = self.webhooks_url();
        self.send(self.request(reqwest::Method::DELETE, &url)).await?;
        Ok(())
    }

    /// DELETE /webhooks/{id}.
    pub async fn delete_webhook(&self, id: &str) -> Result<(), CircuitError> {
        let url = format!("{}/{}", self.webhooks_url(), id);
        self.send(self.request(reqwest::Method::DELETE, &url)).await?;
        Ok(())
    }

    /// GET /webhooks.
    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>, CircuitError> {
        let url = self.webhooks_url();
        self.send_json(self.request(reqwest::Method::GET, &url)).await
    }

    /// POST /webhooks with the callback URL and event filters.
    pub async fn register_webhook(
        &self,
        callback_url: &str,
        filters: &[&str],
    ) -> Result<Webhook, CircuitError> {
        let url = self.webhooks_url();
        let body = RegisterWebhookRequest {
            url: callback_url,
            filter: filters.to_vec(),
        };
        self.send_json(self.request(reqwest::Method::POST, &url).json(&body))
            .await
    }

    /// POST /webhooks/presence for the given users.
    pub async fn register_presence_webhook(
        &self,
        callback_url: &str,
        user_ids: &[&str],
    ) -> Result<Webhook, CircuitError> {
        let url = self.presence_webhooks_url();
        let body = RegisterPresenceWebhookRequest {
            url: callback_url,
            user_ids: user_ids.to_vec(),
        };
        self.send_json(self.request(reqwest::Method::POST, &url).json(&body))
            .await
    }

    /// GET /users/profile for the authenticated user.
    pub async fn get_user_profile(&self) -> Result<UserProfile, CircuitError> {
        let url = self.user_profile_url();
        self.send_json(self.request(reqwest::Method::GET, &url)).await
    }

    /// GET /users/presence?userIds=<id>.
    pub async fn get_user_presence(&self, user_id: &str) -> Result<PresenceState, CircuitError> {
        let url = self.user_presence_url();
        let req = self
            .request(reqwest::Method::GET, &url)
            .query(&[("userIds", user_id)]);
        let states: Vec<PresenceState> = self.send_json(req).await?;
        states
            .into_iter()
            .find(|s| s.user_id == user_id)
            .ok_or_else(|| CircuitError::UnknownUser(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::with_authorization("https://circuitsandbox.net/", "Basic abc")
    }

    #[test]
    fn builds_v2_urls() {
        let c = client();
        assert_eq!(c.api_url(), "https://circuitsandbox.net/rest/v2");
        assert_eq!(
            c.messages_url("conv-1"),
            "https://circuitsandbox.net/rest/v2/conversations/conv-1/messages"
        );
        assert_eq!(c.webhooks_url(), "https://circuitsandbox.net/rest/v2/webhooks");
        assert_eq!(
            c.presence_webhooks_url(),
            "https://circuitsandbox.net/rest/v2/webhooks/presence"
        );
        assert_eq!(
            c.user_profile_url(),
            "https://circuitsandbox.net/rest/v2/users/profile"
        );
        assert_eq!(
            c.user_presence_url(),
            "https://circuitsandbox.net/rest/v2/users/presence"
        );
    }

    #[test]
    fn new_requires_credentials() {
        let mut config = CircuitConfig::default();
        config.auth.mode = crate::config::CircuitAuthMode::Bearer;
        if std::env::var("CIRCUIT_TOKEN").is_err() {
            assert!(matches!(
                RestClient::new(&config),
                Err(CircuitError::MissingCredentials)
            ));
        }
    }
}
