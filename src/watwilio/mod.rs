//! WhatsApp Business provider over the Twilio REST API.
//!
//! Stateless REST client: sends are form POSTs to `Messages.json`, inbound
//! is a poll loop over the same collection (see [`poll`]), and delivery
//! status is read per message SID. There is no socket to keep alive, so
//! `is_connected` is a local boolean set by a successful credential check.

pub mod poll;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{TwilioAuth, TwilioEnv};
use crate::identifiers;
use crate::providers::{
    DeliveryState, DeliveryStatus, InboundHandler, ListenOptions, MediaSource, Provider,
    ProviderCapabilities, ProviderContext, ProviderError, ProviderKind, SendOptions, SendResult,
    SendStatus,
};

/// Twilio REST API base.
pub(crate) const API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// HTTP timeout for REST calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// WhatsApp-over-Twilio provider.
pub struct TwilioProvider {
    env: TwilioEnv,
    client: reqwest::Client,
    caps: ProviderCapabilities,
    connected: AtomicBool,
    handler: Mutex<Option<InboundHandler>>,
    listener: Mutex<Option<ListenerHandle>>,
}

struct ListenerHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// Message resource subset returned by the Twilio API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TwilioMessage {
    pub sid: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub body: Option<String>,
    pub status: Option<String>,
    pub direction: Option<String>,
    pub date_sent: Option<String>,
    pub num_media: Option<String>,
    pub error_code: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl TwilioProvider {
    /// Create an uninitialised provider from the environment credential set.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] listing every missing or
    /// inconsistent variable.
    pub fn new(_ctx: ProviderContext) -> Result<Self, ProviderError> {
        let env = TwilioEnv::from_env().map_err(|issues| {
            ProviderError::Config(format!("Twilio environment: {}", issues.join("; ")))
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Ok(Self {
            env,
            client,
            caps: ProviderCapabilities::for_kind(ProviderKind::WaTwilio),
            connected: AtomicBool::new(false),
            handler: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ProviderError> {
        let (user, pass) = auth_pair(&self.env);
        let resp = self
            .client
            .get(url)
            .basic_auth(user, Some(pass))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!(
                "Twilio API returned {status}: {body}"
            )));
        }
        Ok(resp.json::<T>().await?)
    }
}

/// Basic-auth username/password pair for the configured credential form.
pub(crate) fn auth_pair(env: &TwilioEnv) -> (String, String) {
    match &env.auth {
        TwilioAuth::Token(token) => (env.account_sid.clone(), token.clone()),
        TwilioAuth::ApiKey { key, secret } => (key.clone(), secret.clone()),
    }
}

/// Operator's own number in canonical `+E164` form.
pub(crate) fn own_number(env: &TwilioEnv) -> String {
    env.whatsapp_from
        .strip_prefix("whatsapp:")
        .unwrap_or(&env.whatsapp_from)
        .to_owned()
}

/// Map a Twilio message status string into the normalised delivery state.
pub fn map_delivery_state(status: &str) -> DeliveryState {
    match status {
        "sent" | "sending" | "queued" => DeliveryState::Sent,
        "delivered" => DeliveryState::Delivered,
        "read" => DeliveryState::Read,
        "failed" | "undelivered" | "canceled" => DeliveryState::Failed,
        _ => DeliveryState::Unknown,
    }
}

#[async_trait]
impl Provider for TwilioProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WaTwilio
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.caps
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        // One short authenticated read verifies the credential set.
        let url = format!("{API_BASE}/Accounts/{}.json", self.env.account_sid);
        let _: serde_json::Value = self
            .get_json(&url)
            .await
            .map_err(|e| ProviderError::Auth(format!("Twilio credential check failed: {e}")))?;
        self.connected.store(true, Ordering::SeqCst);
        info!(account = %self.env.account_sid, "Twilio provider initialised");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.stop_listening().await;
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, to: &str, body: &str, options: &SendOptions) -> SendResult {
        let canonical = match identifiers::normalize(to, ProviderKind::WaTwilio) {
            Ok(c) => c,
            Err(e) => return SendResult::failed(format!("unrecognised recipient: {e}")),
        };

        // Only the first media item is honoured; URL sources only.
        let media_url = match options.media.first() {
            None => None,
            Some(att) => {
                if att.size.is_some_and(|s| s > self.caps.max_media_size) {
                    return SendResult::failed(format!(
                        "media exceeds Twilio limit of {} bytes",
                        self.caps.max_media_size
                    ));
                }
                match &att.source {
                    MediaSource::Url(url) => Some(url.clone()),
                    MediaSource::Bytes(_) | MediaSource::Path(_) => {
                        return SendResult::failed(
                            "Twilio media must be provided as a URL".to_owned(),
                        );
                    }
                }
            }
        };

        let url = format!("{API_BASE}/Accounts/{}/Messages.json", self.env.account_sid);
        let to_param = format!("whatsapp:{canonical}");
        let mut form: Vec<(&str, String)> = vec![("To", to_param), ("Body", body.to_owned())];
        // Explicit sender and messaging service are mutually exclusive.
        if let Some(sender_sid) = &self.env.sender_sid {
            form.push(("MessagingServiceSid", sender_sid.clone()));
        } else {
            form.push(("From", self.env.whatsapp_from.clone()));
        }
        if let Some(media) = media_url {
            form.push(("MediaUrl", media));
        }

        let (user, pass) = auth_pair(&self.env);
        let resp = match self
            .client
            .post(&url)
            .basic_auth(user, Some(pass))
            .form(&form)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return SendResult::failed(format!("Twilio request failed: {e}")),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<serde_json::Value>(&body_text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
                .unwrap_or(body_text);
            return SendResult::failed(format!("Twilio rejected send ({status}): {reason}"));
        }

        match resp.json::<TwilioMessage>().await {
            Ok(msg) => {
                debug!(sid = %msg.sid, "Twilio message accepted");
                let mut result = SendResult::sent(msg.sid.clone());
                if msg.status.as_deref() == Some("queued") {
                    result.status = SendStatus::Queued;
                }
                result.with_meta("sid", msg.sid)
            }
            Err(e) => SendResult::failed(format!("Twilio response unreadable: {e}")),
        }
    }

    async fn send_typing(&self, _to: &str) {
        // The REST API has no typing indicator; never fail the caller.
        debug!("typing indicator unsupported on Twilio, ignoring");
    }

    async fn delivery_status(&self, message_id: &str) -> DeliveryStatus {
        let url = format!(
            "{API_BASE}/Accounts/{}/Messages/{message_id}.json",
            self.env.account_sid
        );
        match self.get_json::<TwilioMessage>(&url).await {
            Ok(msg) => {
                let state = msg
                    .status
                    .as_deref()
                    .map(map_delivery_state)
                    .unwrap_or(DeliveryState::Unknown);
                let error = match (&msg.error_code, &msg.error_message) {
                    (Some(code), Some(message)) => Some(format!("{code}: {message}")),
                    (Some(code), None) => Some(code.to_string()),
                    (None, Some(message)) => Some(message.clone()),
                    (None, None) => None,
                };
                DeliveryStatus {
                    state,
                    error,
                    checked_at: chrono::Utc::now(),
                }
            }
            Err(e) => {
                warn!(message_id, error = %e, "delivery status lookup failed");
                DeliveryStatus::unknown()
            }
        }
    }

    fn on_message(&self, handler: InboundHandler) {
        if let Ok(mut slot) = self.handler.try_lock() {
            *slot = Some(handler);
        }
    }

    async fn start_listening(&self, options: ListenOptions) -> Result<(), ProviderError> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            debug!("Twilio listener already running");
            return Ok(());
        }
        let handler = self
            .handler
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Internal("no inbound handler registered".to_owned()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = poll::spawn_poll_loop(
            Arc::new(PollDeps {
                env: self.env.clone(),
                client: self.client.clone(),
                handler,
            }),
            options,
            stop_rx,
        );
        *listener = Some(ListenerHandle { stop_tx, task });
        info!("Twilio poll listener started");
        Ok(())
    }

    async fn stop_listening(&self) {
        let handle = self.listener.lock().await.take();
        if let Some(ListenerHandle { stop_tx, task }) = handle {
            let _ = stop_tx.send(true);
            // Await settlement so in-flight handler invocations complete.
            if let Err(e) = task.await {
                warn!(error = %e, "Twilio poll task panicked during shutdown");
            }
            info!("Twilio poll listener stopped");
        }
    }

    async fn is_authenticated(&self) -> bool {
        TwilioEnv::is_complete()
    }

    async fn login(&self) -> Result<(), ProviderError> {
        // Credential verification is the whole login flow for a REST backend.
        self.initialize().await
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        // Nothing is persisted locally; credentials live in the environment.
        info!("Twilio provider holds no local state; remove env credentials to revoke");
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn session_id(&self) -> Option<String> {
        Some(self.env.account_sid.clone())
    }
}

/// Shared dependencies for the poll loop task.
pub(crate) struct PollDeps {
    pub env: TwilioEnv,
    pub client: reqwest::Client,
    pub handler: InboundHandler,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_state_mapping() {
        assert_eq!(map_delivery_state("sent"), DeliveryState::Sent);
        assert_eq!(map_delivery_state("sending"), DeliveryState::Sent);
        assert_eq!(map_delivery_state("queued"), DeliveryState::Sent);
        assert_eq!(map_delivery_state("delivered"), DeliveryState::Delivered);
        assert_eq!(map_delivery_state("read"), DeliveryState::Read);
        assert_eq!(map_delivery_state("failed"), DeliveryState::Failed);
        assert_eq!(map_delivery_state("undelivered"), DeliveryState::Failed);
        assert_eq!(map_delivery_state("canceled"), DeliveryState::Failed);
        assert_eq!(map_delivery_state("accepted"), DeliveryState::Unknown);
    }

    #[test]
    fn own_number_strips_prefix() {
        let env = TwilioEnv {
            account_sid: "AC1".to_owned(),
            auth: TwilioAuth::Token("t".to_owned()),
            whatsapp_from: "whatsapp:+15551234567".to_owned(),
            sender_sid: None,
        };
        assert_eq!(own_number(&env), "+15551234567");
    }
}
