//! HTTP client for the WhatsApp Web protocol bridge.
//!
//! The reverse-engineered wire protocol lives in a black-box bridge process;
//! this client drives it over HTTP: status and QR reads, sends, presence
//! updates, and a long-poll event stream carrying inbound messages and
//! connection transitions.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::providers::ProviderError;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Long-poll timeout; the events client waits this long for traffic.
const POLL_TIMEOUT_SECS: u64 = 60;

/// Client for the WhatsApp Web bridge HTTP API.
pub struct BridgeClient {
    client: reqwest::Client,
    poll_client: reqwest::Client,
    base_url: String,
}

/// Connection status reported by the bridge.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeStatus {
    /// Whether the bridge holds a live authenticated socket.
    pub connected: bool,
    /// Whether a persisted credential set exists (pairing can be skipped).
    #[serde(default)]
    pub has_session: bool,
    /// The operator's own JID, if connected.
    pub jid: Option<String>,
}

/// An event from the bridge's long-poll stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A message arrived (or was sent by us on another device).
    Message(BridgeMessage),
    /// Socket established and authenticated.
    Connected {
        /// Own JID after authentication.
        jid: Option<String>,
    },
    /// Socket closed.
    Disconnected {
        /// Human-readable close reason, if available.
        reason: Option<String>,
        /// True for a backend-signalled logout; reconnecting is pointless.
        #[serde(default)]
        logged_out: bool,
    },
    /// Pairing in progress; a fresh QR payload is available.
    Pairing {
        /// QR code payload (base64 PNG).
        qr: Option<String>,
    },
}

/// Inbound message shape on the bridge event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMessage {
    /// Backend message key.
    pub id: String,
    /// Chat the message belongs to (user JID or group JID).
    pub chat_jid: String,
    /// Individual sender JID (differs from `chat_jid` in groups).
    pub sender_jid: Option<String>,
    /// Text content.
    #[serde(default)]
    pub text: String,
    /// Whether this message was sent by us.
    #[serde(default)]
    pub from_me: bool,
    /// Millisecond timestamp.
    #[serde(default)]
    pub timestamp_ms: i64,
    /// Sender's push name.
    pub push_name: Option<String>,
    /// JIDs mentioned in the body (groups).
    #[serde(default)]
    pub mentioned_jids: Vec<String>,
    /// Group subject, when the chat is a group.
    pub group_subject: Option<String>,
    /// Download URL for an attached media item, if any.
    pub media_url: Option<String>,
    /// MIME type of the attached media item.
    pub media_mime: Option<String>,
}

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl BridgeClient {
    /// Create a new client pointing at the given base URL.
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        let poll_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build long-poll client, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            poll_client,
            base_url,
        }
    }

    /// Current connection status.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the bridge is unreachable.
    pub async fn status(&self) -> Result<BridgeStatus, ProviderError> {
        let url = format!("{}/status", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body: BridgeResponse<BridgeStatus> = resp.json().await?;
        body.data
            .ok_or_else(|| ProviderError::Transport("bridge returned no status".to_owned()))
    }

    /// Fetch the current pairing QR payload (base64 PNG), if one is pending.
    ///
    /// # Errors
    ///
    /// Returns an auth error when the bridge has no QR to offer.
    pub async fn qr(&self) -> Result<String, ProviderError> {
        let url = format!("{}/qr", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body: BridgeResponse<String> = resp.json().await?;
        body.data.ok_or_else(|| {
            ProviderError::Auth(
                body.error
                    .unwrap_or_else(|| "no QR code available".to_owned()),
            )
        })
    }

    /// Send a text message; returns the backend message key.
    ///
    /// # Errors
    ///
    /// Returns a transport error on HTTP failure or bridge rejection.
    pub async fn send_text(
        &self,
        jid: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/send", self.base_url);
        let body = serde_json::json!({ "jid": jid, "text": text, "reply_to": reply_to });
        self.post_for_id(&url, body, jid).await
    }

    /// Send a message with one media item; `media` is either a URL or
    /// base64-encoded bytes. Returns the backend message key.
    ///
    /// # Errors
    ///
    /// Returns a transport error on HTTP failure or bridge rejection.
    pub async fn send_media(
        &self,
        jid: &str,
        text: &str,
        media: BridgeMedia<'_>,
        reply_to: Option<&str>,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/send", self.base_url);
        let mut body = serde_json::json!({ "jid": jid, "text": text, "reply_to": reply_to });
        match media {
            BridgeMedia::Url { url: media_url, mime } => {
                body["media_url"] = serde_json::Value::String(media_url.to_owned());
                if let Some(mime) = mime {
                    body["mime"] = serde_json::Value::String(mime.to_owned());
                }
            }
            BridgeMedia::Base64 { data, mime, file_name } => {
                body["media_base64"] = serde_json::Value::String(data);
                if let Some(mime) = mime {
                    body["mime"] = serde_json::Value::String(mime.to_owned());
                }
                if let Some(name) = file_name {
                    body["file_name"] = serde_json::Value::String(name.to_owned());
                }
            }
        }
        self.post_for_id(&url, body, jid).await
    }

    async fn post_for_id(
        &self,
        url: &str,
        body: serde_json::Value,
        jid: &str,
    ) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct SendData {
            message_id: String,
        }

        let resp = self.client.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!(
                "bridge send returned {status}: {body_text}"
            )));
        }
        let envelope: BridgeResponse<SendData> = resp.json().await?;
        match envelope.data {
            Some(data) => {
                debug!(jid, message_id = %data.message_id, "message sent via bridge");
                Ok(data.message_id)
            }
            None => Err(ProviderError::Transport(
                envelope
                    .error
                    .unwrap_or_else(|| "bridge send returned no message id".to_owned()),
            )),
        }
    }

    /// Send a composing presence update. Fire-and-forget: typing indicators
    /// are cosmetic and must never block message delivery.
    pub async fn send_typing(&self, jid: &str) {
        let url = format!("{}/typing", self.base_url);
        let body = serde_json::json!({ "jid": jid });
        let _ = self.client.post(&url).json(&body).send().await;
    }

    /// Long-poll the bridge event stream once.
    ///
    /// A timeout is normal (no traffic); the caller retries immediately.
    ///
    /// # Errors
    ///
    /// Returns a transport error on non-timeout failures so the caller can
    /// apply reconnect backoff.
    pub async fn poll_events(&self) -> Result<Vec<BridgeEvent>, ProviderError> {
        let url = format!("{}/events/poll", self.base_url);
        match self.poll_client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let events: Vec<BridgeEvent> = resp.json().await?;
                Ok(events)
            }
            Ok(resp) => Err(ProviderError::Transport(format!(
                "event poll returned {}",
                resp.status()
            ))),
            Err(e) if e.is_timeout() => Ok(Vec::new()),
            Err(e) => Err(ProviderError::Transport(e.to_string())),
        }
    }

    /// Revoke the session server-side and clear the bridge's stored
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the bridge cannot be reached.
    pub async fn logout(&self) -> Result<(), ProviderError> {
        let url = format!("{}/logout", self.base_url);
        let resp = self.client.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Transport(format!(
                "bridge logout returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Media payload forms accepted by the bridge.
pub enum BridgeMedia<'a> {
    /// Remote URL the bridge fetches itself.
    Url {
        /// The remote location.
        url: &'a str,
        /// Declared MIME type.
        mime: Option<&'a str>,
    },
    /// In-memory bytes, base64-encoded for transport.
    Base64 {
        /// Encoded content.
        data: String,
        /// Declared MIME type.
        mime: Option<&'a str>,
        /// Original file name.
        file_name: Option<&'a str>,
    },
}
