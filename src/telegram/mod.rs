//! Telegram provider over the native client protocol (grammers).
//!
//! Credentials are an (`api_id`, `api_hash`) pair from the environment plus
//! a session token persisted at `telegram/session/session.string`. Login is
//! the interactive three-stage flow in [`login`]; media staging and
//! classification live in [`media`]. Delivery status is always `unknown`:
//! the backend exposes no reliable write-through acknowledgement.

pub mod login;
pub mod media;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use grammers_client::types::Chat;
use grammers_client::{Client, Config as GrammersConfig, InitParams, InputMessage, Update};
use grammers_session::Session;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::identifiers::{self, telegram_namespaced};
use crate::providers::{
    ChatContext, DeliveryStatus, InboundHandler, InboundMessage, ListenOptions, MediaKind,
    Provider, ProviderCapabilities, ProviderContext, ProviderError, ProviderFatal, ProviderKind,
    SendOptions, SendResult,
};
use crate::tempstore;

/// Bounded timeout for the initial connect handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Consecutive update-stream errors tolerated before going fatal.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Telegram provider.
pub struct TelegramProvider {
    ctx: ProviderContext,
    env: crate::config::TelegramEnv,
    caps: ProviderCapabilities,
    http: reqwest::Client,
    temp_dir: PathBuf,
    client: Mutex<Option<Client>>,
    connected: AtomicBool,
    handler: Mutex<Option<InboundHandler>>,
    listener: Mutex<Option<ListenerHandle>>,
}

struct ListenerHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// Whether a persisted Telegram session token exists on disk.
pub fn has_session(paths: &crate::paths::StatePaths) -> bool {
    paths.telegram_session_file().exists() || paths.telegram_session_file_legacy().exists()
}

impl TelegramProvider {
    /// Create an uninitialised provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] listing missing credentials.
    pub fn new(ctx: ProviderContext) -> Result<Self, ProviderError> {
        let env = crate::config::TelegramEnv::from_env().map_err(|issues| {
            ProviderError::Config(format!("Telegram environment: {}", issues.join("; ")))
        })?;
        let temp_dir = match std::env::var(tempstore::TEMP_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => ctx.paths.telegram_temp_dir(),
        };
        Ok(Self {
            ctx,
            env,
            caps: ProviderCapabilities::for_kind(ProviderKind::Telegram),
            http: reqwest::Client::new(),
            temp_dir,
            client: Mutex::new(None),
            connected: AtomicBool::new(false),
            handler: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    fn session_path(&self) -> PathBuf {
        self.ctx.paths.telegram_session_file()
    }

    async fn client(&self) -> Option<Client> {
        self.client.lock().await.clone()
    }

    /// Resolve a send target into a chat, per the entity-resolution rules:
    /// `@username`, E.164 phone, or decimal id, with the `telegram:` prefix
    /// stripped, and one retry prefixed with `@` when the raw form fails.
    async fn resolve_target(&self, client: &Client, to: &str) -> Result<Chat, ProviderError> {
        let canonical = identifiers::normalize(to, ProviderKind::Telegram)
            .map_err(|e| ProviderError::NotFound(format!("unrecognised recipient: {e}")))?;

        if let Some(chat) = self.resolve_raw(client, &canonical).await? {
            return Ok(chat);
        }
        // Retry once with an @ prefix; usernames are often given bare.
        if !canonical.starts_with('@') {
            let retried = format!("@{}", canonical.trim_start_matches('+'));
            if let Some(chat) = self.resolve_raw(client, &retried).await? {
                return Ok(chat);
            }
        }
        Err(ProviderError::NotFound(format!(
            "could not resolve Telegram recipient {canonical:?}"
        )))
    }

    async fn resolve_raw(
        &self,
        client: &Client,
        canonical: &str,
    ) -> Result<Option<Chat>, ProviderError> {
        if let Some(name) = canonical.strip_prefix('@') {
            return client
                .resolve_username(name)
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()));
        }

        if canonical.chars().all(|c| c.is_ascii_digit()) {
            let wanted: i64 = canonical
                .parse()
                .map_err(|_| ProviderError::NotFound(format!("invalid user id {canonical:?}")))?;
            return self
                .find_dialog(client, |chat| chat.id() == wanted)
                .await;
        }

        if let Some(digits) = canonical.strip_prefix('+') {
            let wanted = digits.to_owned();
            return self
                .find_dialog(client, move |chat| match chat {
                    Chat::User(user) => user
                        .phone()
                        .map(|p| p.trim_start_matches('+') == wanted)
                        .unwrap_or(false),
                    _ => false,
                })
                .await;
        }

        Ok(None)
    }

    async fn find_dialog(
        &self,
        client: &Client,
        pred: impl Fn(&Chat) -> bool,
    ) -> Result<Option<Chat>, ProviderError> {
        let mut dialogs = client.iter_dialogs();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?
        {
            if pred(dialog.chat()) {
                return Ok(Some(dialog.chat().clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Provider for TelegramProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Telegram
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.caps
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let session = login::load_session(&self.session_path())
            .or_else(|| login::load_session(&self.ctx.paths.telegram_session_file_legacy()))
            .unwrap_or_else(Session::new);

        let config = GrammersConfig {
            session,
            api_id: self.env.api_id,
            api_hash: self.env.api_hash.clone(),
            params: InitParams::default(),
        };

        let client = tokio::time::timeout(CONNECT_TIMEOUT, Client::connect(config))
            .await
            .map_err(|_| ProviderError::Transport("Telegram connect timed out".to_owned()))?
            .map_err(|e| ProviderError::Transport(format!("Telegram connect failed: {e}")))?;

        *self.client.lock().await = Some(client);
        self.connected.store(true, Ordering::SeqCst);

        // Crash leftovers from earlier streaming downloads.
        let swept = tempstore::sweep_orphans(&self.temp_dir, tempstore::ORPHAN_TTL);
        if swept > 0 {
            info!(swept, "swept orphan temp downloads");
        }

        info!("Telegram provider initialised");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.stop_listening().await;
        *self.client.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, to: &str, body: &str, options: &SendOptions) -> SendResult {
        let Some(client) = self.client().await else {
            return SendResult::failed("Telegram provider not initialised".to_owned());
        };

        let chat = match self.resolve_target(&client, to).await {
            Ok(chat) => chat,
            Err(e) => return SendResult::failed(e.to_string()),
        };

        // Only the first media item is honoured; it is staged on disk with
        // the size ceiling enforced before any backend traffic.
        let staged = match options.media.first() {
            None => None,
            Some(att) => {
                match media::stage_outbound(att, &self.http, &self.temp_dir, self.caps.max_media_size)
                    .await
                {
                    Ok(staged) => Some(staged),
                    Err(reason) => return SendResult::failed(reason),
                }
            }
        };

        let reply_to = options.reply_to.as_deref().and_then(|id| id.parse::<i32>().ok());

        let outcome = deliver(&client, &chat, body, reply_to, staged.as_ref()).await;

        // The staged temp file is released on every outcome.
        if let Some(staged) = staged {
            staged.release();
        }

        match outcome {
            Ok(message_id) => {
                SendResult::sent(message_id).with_meta("user_id", chat.id().to_string())
            }
            Err(reason) => SendResult::failed(reason),
        }
    }

    async fn send_typing(&self, _to: &str) {
        // Typing is not part of this provider's capability surface.
        debug!("typing indicator unsupported on Telegram, ignoring");
    }

    async fn delivery_status(&self, _message_id: &str) -> DeliveryStatus {
        DeliveryStatus::unknown()
    }

    fn on_message(&self, handler: InboundHandler) {
        if let Ok(mut slot) = self.handler.try_lock() {
            *slot = Some(handler);
        }
    }

    async fn start_listening(&self, options: ListenOptions) -> Result<(), ProviderError> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() {
            debug!("Telegram listener already running");
            return Ok(());
        }
        let Some(client) = self.client().await else {
            return Err(ProviderError::Internal(
                "start_listening before initialize".to_owned(),
            ));
        };
        let handler = self
            .handler
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Internal("no inbound handler registered".to_owned()))?;

        let own = client
            .get_me()
            .await
            .map(|me| describe_user_handle(me.username(), me.id()))
            .unwrap_or_else(|_| "unknown".to_owned());

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_update_loop(client, handler, own, self.temp_dir.clone(), options, stop_rx);
        *listener = Some(ListenerHandle { stop_tx, task });
        info!("Telegram listener started");
        Ok(())
    }

    async fn stop_listening(&self) {
        let handle = self.listener.lock().await.take();
        if let Some(ListenerHandle { stop_tx, task }) = handle {
            let _ = stop_tx.send(true);
            if let Err(e) = task.await {
                warn!(error = %e, "Telegram update task panicked during shutdown");
            }
            info!("Telegram listener stopped");
        }
    }

    async fn is_authenticated(&self) -> bool {
        if let Some(client) = self.client().await {
            if let Ok(authorised) = client.is_authorized().await {
                return authorised;
            }
        }
        has_session(&self.ctx.paths)
    }

    async fn login(&self) -> Result<(), ProviderError> {
        if self.client().await.is_none() {
            self.initialize().await?;
        }
        let Some(client) = self.client().await else {
            return Err(ProviderError::Internal("client unavailable".to_owned()));
        };
        login::run_login(&client, &self.session_path()).await
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        self.stop_listening().await;
        if let Some(client) = self.client().await {
            if let Err(e) = client.sign_out().await {
                warn!(error = %e, "server-side sign-out failed, erasing local state anyway");
            }
        }
        login::erase_session(
            &self.session_path(),
            &self.ctx.paths.telegram_session_file_legacy(),
        );
        *self.client.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
        info!("Telegram session revoked and erased");
        Ok(())
    }

    async fn session_id(&self) -> Option<String> {
        let client = self.client().await?;
        client.get_me().await.ok().map(|me| me.id().to_string())
    }
}

/// Upload any staged media, assemble the input message, and send it.
///
/// # Errors
///
/// Returns a human-readable reason; the caller shapes it into a failed
/// [`SendResult`].
async fn deliver(
    client: &Client,
    chat: &Chat,
    body: &str,
    reply_to: Option<i32>,
    staged: Option<&media::StagedMedia>,
) -> Result<String, String> {
    let mut input = InputMessage::text(body);

    if let Some(staged) = staged {
        let uploaded = client
            .upload_file(&staged.path)
            .await
            .map_err(|e| format!("media upload failed: {e}"))?;
        input = if staged.kind == MediaKind::Image {
            input.photo(uploaded)
        } else {
            input.document(uploaded)
        };
    }
    if let Some(id) = reply_to {
        input = input.reply_to(Some(id));
    }

    client
        .send_message(chat, input)
        .await
        .map(|message| message.id().to_string())
        .map_err(|e| format!("Telegram send failed: {e}"))
}

/// Sender identity in preference order: `@username`, phone, decimal id,
/// `unknown`.
fn describe_sender(chat: &Chat) -> String {
    match chat {
        Chat::User(user) => {
            if let Some(name) = user.username() {
                format!("@{}", name.to_ascii_lowercase())
            } else if let Some(phone) = user.phone() {
                format!("+{}", phone.trim_start_matches('+'))
            } else {
                user.id().to_string()
            }
        }
        _ => "unknown".to_owned(),
    }
}

fn describe_user_handle(username: Option<&str>, id: i64) -> String {
    username
        .map(|name| format!("@{}", name.to_ascii_lowercase()))
        .unwrap_or_else(|| id.to_string())
}

// ---------------------------------------------------------------------------
// Update loop
// ---------------------------------------------------------------------------

fn spawn_update_loop(
    client: Client,
    handler: InboundHandler,
    own: String,
    temp_dir: PathBuf,
    options: ListenOptions,
    mut stop_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        debug!("Telegram update loop stopping");
                        break;
                    }
                }
                update = client.next_update() => match update {
                    Ok(Update::NewMessage(message)) => {
                        consecutive_errors = 0;
                        // Our own outgoing traffic is not inbound.
                        if message.outgoing() {
                            continue;
                        }
                        if let Some(inbound) =
                            build_inbound(&client, &own, &temp_dir, &message).await
                        {
                            handler(inbound).await;
                        }
                    }
                    Ok(_) => {
                        consecutive_errors = 0;
                    }
                    Err(e) => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        warn!(
                            error = %e,
                            consecutive_errors,
                            "Telegram update stream error"
                        );
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            if let Some(fatal) = &options.fatal {
                                let _ = fatal
                                    .send(ProviderFatal {
                                        kind: ProviderKind::Telegram,
                                        message: format!(
                                            "update stream failed {consecutive_errors} times: {e}"
                                        ),
                                    })
                                    .await;
                            }
                            break;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    })
}

/// Translate a new-message update into the normalised inbound type.
///
/// Only direct (one-on-one) chats are relayed; group support is a WA-Web
/// concern. Media download failures degrade to an attachment-less message.
async fn build_inbound(
    client: &Client,
    own: &str,
    temp_dir: &std::path::Path,
    message: &grammers_client::types::Message,
) -> Option<InboundMessage> {
    let chat = message.chat();
    if !matches!(chat, Chat::User(_)) {
        debug!("ignoring non-direct Telegram chat");
        return None;
    }

    let sender_chat = message.sender().unwrap_or(chat);
    let sender = describe_sender(&sender_chat);
    let sender_name = match &sender_chat {
        Chat::User(user) => {
            let name = user.full_name();
            (!name.is_empty()).then_some(name)
        }
        _ => None,
    };

    let media = match message.media() {
        Some(item) => media::download_inbound(client, &item, temp_dir)
            .await
            .into_iter()
            .collect(),
        None => Vec::new(),
    };

    Some(InboundMessage {
        id: message.id().to_string(),
        from: telegram_namespaced(&sender),
        to: telegram_namespaced(own),
        body: message.text().to_owned(),
        timestamp_ms: message.date().timestamp_millis(),
        sender_name,
        media,
        provider: ProviderKind::Telegram,
        chat: ChatContext::Direct,
        raw: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_handle_prefers_username() {
        assert_eq!(describe_user_handle(Some("Alice"), 7), "@alice");
        assert_eq!(describe_user_handle(None, 7), "7");
    }
}
