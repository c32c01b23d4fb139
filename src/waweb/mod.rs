//! WhatsApp Web provider over the protocol bridge.
//!
//! The bridge process owns the reverse-engineered socket; this provider owns
//! the lifecycle around it: pairing via QR, credential persistence so later
//! runs skip pairing, the reconnect state machine with exponential backoff,
//! and translation of bridge messages into the normalised inbound type with
//! best-effort JID-to-E.164 mapping.

pub mod bridge;
pub mod jid;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::identifiers::{self, e164_to_jid, is_group_jid, is_lid_jid, jid_to_e164};
use crate::providers::{
    ChatContext, DeliveryStatus, InboundHandler, InboundMessage, ListenOptions, MediaAttachment,
    MediaKind, MediaSource, Provider, ProviderCapabilities, ProviderContext, ProviderError,
    ProviderFatal, ProviderKind, SendOptions, SendResult,
};

use bridge::{BridgeClient, BridgeEvent, BridgeMedia, BridgeMessage};
use jid::LidDirectory;

/// Marker file recording a successful pairing; its presence drives
/// auto-detection.
const SESSION_MARKER: &str = "waweb-session.json";

/// How long `login` waits for the QR to be scanned.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(180);

/// How often `login` re-emits the QR until scanned.
const QR_REFRESH: Duration = Duration::from_secs(20);

/// Socket lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Disconnected,
    Connecting,
    Pairing,
    Authenticated,
    Live,
    Reconnecting,
}

/// WhatsApp Web provider.
pub struct WaWebProvider {
    ctx: ProviderContext,
    bridge: Arc<BridgeClient>,
    caps: ProviderCapabilities,
    state: Arc<StdMutex<SocketState>>,
    own_jid: Arc<StdMutex<Option<String>>>,
    handler: Mutex<Option<InboundHandler>>,
    listener: Mutex<Option<ListenerHandle>>,
}

struct ListenerHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// Whether paired WA-Web credentials exist on disk.
pub fn has_credentials(paths: &crate::paths::StatePaths) -> bool {
    paths.credentials_dir().join(SESSION_MARKER).exists()
}

impl WaWebProvider {
    /// Create an uninitialised provider.
    pub fn new(ctx: ProviderContext) -> Self {
        let bridge = Arc::new(BridgeClient::new(ctx.config.waweb.bridge_url.clone()));
        Self {
            ctx,
            bridge,
            caps: ProviderCapabilities::for_kind(ProviderKind::WaWeb),
            state: Arc::new(StdMutex::new(SocketState::Disconnected)),
            own_jid: Arc::new(StdMutex::new(None)),
            handler: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    fn set_state(&self, next: SocketState) {
        set_state(&self.state, next);
    }

    fn marker_path(&self) -> PathBuf {
        self.ctx.paths.credentials_dir().join(SESSION_MARKER)
    }

    fn record_session(&self, jid: Option<&str>) {
        if let (Some(jid), Ok(mut own)) = (jid, self.own_jid.lock()) {
            *own = Some(jid.to_owned());
        }
        let dir = self.ctx.paths.credentials_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(error = %e, "failed to create credentials directory");
            return;
        }
        let marker = serde_json::json!({
            "jid": jid,
            "paired_at": chrono::Utc::now().to_rfc3339(),
        });
        if let Err(e) = std::fs::write(self.marker_path(), marker.to_string()) {
            warn!(error = %e, "failed to write session marker");
        }
    }

    fn own_e164(&self) -> Option<String> {
        self.own_jid
            .lock()
            .ok()
            .and_then(|own| own.clone())
            .and_then(|jid| jid_to_e164(&jid))
    }

    /// Size pre-check shared by the buffer paths of `send`.
    fn buffer_too_large(&self, len: usize) -> bool {
        u64::try_from(len).unwrap_or(u64::MAX) > self.caps.max_media_size
    }
}

#[async_trait]
impl Provider for WaWebProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WaWeb
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.caps
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.set_state(SocketState::Connecting);
        match self.bridge.status().await {
            Ok(status) if status.connected => {
                self.record_session(status.jid.as_deref());
                self.set_state(SocketState::Live);
                info!(jid = ?status.jid, "WA-Web socket live");
                Ok(())
            }
            Ok(status) if status.has_session => {
                // Credentials exist; the socket will authenticate shortly.
                self.set_state(SocketState::Authenticated);
                info!("WA-Web session present, socket authenticating");
                Ok(())
            }
            Ok(_) => {
                self.set_state(SocketState::Pairing);
                info!("WA-Web has no session; run `warelay login --provider wa-web`");
                Ok(())
            }
            Err(e) => {
                self.set_state(SocketState::Disconnected);
                Err(ProviderError::Transport(format!(
                    "WA-Web bridge unreachable: {e}"
                )))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state
            .lock()
            .map(|s| matches!(*s, SocketState::Authenticated | SocketState::Live))
            .unwrap_or(false)
    }

    async fn disconnect(&self) {
        self.stop_listening().await;
        self.set_state(SocketState::Disconnected);
    }

    async fn send(&self, to: &str, body: &str, options: &SendOptions) -> SendResult {
        let canonical = match identifiers::normalize(to, ProviderKind::WaWeb) {
            Ok(c) => c,
            Err(e) => return SendResult::failed(format!("unrecognised recipient: {e}")),
        };
        let jid = if is_group_jid(&canonical) {
            canonical.clone()
        } else {
            e164_to_jid(&canonical)
        };

        if options.typing {
            self.bridge.send_typing(&jid).await;
        }

        // Only the first media item is honoured.
        let media = match options.media.first() {
            None => None,
            Some(att) => {
                if att.size.is_some_and(|s| s > self.caps.max_media_size) {
                    return SendResult::failed(format!(
                        "media exceeds WA-Web limit of {} bytes",
                        self.caps.max_media_size
                    ));
                }
                match &att.source {
                    MediaSource::Url(url) => Some(BridgeMedia::Url {
                        url,
                        mime: att.mime.as_deref(),
                    }),
                    MediaSource::Bytes(bytes) => {
                        if self.buffer_too_large(bytes.len()) {
                            return SendResult::failed(format!(
                                "media exceeds WA-Web limit of {} bytes",
                                self.caps.max_media_size
                            ));
                        }
                        Some(BridgeMedia::Base64 {
                            data: base64::engine::general_purpose::STANDARD.encode(bytes),
                            mime: att.mime.as_deref(),
                            file_name: att.file_name.as_deref(),
                        })
                    }
                    MediaSource::Path(path) => match tokio::fs::read(path).await {
                        Ok(bytes) => {
                            if self.buffer_too_large(bytes.len()) {
                                return SendResult::failed(format!(
                                    "media exceeds WA-Web limit of {} bytes",
                                    self.caps.max_media_size
                                ));
                            }
                            Some(BridgeMedia::Base64 {
                                data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                                mime: att.mime.as_deref(),
                                file_name: att.file_name.as_deref(),
                            })
                        }
                        Err(e) => {
                            return SendResult::failed(format!("media file unreadable: {e}"));
                        }
                    },
                }
            }
        };

        let sent = match media {
            Some(media) => {
                self.bridge
                    .send_media(&jid, body, media, options.reply_to.as_deref())
                    .await
            }
            None => {
                self.bridge
                    .send_text(&jid, body, options.reply_to.as_deref())
                    .await
            }
        };

        match sent {
            Ok(message_id) => SendResult::sent(message_id).with_meta("jid", jid),
            Err(e) => SendResult::failed(format!("WA-Web send failed: {e}")),
        }
    }

    async fn send_typing(&self, to: &str) {
        if let Ok(canonical) = identifiers::normalize(to, ProviderKind::WaWeb) {
            let jid = if is_group_jid(&canonical) {
                canonical
            } else {
                e164_to_jid(&canonical)
            };
            self.bridge.send_typing(&jid).await;
        }
    }

    async fn delivery_status(&self, _message_id: &str) -> DeliveryStatus {
        // The socket protocol does not expose reliable receipts.
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
            debug!("WA-Web listener already running");
            return Ok(());
        }
        let handler = self
            .handler
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Internal("no inbound handler registered".to_owned()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_listen_loop(
            Arc::clone(&self.bridge),
            Arc::clone(&self.state),
            Arc::clone(&self.own_jid),
            self.ctx.paths.credentials_dir(),
            handler,
            options,
            stop_rx,
        );
        *listener = Some(ListenerHandle { stop_tx, task });
        info!("WA-Web listener started");
        Ok(())
    }

    async fn stop_listening(&self) {
        let handle = self.listener.lock().await.take();
        if let Some(ListenerHandle { stop_tx, task }) = handle {
            let _ = stop_tx.send(true);
            if let Err(e) = task.await {
                warn!(error = %e, "WA-Web listen task panicked during shutdown");
            }
            info!("WA-Web listener stopped");
        }
    }

    async fn is_authenticated(&self) -> bool {
        if has_credentials(&self.ctx.paths) {
            return true;
        }
        self.bridge
            .status()
            .await
            .map(|s| s.connected || s.has_session)
            .unwrap_or(false)
    }

    async fn login(&self) -> Result<(), ProviderError> {
        if let Ok(status) = self.bridge.status().await {
            if status.connected {
                self.record_session(status.jid.as_deref());
                self.set_state(SocketState::Live);
                info!("WA-Web already paired");
                return Ok(());
            }
        }

        self.set_state(SocketState::Pairing);
        let deadline = tokio::time::Instant::now()
            .checked_add(LOGIN_TIMEOUT)
            .unwrap_or_else(tokio::time::Instant::now);
        let mut last_qr_emit: Option<tokio::time::Instant> = None;

        loop {
            if tokio::time::Instant::now() >= deadline {
                self.set_state(SocketState::Disconnected);
                return Err(ProviderError::Auth(
                    "QR code was not scanned in time".to_owned(),
                ));
            }

            // Re-emit the QR periodically until scanned.
            let due = last_qr_emit
                .map(|at| at.elapsed() >= QR_REFRESH)
                .unwrap_or(true);
            if due {
                match self.bridge.qr().await {
                    Ok(qr_b64) => {
                        last_qr_emit = Some(tokio::time::Instant::now());
                        emit_qr(&self.ctx.paths.credentials_dir(), &qr_b64);
                    }
                    Err(e) => debug!(error = %e, "QR not ready yet"),
                }
            }

            tokio::time::sleep(Duration::from_secs(2)).await;
            if let Ok(status) = self.bridge.status().await {
                if status.connected {
                    self.record_session(status.jid.as_deref());
                    self.set_state(SocketState::Live);
                    info!("WA-Web pairing complete");
                    return Ok(());
                }
            }
        }
    }

    async fn logout(&self) -> Result<(), ProviderError> {
        self.stop_listening().await;
        let revoked = self.bridge.logout().await;
        // Local state goes regardless of whether the revoke reached the
        // backend.
        let dir = self.ctx.paths.credentials_dir();
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(error = %e, "failed to erase credentials directory");
            }
        }
        if let Ok(mut own) = self.own_jid.lock() {
            *own = None;
        }
        self.set_state(SocketState::Disconnected);
        revoked
    }

    async fn session_id(&self) -> Option<String> {
        self.own_e164()
            .or_else(|| self.own_jid.lock().ok().and_then(|own| own.clone()))
    }
}

/// Decode and persist the QR payload, then tell the operator where it is.
fn emit_qr(credentials_dir: &Path, qr_b64: &str) {
    let _ = std::fs::create_dir_all(credentials_dir);
    let path = credentials_dir.join("pairing-qr.png");
    match base64::engine::general_purpose::STANDARD.decode(qr_b64.trim()) {
        Ok(png) => {
            if let Err(e) = std::fs::write(&path, png) {
                warn!(error = %e, "failed to write QR image");
                return;
            }
            info!(path = %path.display(), "scan the QR code with WhatsApp to pair");
            eprintln!("Scan with WhatsApp > Linked Devices: {}", path.display());
        }
        Err(e) => warn!(error = %e, "QR payload was not valid base64"),
    }
}

// ---------------------------------------------------------------------------
// Listen loop
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn spawn_listen_loop(
    bridge: Arc<BridgeClient>,
    state: Arc<StdMutex<SocketState>>,
    own_jid: Arc<StdMutex<Option<String>>>,
    credentials_dir: PathBuf,
    handler: InboundHandler,
    options: ListenOptions,
    mut stop_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let policy = options.reconnect;
        let mut lids = LidDirectory::load(&credentials_dir);
        let mut attempt: u32 = 0;
        let mut probe = options.web_heartbeat.map(tokio::time::interval);

        loop {
            let failed = tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        debug!("WA-Web listen loop stopping");
                        break;
                    }
                    false
                }
                _ = probe_tick(&mut probe) => {
                    match bridge.status().await {
                        Ok(status) if status.connected => false,
                        Ok(_) => {
                            warn!("WA-Web liveness probe found socket down");
                            true
                        }
                        Err(e) => {
                            warn!(error = %e, "WA-Web liveness probe failed");
                            true
                        }
                    }
                }
                polled = bridge.poll_events() => match polled {
                    Ok(events) => {
                        attempt = 0;
                        let mut logged_out = false;
                        for event in events {
                            let out = process_event(
                                &state,
                                &own_jid,
                                &credentials_dir,
                                &handler,
                                &mut lids,
                                event,
                            )
                            .await;
                            logged_out = logged_out || out;
                        }
                        if logged_out {
                            report_fatal(
                                &options,
                                "backend signalled logout; pairing required".to_owned(),
                            )
                            .await;
                            set_state(&state, SocketState::Disconnected);
                            break;
                        }
                        false
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, "WA-Web event stream error");
                        true
                    }
                }
            };

            if failed {
                set_state(&state, SocketState::Reconnecting);
                attempt = attempt.saturating_add(1);
                if attempt > policy.max_attempts {
                    report_fatal(
                        &options,
                        format!(
                            "reconnect attempts exhausted after {} tries",
                            policy.max_attempts
                        ),
                    )
                    .await;
                    set_state(&state, SocketState::Disconnected);
                    break;
                }
                let delay = policy.delay_for(attempt.saturating_sub(1));
                debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "WA-Web reconnecting after backoff"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    })
}

/// Await the next probe tick, or pend forever when probing is disabled.
async fn probe_tick(probe: &mut Option<tokio::time::Interval>) {
    match probe {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn set_state(state: &StdMutex<SocketState>, next: SocketState) {
    if let Ok(mut guard) = state.lock() {
        *guard = next;
    }
}

async fn report_fatal(options: &ListenOptions, message: String) {
    warn!(%message, "WA-Web provider terminating");
    if let Some(fatal) = &options.fatal {
        let _ = fatal
            .send(ProviderFatal {
                kind: ProviderKind::WaWeb,
                message,
            })
            .await;
    }
}

/// Process one bridge event. Returns `true` when the backend signalled a
/// logout, which suppresses reconnect.
async fn process_event(
    state: &StdMutex<SocketState>,
    own_jid: &StdMutex<Option<String>>,
    credentials_dir: &Path,
    handler: &InboundHandler,
    lids: &mut LidDirectory,
    event: BridgeEvent,
) -> bool {
    match event {
        BridgeEvent::Connected { jid } => {
            set_state(state, SocketState::Live);
            if let (Some(jid), Ok(mut own)) = (jid, own_jid.lock()) {
                *own = Some(jid);
            }
            info!("WA-Web socket connected");
            false
        }
        BridgeEvent::Disconnected { reason, logged_out } => {
            if logged_out {
                warn!(?reason, "WA-Web logged out remotely");
                return true;
            }
            warn!(?reason, "WA-Web socket disconnected");
            set_state(state, SocketState::Reconnecting);
            false
        }
        BridgeEvent::Pairing { .. } => {
            set_state(state, SocketState::Pairing);
            info!("WA-Web pairing required; run `warelay login --provider wa-web`");
            false
        }
        BridgeEvent::Message(msg) => {
            if let Some(inbound) = translate_message(own_jid, credentials_dir, lids, msg) {
                handler(inbound).await;
            }
            false
        }
    }
}

/// Translate a bridge message into the normalised inbound type.
///
/// Direct messages whose sender is a lid JID without a reverse mapping are
/// dropped: surfacing a non-addressable sender would break every reply.
fn translate_message(
    own_jid: &StdMutex<Option<String>>,
    credentials_dir: &Path,
    lids: &mut LidDirectory,
    msg: BridgeMessage,
) -> Option<InboundMessage> {
    if msg.from_me {
        return None;
    }

    let own = own_jid
        .lock()
        .ok()
        .and_then(|own| own.clone())
        .and_then(|jid| jid_to_e164(&jid))
        .unwrap_or_default();
    let raw = serde_json::to_value(&msg).ok();
    let media = inbound_media(&msg);

    if is_group_jid(&msg.chat_jid) {
        let sender_display = msg
            .sender_jid
            .as_deref()
            .and_then(|jid_str| resolve_sender(lids, credentials_dir, jid_str))
            .or_else(|| msg.push_name.clone());
        let mentioned = msg
            .mentioned_jids
            .iter()
            .filter_map(|jid_str| resolve_sender(lids, credentials_dir, jid_str))
            .collect();
        return Some(InboundMessage {
            id: msg.id,
            from: msg.chat_jid.clone(),
            to: own,
            body: msg.text,
            timestamp_ms: msg.timestamp_ms,
            sender_name: sender_display,
            media,
            provider: ProviderKind::WaWeb,
            chat: ChatContext::Group {
                chat_id: msg.chat_jid,
                subject: msg.group_subject,
                mentioned,
            },
            raw,
        });
    }

    let Some(from) = resolve_sender(lids, credentials_dir, &msg.chat_jid) else {
        info!(
            chat_jid = %msg.chat_jid,
            message_id = %msg.id,
            "dropping message: sender JID has no E.164 mapping"
        );
        return None;
    };

    Some(InboundMessage {
        id: msg.id,
        from,
        to: own,
        body: msg.text,
        timestamp_ms: msg.timestamp_ms,
        sender_name: msg.push_name,
        media,
        provider: ProviderKind::WaWeb,
        chat: ChatContext::Direct,
        raw,
    })
}

/// Build the attachment list from a bridge message's media fields.
fn inbound_media(msg: &BridgeMessage) -> Vec<MediaAttachment> {
    let Some(url) = &msg.media_url else {
        return Vec::new();
    };
    let kind = match msg.media_mime.as_deref() {
        Some(m) if m.starts_with("image/") => MediaKind::Image,
        Some(m) if m.starts_with("video/") => MediaKind::Video,
        Some(m) if m.starts_with("audio/") => MediaKind::Voice,
        _ => MediaKind::Document,
    };
    let mut att = MediaAttachment::from_url(kind, url.clone());
    att.mime = msg.media_mime.clone();
    vec![att]
}

/// Resolve a JID to `+E164`, consulting (and on a miss, reloading) the
/// on-disk lid reverse mapping.
fn resolve_sender(
    lids: &mut LidDirectory,
    credentials_dir: &Path,
    jid_str: &str,
) -> Option<String> {
    if let Some(e164) = jid_to_e164(jid_str) {
        return Some(e164);
    }
    if is_lid_jid(jid_str) {
        if let Some(e164) = lids.resolve(jid_str) {
            return Some(e164);
        }
        // The bridge may have written a fresh mapping since startup.
        *lids = LidDirectory::load(credentials_dir);
        return lids.resolve(jid_str);
    }
    None
}
