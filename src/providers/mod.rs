//! Provider abstraction: one contract over three dissimilar messaging
//! backends.
//!
//! Each backend adapter implements [`Provider`] and declares a static
//! [`ProviderCapabilities`] record that callers consult before branching
//! (typing indicators, media limits). A factory creates uninitialised
//! instances by kind; [`connect`] creates and initialises in one step.

pub mod error;
pub mod message;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::warn;

use crate::config::Config;
use crate::paths::StatePaths;

pub use error::ProviderError;
pub use message::{
    ChatContext, DeliveryState, DeliveryStatus, InboundMessage, MediaAttachment, MediaKind,
    MediaSource, SendOptions, SendResult, SendStatus,
};

/// Environment variable overriding the Telegram media limit, in whole MiB.
pub const TELEGRAM_MAX_MEDIA_MB_ENV: &str = "TELEGRAM_MAX_MEDIA_MB";

/// Twilio media ceiling: 5 MiB.
const TWILIO_MAX_MEDIA: u64 = 5_242_880;

/// WA-Web media ceiling: 64 MiB.
const WAWEB_MAX_MEDIA: u64 = 67_108_864;

/// Telegram media ceiling: 2 GiB, also the clamp for env overrides.
const TELEGRAM_MAX_MEDIA: u64 = 2_147_483_648;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Enumerated provider tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// WhatsApp Web via the reverse-engineered client protocol.
    WaWeb,
    /// WhatsApp Business via the Twilio REST API.
    WaTwilio,
    /// Telegram via its native client protocol.
    Telegram,
}

impl ProviderKind {
    /// All kinds, in deterministic auto-detection order.
    pub const ALL: [ProviderKind; 3] =
        [ProviderKind::WaWeb, ProviderKind::Telegram, ProviderKind::WaTwilio];

    /// Parse a kind, accepting the legacy `web`/`twilio` aliases with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns the offending input for unknown kinds.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wa-web" => Ok(ProviderKind::WaWeb),
            "wa-twilio" => Ok(ProviderKind::WaTwilio),
            "telegram" => Ok(ProviderKind::Telegram),
            "web" => {
                warn!("provider kind 'web' is deprecated, use 'wa-web'");
                Ok(ProviderKind::WaWeb)
            }
            "twilio" => {
                warn!("provider kind 'twilio' is deprecated, use 'wa-twilio'");
                Ok(ProviderKind::WaTwilio)
            }
            other => Err(other.to_owned()),
        }
    }

    /// Canonical tag string.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::WaWeb => "wa-web",
            ProviderKind::WaTwilio => "wa-twilio",
            ProviderKind::Telegram => "telegram",
        }
    }

    /// Detailed display name for the `{{PROVIDERS}}` placeholder.
    pub fn detailed_name(self) -> &'static str {
        match self {
            ProviderKind::WaWeb => "WhatsApp Web",
            ProviderKind::WaTwilio => "WhatsApp (Twilio)",
            ProviderKind::Telegram => "Telegram",
        }
    }

    /// Messenger brand name for the identity prompt.
    pub fn messenger_name(self) -> &'static str {
        match self {
            ProviderKind::WaWeb | ProviderKind::WaTwilio => "WhatsApp",
            ProviderKind::Telegram => "Telegram",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Static capability record for a provider kind.
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    /// Backend reports delivery receipts.
    pub delivery_receipts: bool,
    /// Backend reports read receipts.
    pub read_receipts: bool,
    /// Backend supports a typing indicator.
    pub typing_indicator: bool,
    /// Backend supports reactions.
    pub reactions: bool,
    /// Backend supports replying to a specific message.
    pub replies: bool,
    /// Backend supports editing sent messages.
    pub editing: bool,
    /// Backend supports deleting sent messages.
    pub deleting: bool,
    /// Provider may message a peer that never messaged first.
    pub can_initiate_conversation: bool,
    /// Hard media ceiling in bytes, enforced before any network traffic.
    pub max_media_size: u64,
    /// Acceptable MIME patterns (`image/*` style).
    pub accepted_media: &'static [&'static str],
}

impl ProviderCapabilities {
    /// Capability record for a kind, consulting the environment for the
    /// Telegram media-limit override.
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::WaWeb => Self {
                delivery_receipts: false,
                read_receipts: false,
                typing_indicator: true,
                reactions: true,
                replies: true,
                editing: false,
                deleting: true,
                can_initiate_conversation: true,
                max_media_size: WAWEB_MAX_MEDIA,
                accepted_media: &["image/*", "video/*", "audio/*", "application/*"],
            },
            ProviderKind::WaTwilio => Self {
                delivery_receipts: true,
                read_receipts: true,
                typing_indicator: false,
                reactions: false,
                replies: false,
                editing: false,
                deleting: false,
                can_initiate_conversation: false,
                max_media_size: TWILIO_MAX_MEDIA,
                accepted_media: &["image/*", "video/*", "audio/*", "application/pdf"],
            },
            ProviderKind::Telegram => Self {
                delivery_receipts: false,
                read_receipts: false,
                typing_indicator: false,
                reactions: true,
                replies: true,
                editing: true,
                deleting: true,
                can_initiate_conversation: true,
                max_media_size: telegram_max_media_size(|key| std::env::var(key).ok()),
                accepted_media: &["*/*"],
            },
        }
    }
}

/// Resolve the Telegram media ceiling from `TELEGRAM_MAX_MEDIA_MB`.
///
/// Invalid values fall back to the 2 GiB default with a warning; values
/// exceeding 2 GiB are clamped.
pub fn telegram_max_media_size(env: impl Fn(&str) -> Option<String>) -> u64 {
    let Some(raw) = env(TELEGRAM_MAX_MEDIA_MB_ENV) else {
        return TELEGRAM_MAX_MEDIA;
    };
    match raw.trim().parse::<u64>() {
        Ok(mb) if mb > 0 => {
            let bytes = mb.saturating_mul(1_048_576);
            if bytes > TELEGRAM_MAX_MEDIA {
                warn!(
                    value = %raw,
                    "{TELEGRAM_MAX_MEDIA_MB_ENV} exceeds 2048 MB, clamping"
                );
                TELEGRAM_MAX_MEDIA
            } else {
                bytes
            }
        }
        _ => {
            warn!(
                value = %raw,
                "invalid {TELEGRAM_MAX_MEDIA_MB_ENV}, using 2 GiB default"
            );
            TELEGRAM_MAX_MEDIA
        }
    }
}

// ---------------------------------------------------------------------------
// Listen tuning
// ---------------------------------------------------------------------------

/// Reconnect backoff policy for socket-based providers.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// First retry delay in milliseconds.
    pub initial_ms: u64,
    /// Delay cap in milliseconds.
    pub max_ms: u64,
    /// Multiplicative factor between attempts.
    pub factor: u32,
    /// Jitter as a percentage of the delay (0 disables).
    pub jitter_pct: u32,
    /// Bounded attempt count; exhaustion is fatal to the supervisor.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            factor: 2,
            jitter_pct: 20,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (zero-based), with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_ms;
        for _ in 0..attempt {
            delay = delay.saturating_mul(u64::from(self.factor.max(1)));
            if delay >= self.max_ms {
                delay = self.max_ms;
                break;
            }
        }
        delay = delay.min(self.max_ms);

        if self.jitter_pct > 0 {
            let span = delay
                .saturating_mul(u64::from(self.jitter_pct))
                .checked_div(100)
                .unwrap_or(0);
            if span > 0 {
                let lo = delay.saturating_sub(span);
                let hi = delay.saturating_add(span);
                delay = rand::Rng::gen_range(&mut rand::thread_rng(), lo..=hi);
            }
        }
        Duration::from_millis(delay)
    }
}

/// A provider's report that its subscription died beyond recovery.
#[derive(Debug, Clone)]
pub struct ProviderFatal {
    /// Which provider terminated.
    pub kind: ProviderKind,
    /// Why (e.g. reconnect attempts exhausted, logged out remotely).
    pub message: String,
}

/// Per-provider tuning propagated into `start_listening`.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Twilio poll interval.
    pub poll_interval: Duration,
    /// Twilio lookback window per poll iteration.
    pub lookback: Duration,
    /// WA-Web reconnect policy.
    pub reconnect: ReconnectPolicy,
    /// WA-Web liveness probe interval, if enabled.
    pub web_heartbeat: Option<Duration>,
    /// Channel on which the provider reports a fatal listening failure to
    /// its supervisor.
    pub fatal: Option<tokio::sync::mpsc::Sender<ProviderFatal>>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            lookback: Duration::from_secs(600),
            reconnect: ReconnectPolicy::default(),
            web_heartbeat: None,
            fatal: None,
        }
    }
}

// ---------------------------------------------------------------------------
// The contract
// ---------------------------------------------------------------------------

/// Handler invoked for every normalised inbound message.
pub type InboundHandler =
    Arc<dyn Fn(InboundMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// The uniform contract every messaging backend adapter implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Tag of this provider.
    fn kind(&self) -> ProviderKind;

    /// Static capability record.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Validate configuration and prepare the client. Never blocks on
    /// network I/O longer than a short handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] for shape problems and
    /// [`ProviderError::Transport`] when the handshake fails.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Side-effect-free connection probe.
    fn is_connected(&self) -> bool;

    /// Idempotent teardown; safe after a failed initialise.
    async fn disconnect(&self);

    /// Send a message. `to` may be any recognised form; it is normalised
    /// internally. Failures are shaped into a failed [`SendResult`], never
    /// thrown. Media exceeding the capability ceiling is rejected before any
    /// network traffic.
    async fn send(&self, to: &str, body: &str, options: &SendOptions) -> SendResult;

    /// Best-effort typing indicator; no-ops without the capability and
    /// never fails the caller.
    async fn send_typing(&self, to: &str);

    /// Delivery status for a previously sent message. Providers without the
    /// capability return `unknown` stamped with the current time.
    async fn delivery_status(&self, message_id: &str) -> DeliveryStatus;

    /// Register exactly one inbound handler. A second registration replaces
    /// the first.
    fn on_message(&self, handler: InboundHandler);

    /// Start the background subscription, honouring the tuning options.
    ///
    /// # Errors
    ///
    /// Returns an error when the subscription cannot be established.
    async fn start_listening(&self, options: ListenOptions) -> Result<(), ProviderError>;

    /// Idempotent stop; completes all in-flight handler invocations,
    /// including their cleanup closures, before returning.
    async fn stop_listening(&self);

    /// Whether a usable authenticated session exists.
    async fn is_authenticated(&self) -> bool;

    /// Drive the interactive login flow for this kind.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Auth`] when the flow fails.
    async fn login(&self) -> Result<(), ProviderError>;

    /// Revoke server-side and erase local state.
    ///
    /// # Errors
    ///
    /// Returns an error when revocation or local erasure fails.
    async fn logout(&self) -> Result<(), ProviderError>;

    /// Stable identifier of the authenticated session, if any.
    async fn session_id(&self) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Shared dependencies handed to every provider instance.
#[derive(Clone)]
pub struct ProviderContext {
    /// Read-only user configuration.
    pub config: Arc<Config>,
    /// Resolved state paths.
    pub paths: StatePaths,
}

/// Create an uninitialised provider instance by kind.
///
/// # Errors
///
/// Returns [`ProviderError::Config`] when the kind's configuration is
/// structurally unusable (e.g. missing credentials for Twilio).
pub fn create(
    kind: ProviderKind,
    ctx: &ProviderContext,
) -> Result<Arc<dyn Provider>, ProviderError> {
    match kind {
        ProviderKind::WaWeb => Ok(Arc::new(crate::waweb::WaWebProvider::new(ctx.clone()))),
        ProviderKind::WaTwilio => Ok(Arc::new(crate::watwilio::TwilioProvider::new(ctx.clone())?)),
        ProviderKind::Telegram => Ok(Arc::new(crate::telegram::TelegramProvider::new(
            ctx.clone(),
        )?)),
    }
}

/// Create and initialise a provider in one step.
///
/// # Errors
///
/// Propagates creation and initialise errors.
pub async fn connect(
    kind: ProviderKind,
    ctx: &ProviderContext,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider = create(kind, ctx)?;
    provider.initialize().await?;
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_canonical_and_legacy() {
        assert_eq!(ProviderKind::parse("wa-web"), Ok(ProviderKind::WaWeb));
        assert_eq!(ProviderKind::parse("web"), Ok(ProviderKind::WaWeb));
        assert_eq!(ProviderKind::parse("twilio"), Ok(ProviderKind::WaTwilio));
        assert_eq!(ProviderKind::parse("Telegram"), Ok(ProviderKind::Telegram));
        assert!(ProviderKind::parse("signal").is_err());
    }

    #[test]
    fn telegram_limit_env_override() {
        assert_eq!(telegram_max_media_size(|_| None), TELEGRAM_MAX_MEDIA);
        assert_eq!(
            telegram_max_media_size(|_| Some("100".to_owned())),
            104_857_600
        );
        // Clamped to 2 GiB.
        assert_eq!(
            telegram_max_media_size(|_| Some("4096".to_owned())),
            TELEGRAM_MAX_MEDIA
        );
        // Invalid falls back.
        assert_eq!(
            telegram_max_media_size(|_| Some("lots".to_owned())),
            TELEGRAM_MAX_MEDIA
        );
        assert_eq!(
            telegram_max_media_size(|_| Some("0".to_owned())),
            TELEGRAM_MAX_MEDIA
        );
    }

    #[test]
    fn backoff_sequence_without_jitter() {
        let policy = ReconnectPolicy {
            initial_ms: 100,
            max_ms: 800,
            factor: 2,
            jitter_pct: 0,
            max_attempts: 4,
        };
        let delays: Vec<u64> = (0..4)
            .map(|n| u64::try_from(policy.delay_for(n).as_millis()).unwrap_or(u64::MAX))
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn backoff_caps_at_max() {
        let policy = ReconnectPolicy {
            initial_ms: 100,
            max_ms: 800,
            factor: 2,
            jitter_pct: 0,
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(9).as_millis(), 800);
    }
}
