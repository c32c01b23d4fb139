//! warelay CLI: login, logout, send, status, relay, heartbeat.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use warelay::config::Config;
use warelay::engine::agent;
use warelay::logging;
use warelay::paths::StatePaths;
use warelay::providers::{
    self, ListenOptions, MediaAttachment, MediaKind, MediaSource, ProviderContext, ProviderKind,
    ReconnectPolicy, SendOptions,
};
use warelay::relay::{self, ProviderSelection};
use warelay::session::heartbeat::{HEARTBEAT_OK, HEARTBEAT_PROMPT};
use warelay::template::expand;

#[derive(Parser)]
#[command(
    name = "warelay",
    version,
    about = "Personal messaging gateway: relay WhatsApp and Telegram into an AI agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Provider selection flags shared by every verb.
#[derive(Args, Clone, Default)]
struct ProviderArgs {
    /// Single provider kind (wa-web, wa-twilio, telegram) or "auto"
    #[arg(long)]
    provider: Option<String>,

    /// Comma-separated list of provider kinds
    #[arg(long, value_delimiter = ',')]
    providers: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive login for a provider (QR scan, phone+code, credentials)
    Login {
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Revoke a provider session server-side and erase local state
    Logout {
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Send a single message
    Send {
        #[command(flatten)]
        provider: ProviderArgs,
        /// Recipient in any recognised form
        #[arg(long)]
        to: String,
        /// Message body
        #[arg(long)]
        message: String,
        /// Media URL or local file path to attach
        #[arg(long)]
        media: Option<String>,
    },
    /// Show authentication and connection status per provider
    Status {
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Run the long-lived relay (listen + auto-reply)
    Relay {
        #[command(flatten)]
        provider: ProviderArgs,
        /// Twilio poll interval in seconds
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// Twilio lookback window in seconds
        #[arg(long, default_value_t = 600)]
        lookback: u64,
        /// WA-Web liveness probe interval in seconds (0 disables)
        #[arg(long, default_value_t = 0)]
        web_heartbeat: u64,
        /// WA-Web reconnect: initial backoff in milliseconds
        #[arg(long, default_value_t = 1_000)]
        reconnect_initial_ms: u64,
        /// WA-Web reconnect: backoff cap in milliseconds
        #[arg(long, default_value_t = 60_000)]
        reconnect_max_ms: u64,
        /// WA-Web reconnect: multiplicative factor
        #[arg(long, default_value_t = 2)]
        reconnect_factor: u32,
        /// WA-Web reconnect: jitter percentage
        #[arg(long, default_value_t = 20)]
        reconnect_jitter: u32,
        /// WA-Web reconnect: bounded attempt count
        #[arg(long, default_value_t = 10)]
        reconnect_max_attempts: u32,
    },
    /// Poke the agent with one heartbeat prompt and print its reply
    Heartbeat {
        #[command(flatten)]
        provider: ProviderArgs,
        /// Also deliver the reply to this recipient
        #[arg(long)]
        to: Option<String>,
    },
}

fn main() -> ExitCode {
    // Environment credentials may live in a .env next to the binary.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let paths = StatePaths::resolve()?;
    let config = Arc::new(Config::load(&paths.config_file())?);

    // The relay gets the JSON file layer; one-shot verbs log to stderr only.
    let _guard = match &cli.command {
        Command::Relay { .. } => Some(logging::init_relay(
            &paths.logs_dir(),
            &config.logging.level,
        )?),
        _ => {
            logging::init_cli();
            None
        }
    };

    let ctx = ProviderContext {
        config: Arc::clone(&config),
        paths: paths.clone(),
    };

    match cli.command {
        Command::Login { provider } => {
            let kinds = resolve_kinds(&provider, &paths)?;
            if kinds.is_empty() {
                anyhow::bail!("no provider selected; use --provider <kind>");
            }
            for kind in kinds {
                let instance = providers::create(kind, &ctx)
                    .with_context(|| format!("cannot configure provider {kind}"))?;
                instance
                    .login()
                    .await
                    .with_context(|| format!("login failed for {kind}"))?;
                println!("{kind}: logged in");
            }
            Ok(())
        }
        Command::Logout { provider } => {
            let kinds = resolve_kinds(&provider, &paths)?;
            if kinds.is_empty() {
                anyhow::bail!("no provider selected; use --provider <kind>");
            }
            for kind in kinds {
                let instance = providers::create(kind, &ctx)
                    .with_context(|| format!("cannot configure provider {kind}"))?;
                instance
                    .logout()
                    .await
                    .with_context(|| format!("logout failed for {kind}"))?;
                println!("{kind}: logged out");
            }
            Ok(())
        }
        Command::Send {
            provider,
            to,
            message,
            media,
        } => {
            let kind = single_kind(&provider, &paths)?;
            let instance = providers::connect(kind, &ctx)
                .await
                .with_context(|| format!("cannot connect provider {kind}"))?;

            let options = SendOptions {
                media: media.map(attachment_from_arg).into_iter().collect(),
                reply_to: None,
                typing: false,
            };
            let result = instance.send(&to, &message, &options).await;
            instance.disconnect().await;

            if result.is_ok() {
                println!("{kind}: sent, id={}", result.message_id);
                Ok(())
            } else {
                anyhow::bail!(
                    "{kind}: send failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".to_owned())
                );
            }
        }
        Command::Status { provider } => {
            let mut kinds = resolve_kinds(&provider, &paths)?;
            if kinds.is_empty() {
                kinds = ProviderKind::ALL.to_vec();
            }
            for kind in kinds {
                match providers::create(kind, &ctx) {
                    Ok(instance) => {
                        let authed = instance.is_authenticated().await;
                        let session = instance.session_id().await;
                        let caps = instance.capabilities();
                        println!(
                            "{kind}: authenticated={authed} session={} max_media={}",
                            session.unwrap_or_else(|| "-".to_owned()),
                            warelay::identity::format_size(caps.max_media_size),
                        );
                    }
                    Err(e) => println!("{kind}: not configured ({e})"),
                }
            }
            Ok(())
        }
        Command::Relay {
            provider,
            interval,
            lookback,
            web_heartbeat,
            reconnect_initial_ms,
            reconnect_max_ms,
            reconnect_factor,
            reconnect_jitter,
            reconnect_max_attempts,
        } => {
            let selection = if is_auto(&provider) {
                ProviderSelection::Auto
            } else {
                let kinds = resolve_kinds(&provider, &paths)?;
                if kinds.is_empty() {
                    ProviderSelection::Auto
                } else {
                    ProviderSelection::Explicit(kinds)
                }
            };
            // Tuning flags are propagated into every provider's listener.
            let listen = ListenOptions {
                poll_interval: Duration::from_secs(interval.max(1)),
                lookback: Duration::from_secs(lookback.max(1)),
                reconnect: ReconnectPolicy {
                    initial_ms: reconnect_initial_ms,
                    max_ms: reconnect_max_ms,
                    factor: reconnect_factor,
                    jitter_pct: reconnect_jitter,
                    max_attempts: reconnect_max_attempts,
                },
                web_heartbeat: (web_heartbeat > 0).then(|| Duration::from_secs(web_heartbeat)),
                fatal: None,
            };
            relay::run_relay(config, paths, selection, listen).await
        }
        Command::Heartbeat { provider, to } => {
            run_heartbeat(&config, &ctx, &provider, &paths, to.as_deref()).await
        }
    }
}

/// One-shot heartbeat: run the configured agent with the heartbeat prompt
/// and print (or forward) its reply.
async fn run_heartbeat(
    config: &Config,
    ctx: &ProviderContext,
    provider: &ProviderArgs,
    paths: &StatePaths,
    to: Option<&str>,
) -> Result<()> {
    let argv: Vec<String> = config
        .inbound
        .reply
        .command
        .iter()
        .map(|arg| {
            let mut tctx = warelay::template::TemplateContext::new();
            tctx.insert("Body".to_owned(), HEARTBEAT_PROMPT.to_owned());
            expand(arg, &tctx)
        })
        .collect();
    if argv.is_empty() {
        anyhow::bail!("inbound.reply.command is not configured");
    }

    let shared = agent::SharedChild::default();
    let reply = agent::run_agent(&argv, HEARTBEAT_PROMPT, &shared, |_| {})
        .await
        .context("heartbeat agent invocation failed")?;

    if reply.body.trim() == HEARTBEAT_OK && reply.media.is_empty() {
        info!("heartbeat acknowledged, nothing to push");
        println!("(heartbeat ok)");
        return Ok(());
    }

    println!("{}", reply.body);
    if let Some(to) = to {
        let kind = single_kind(provider, paths)?;
        let instance = providers::connect(kind, ctx)
            .await
            .with_context(|| format!("cannot connect provider {kind}"))?;
        let options = SendOptions {
            media: reply
                .media
                .iter()
                .map(|p| MediaAttachment::from_path(MediaKind::Document, p.clone()))
                .collect(),
            reply_to: None,
            typing: false,
        };
        let result = instance.send(to, reply.body.trim(), &options).await;
        instance.disconnect().await;
        if !result.is_ok() {
            anyhow::bail!(
                "heartbeat delivery failed: {}",
                result.error.unwrap_or_else(|| "unknown error".to_owned())
            );
        }
    }
    Ok(())
}

/// Whether the flags ask for auto-detection.
fn is_auto(args: &ProviderArgs) -> bool {
    args.provider.as_deref() == Some("auto")
        || (args.provider.is_none() && args.providers.is_empty())
}

/// Resolve the provider flags into an ordered kind list.
///
/// `--provider auto` (or no flag at all) detects from on-disk and
/// environment state. Unknown kinds fail loudly; deprecated aliases are
/// accepted with a warning.
fn resolve_kinds(args: &ProviderArgs, paths: &StatePaths) -> Result<Vec<ProviderKind>> {
    if is_auto(args) {
        return Ok(relay::detect_providers(paths));
    }
    let mut raw: Vec<&str> = Vec::new();
    if let Some(single) = args.provider.as_deref() {
        raw.push(single);
    }
    raw.extend(args.providers.iter().map(String::as_str));

    let mut kinds = Vec::new();
    for token in raw {
        let kind = ProviderKind::parse(token)
            .map_err(|bad| anyhow::anyhow!("unknown provider kind {bad:?}"))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// Resolve to exactly one provider kind, auto-detecting when unspecified.
fn single_kind(args: &ProviderArgs, paths: &StatePaths) -> Result<ProviderKind> {
    let kinds = resolve_kinds(args, paths)?;
    kinds
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("no provider configured; use --provider"))
}

/// Interpret a `--media` argument as URL or local path.
fn attachment_from_arg(arg: String) -> MediaAttachment {
    let is_url = url::Url::parse(&arg)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false);
    if is_url {
        MediaAttachment::from_url(MediaKind::Document, arg)
    } else {
        MediaAttachment {
            kind: MediaKind::Document,
            source: MediaSource::Path(arg.into()),
            mime: None,
            file_name: None,
            size: None,
            thumbnail: None,
        }
    }
}
