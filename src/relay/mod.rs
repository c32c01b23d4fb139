//! Multi-provider relay supervisor.
//!
//! Runs one or many providers concurrently under a single cancellation
//! handle: creates and initialises each one, installs the auto-reply
//! engine's handler, starts listening with the propagated tuning flags, and
//! on SIGINT/SIGTERM stops and disconnects every provider, awaiting all
//! settlements before returning. A fault in one provider is logged and
//! never affects the others.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::{Config, TwilioEnv};
use crate::engine::AutoReplyEngine;
use crate::paths::{StateLock, StatePaths};
use crate::providers::{
    self, ListenOptions, Provider, ProviderContext, ProviderFatal, ProviderKind,
};
use crate::session::{heartbeat, SessionManager};

/// How providers are selected for a relay run.
#[derive(Debug, Clone)]
pub enum ProviderSelection {
    /// Explicit ordered list from `--provider`/`--providers`.
    Explicit(Vec<ProviderKind>),
    /// `--provider auto`: detect from on-disk and environment state.
    Auto,
}

/// Detect configured providers in deterministic order: WA-Web credentials,
/// then the Telegram session file, then a complete Twilio environment.
pub fn detect_providers(paths: &StatePaths) -> Vec<ProviderKind> {
    let mut detected = Vec::new();
    if crate::waweb::has_credentials(paths) {
        detected.push(ProviderKind::WaWeb);
    }
    if crate::telegram::has_session(paths) {
        detected.push(ProviderKind::Telegram);
    }
    if TwilioEnv::is_complete() {
        detected.push(ProviderKind::WaTwilio);
    }
    detected
}

/// Run the relay until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error when no provider can be selected or started, or when
/// another instance holds the state lock.
pub async fn run_relay(
    config: Arc<Config>,
    paths: StatePaths,
    selection: ProviderSelection,
    listen: ListenOptions,
) -> Result<()> {
    // The state directory is single-writer.
    let _lock = StateLock::acquire(&paths.credentials_dir())
        .context("another relay instance appears to be running")?;

    let detected = detect_providers(&paths);
    let kinds = match selection {
        ProviderSelection::Auto => {
            if detected.is_empty() {
                anyhow::bail!(
                    "no provider is configured: pair WA-Web, log in to Telegram, \
                     or set the Twilio environment variables"
                );
            }
            detected.clone()
        }
        ProviderSelection::Explicit(kinds) => kinds,
    };

    for kind in &detected {
        if !kinds.contains(kind) {
            info!(provider = %kind, "authenticated but not selected");
        }
    }

    let reply = &config.inbound.reply;
    let sessions = Arc::new(SessionManager::new(
        reply.session.scope,
        reply.session.idle_minutes,
        reply.heartbeat_minutes,
    ));
    let engine = AutoReplyEngine::new(Arc::clone(&config), paths.clone(), Arc::clone(&sessions));

    // Observer channel for tool-streaming markers.
    let (observer_tx, mut observer_rx) = mpsc::channel::<String>(64);
    engine.set_observer(observer_tx);
    tokio::spawn(async move {
        while let Some(event) = observer_rx.recv().await {
            debug!(target: "tool-events", "{event}");
        }
    });

    // One fatal channel shared by every provider's listen task.
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<ProviderFatal>(8);
    let listen = ListenOptions {
        fatal: Some(fatal_tx),
        ..listen
    };

    let ctx = ProviderContext {
        config: Arc::clone(&config),
        paths: paths.clone(),
    };

    // Create-and-initialise every selected provider; one failing does not
    // stop the others.
    let mut running: Vec<Arc<dyn Provider>> = Vec::new();
    for kind in &kinds {
        match providers::connect(*kind, &ctx).await {
            Ok(provider) => {
                engine.register_provider(Arc::clone(&provider));
                provider.on_message(engine.handler());
                match provider.start_listening(listen.clone()).await {
                    Ok(()) => {
                        info!(provider = %kind, "provider listening");
                        running.push(provider);
                    }
                    Err(e) => {
                        error!(provider = %kind, error = %e, "failed to start listening");
                    }
                }
            }
            Err(e) => {
                error!(provider = %kind, error = %e, "failed to initialise provider");
            }
        }
    }
    if running.is_empty() {
        anyhow::bail!("no provider could be started");
    }

    // Background session maintenance under the shared cancellation handle.
    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = sessions.spawn_sweeper(stop_rx.clone());
    let scheduler = heartbeat::spawn_scheduler(
        Arc::clone(&sessions),
        engine.heartbeat_callback(),
        stop_rx,
    );

    info!(
        providers = %kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(","),
        "relay running; press Ctrl+C to stop"
    );

    // Wait for a shutdown signal, tracking provider fatals as they come in.
    let mut alive = running.len();
    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                break;
            }
            fatal = fatal_rx.recv() => {
                if let Some(ProviderFatal { kind, message }) = fatal {
                    error!(provider = %kind, %message, "provider terminated");
                    alive = alive.saturating_sub(1);
                    if alive == 0 {
                        error!("all providers terminated, shutting down");
                        break;
                    }
                }
            }
        }
    }

    // Cancellation: stop accepting work, flush in-flight, release in LIFO
    // order, then settle.
    let _ = stop_tx.send(true);
    for provider in running.iter().rev() {
        provider.stop_listening().await;
        provider.disconnect().await;
        info!(provider = %provider.kind(), "provider stopped");
    }
    sessions.destroy_all();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "session sweeper task failed");
    }
    if let Err(e) = scheduler.await {
        warn!(error = %e, "heartbeat scheduler task failed");
    }

    info!("relay stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Ctrl+C everywhere else).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
