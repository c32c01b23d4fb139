//! Configuration directory resolution and on-disk state layout.
//!
//! All persistent state lives under one per-user directory, resolved once at
//! startup. Resolution order: `$WARELAY_CONFIG_DIR` if writable, then
//! `$HOME/.clawdis`, then the legacy `$HOME/.warelay`, then `./clawdis`,
//! finally a subdirectory of the OS temp dir. The first writable candidate
//! wins.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "WARELAY_CONFIG_DIR";

/// Preferred brand directory name under `$HOME`.
const PREFERRED_DIR: &str = ".clawdis";

/// Legacy brand directory name under `$HOME`.
const LEGACY_DIR: &str = ".warelay";

/// Workspace-relative fallback directory.
const WORKSPACE_FALLBACK: &str = "clawdis";

/// Resolved state layout under the config directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    /// The winning config directory.
    pub config_dir: PathBuf,
}

impl StatePaths {
    /// Resolve the config directory and ensure it exists.
    ///
    /// # Errors
    ///
    /// Returns an error only when not even the OS temp fallback is writable.
    pub fn resolve() -> anyhow::Result<Self> {
        Self::resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve using a custom env lookup (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when no candidate directory is writable.
    pub fn resolve_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut candidates: Vec<PathBuf> = Vec::new();

        if let Some(dir) = env(CONFIG_DIR_ENV) {
            candidates.push(PathBuf::from(dir));
        }
        if let Some(base) = directories::BaseDirs::new() {
            candidates.push(base.home_dir().join(PREFERRED_DIR));
            candidates.push(base.home_dir().join(LEGACY_DIR));
        }
        candidates.push(PathBuf::from(WORKSPACE_FALLBACK));
        candidates.push(std::env::temp_dir().join(WORKSPACE_FALLBACK));

        for candidate in candidates {
            if ensure_writable(&candidate) {
                debug!(dir = %candidate.display(), "config directory resolved");
                return Ok(Self {
                    config_dir: candidate,
                });
            }
            warn!(dir = %candidate.display(), "config directory candidate not writable, trying next");
        }

        Err(anyhow::anyhow!("no writable config directory candidate"))
    }

    /// WA-Web credential state directory.
    pub fn credentials_dir(&self) -> PathBuf {
        self.config_dir.join("credentials")
    }

    /// Telegram session token file (`telegram/session/session.string`).
    pub fn telegram_session_file(&self) -> PathBuf {
        self.config_dir
            .join("telegram")
            .join("session")
            .join("session.string")
    }

    /// Legacy Telegram session token location, erased on logout.
    pub fn telegram_session_file_legacy(&self) -> PathBuf {
        self.config_dir.join("telegram-session.string")
    }

    /// Streaming-download temp directory for the Telegram provider.
    pub fn telegram_temp_dir(&self) -> PathBuf {
        self.config_dir.join("telegram-temp")
    }

    /// Daily-rotated JSON log directory for relay runs.
    pub fn logs_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    /// User configuration file, preferring `clawdis.json` over `warelay.json`.
    pub fn config_file(&self) -> PathBuf {
        let preferred = self.config_dir.join("clawdis.json");
        if preferred.exists() {
            return preferred;
        }
        let legacy = self.config_dir.join("warelay.json");
        if legacy.exists() {
            return legacy;
        }
        preferred
    }
}

/// Create the directory if needed and probe it with a throwaway write.
fn ensure_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(format!(".probe-{}", uuid::Uuid::new_v4()));
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Single-writer lock
// ---------------------------------------------------------------------------

/// Guard holding the credentials-directory lock file.
///
/// The state directory is single-writer: two relay processes sharing it is
/// undefined behaviour, so a pid lock file detects the overlap. The file is
/// removed on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Acquire the lock file under the credentials directory.
    ///
    /// A stale lock whose pid no longer exists is replaced with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error when another live process holds the lock or the
    /// lock file cannot be written.
    pub fn acquire(credentials_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(credentials_dir).with_context(|| {
            format!(
                "failed to create credentials directory {}",
                credentials_dir.display()
            )
        })?;
        let path = credentials_dir.join(".warelay.lock");

        if let Ok(existing) = fs::read_to_string(&path) {
            let pid = existing.trim();
            if pid_is_alive(pid) {
                return Err(anyhow::anyhow!(
                    "another warelay instance (pid {pid}) holds {}",
                    path.display()
                ));
            }
            warn!(path = %path.display(), stale_pid = pid, "replacing stale lock file");
        }

        fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("failed to write lock file {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Best-effort liveness probe for a pid read from a lock file.
fn pid_is_alive(pid: &str) -> bool {
    if pid.is_empty() || !pid.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    #[cfg(unix)]
    {
        Path::new("/proc").join(pid).exists()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_when_writable() {
        let tmp = std::env::temp_dir().join(format!("warelay-paths-{}", uuid::Uuid::new_v4()));
        let tmp_str = tmp.to_string_lossy().to_string();
        let paths = StatePaths::resolve_with(|key| {
            (key == CONFIG_DIR_ENV).then(|| tmp_str.clone())
        })
        .expect("resolve");
        assert_eq!(paths.config_dir, tmp);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn lock_rejects_second_acquire() {
        let tmp = std::env::temp_dir().join(format!("warelay-lock-{}", uuid::Uuid::new_v4()));
        let first = StateLock::acquire(&tmp).expect("first lock");
        assert!(StateLock::acquire(&tmp).is_err());
        drop(first);
        let second = StateLock::acquire(&tmp).expect("lock after release");
        drop(second);
        let _ = fs::remove_dir_all(&tmp);
    }
}
