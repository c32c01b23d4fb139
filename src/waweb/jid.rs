//! Reverse mapping from linked-id (`@lid`) JIDs to phone numbers.
//!
//! The backend sometimes addresses senders by an internal linked-id instead
//! of their phone JID. The credential state directory carries reverse
//! mapping files named `lid-mapping-<id>_reverse.json`, each a JSON object
//! of lid-local-part to phone digits. A sender whose lid has no mapping is
//! not addressable and its messages are dropped upstream.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::identifiers::{is_lid_jid, JID_LID_SUFFIX};

/// File-name prefix of reverse mapping files.
const REVERSE_PREFIX: &str = "lid-mapping-";

/// File-name suffix of reverse mapping files.
const REVERSE_SUFFIX: &str = "_reverse.json";

/// Merged view over all reverse mapping files in the credentials directory.
#[derive(Debug, Default)]
pub struct LidDirectory {
    map: HashMap<String, String>,
}

impl LidDirectory {
    /// Load and merge every `lid-mapping-*_reverse.json` under `dir`.
    ///
    /// Unreadable or malformed files are skipped with a warning; the
    /// directory not existing yet yields an empty mapping.
    pub fn load(dir: &Path) -> Self {
        let mut map = HashMap::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Self { map };
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(REVERSE_PREFIX) || !name.ends_with(REVERSE_SUFFIX) {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(contents) => match serde_json::from_str::<HashMap<String, String>>(&contents) {
                    Ok(parsed) => {
                        debug!(
                            file = name,
                            entries = parsed.len(),
                            "loaded lid reverse mapping"
                        );
                        map.extend(parsed);
                    }
                    Err(e) => {
                        warn!(file = name, error = %e, "malformed lid reverse mapping, skipping");
                    }
                },
                Err(e) => {
                    warn!(file = name, error = %e, "unreadable lid reverse mapping, skipping");
                }
            }
        }
        Self { map }
    }

    /// Number of known lid entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no mappings are loaded.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Resolve a lid JID (`<id>@lid`, optional `:<device>` suffix) to
    /// canonical `+E164`. Returns `None` when the mapping is missing.
    pub fn resolve(&self, lid_jid: &str) -> Option<String> {
        if !is_lid_jid(lid_jid) {
            return None;
        }
        let local = lid_jid.strip_suffix(JID_LID_SUFFIX)?;
        let local = local.split(':').next().unwrap_or(local);
        let digits = self.map.get(local)?;
        let digits = digits.strip_prefix('+').unwrap_or(digits);
        Some(format!("+{digits}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_with_mapping(json: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("warelay-lid-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create dir");
        std::fs::write(dir.join("lid-mapping-123_reverse.json"), json).expect("write mapping");
        dir
    }

    #[test]
    fn resolves_mapped_lid() {
        let dir = dir_with_mapping(r#"{"98765": "4915123456789"}"#);
        let lids = LidDirectory::load(&dir);
        assert_eq!(
            lids.resolve("98765@lid"),
            Some("+4915123456789".to_owned())
        );
        assert_eq!(
            lids.resolve("98765:4@lid"),
            Some("+4915123456789".to_owned())
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_mapping_is_none() {
        let dir = dir_with_mapping(r#"{"1": "2"}"#);
        let lids = LidDirectory::load(&dir);
        assert_eq!(lids.resolve("98765@lid"), None);
        assert_eq!(lids.resolve("4915123456789@s.whatsapp.net"), None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_is_skipped() {
        let dir = dir_with_mapping("not json");
        let lids = LidDirectory::load(&dir);
        assert!(lids.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
