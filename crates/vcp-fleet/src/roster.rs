//! Roster file persistence.
//!
//! The roster is a JSON object `{ "chargers": [...] }` rewritten after
//! every mutation. Writes go to a sibling temp file first and are renamed
//! into place so a crash mid-write never truncates the roster. Load
//! failures fall back to an empty roster; the simulator must come up even
//! with a damaged file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, warn};
use vcp_types::ChargerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    pub chargers: Vec<ChargerConfig>,
}

/// Load the roster, returning an empty one on any failure.
pub fn load(path: &Path) -> Roster {
    if !path.exists() {
        return Roster::default();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(roster) => roster,
            Err(e) => {
                warn!(path = %path.display(), "roster file unreadable, starting empty: {e}");
                Roster::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), "cannot read roster file, starting empty: {e}");
            Roster::default()
        }
    }
}

/// Persist the roster atomically (write-then-rename). Failures are logged,
/// never fatal.
pub fn save(path: &Path, chargers: &[ChargerConfig]) {
    let roster = Roster {
        chargers: chargers.to_vec(),
    };
    let content = match serde_json::to_string_pretty(&roster) {
        Ok(content) => content,
        Err(e) => {
            error!("cannot serialize roster: {e}");
            return;
        }
    };

    let tmp = path.with_extension("json.tmp");
    if let Err(e) = std::fs::write(&tmp, content) {
        error!(path = %tmp.display(), "cannot write roster temp file: {e}");
        return;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        error!(path = %path.display(), "cannot move roster into place: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chargers.json");

        let chargers = vec![ChargerConfig::new("CP-A"), ChargerConfig::new("CP-B")];
        save(&path, &chargers);

        let roster = load(&path);
        assert_eq!(roster.chargers.len(), 2);
        assert_eq!(roster.chargers[0].cp_id, "CP-A");

        // No stray temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let roster = load(&dir.path().join("nope.json"));
        assert!(roster.chargers.is_empty());
    }

    #[test]
    fn test_damaged_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chargers.json");
        std::fs::write(&path, "{not json").unwrap();
        let roster = load(&path);
        assert!(roster.chargers.is_empty());
    }
}
