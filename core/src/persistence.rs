//! Whole-file JSON persistence with atomic replace.
//!
//! Stores are loaded in full at the start of an activation and rewritten in
//! full at the end; there is no partial update. Saves go through a `.tmp`
//! sibling followed by `rename`, so a killed activation can never leave a
//! half-written store behind.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::error::Result;
use crate::error::StoreError;

/// Read a whole JSON state file.
///
/// A missing file is the normal first-activation case and yields
/// `T::default()`. An unreadable or unparseable file is an error; the caller
/// fails open rather than guessing at state.
pub(crate) fn load_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically replace `path` with `value` serialized as pretty JSON.
pub(crate) fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn missing_file_loads_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let loaded: Sample = load_or_default(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let err = load_or_default::<Sample>(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        save_json(&path, &Sample { n: 7 }).unwrap();
        let loaded: Sample = load_or_default(&path).unwrap();
        assert_eq!(loaded, Sample { n: 7 });
        // No leftover temp file after a successful save.
        assert!(!path.with_extension("tmp").exists());
    }
}
