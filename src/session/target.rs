//! Normalized target identifiers.

use crate::error::ToolError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// The normalized identity of a dump or trace file.
///
/// Targets are compared case-insensitively on the absolute path (DbgEng
/// targets are Windows paths), so `C:\dumps\crash.dmp` and
/// `c:\DUMPS\crash.dmp` name the same session. Normalization is purely
/// lexical (the file does not have to exist) and idempotent: normalizing
/// an already-normalized identifier yields the same value.
#[derive(Debug, Clone)]
pub struct TargetId {
    path: PathBuf,
    key: String,
}

impl TargetId {
    /// Normalize a raw path string into a target identifier.
    pub fn normalize(raw: &str) -> Result<Self, ToolError> {
        let path = std::path::absolute(Path::new(raw))
            .map_err(|_| ToolError::InvalidPath(raw.to_string()))?;
        let key = path.to_string_lossy().to_lowercase();
        Ok(Self { path, key })
    }

    /// The normalized absolute path, original casing preserved.
    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.display().fmt(f)
    }
}

impl PartialEq for TargetId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for TargetId {}

impl Hash for TargetId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_become_absolute() {
        let id = TargetId::normalize("dumps/crash.dmp").expect("should normalize");
        assert!(id.as_path().is_absolute());
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let lower = TargetId::normalize("/dumps/crash.dmp").expect("should normalize");
        let upper = TargetId::normalize("/DUMPS/CRASH.DMP").expect("should normalize");
        assert_eq!(lower, upper);
        // Display keeps the caller's casing.
        assert_ne!(lower.to_string(), upper.to_string());
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = TargetId::normalize("/dumps/../dumps/crash.dmp").expect("should normalize");
        let twice = TargetId::normalize(&once.to_string()).expect("should normalize");
        assert_eq!(once, twice);
        assert_eq!(once.to_string(), twice.to_string());
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = TargetId::normalize("").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse path"), "{err}");
    }
}
