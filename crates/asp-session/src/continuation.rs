//! Continuation key derivation and filesystem session directories, per spec
//! §4.14 step 2 and §8 property 9.

use asp_error::{AspError, ErrorCode};
use asp_harness_core::HarnessId;
use asp_paths::AspHome;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Result alias for this module's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// An opaque, harness-specific reference allowing a subsequent turn to
/// resume the same logical session. Persisted by the caller between runs;
/// never invented by the driver beyond the first-run derivation below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationRef {
    /// Which harness this continuation belongs to.
    pub harness_id: HarnessId,
    /// The opaque key. For filesystem-backed frontends this is a
    /// deterministic hex digest; SDK-only frontends may use a harness-
    /// native identifier instead.
    pub key: String,
}

impl ContinuationRef {
    /// Derive the deterministic first-run continuation key for a
    /// filesystem-backed frontend: `sha256(cpSessionId)`, hex-encoded.
    ///
    /// A pure function of `(harness_id, cp_session_id)` (spec §8 property
    /// 9; `aspHome` only selects *where* the resulting directory lives, not
    /// the key itself).
    #[must_use]
    pub fn derive_first_run(harness_id: HarnessId, cp_session_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(cp_session_id.as_bytes());
        let key = hex_encode(&hasher.finalize());
        Self { harness_id, key }
    }

    /// The on-disk directory this continuation maps to under `home`.
    #[must_use]
    pub fn session_dir(&self, home: &AspHome) -> PathBuf {
        home.session_dir(self.harness_id.as_str(), &self.key)
    }

    /// Verify the continuation's directory exists, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ContinuationNotFound`] if this is a resume
    /// (`is_first_run = false`) and the directory is missing.
    pub fn ensure_directory(&self, home: &AspHome, is_first_run: bool) -> Result<PathBuf> {
        let dir = self.session_dir(home);
        if is_first_run {
            std::fs::create_dir_all(&dir)
                .map_err(|e| AspError::new(ErrorCode::FilesystemError, format!("creating session dir {}: {e}", dir.display())))?;
            return Ok(dir);
        }
        if !dir.is_dir() {
            return Err(AspError::new(
                ErrorCode::ContinuationNotFound,
                format!("continuation key '{}' has no session directory", self.key),
            ));
        }
        Ok(dir)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to String cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_run_key_is_pure_function_of_inputs() {
        let a = ContinuationRef::derive_first_run(HarnessId::ClaudeCli, "cp-session-1");
        let b = ContinuationRef::derive_first_run(HarnessId::ClaudeCli, "cp-session-1");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_session_ids_yield_distinct_keys() {
        let a = ContinuationRef::derive_first_run(HarnessId::ClaudeCli, "cp-session-1");
        let b = ContinuationRef::derive_first_run(HarnessId::ClaudeCli, "cp-session-2");
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn ensure_directory_creates_on_first_run() {
        let tmp = TempDir::new().unwrap();
        let home = AspHome::at(tmp.path());
        let cont = ContinuationRef::derive_first_run(HarnessId::ClaudeCli, "cp-session-1");
        let dir = cont.ensure_directory(&home, true).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn ensure_directory_fails_for_missing_resume() {
        let tmp = TempDir::new().unwrap();
        let home = AspHome::at(tmp.path());
        let cont = ContinuationRef { harness_id: HarnessId::PiCli, key: "nonexistent".to_string() };
        let err = cont.ensure_directory(&home, false).unwrap_err();
        assert_eq!(err.code, ErrorCode::ContinuationNotFound);
    }
}
