//! Persisted confirmation token
//!
//! `rootstrap confirm` stores the token next to the progress record so a
//! later `run` or `resume` can proceed without prompting. A stored token is
//! only used while it is younger than `engine.confirmation_ttl_minutes`.

use anyhow::{Context, Result};
use chrono::Duration;
use provision::{ConfirmationToken, PlanDigest};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// On-disk wrapper, leaves room for future fields
#[derive(Debug, Serialize, Deserialize)]
struct TokenDocument {
    token: ConfirmationToken,
}

/// Token file in the state directory
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored token, `None` if there is none
    pub fn load(&self) -> Result<Option<ConfirmationToken>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No confirmation token at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read token file: {}", self.path.display())
                });
            }
        };

        let doc: TokenDocument = toml::from_str(&content)
            .with_context(|| format!("Failed to parse token file: {}", self.path.display()))?;
        Ok(Some(doc.token))
    }

    /// Load the stored token if it authorizes `digest` and has not expired
    ///
    /// Stale or mismatched tokens are logged and ignored, never an error.
    pub fn load_valid(
        &self,
        digest: &PlanDigest,
        ttl: Duration,
    ) -> Result<Option<ConfirmationToken>> {
        let Some(token) = self.load()? else {
            return Ok(None);
        };

        if !token.authorizes(digest) {
            log::warn!(
                "Stored confirmation is for plan {}, current plan is {}; ignoring it",
                token.plan_digest().short(),
                digest.short()
            );
            return Ok(None);
        }
        if token.is_expired(ttl) {
            log::warn!(
                "Stored confirmation from {} has expired; ignoring it",
                token.issued_at().format("%Y-%m-%d %H:%M UTC")
            );
            return Ok(None);
        }

        Ok(Some(token))
    }

    /// Save `token`, replacing any previous one
    pub fn save(&self, token: &ConfirmationToken) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let doc = TokenDocument {
            token: token.clone(),
        };
        let content = toml::to_string_pretty(&doc).context("Failed to serialize token to TOML")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write token file: {}", self.path.display()))?;

        log::debug!("Saved confirmation token to {}", self.path.display());
        Ok(())
    }

    /// Delete the token file if present
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("Removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove token file: {}", self.path.display())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use provision::{DiskIntent, DiskPlan, Firmware};

    fn summary(size_mib: u64) -> provision::PlanSummary {
        DiskPlan::from_intent(&DiskIntent::new("/dev/vda", Firmware::Uefi), size_mib)
            .unwrap()
            .summary()
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::new(dir.path().join("token.toml"));
        assert!(file.load().unwrap().is_none());
        file.remove().unwrap();
    }

    #[test]
    fn test_save_and_load_valid() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::new(dir.path().join("nested").join("token.toml"));
        let plan = summary(8192);
        let token = ConfirmationToken::issue(&plan);
        file.save(&token).unwrap();

        let loaded = file.load_valid(&plan.digest, Duration::minutes(60)).unwrap();
        assert_eq!(loaded, Some(token));
    }

    #[test]
    fn test_other_plan_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::new(dir.path().join("token.toml"));
        file.save(&ConfirmationToken::issue(&summary(8192))).unwrap();

        let other = summary(16384);
        assert!(file.load_valid(&other.digest, Duration::minutes(60)).unwrap().is_none());
    }

    #[test]
    fn test_expired_token_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::new(dir.path().join("token.toml"));
        let plan = summary(8192);
        file.save(&ConfirmationToken::issue(&plan)).unwrap();

        assert!(file.load_valid(&plan.digest, Duration::minutes(-1)).unwrap().is_none());
    }
}
