// crates/apprentice-server/src/versioning/mod.rs
// Version providers: a capability set over a context's history
//
// One built-in provider (git). Others can be added to the registry at
// compile time; the provider row on a context records which one applies.

pub mod git;
pub mod sync;

use crate::db::{VersionRefRow, VersionStatus};
use anyhow::Result;
use std::path::Path;

/// One file change between a ref and its first parent.
#[derive(Debug, Clone)]
pub struct RefChange {
    pub key: String,
    pub status: VersionStatus,
    pub renamed_from: Option<String>,
}

/// Options for listing refs.
#[derive(Debug, Clone, Default)]
pub struct ListRefsOptions {
    /// Walk this branch instead of HEAD.
    pub branch: Option<String>,
    /// Only refs at or after this RFC 3339 time.
    pub since: Option<String>,
    /// Stop after this many refs.
    pub limit: Option<usize>,
}

/// Capability set every version provider implements.
pub trait VersionProvider: Send + Sync {
    fn provider_type(&self) -> &'static str;

    /// Whether this provider manages history at `path`.
    fn detect(&self, path: &Path) -> bool;

    /// The ref the working tree currently points at.
    fn get_current_ref(&self, path: &Path) -> Result<Option<VersionRefRow>>;

    /// A specific ref by canonical id.
    fn get_ref(&self, path: &Path, id: &str) -> Result<Option<VersionRefRow>>;

    /// Refs newest-first, up to `limit`.
    fn list_refs(&self, path: &Path, opts: &ListRefsOptions) -> Result<Vec<VersionRefRow>>;

    /// Changes between `from` (None for the empty tree) and `to`.
    fn get_diff(&self, path: &Path, from: Option<&str>, to: &str) -> Result<Vec<RefChange>>;

    /// File content at a ref; None when absent or not text.
    fn get_content(&self, path: &Path, key: &str, ref_id: &str) -> Result<Option<String>>;

    /// Content hash (SHA-256 of the file bytes) at a ref.
    fn get_content_hash(&self, path: &Path, key: &str, ref_id: &str) -> Result<Option<String>>;

    /// All file keys present at a ref.
    fn list_files(&self, path: &Path, ref_id: &str) -> Result<Vec<String>>;

    /// Whether the ref is still reachable in the underlying store.
    fn can_retrieve(&self, path: &Path, ref_id: &str) -> bool;
}

static GIT: git::GitProvider = git::GitProvider;
static PROVIDERS: [&dyn VersionProvider; 1] = [&GIT];

/// All registered providers, in detection order.
pub fn providers() -> &'static [&'static dyn VersionProvider] {
    &PROVIDERS
}

/// Detect which provider (if any) manages `path`.
pub fn detect_provider(path: &Path) -> Option<&'static dyn VersionProvider> {
    providers().iter().copied().find(|p| p.detect(path))
}

/// Look up a provider by its recorded type.
pub fn provider_by_type(provider_type: &str) -> Option<&'static dyn VersionProvider> {
    providers()
        .iter()
        .copied()
        .find(|p| p.provider_type() == provider_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_git() {
        assert!(provider_by_type("git").is_some());
        assert!(provider_by_type("svn").is_none());
    }

    #[test]
    fn test_detect_on_plain_dir_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(detect_provider(dir.path()).is_none());
    }
}
