// crates/apprentice-server/src/versioning/git.rs
// Git version provider using the git2 crate

use super::{ListRefsOptions, RefChange, VersionProvider};
use crate::db::{RefType, VersionRefRow, VersionStatus};
use crate::utils::sha256_hex;
use anyhow::{Context as _, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use git2::{Delta, DiffFindOptions, DiffOptions, Oid, Repository, Sort};
use serde_json::json;
use std::path::Path;

/// Default revwalk depth when the caller does not bound the listing.
const DEFAULT_MAX_DEPTH: usize = 500;

pub struct GitProvider;

impl GitProvider {
    fn open(path: &Path) -> Result<Repository> {
        // discover walks up the directory tree, handling worktrees and
        // contexts registered at a repository subdirectory
        Repository::discover(path)
            .with_context(|| format!("{} is not inside a git repository", path.display()))
    }

    fn commit_to_ref(commit: &git2::Commit<'_>) -> VersionRefRow {
        let timestamp = DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0)
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let id = commit.id().to_string();
        let author = commit.author();
        VersionRefRow {
            name: id.chars().take(7).collect(),
            id,
            ref_type: RefType::Commit,
            parent_ids: commit.parent_ids().map(|p| p.to_string()).collect(),
            timestamp,
            message: commit.summary().map(str::to_string),
            metadata: json!({
                "author": {
                    "name": author.name().unwrap_or_default(),
                    "email": author.email().unwrap_or_default(),
                }
            }),
        }
    }

    fn blob_bytes(repo: &Repository, ref_id: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let oid = Oid::from_str(ref_id).context("invalid ref id")?;
        let commit = match repo.find_commit(oid) {
            Ok(commit) => commit,
            Err(_) => return Ok(None),
        };
        let tree = commit.tree()?;
        let entry = match tree.get_path(Path::new(key)) {
            Ok(entry) => entry,
            Err(_) => return Ok(None),
        };
        let object = entry.to_object(repo)?;
        Ok(object.as_blob().map(|b| b.content().to_vec()))
    }
}

impl VersionProvider for GitProvider {
    fn provider_type(&self) -> &'static str {
        "git"
    }

    fn detect(&self, path: &Path) -> bool {
        Repository::discover(path).is_ok()
    }

    fn get_current_ref(&self, path: &Path) -> Result<Option<VersionRefRow>> {
        let repo = Self::open(path)?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(_) => return Ok(None), // empty repository
        };
        let commit = head.peel_to_commit()?;
        Ok(Some(Self::commit_to_ref(&commit)))
    }

    fn get_ref(&self, path: &Path, id: &str) -> Result<Option<VersionRefRow>> {
        let repo = Self::open(path)?;
        let oid = match Oid::from_str(id) {
            Ok(oid) => oid,
            Err(_) => return Ok(None),
        };
        match repo.find_commit(oid) {
            Ok(commit) => Ok(Some(Self::commit_to_ref(&commit))),
            Err(_) => Ok(None),
        }
    }

    fn list_refs(&self, path: &Path, opts: &ListRefsOptions) -> Result<Vec<VersionRefRow>> {
        let repo = Self::open(path)?;
        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TIME)?;

        match &opts.branch {
            Some(branch) => {
                let branch_ref = repo
                    .find_branch(branch, git2::BranchType::Local)
                    .with_context(|| format!("branch {branch:?} not found"))?;
                let oid = branch_ref
                    .get()
                    .target()
                    .ok_or_else(|| anyhow::anyhow!("branch {branch:?} has no target"))?;
                walk.push(oid)?;
            }
            None => {
                if repo.head().is_err() {
                    return Ok(vec![]); // empty repository
                }
                walk.push_head()?;
            }
        }

        let limit = opts.limit.unwrap_or(DEFAULT_MAX_DEPTH);
        let mut refs = Vec::new();
        for oid in walk.take(limit) {
            let commit = repo.find_commit(oid?)?;
            let vref = Self::commit_to_ref(&commit);
            // the walk is newest-first; everything past the bound is older
            if let Some(ref since) = opts.since {
                if vref.timestamp.as_str() < since.as_str() {
                    break;
                }
            }
            refs.push(vref);
        }
        Ok(refs)
    }

    fn get_diff(&self, path: &Path, from: Option<&str>, to: &str) -> Result<Vec<RefChange>> {
        let repo = Self::open(path)?;
        let to_commit = repo.find_commit(Oid::from_str(to)?)?;
        let to_tree = to_commit.tree()?;
        let from_tree = match from {
            Some(id) => Some(repo.find_commit(Oid::from_str(id)?)?.tree()?),
            None => None, // root commit diffs against the empty tree
        };

        let mut diff_opts = DiffOptions::new();
        let mut diff = repo.diff_tree_to_tree(
            from_tree.as_ref(),
            Some(&to_tree),
            Some(&mut diff_opts),
        )?;
        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))?;

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let new_path = delta
                .new_file()
                .path()
                .map(|p| p.to_string_lossy().into_owned());
            let old_path = delta
                .old_file()
                .path()
                .map(|p| p.to_string_lossy().into_owned());

            let (key, status, renamed_from) = match delta.status() {
                Delta::Added => (new_path, VersionStatus::Added, None),
                Delta::Deleted => (old_path, VersionStatus::Deleted, None),
                Delta::Renamed => (new_path, VersionStatus::Renamed, old_path),
                Delta::Modified | Delta::Typechange | Delta::Copied => {
                    (new_path, VersionStatus::Modified, None)
                }
                _ => continue,
            };
            if let Some(key) = key {
                changes.push(RefChange {
                    key,
                    status,
                    renamed_from,
                });
            }
        }
        Ok(changes)
    }

    fn get_content(&self, path: &Path, key: &str, ref_id: &str) -> Result<Option<String>> {
        let repo = Self::open(path)?;
        Ok(Self::blob_bytes(&repo, ref_id, key)?.and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    fn get_content_hash(&self, path: &Path, key: &str, ref_id: &str) -> Result<Option<String>> {
        let repo = Self::open(path)?;
        Ok(Self::blob_bytes(&repo, ref_id, key)?.map(|bytes| sha256_hex(&bytes)))
    }

    fn list_files(&self, path: &Path, ref_id: &str) -> Result<Vec<String>> {
        let repo = Self::open(path)?;
        let commit = repo.find_commit(Oid::from_str(ref_id)?)?;
        let tree = commit.tree()?;

        let mut files = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.push(format!("{root}{name}"));
                }
            }
            git2::TreeWalkResult::Ok
        })?;
        Ok(files)
    }

    fn can_retrieve(&self, path: &Path, ref_id: &str) -> bool {
        let Ok(repo) = Self::open(path) else {
            return false;
        };
        Oid::from_str(ref_id)
            .ok()
            .and_then(|oid| repo.find_commit(oid).ok())
            .is_some()
    }
}
