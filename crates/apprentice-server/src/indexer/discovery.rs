// crates/apprentice-server/src/indexer/discovery.rs
// File discovery: glob-filtered walks over a context's roots, plus hashing

use crate::db::{ContextRow, Mount};
use anyhow::{Context as _, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Excludes applied to every context on top of its own patterns.
const DEFAULT_EXCLUDES: &[&str] = &["node_modules", ".git", "dist", "build", "*.log"];

/// One file found under a context root.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Virtual key within the context (mount-prefixed for mounted roots).
    pub key: String,
    pub absolute_path: PathBuf,
    /// The root this file was found under (main path or a mount path).
    pub source_path: String,
}

/// Compiled include/exclude patterns for one context.
struct ContextGlobs {
    include: GlobSet,
    exclude: GlobSet,
}

impl ContextGlobs {
    fn compile(ctx: &ContextRow) -> Result<Self> {
        let includes: Vec<String> = if ctx.include_patterns.is_empty() {
            vec!["**/*".to_string()]
        } else {
            ctx.include_patterns.clone()
        };

        let mut include = GlobSetBuilder::new();
        for pattern in &includes {
            include.add(Glob::new(pattern).with_context(|| format!("bad include glob {pattern:?}"))?);
        }

        let mut exclude = GlobSetBuilder::new();
        for pattern in DEFAULT_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .chain(ctx.exclude_patterns.iter().cloned())
        {
            for expanded in expand_exclude(&pattern) {
                exclude.add(
                    Glob::new(&expanded).with_context(|| format!("bad exclude glob {pattern:?}"))?,
                );
            }
        }

        Ok(Self {
            include: include.build()?,
            exclude: exclude.build()?,
        })
    }

    fn matches(&self, relative: &str) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }
}

/// A bare name like `node_modules` or `*.log` excludes matches at any
/// depth, including everything beneath a matched directory.
fn expand_exclude(pattern: &str) -> Vec<String> {
    if pattern.contains('/') {
        vec![pattern.to_string()]
    } else {
        vec![
            pattern.to_string(),
            format!("**/{pattern}"),
            format!("{pattern}/**"),
            format!("**/{pattern}/**"),
        ]
    }
}

/// Enumerate all files of a context: the main path and every mount, with
/// mount keys prefixed by `mount/`. When the same key appears under more
/// than one root, the last one discovered wins.
pub fn discover_context(ctx: &ContextRow) -> Result<Vec<DiscoveredFile>> {
    let globs = ContextGlobs::compile(ctx)?;
    let mut by_key: std::collections::BTreeMap<String, DiscoveredFile> = Default::default();

    walk_root(Path::new(&ctx.path), &ctx.path, None, &globs, &mut by_key);
    for Mount { path, mount } in &ctx.mounts {
        walk_root(Path::new(path), path, Some(mount.as_str()), &globs, &mut by_key);
    }

    Ok(by_key.into_values().collect())
}

fn walk_root(
    root: &Path,
    source_path: &str,
    mount: Option<&str>,
    globs: &ContextGlobs,
    out: &mut std::collections::BTreeMap<String, DiscoveredFile>,
) {
    let walker = WalkDir::new(root).follow_links(true).into_iter();
    // symlinked directories are never descended into
    for entry in walker.filter_entry(|e| !(e.path_is_symlink() && e.file_type().is_dir())) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // broken symlinks and unreadable directories land here
                tracing::debug!("Skipping during discovery of {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if !globs.matches(&relative) {
            continue;
        }

        let key = match mount {
            Some(prefix) => format!("{prefix}/{relative}"),
            None => relative,
        };
        out.insert(
            key.clone(),
            DiscoveredFile {
                key,
                absolute_path: entry.path().to_path_buf(),
                source_path: source_path.to_string(),
            },
        );
    }
}

/// Streaming SHA-256 over a file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{now_rfc3339, sha256_hex};
    use std::fs;
    use tempfile::TempDir;

    fn ctx(path: &Path) -> ContextRow {
        ContextRow {
            id: "test".into(),
            name: "test".into(),
            path: path.to_string_lossy().into_owned(),
            mounts: vec![],
            enabled: true,
            include_patterns: vec!["**/*".into()],
            exclude_patterns: vec![],
            registered_at: now_rfc3339(),
            last_indexed_at: None,
            version_provider_type: None,
        }
    }

    #[test]
    fn test_discovery_applies_default_excludes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.sh"), "echo 1").unwrap();
        fs::write(dir.path().join("debug.log"), "noise").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "y").unwrap();

        let files = discover_context(&ctx(dir.path())).unwrap();
        let keys: Vec<&str> = files.iter().map(|f| f.key.as_str()).collect();
        assert!(keys.contains(&"keep.sh"));
        assert!(keys.contains(&"src/lib.rs"));
        assert!(!keys.iter().any(|k| k.contains("node_modules")));
        assert!(!keys.contains(&"debug.log"));
    }

    #[test]
    fn test_discovery_context_excludes_and_includes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.sh"), "a").unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();
        fs::write(dir.path().join("c.tmp"), "c").unwrap();

        let mut context = ctx(dir.path());
        context.include_patterns = vec!["*.sh".into(), "*.md".into()];
        context.exclude_patterns = vec!["b.*".into()];

        let files = discover_context(&context).unwrap();
        let keys: Vec<&str> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["a.sh"]);
    }

    #[test]
    fn test_discovery_mount_prefixes_keys_and_overrides() {
        let main = TempDir::new().unwrap();
        let mounted = TempDir::new().unwrap();
        fs::write(main.path().join("x.sh"), "main").unwrap();
        fs::write(mounted.path().join("y.sh"), "mounted").unwrap();

        let mut context = ctx(main.path());
        context.mounts.push(Mount {
            path: mounted.path().to_string_lossy().into_owned(),
            mount: "extra".into(),
        });

        let files = discover_context(&context).unwrap();
        let keys: Vec<&str> = files.iter().map(|f| f.key.as_str()).collect();
        assert!(keys.contains(&"x.sh"));
        assert!(keys.contains(&"extra/y.sh"));

        let extra = files.iter().find(|f| f.key == "extra/y.sh").unwrap();
        assert_eq!(extra.source_path, mounted.path().to_string_lossy());
    }

    #[cfg(unix)]
    #[test]
    fn test_discovery_skips_symlinked_dirs_and_broken_links() {
        let dir = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::write(target.path().join("inside.sh"), "t").unwrap();
        fs::write(dir.path().join("real.sh"), "r").unwrap();
        std::os::unix::fs::symlink(target.path(), dir.path().join("linked")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("broken")).unwrap();

        let files = discover_context(&ctx(dir.path())).unwrap();
        let keys: Vec<&str> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["real.sh"]);
    }

    #[test]
    fn test_hash_file_streams_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "echo 2").unwrap();
        assert_eq!(hash_file(&path).unwrap(), sha256_hex(b"echo 2"));
    }
}
