// crates/apprentice-server/src/registry.rs
// Context registry: the user-facing operations over context rows

use crate::db::{self, ContextRow, DatabasePool, Mount, ProviderRow};
use crate::error::{ApprenticeError, Result};
use crate::utils::{now_rfc3339, path_to_string, slugify};
use crate::versioning;
use std::path::Path;
use std::sync::Arc;

/// Options for registering a context.
#[derive(Debug, Clone, Default)]
pub struct AddContextOptions {
    pub name: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Skip version-provider detection entirely.
    pub no_versioning: bool,
    /// Restrict version sync to this branch.
    pub version_branch: Option<String>,
}

/// Register a folder as a context.
///
/// The path is canonicalised (symlinks resolved); duplicates by canonical
/// path are rejected; version-provider detection runs unless disabled.
pub async fn add_context(
    pool: &Arc<DatabasePool>,
    path: &Path,
    opts: AddContextOptions,
) -> Result<ContextRow> {
    let canonical = path
        .canonicalize()
        .map_err(|_| ApprenticeError::InvalidInput(format!("path {} does not exist", path.display())))?;
    if !canonical.is_dir() {
        return Err(ApprenticeError::InvalidInput(format!(
            "{} is not a directory",
            canonical.display()
        )));
    }
    let canonical_str = path_to_string(&canonical);

    {
        let canonical_str_for_lookup = canonical_str.clone();
        let existing = pool
            .interact(move |conn| Ok(db::get_context_by_path_sync(conn, &canonical_str_for_lookup)?))
            .await?;
        if existing.is_some() {
            return Err(ApprenticeError::InvalidInput(format!(
                "context already registered for {canonical_str}"
            )));
        }
    }

    let name = opts.name.clone().unwrap_or_else(|| {
        canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "context".to_string())
    });
    let id = slugify(&name);
    if id.is_empty() {
        return Err(ApprenticeError::InvalidInput(format!(
            "name {name:?} produces an empty context id"
        )));
    }

    let provider = if opts.no_versioning {
        None
    } else {
        versioning::detect_provider(&canonical)
    };

    let ctx = ContextRow {
        id: id.clone(),
        name,
        path: canonical_str,
        mounts: vec![],
        enabled: true,
        include_patterns: if opts.include.is_empty() {
            vec!["**/*".to_string()]
        } else {
            opts.include
        },
        exclude_patterns: opts.exclude,
        registered_at: now_rfc3339(),
        last_indexed_at: None,
        version_provider_type: provider.map(|p| p.provider_type().to_string()),
    };

    let insert = ctx.clone();
    let provider_row = provider.map(|p| ProviderRow {
        context_id: id.clone(),
        provider_type: p.provider_type().to_string(),
        last_sync_ref: None,
        last_sync_at: None,
        config: match opts.version_branch {
            Some(branch) => serde_json::json!({ "branch": branch }),
            None => serde_json::json!({}),
        },
    });
    pool.interact(move |conn| {
        db::insert_context_sync(conn, &insert)?;
        if let Some(ref row) = provider_row {
            db::set_provider_row_sync(conn, row)?;
        }
        Ok(())
    })
    .await?;

    Ok(ctx)
}

pub async fn list_contexts(pool: &Arc<DatabasePool>) -> Result<Vec<ContextRow>> {
    Ok(pool
        .interact(|conn| Ok(db::list_contexts_sync(conn, false)?))
        .await?)
}

pub async fn get_context(pool: &Arc<DatabasePool>, id: &str) -> Result<Option<ContextRow>> {
    let id = id.to_string();
    Ok(pool
        .interact(move |conn| Ok(db::get_context_sync(conn, &id)?))
        .await?)
}

/// Enable or disable a context. Returns false when the id is unknown.
pub async fn set_enabled(pool: &Arc<DatabasePool>, id: &str, enabled: bool) -> Result<bool> {
    let id = id.to_string();
    Ok(pool
        .interact(move |conn| Ok(db::set_context_enabled_sync(conn, &id, enabled)?))
        .await?)
}

/// Remove a context and everything it owns (cascade).
pub async fn remove_context(pool: &Arc<DatabasePool>, id: &str) -> Result<bool> {
    let id = id.to_string();
    Ok(pool
        .interact(move |conn| Ok(db::delete_context_sync(conn, &id)?))
        .await?)
}

/// Patch a context's name and patterns.
pub async fn update_context(
    pool: &Arc<DatabasePool>,
    id: &str,
    name: Option<String>,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
) -> Result<ContextRow> {
    let mut ctx = get_context(pool, id)
        .await?
        .ok_or_else(|| ApprenticeError::NotFound(format!("context {id}")))?;
    if let Some(name) = name {
        ctx.name = name;
    }
    if let Some(include) = include {
        ctx.include_patterns = include;
    }
    if let Some(exclude) = exclude {
        ctx.exclude_patterns = exclude;
    }
    let update = ctx.clone();
    pool.interact(move |conn| Ok(db::update_context_sync(conn, &update)?))
        .await?;
    Ok(ctx)
}

/// Normalise a mount string: strip leading/trailing `/`.
fn normalize_mount(mount: &str) -> Result<String> {
    let normalized = mount.trim_matches('/').to_string();
    if normalized.is_empty() {
        return Err(ApprenticeError::InvalidInput("mount must not be empty".into()));
    }
    Ok(normalized)
}

/// Mount an external directory under a virtual key prefix.
pub async fn add_mount(
    pool: &Arc<DatabasePool>,
    id: &str,
    path: &Path,
    mount: &str,
) -> Result<ContextRow> {
    let mount = normalize_mount(mount)?;
    let canonical = path
        .canonicalize()
        .map_err(|_| ApprenticeError::InvalidInput(format!("path {} does not exist", path.display())))?;
    let canonical_str = path_to_string(&canonical);

    let mut ctx = get_context(pool, id)
        .await?
        .ok_or_else(|| ApprenticeError::NotFound(format!("context {id}")))?;

    if ctx.path == canonical_str {
        return Err(ApprenticeError::InvalidInput(
            "mount path duplicates the context's main path".into(),
        ));
    }
    if ctx.mounts.iter().any(|m| m.mount == mount) {
        return Err(ApprenticeError::InvalidInput(format!(
            "mount {mount:?} already exists in context {id}"
        )));
    }

    ctx.mounts.push(Mount {
        path: canonical_str,
        mount,
    });
    let update = ctx.clone();
    pool.interact(move |conn| Ok(db::update_context_sync(conn, &update)?))
        .await?;
    Ok(ctx)
}

/// Remove a mount by mount string or by path. Returns false when nothing
/// matched.
pub async fn remove_mount(
    pool: &Arc<DatabasePool>,
    id: &str,
    mount_or_path: &str,
) -> Result<bool> {
    let mut ctx = get_context(pool, id)
        .await?
        .ok_or_else(|| ApprenticeError::NotFound(format!("context {id}")))?;

    let needle = mount_or_path.trim_matches('/');
    let before = ctx.mounts.len();
    ctx.mounts
        .retain(|m| m.mount != needle && m.path != mount_or_path);
    if ctx.mounts.len() == before {
        return Ok(false);
    }

    let update = ctx.clone();
    pool.interact(move |conn| Ok(db::update_context_sync(conn, &update)?))
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn pool() -> Arc<DatabasePool> {
        Arc::new(DatabasePool::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_add_context_from_folder_name() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("My Notes");
        std::fs::create_dir(&project).unwrap();

        let pool = pool().await;
        let ctx = add_context(&pool, &project, AddContextOptions::default())
            .await
            .unwrap();
        assert_eq!(ctx.id, "my-notes");
        assert_eq!(ctx.include_patterns, vec!["**/*".to_string()]);
        assert!(ctx.enabled);
        assert!(ctx.version_provider_type.is_none());
    }

    #[tokio::test]
    async fn test_add_context_rejects_missing_and_duplicate_paths() {
        let dir = TempDir::new().unwrap();
        let pool = pool().await;

        let missing = add_context(
            &pool,
            &dir.path().join("nope"),
            AddContextOptions::default(),
        )
        .await;
        assert!(matches!(missing, Err(ApprenticeError::InvalidInput(_))));

        add_context(&pool, dir.path(), AddContextOptions::default())
            .await
            .unwrap();
        let duplicate = add_context(
            &pool,
            dir.path(),
            AddContextOptions {
                name: Some("other".into()),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(duplicate, Err(ApprenticeError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_add_context_resolves_symlinks() {
        #[cfg(unix)]
        {
            let dir = TempDir::new().unwrap();
            let real = dir.path().join("real");
            std::fs::create_dir(&real).unwrap();
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(&real, &link).unwrap();

            let pool = pool().await;
            add_context(&pool, &real, AddContextOptions::default())
                .await
                .unwrap();
            // the symlink canonicalises to the same path
            let duplicate = add_context(
                &pool,
                &link,
                AddContextOptions {
                    name: Some("aka".into()),
                    ..Default::default()
                },
            )
            .await;
            assert!(duplicate.is_err());
        }
    }

    #[tokio::test]
    async fn test_mount_lifecycle() {
        let dir = TempDir::new().unwrap();
        let extra = TempDir::new().unwrap();
        let pool = pool().await;
        let ctx = add_context(&pool, dir.path(), AddContextOptions::default())
            .await
            .unwrap();

        let updated = add_mount(&pool, &ctx.id, extra.path(), "/tools/").await.unwrap();
        assert_eq!(updated.mounts.len(), 1);
        assert_eq!(updated.mounts[0].mount, "tools");

        // duplicate mount name rejected
        assert!(add_mount(&pool, &ctx.id, extra.path(), "tools").await.is_err());
        // empty mount rejected
        assert!(add_mount(&pool, &ctx.id, extra.path(), "//").await.is_err());
        // main path rejected
        assert!(add_mount(&pool, &ctx.id, dir.path(), "main").await.is_err());

        assert!(remove_mount(&pool, &ctx.id, "tools").await.unwrap());
        assert!(!remove_mount(&pool, &ctx.id, "tools").await.unwrap());
    }

    #[tokio::test]
    async fn test_enable_disable_remove() {
        let dir = TempDir::new().unwrap();
        let pool = pool().await;
        let ctx = add_context(&pool, dir.path(), AddContextOptions::default())
            .await
            .unwrap();

        assert!(set_enabled(&pool, &ctx.id, false).await.unwrap());
        let loaded = get_context(&pool, &ctx.id).await.unwrap().unwrap();
        assert!(!loaded.enabled);

        assert!(remove_context(&pool, &ctx.id).await.unwrap());
        assert!(get_context(&pool, &ctx.id).await.unwrap().is_none());
        assert!(!set_enabled(&pool, &ctx.id, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_git_detection_writes_provider_row() {
        let dir = TempDir::new().unwrap();
        let out = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .output()
            .expect("git must be available in tests");
        assert!(out.status.success());

        let pool = pool().await;
        let ctx = add_context(
            &pool,
            dir.path(),
            AddContextOptions {
                version_branch: Some("main".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(ctx.version_provider_type.as_deref(), Some("git"));

        let id = ctx.id.clone();
        let row = pool
            .interact(move |conn| Ok(db::get_provider_row_sync(conn, &id)?))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.provider_type, "git");
        assert_eq!(row.config["branch"], "main");

        // no_versioning skips detection
        let plain = TempDir::new().unwrap();
        let ctx2 = add_context(
            &pool,
            plain.path(),
            AddContextOptions {
                no_versioning: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(ctx2.version_provider_type.is_none());
    }
}
