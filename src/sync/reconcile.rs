use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SyncError};

/// Name of the version-control metadata entry skipped at every depth.
const GIT_DIR: &str = ".git";

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub copied: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Paths that are neither copied to nor deleted from the mirror.
///
/// `.git` is always excluded. Glob patterns without a `/` match a file or
/// directory name at any depth; patterns with a `/` match the path relative
/// to the tree root. Exact paths added with [`ExcludeSet::exclude_path`]
/// exclude themselves and everything below them.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    globs: GlobSet,
    paths: Vec<PathBuf>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> std::result::Result<Self, globset::Error> {
        let mut b = GlobSetBuilder::new();
        for pat in patterns {
            let pat = pat.trim().trim_end_matches('/');
            if pat.is_empty() {
                continue;
            }
            let full = if pat.contains('/') {
                pat.trim_start_matches('/').to_string()
            } else {
                format!("**/{}", pat)
            };
            b.add(GlobBuilder::new(&full).literal_separator(true).build()?);
        }
        Ok(ExcludeSet {
            globs: b.build()?,
            paths: Vec::new(),
        })
    }

    /// Exclude `path` (and its subtree) when it lies inside `root`.
    /// Paths outside `root` are ignored.
    pub fn exclude_path(&mut self, root: &Path, path: &Path) {
        let root = absolute(root);
        let path = absolute(path);
        match path.strip_prefix(&root) {
            Ok(rel) if !rel.as_os_str().is_empty() => {
                debug!(path = %rel.display(), "excluding path from reconciliation");
                self.paths.push(rel.to_path_buf());
            }
            _ => {}
        }
    }

    /// Whether the root-relative path `rel` is excluded.
    pub fn is_excluded(&self, rel: &Path) -> bool {
        rel.components().any(|c| c.as_os_str() == GIT_DIR)
            || self.paths.iter().any(|p| rel.starts_with(p))
            || self.globs.is_match(rel)
    }

    fn keeps(&self, root: &Path, entry: &DirEntry) -> bool {
        entry
            .path()
            .strip_prefix(root)
            .map(|rel| !self.is_excluded(rel))
            .unwrap_or(true)
    }
}

fn absolute(p: &Path) -> PathBuf {
    fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

/// Make `mirror` hold the same files as `source`.
///
/// Every non-excluded file and symlink under `source` is copied to the same
/// relative path under `mirror` (created if absent). Files whose content
/// already matches are left alone. With `delete_missing`, mirror entries
/// that have no counterpart in `source` are removed; excluded paths and the
/// mirror's own `.git` are never touched. When `mirror` lies inside
/// `source` it is excluded from the copy.
///
/// # Errors
/// Returns [`SyncError::Reconcile`] on the first I/O failure, or when the
/// mirror directory contains the source tree.
pub fn reconcile(
    source: &Path,
    mirror: &Path,
    excludes: &ExcludeSet,
    delete_missing: bool,
) -> Result<ReconcileReport> {
    fs::create_dir_all(mirror).map_err(|e| SyncError::reconcile(mirror, e))?;
    let src = fs::canonicalize(source).map_err(|e| SyncError::reconcile(source, e))?;
    let dst = fs::canonicalize(mirror).map_err(|e| SyncError::reconcile(mirror, e))?;
    if src.starts_with(&dst) {
        return Err(SyncError::reconcile(
            mirror,
            io::Error::new(
                ErrorKind::InvalidInput,
                "mirror directory must not contain the source tree",
            ),
        ));
    }

    let mut excludes = excludes.clone();
    excludes.exclude_path(&src, &dst);

    let mut report = ReconcileReport::default();
    copy_tree(&src, &dst, &excludes, &mut report)?;
    if delete_missing {
        remove_stale(&src, &dst, &excludes, &mut report)?;
    }
    debug!(
        copied = report.copied,
        unchanged = report.unchanged,
        removed = report.removed,
        "reconciled mirror tree"
    );
    Ok(report)
}

fn copy_tree(src: &Path, dst: &Path, excludes: &ExcludeSet, report: &mut ReconcileReport) -> Result<()> {
    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| excludes.keeps(src, e));

    for entry in walker {
        let entry = entry.map_err(|e| SyncError::reconcile(src, e))?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            ensure_dir(&target).map_err(|e| SyncError::reconcile(&target, e))?;
            continue;
        }
        let res = if ft.is_symlink() {
            sync_symlink(entry.path(), &target)
        } else if ft.is_file() {
            sync_file(entry.path(), &target)
        } else {
            trace!(path = %rel.display(), "skipping special file");
            continue;
        };
        if res.map_err(|e| SyncError::reconcile(&target, e))? {
            trace!(path = %rel.display(), "copied");
            report.copied += 1;
        } else {
            report.unchanged += 1;
        }
    }
    Ok(())
}

/// Remove mirror entries that have no counterpart in `src`.
///
/// Stale entries are collected first and deleted afterwards; a stale
/// directory is removed as a whole without descending into it.
fn remove_stale(src: &Path, dst: &Path, excludes: &ExcludeSet, report: &mut ReconcileReport) -> Result<()> {
    let mut stale: Vec<(PathBuf, bool)> = Vec::new();
    let mut it = WalkDir::new(dst)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| excludes.keeps(dst, e));

    while let Some(entry) = it.next() {
        let entry = entry.map_err(|e| SyncError::reconcile(dst, e))?;
        let Ok(rel) = entry.path().strip_prefix(dst) else {
            continue;
        };
        let counterpart = src.join(rel);
        let exists = match fs::symlink_metadata(&counterpart) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(SyncError::reconcile(&counterpart, e)),
        };
        if exists {
            continue;
        }
        let is_dir = entry.file_type().is_dir();
        stale.push((entry.path().to_path_buf(), is_dir));
        if is_dir {
            it.skip_current_dir();
        }
    }

    for (path, is_dir) in stale {
        let res = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        res.map_err(|e| SyncError::reconcile(&path, e))?;
        trace!(path = %path.display(), "removed stale entry");
        report.removed += 1;
    }
    Ok(())
}

/// Make sure `p` is a directory, replacing a file or symlink in the way.
fn ensure_dir(p: &Path) -> io::Result<()> {
    match fs::symlink_metadata(p) {
        Ok(m) if m.is_dir() => return Ok(()),
        Ok(_) => fs::remove_file(p)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(p)
}

/// Copy `src` over `dst` unless the content and permissions already match.
///
/// The new content is written to a temporary sibling and renamed into place.
fn sync_file(src: &Path, dst: &Path) -> io::Result<bool> {
    let src_meta = fs::metadata(src)?;
    match fs::symlink_metadata(dst) {
        Ok(m) if m.is_dir() => fs::remove_dir_all(dst)?,
        Ok(m) if m.file_type().is_symlink() => fs::remove_file(dst)?,
        Ok(m) if m.len() == src_meta.len() && sha256_file(src)? == sha256_file(dst)? => {
            if m.permissions() == src_meta.permissions() {
                return Ok(false);
            }
            fs::set_permissions(dst, src_meta.permissions())?;
            return Ok(true);
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let tmp = temp_sibling(dst);
    if let Err(e) = fs::copy(src, &tmp).and_then(|_| fs::rename(&tmp, dst)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(true)
}

/// Recreate the symlink `src` at `dst` with the same target.
fn sync_symlink(src: &Path, dst: &Path) -> io::Result<bool> {
    let target = fs::read_link(src)?;
    match fs::symlink_metadata(dst) {
        Ok(m) if m.file_type().is_symlink() && fs::read_link(dst)? == target => return Ok(false),
        Ok(m) if m.is_dir() => fs::remove_dir_all(dst)?,
        Ok(_) => fs::remove_file(dst)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    symlink(&target, dst)?;
    Ok(true)
}

/// Create a symbolic link at `dst` pointing to `target`.
///
/// This implementation is Unix-only.
fn symlink(target: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, dst)
}

fn temp_sibling(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{}.msync-tmp", name))
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut f = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    /// Relative path -> content for every regular file outside `.git`.
    fn snapshot(root: &Path) -> BTreeMap<String, String> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != GIT_DIR)
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap();
                (
                    rel.to_string_lossy().into_owned(),
                    fs::read_to_string(e.path()).unwrap(),
                )
            })
            .collect()
    }

    fn no_excludes() -> ExcludeSet {
        ExcludeSet::new(&[]).unwrap()
    }

    #[test]
    fn creates_mirror_and_copies_nested_files() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        write(&src, "a.txt", "a");
        write(&src, "deep/er/b.txt", "b");
        let mirror = td.path().join("out").join("mirror");

        let r = reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        assert_eq!(r.copied, 2);
        assert_eq!(snapshot(&src), snapshot(&mirror));
    }

    #[test]
    fn second_pass_leaves_identical_files_alone() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let mirror = td.path().join("mirror");
        write(&src, "a.txt", "a");
        write(&src, "b.txt", "b");
        reconcile(&src, &mirror, &no_excludes(), true).unwrap();

        write(&src, "b.txt", "changed");
        let r = reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        assert_eq!(r, ReconcileReport { copied: 1, unchanged: 1, removed: 0 });
        assert_eq!(fs::read_to_string(mirror.join("b.txt")).unwrap(), "changed");
    }

    #[test]
    fn delete_missing_removes_stale_files_and_dirs_but_keeps_git() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let mirror = td.path().join("mirror");
        write(&src, "keep.txt", "k");
        write(&mirror, "keep.txt", "old");
        write(&mirror, "gone.txt", "g");
        write(&mirror, "olddir/x/y.txt", "y");
        write(&mirror, ".git/HEAD", "ref: refs/heads/main");

        let r = reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        assert_eq!(r.removed, 2);
        assert_eq!(snapshot(&src), snapshot(&mirror));
        assert!(!mirror.join("olddir").exists());
        assert!(mirror.join(".git/HEAD").exists());
    }

    #[test]
    fn without_delete_stale_files_survive() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let mirror = td.path().join("mirror");
        write(&src, "a.txt", "new");
        write(&mirror, "a.txt", "old");
        write(&mirror, "legacy.txt", "l");

        let r = reconcile(&src, &mirror, &no_excludes(), false).unwrap();
        assert_eq!(r.removed, 0);
        assert_eq!(fs::read_to_string(mirror.join("a.txt")).unwrap(), "new");
        assert_eq!(fs::read_to_string(mirror.join("legacy.txt")).unwrap(), "l");
    }

    #[test]
    fn excludes_are_neither_copied_nor_deleted() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let mirror = td.path().join("mirror");
        write(&src, ".git/config", "[core]");
        write(&src, "app.log", "l");
        write(&src, "sub/debug.log", "l");
        write(&src, "docs/private/notes.md", "n");
        write(&src, "docs/public.md", "p");
        write(&src, "node_modules/pkg/index.js", "x");
        write(&mirror, "node_modules/keep.js", "mirror only");

        let ex = ExcludeSet::new(&[
            "*.log".to_string(),
            "docs/private".to_string(),
            "node_modules/".to_string(),
        ])
        .unwrap();
        reconcile(&src, &mirror, &ex, true).unwrap();

        let snap = snapshot(&mirror);
        assert_eq!(
            snap.keys().cloned().collect::<Vec<_>>(),
            vec!["docs/public.md", "node_modules/keep.js"]
        );
        assert!(!mirror.join(".git").exists());
    }

    #[test]
    fn exact_path_exclusion_only_applies_inside_root() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        write(&src, ".env", "TOKEN=x");
        write(&src, "a.txt", "a");
        let mut ex = no_excludes();
        ex.exclude_path(&src, &src.join(".env"));
        ex.exclude_path(&src, td.path());
        assert!(ex.is_excluded(Path::new(".env")));
        assert!(!ex.is_excluded(Path::new("a.txt")));

        let mirror = td.path().join("mirror");
        reconcile(&src, &mirror, &ex, true).unwrap();
        assert!(!mirror.join(".env").exists());
        assert!(mirror.join("a.txt").exists());
    }

    #[test]
    fn nested_mirror_is_not_copied_into_itself() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        write(&src, "a.txt", "a");
        let mirror = src.join("mirror");

        reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        assert!(mirror.join("a.txt").exists());
        assert!(!mirror.join("mirror").exists());
    }

    #[test]
    fn mirror_containing_source_is_refused() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        write(&src, "a.txt", "a");
        let err = reconcile(&src, td.path(), &no_excludes(), true).unwrap_err();
        assert!(matches!(err, SyncError::Reconcile { .. }));
        assert!(src.join("a.txt").exists());
    }

    #[test]
    fn file_and_directory_swaps_follow_the_source() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let mirror = td.path().join("mirror");
        write(&src, "was_dir", "now a file");
        write(&src, "was_file/inner.txt", "now a dir");
        write(&mirror, "was_dir/inner.txt", "x");
        write(&mirror, "was_file", "x");

        reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        assert_eq!(snapshot(&src), snapshot(&mirror));
    }

    #[test]
    fn symlinks_are_recreated_not_followed() {
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let mirror = td.path().join("mirror");
        write(&src, "real.txt", "r");
        symlink(Path::new("real.txt"), &src.join("link.txt")).unwrap();

        reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        let link = mirror.join("link.txt");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("real.txt"));

        let r = reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        assert_eq!(r.copied, 0);
    }

    #[cfg(unix)]
    #[test]
    fn permission_changes_are_propagated() {
        use std::os::unix::fs::PermissionsExt;
        let td = tempdir().unwrap();
        let src = td.path().join("src");
        let mirror = td.path().join("mirror");
        write(&src, "run.sh", "#!/bin/sh");
        reconcile(&src, &mirror, &no_excludes(), true).unwrap();

        fs::set_permissions(src.join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        let r = reconcile(&src, &mirror, &no_excludes(), true).unwrap();
        assert_eq!(r.copied, 1);
        let mode = fs::metadata(mirror.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn glob_name_patterns_match_at_any_depth_only_on_names() {
        let ex = ExcludeSet::new(&["*.tmp".to_string(), "build/out".to_string()]).unwrap();
        assert!(ex.is_excluded(Path::new("x.tmp")));
        assert!(ex.is_excluded(Path::new("a/b/x.tmp")));
        assert!(!ex.is_excluded(Path::new("a.tmp.d/x")));
        assert!(ex.is_excluded(Path::new("build/out")));
        assert!(!ex.is_excluded(Path::new("src/build/out")));
        assert!(ex.is_excluded(Path::new("sub/.git/config")));
    }
}
