//! The checkout being repaired.
//!
//! Every component reads and writes repository files through a [`Workspace`]
//! passed in explicitly. The set of files present when the workspace was
//! opened is the allow-list for model output: paths outside it are never
//! created from model text.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::error::FixError;
use crate::io::config::SnapshotConfig;

/// Directories that never belong to the known file set.
const ALWAYS_EXCLUDED: &[&str] = &[".git", ".autofix"];

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    known: BTreeSet<String>,
}

impl Workspace {
    /// Scan `root` and record every file outside the excluded directories.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>, cfg: &SnapshotConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(FixError::config(format!(
                "workspace root {} is not a directory",
                root.display()
            ))
            .into());
        }

        let mut known = BTreeSet::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !ALWAYS_EXCLUDED.contains(&name.as_ref())
                    && !cfg.exclude_dirs.iter().any(|d| d == name.as_ref())
            });
        for entry in walker {
            let entry = entry.with_context(|| format!("scan {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .with_context(|| format!("relativize {}", entry.path().display()))?;
            let Some(rel) = rel.to_str() else {
                debug!(path = %rel.display(), "skipping non-UTF-8 path");
                continue;
            };
            known.insert(rel.replace('\\', "/"));
        }

        debug!(files = known.len(), "workspace scanned");
        Ok(Self { root, known })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `rel` (normalized) was present when the workspace was opened
    /// or has since been created through [`Workspace::create_new`].
    pub fn contains(&self, rel: &str) -> bool {
        normalize_rel(rel).is_some_and(|p| self.known.contains(&p))
    }

    pub fn known_files(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.root.join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Write full new contents for known files.
    ///
    /// Every path is validated before the first write; an unknown path fails
    /// with [`FixError::Apply`] and leaves the tree untouched. Each file is
    /// flushed to disk before this returns.
    #[instrument(skip_all, fields(files = changes.len()))]
    pub fn write_changes(&mut self, changes: &BTreeMap<String, String>) -> Result<()> {
        let mut targets = Vec::with_capacity(changes.len());
        for (rel, content) in changes {
            let normalized = normalize_rel(rel)
                .filter(|p| self.known.contains(p))
                .ok_or_else(|| FixError::apply(rel, "path is not part of the workspace"))?;
            targets.push((normalized, content));
        }
        for (rel, content) in targets {
            write_durable(&self.root.join(&rel), content)?;
            debug!(path = %rel, bytes = content.len(), "wrote file");
        }
        Ok(())
    }

    /// Create `rel` with `content` unless it already exists.
    ///
    /// Returns `false` without touching the file when it exists. Used only by
    /// the test scaffolder, whose paths are derived from config rather than
    /// model text.
    pub fn create_new(&mut self, rel: &str, content: &str) -> Result<bool> {
        let normalized =
            normalize_rel(rel).ok_or_else(|| anyhow!("refusing to create path '{rel}'"))?;
        let path = self.root.join(&normalized);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                self.known.insert(normalized);
                return Ok(false);
            }
            Err(err) => return Err(err).with_context(|| format!("create {}", path.display())),
        };
        file.write_all(content.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync {}", path.display()))?;
        self.known.insert(normalized);
        Ok(true)
    }

    /// Known files with a matching extension whose contents are UTF-8 text.
    pub fn snapshot_files(&self, include_extensions: &[String]) -> Result<Vec<(String, String)>> {
        let mut files = Vec::new();
        for rel in &self.known {
            let ext = Path::new(rel)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            if !include_extensions.iter().any(|e| e == ext) {
                continue;
            }
            match fs::read_to_string(self.root.join(rel)) {
                Ok(content) => files.push((rel.clone(), content)),
                Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                    debug!(path = %rel, "skipping non-text file");
                }
                Err(err) => return Err(err).with_context(|| format!("read {rel}")),
            }
        }
        Ok(files)
    }
}

/// Normalize a repository-relative path from untrusted text.
///
/// Strips `./`, maps `\` to `/`; rejects absolute paths, `..` and empty
/// paths.
pub fn normalize_rel(raw: &str) -> Option<String> {
    let unified = raw.trim().replace('\\', "/");
    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn write_durable(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid file path {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.autofix.tmp"));
    {
        let mut tmp = File::create(&tmp_path)
            .with_context(|| format!("create temp file {}", tmp_path.display()))?;
        tmp.write_all(contents.as_bytes())
            .with_context(|| format!("write temp file {}", tmp_path.display()))?;
        tmp.sync_all()
            .with_context(|| format!("sync temp file {}", tmp_path.display()))?;
    }
    if let Ok(existing) = fs::metadata(path) {
        fs::set_permissions(&tmp_path, existing.permissions())
            .with_context(|| format!("copy permissions to {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
