//! Unit file writes, removals and dry-run diffs.
//!
//! ## `write_unit` protocol
//!
//! 1. Read the existing file's bytes, if any.
//! 2. Byte-identical and not forced → `Unchanged`, nothing touched.
//! 3. Dry run → `WouldWrite`, nothing touched.
//! 4. Write to `<path>.gravity.tmp`, rename over the final path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use similar::TextDiff;

use crate::error::{io_err, PmError};

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed, forced, or did not exist).
    Written { path: PathBuf },
    /// Rendered content matches the file on disk.
    Unchanged { path: PathBuf },
    /// Dry run: the file would have been written.
    WouldWrite { path: PathBuf },
}

impl WriteResult {
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path }
            | WriteResult::Unchanged { path }
            | WriteResult::WouldWrite { path } => path,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, WriteResult::Unchanged { .. })
    }
}

/// A pending change to one file, as a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Write `content` to `path` unless the file already holds exactly it.
pub fn write_unit(
    path: &Path,
    content: &str,
    force: bool,
    dry_run: bool,
) -> Result<WriteResult, PmError> {
    let existing = read_existing(path)?;
    if !force && existing.as_deref() == Some(content.as_bytes()) {
        tracing::debug!("unchanged: {}", path.display());
        return Ok(WriteResult::Unchanged {
            path: path.to_path_buf(),
        });
    }

    if dry_run {
        tracing::info!("[dry-run] would write: {}", path.display());
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = PathBuf::from(format!("{}.gravity.tmp", path.display()));
    std::fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

/// Remove a unit file. Already gone is fine.
pub fn remove_unit(path: &Path) -> Result<(), PmError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("removed: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Diff of what writing `rendered` (or removing the file, for `None`) would
/// do. `None` when nothing would change.
pub fn diff_against_disk(path: &Path, rendered: Option<&str>) -> Result<Option<FileDiff>, PmError> {
    let existing = read_existing(path)?.unwrap_or_default();
    let rendered = rendered.unwrap_or_default();
    if existing == rendered.as_bytes() {
        return Ok(None);
    }
    let existing = String::from_utf8_lossy(&existing);

    let old_header = format!("a{}", path.display());
    let new_header = format!("b{}", path.display());
    let unified = TextDiff::from_lines(&*existing, rendered)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string();
    Ok(Some(FileDiff {
        path: path.to_path_buf(),
        unified_diff: unified,
    }))
}

/// Create `dir` and its parents. An existing directory is not an error.
pub fn ensure_dir(dir: &Path) -> Result<(), PmError> {
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(io_err(dir, e)),
    }
}

fn read_existing(path: &Path) -> Result<Option<Vec<u8>>, PmError> {
    match std::fs::read(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(path, err)),
    }
}
