//! Release staging: clean, then copy.
//!
//! The staging tree is the pipeline's shared working state, so every release
//! starts by deleting the configured clean targets and re-copying sources
//! into place. Nothing else resets it; a failed run leaves whatever it had
//! produced until the next clean.
//!
//! Copy rules match files by glob relative to the rule's `from` directory
//! and keep that relative path under `to`:
//!
//! ```text
//! from = "dev/assets", files = ["**/*"], to = "assets"
//!   dev/assets/css/main.css  →  assets/css/main.css
//!   dev/assets/img/logo.png  →  assets/img/logo.png
//! ```

use crate::config::CopyRule;
use crate::types::normalize_key;
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Invalid glob: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Copy source not found: {0}")]
    MissingSource(PathBuf),
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> AssembleError + '_ {
    move |source| AssembleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Glob options shared by every path match in the pipeline: `*` stays within
/// one path segment, `**` crosses segments.
pub const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compile a list of glob strings.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, glob::PatternError> {
    patterns.iter().map(|p| Pattern::new(p)).collect()
}

/// Whether a `/`-separated relative path matches any of the patterns.
pub fn matches_any(patterns: &[Pattern], relative: &str) -> bool {
    patterns
        .iter()
        .any(|p| p.matches_with(relative, MATCH_OPTIONS))
}

/// Render a relative path with `/` separators regardless of platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Remove each clean target under `root`. Missing targets are skipped.
///
/// Returns the targets that existed and were removed.
pub fn clean(root: &Path, targets: &[String]) -> Result<Vec<PathBuf>, AssembleError> {
    let mut removed = Vec::new();
    for target in targets {
        let path = root.join(target);
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(io_at(&path)(e)),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(&path).map_err(io_at(&path))?;
        } else {
            fs::remove_file(&path).map_err(io_at(&path))?;
        }
        debug!(path = %path.display(), "cleaned");
        removed.push(PathBuf::from(target));
    }
    Ok(removed)
}

/// Apply every copy rule in order.
///
/// Returns the staged files relative to `root`, in copy order.
pub fn assemble(root: &Path, rules: &[CopyRule]) -> Result<Vec<PathBuf>, AssembleError> {
    let mut staged = Vec::new();
    for rule in rules {
        staged.extend(copy_rule(root, rule)?);
    }
    Ok(staged)
}

/// Copy the files matched by one rule. Matches are collected before any
/// copy happens so a destination nested inside the source is never re-read.
pub fn copy_rule(root: &Path, rule: &CopyRule) -> Result<Vec<PathBuf>, AssembleError> {
    let source_dir = root.join(&rule.from);
    if !source_dir.is_dir() {
        return Err(AssembleError::MissingSource(source_dir));
    }
    let patterns = compile_patterns(&rule.files)?;

    let mut matched = Vec::new();
    for entry in WalkDir::new(&source_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&source_dir)
            .unwrap_or(entry.path());
        if matches_any(&patterns, &slash_path(relative)) {
            matched.push(relative.to_path_buf());
        }
    }

    let dest_dir = Path::new(&rule.to);
    let mut staged = Vec::with_capacity(matched.len());
    for relative in matched {
        let from = source_dir.join(&relative);
        let staged_rel = dest_dir.join(&relative);
        let to = root.join(&staged_rel);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        fs::copy(&from, &to).map_err(io_at(&from))?;
        staged.push(normalize_staged(&staged_rel));
    }
    debug!(from = %rule.from, to = %rule.to, files = staged.len(), "copied");
    Ok(staged)
}

/// The source file a staged path would be copied from, if any rule covers it.
///
/// Later rules overwrite earlier ones during assembly, so they win here too.
/// Used to inspect sources without assembling.
pub fn source_for(
    root: &Path,
    rules: &[CopyRule],
    staged: &str,
) -> Result<Option<PathBuf>, AssembleError> {
    let staged = normalize_key(staged);
    for rule in rules.iter().rev() {
        let to = normalize_key(&rule.to);
        let relative = if to.is_empty() {
            staged.as_str()
        } else {
            match staged.strip_prefix(&to).and_then(|r| r.strip_prefix('/')) {
                Some(r) => r,
                None => continue,
            }
        };
        let patterns = compile_patterns(&rule.files)?;
        let candidate = root.join(&rule.from).join(relative);
        if matches_any(&patterns, relative) && candidate.is_file() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Drop `.` components so `./index.html` is reported as `index.html`.
fn normalize_staged(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}
