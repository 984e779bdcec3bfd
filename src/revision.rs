//! Content fingerprinting.
//!
//! Every file selected for revisioning is hashed with SHA-256 and renamed in
//! place to carry the first `length` hex characters of its digest:
//!
//! ```text
//! css/app.css  →  css/app-5d41402a.css
//! LICENSE      →  LICENSE-9f86d081
//! ```
//!
//! The bytes never change, so the same content always gets the same name and
//! any change gets a new one. The [`RevisionMap`] records every rename and is
//! what the rewriter consults afterwards.
//!
//! Hashing is the only parallel work in the pipeline and runs on the global
//! rayon pool. Renames happen afterwards on the calling thread, in sorted
//! key order.

use crate::assemble::{MATCH_OPTIONS, compile_patterns, slash_path};
use crate::config::RevisionConfig;
use crate::naming::revved_name;
use crate::types::{CombinedArtifact, normalize_key};
use glob::Pattern;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum RevisionError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid revision glob: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Cannot serialize revision mapping: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Combined artifact {0} is missing from the staging tree")]
    MissingArtifact(String),
}

/// Logical path → revisioned path, both relative to the staging tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionMap {
    entries: BTreeMap<String, String>,
}

impl RevisionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, logical: impl Into<String>, revved: impl Into<String>) {
        self.entries.insert(logical.into(), revved.into());
    }

    /// Look up a logical path. The key is normalized first, so a leading `/`
    /// or `./` does not matter.
    pub fn get(&self, logical: &str) -> Option<&str> {
        self.entries.get(&normalize_key(logical)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Write the mapping as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), RevisionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| RevisionError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| RevisionError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// First `length` hex characters of the SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8], length: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    digest[..length.min(digest.len())].to_string()
}

/// Fingerprint a file's contents.
pub fn hash_file(path: &Path, length: usize) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(fingerprint(&bytes, length))
}

/// Directory a pattern can be walked from: its segments up to the first one
/// containing a glob metacharacter.
fn literal_base(pattern: &str) -> PathBuf {
    let segments: Vec<&str> = pattern.split('/').collect();
    let literal = segments
        .iter()
        .take_while(|segment| !segment.contains(['*', '?', '[']))
        .count();
    // A fully literal pattern names a file; walk its parent.
    let dirs = if literal == segments.len() {
        literal - 1
    } else {
        literal
    };
    segments[..dirs].iter().collect()
}

/// Files under `staging` matched by any of the patterns, as mapping keys.
fn select(staging: &Path, patterns: &[String]) -> Result<BTreeSet<String>, RevisionError> {
    let compiled: Vec<Pattern> = compile_patterns(patterns)?;
    let mut selected = BTreeSet::new();

    for (raw, pattern) in patterns.iter().zip(&compiled) {
        let base = staging.join(literal_base(raw));
        if !base.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&base).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(staging).unwrap_or(entry.path());
            let key = slash_path(relative);
            if pattern.matches_with(&key, MATCH_OPTIONS) {
                selected.insert(key);
            }
        }
    }
    Ok(selected)
}

/// Fingerprint and rename every selected file, returning the mapping.
///
/// Selection is the configured globs plus, with `include_bundles`, every
/// combined artifact. Every selected file is renamed, whatever its name
/// already looks like; leftovers from a previous run are the clean stage's
/// job.
pub fn revision(
    staging: &Path,
    config: &RevisionConfig,
    artifacts: &[CombinedArtifact],
) -> Result<RevisionMap, RevisionError> {
    let mut selected = select(staging, &config.patterns)?;
    if config.include_bundles {
        for artifact in artifacts {
            if !staging.join(&artifact.path).is_file() {
                return Err(RevisionError::MissingArtifact(artifact.path.clone()));
            }
            selected.insert(normalize_key(&artifact.path));
        }
    }

    let pending: Vec<String> = selected.into_iter().collect();

    let hashed: Vec<(String, String)> = pending
        .par_iter()
        .map(|key| {
            let path = staging.join(key);
            hash_file(&path, config.length)
                .map(|hash| (key.clone(), hash))
                .map_err(|source| RevisionError::Io { path, source })
        })
        .collect::<Result<_, _>>()?;

    let mut map = RevisionMap::new();
    for (key, hash) in hashed {
        let revved = revved_key(&key, &hash);
        let from = staging.join(&key);
        let to = staging.join(&revved);
        fs::rename(&from, &to).map_err(|source| RevisionError::Io { path: from, source })?;
        debug!(from = %key, to = %revved, "revisioned");
        map.insert(key, revved);
    }
    info!(files = map.len(), "revisioned");

    if let Some(manifest) = &config.manifest {
        map.save(&staging.join(manifest))?;
    }
    Ok(map)
}

/// Apply the fingerprint to the last segment of a mapping key.
pub fn revved_key(key: &str, hash: &str) -> String {
    match key.rsplit_once('/') {
        Some((dir, name)) => format!("{}/{}", dir, revved_name(name, hash)),
        None => revved_name(key, hash),
    }
}
