//! Shared types passed between pipeline stages.
//!
//! The extractor produces [`ReferenceBlock`]s, the combiner turns each one
//! into a [`CombinedArtifact`], and the rewriter goes back to the blocks to
//! replace them in the templates they came from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The kind of asset a reference block combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Stylesheets, annotated as `build:css`.
    Style,
    /// Scripts, annotated as `build:js`.
    Script,
}

impl AssetKind {
    /// Parse the type token of a `build:<type>` annotation.
    pub fn from_annotation(token: &str) -> Option<Self> {
        match token {
            "css" => Some(Self::Style),
            "js" => Some(Self::Script),
            _ => None,
        }
    }

    /// The annotation token for this kind (`css` or `js`).
    pub fn annotation(self) -> &'static str {
        match self {
            Self::Style => "css",
            Self::Script => "js",
        }
    }

    /// Render the single tag that replaces a block of this kind.
    pub fn tag(self, reference: &str) -> String {
        match self {
            Self::Style => format!(r#"<link rel="stylesheet" href="{}">"#, reference),
            Self::Script => format!(r#"<script src="{}"></script>"#, reference),
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Style => write!(f, "style"),
            Self::Script => write!(f, "script"),
        }
    }
}

/// A `<!-- build:<type> <output> -->` ... `<!-- endbuild -->` region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceBlock {
    /// Template the block was found in, relative to the staging tree.
    pub template: String,
    /// 1-based line of the `build:` annotation.
    pub start_line: usize,
    /// 1-based line of the `endbuild` annotation.
    pub end_line: usize,
    pub kind: AssetKind,
    /// Output path exactly as written in the annotation.
    pub output: String,
    /// Referenced input paths in declared order, as written in the markup.
    pub inputs: Vec<String>,
}

/// The concatenated and minified result of one [`ReferenceBlock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedArtifact {
    /// Output path relative to the staging tree, `/`-separated.
    pub path: String,
    pub kind: AssetKind,
    /// Resolved input files, in the order they were concatenated.
    pub inputs: Vec<PathBuf>,
    /// Size of the written artifact in bytes.
    pub bytes: usize,
}

/// Normalize a path relative to the staging tree into a mapping key.
///
/// Backslashes become `/`, `.` segments and a leading `/` are dropped, and
/// `..` pops the previous segment. Query strings and fragments are not
/// handled here; callers strip them first.
pub fn normalize_key(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Split a reference into its path and any `?query` or `#fragment` suffix.
///
/// `main.css?v=2#top` → (`main.css`, `?v=2#top`)
pub fn split_suffix(reference: &str) -> (&str, &str) {
    match reference.find(['?', '#']) {
        Some(i) => reference.split_at(i),
        None => (reference, ""),
    }
}

/// Join two `/`-separated relative paths and normalize the result.
pub fn join_key(base: &str, path: &str) -> String {
    normalize_key(&format!("{}/{}", base, path))
}
