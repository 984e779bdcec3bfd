//! Reference block extraction.
//!
//! Templates mark groups of asset references that should ship as one file:
//!
//! ```html
//! <!-- build:css css/app.css -->
//! <link rel="stylesheet" href="/assets/css/normalize.css">
//! <link rel="stylesheet" href="/assets/css/main.css">
//! <!-- endbuild -->
//! ```
//!
//! The format is line oriented: the begin and end annotations sit on their
//! own lines, and each reference line inside contributes the `href` (styles)
//! or `src` (scripts) of its tag. Lines inside a block that carry no
//! reference (comments, conditional markup) are ignored. An optional
//! search-path suffix such as `build:css(.tmp)` is accepted and ignored.

use crate::types::{AssetKind, ReferenceBlock};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Cannot read template {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{template}:{line}: unknown block type '{kind}' (expected css or js)")]
    UnknownKind {
        template: String,
        line: usize,
        kind: String,
    },
    #[error("{template}:{line}: build block opened inside another block")]
    Nested { template: String, line: usize },
    #[error("{template}:{line}: endbuild without a matching build annotation")]
    UnmatchedEnd { template: String, line: usize },
    #[error("{template}:{line}: build block is never closed")]
    Unclosed { template: String, line: usize },
}

static BEGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*build:(\w+)(?:\([^)]*\))?\s+(\S+)\s*-->").expect("valid regex")
});
static END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*endbuild\s*-->").expect("valid regex"));
static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});
static SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

/// A block being collected while scanning lines.
struct OpenBlock {
    start_line: usize,
    kind: AssetKind,
    output: String,
    inputs: Vec<String>,
}

/// Parse every reference block in one template's content.
///
/// `template` is only used to label blocks and errors.
pub fn parse_blocks(template: &str, content: &str) -> Result<Vec<ReferenceBlock>, BlockError> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenBlock> = None;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;

        if let Some(caps) = BEGIN.captures(line) {
            if let Some(block) = &open {
                debug!(outer = block.start_line, "nested build annotation");
                return Err(BlockError::Nested {
                    template: template.to_string(),
                    line: line_no,
                });
            }
            let token = &caps[1];
            let kind =
                AssetKind::from_annotation(token).ok_or_else(|| BlockError::UnknownKind {
                    template: template.to_string(),
                    line: line_no,
                    kind: token.to_string(),
                })?;
            open = Some(OpenBlock {
                start_line: line_no,
                kind,
                output: caps[2].to_string(),
                inputs: Vec::new(),
            });
            continue;
        }

        if END.is_match(line) {
            let block = open.take().ok_or_else(|| BlockError::UnmatchedEnd {
                template: template.to_string(),
                line: line_no,
            })?;
            blocks.push(ReferenceBlock {
                template: template.to_string(),
                start_line: block.start_line,
                end_line: line_no,
                kind: block.kind,
                output: block.output,
                inputs: block.inputs,
            });
            continue;
        }

        if let Some(block) = open.as_mut() {
            let pattern = match block.kind {
                AssetKind::Style => &*HREF,
                AssetKind::Script => &*SRC,
            };
            block
                .inputs
                .extend(pattern.captures_iter(line).map(|c| c[1].to_string()));
        }
    }

    if let Some(block) = open {
        return Err(BlockError::Unclosed {
            template: template.to_string(),
            line: block.start_line,
        });
    }
    Ok(blocks)
}

/// Read each template under `root` and collect its blocks, in template order.
pub fn extract(root: &Path, templates: &[String]) -> Result<Vec<ReferenceBlock>, BlockError> {
    let mut blocks = Vec::new();
    for template in templates {
        let path = root.join(template);
        let content = std::fs::read_to_string(&path).map_err(|source| BlockError::Io {
            path: path.clone(),
            source,
        })?;
        let found = parse_blocks(template, &content)?;
        debug!(template = %template, blocks = found.len(), "extracted");
        blocks.extend(found);
    }
    Ok(blocks)
}
