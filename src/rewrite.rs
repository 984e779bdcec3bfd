//! Reference rewriting.
//!
//! After revisioning, the templates still point at logical names. This stage
//! edits each configured template in the staging tree:
//!
//! - every reference block collapses to one tag for its combined artifact,
//!   indented like the block's `build:` line;
//! - every other `href="..."`, `src="..."` and `url(...)` whose target is in
//!   the [`RevisionMap`] gets the fingerprinted file name.
//!
//! ```text
//! <!-- build:css css/app.css -->                 <link rel="stylesheet" href="css/app-1a2b3c4d.css">
//! <link rel="stylesheet" href="/a.css">    →
//! <!-- endbuild -->
//! <img src="/img/logo.svg?v=2">                  <img src="/img/logo-9f86d081.svg?v=2">
//! ```
//!
//! Only the last path segment changes, so a leading `/`, relative prefixes,
//! query strings and fragments survive as written. References that cannot be
//! resolved become [`UnresolvedReference`] warnings rather than errors.

use crate::assemble::{compile_patterns, matches_any};
use crate::blocks::{BlockError, parse_blocks};
use crate::config::{BundleConfig, RevisionConfig, RewriteConfig};
use crate::naming::is_revved;
use crate::revision::RevisionMap;
use crate::types::{ReferenceBlock, join_key, split_suffix};
use glob::Pattern;
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error("Invalid revision glob: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("{template}:{line}: rewritten reference '{reference}' points at missing file {target}")]
    Dangling {
        template: String,
        line: usize,
        reference: String,
        target: String,
    },
}

/// A reference the rewriter could not map to a fingerprinted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub template: String,
    pub line: usize,
    /// The reference as written in the template.
    pub reference: String,
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: no fingerprinted file for '{}'",
            self.template, self.line, self.reference
        )
    }
}

/// What one rewrite pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// Templates whose content changed.
    pub templates: Vec<String>,
    /// Blocks collapsed into single tags.
    pub blocks: usize,
    /// Raw references pointed at fingerprinted files.
    pub references: usize,
    pub warnings: Vec<UnresolvedReference>,
}

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]+))\s*\)"#).expect("valid regex")
});

/// Everything needed to resolve a reference, shared across templates.
struct Resolver<'a> {
    staging: &'a Path,
    map: &'a RevisionMap,
    bundle: &'a BundleConfig,
    asset_dirs: &'a [String],
    watched: Vec<Pattern>,
    length: usize,
}

/// Result of resolving one raw reference.
enum Resolution {
    /// Rewrite to this value; `target` is the staging key it points at.
    Revved { value: String, target: String },
    /// Expected to be fingerprinted but absent from the mapping.
    Unresolved,
    /// Not ours to touch.
    Skip,
}

impl Resolver<'_> {
    fn resolve_raw(&self, value: &str) -> Resolution {
        if is_external(value) {
            return Resolution::Skip;
        }
        let (path, suffix) = split_suffix(value);
        if path.is_empty() {
            return Resolution::Skip;
        }

        for dir in self.asset_dirs {
            let key = join_key(dir, path);
            if let Some(revved) = self.map.get(&key) {
                return Resolution::Revved {
                    value: format!("{}{}", replace_file_name(path, revved), suffix),
                    target: revved.to_string(),
                };
            }
        }

        let name = path.rsplit('/').next().unwrap_or(path);
        let watched = self
            .asset_dirs
            .iter()
            .any(|dir| matches_any(&self.watched, &join_key(dir, path)));
        if watched && !is_revved(name, self.length) {
            Resolution::Unresolved
        } else {
            Resolution::Skip
        }
    }

    /// The tag reference for a block's output and the staging key it names.
    fn resolve_block(&self, block: &ReferenceBlock) -> (String, String, bool) {
        let (path, suffix) = split_suffix(&block.output);
        let key = join_key(&self.bundle.dest, path);
        match self.map.get(&key) {
            Some(revved) => (
                format!("{}{}", replace_file_name(path, revved), suffix),
                revved.to_string(),
                true,
            ),
            None => (block.output.clone(), key, false),
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.staging.join(key).is_file()
    }
}

/// Values we never rewrite: other origins, data URIs, anchors, and
/// template expressions the generator has yet to expand.
fn is_external(value: &str) -> bool {
    value.contains("://")
        || value.starts_with("//")
        || value.starts_with("data:")
        || value.starts_with("mailto:")
        || value.starts_with('#')
        || value.contains("{{")
        || value.contains("{%")
}

/// Swap the last segment of `path` for the last segment of `revved`.
fn replace_file_name(path: &str, revved: &str) -> String {
    let new_name = revved.rsplit('/').next().unwrap_or(revved);
    match path.rfind('/') {
        Some(i) => format!("{}{}", &path[..=i], new_name),
        None => new_name.to_string(),
    }
}

/// Byte ranges of every reference value on one line, in order.
fn value_spans(line: &str) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = ATTR
        .captures_iter(line)
        .chain(URL.captures_iter(line))
        .filter_map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| (m.start(), m.end()))
        })
        .collect();
    spans.sort_unstable();
    spans.dedup();
    spans
}

/// Rewrite the configured templates in place.
pub fn rewrite(
    staging: &Path,
    map: &RevisionMap,
    bundle: &BundleConfig,
    config: &RewriteConfig,
    revision: &RevisionConfig,
) -> Result<RewriteReport, RewriteError> {
    let resolver = Resolver {
        staging,
        map,
        bundle,
        asset_dirs: &config.asset_dirs,
        watched: compile_patterns(&revision.patterns)?,
        length: revision.length,
    };

    let mut report = RewriteReport::default();
    for template in &bundle.templates {
        let path = staging.join(template);
        let content = fs::read_to_string(&path).map_err(|source| RewriteError::Io {
            path: path.clone(),
            source,
        })?;

        let rewritten = rewrite_template(template, &content, &resolver, &mut report)?;
        if rewritten != content {
            fs::write(&path, &rewritten).map_err(|source| RewriteError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(template = %template, "rewritten");
            report.templates.push(template.clone());
        }
    }

    for warning in &report.warnings {
        warn!("{}", warning);
    }
    info!(
        templates = report.templates.len(),
        blocks = report.blocks,
        references = report.references,
        warnings = report.warnings.len(),
        "rewrote references"
    );
    Ok(report)
}

/// Rewrite one template's content. Line endings are preserved.
fn rewrite_template(
    template: &str,
    content: &str,
    resolver: &Resolver<'_>,
    report: &mut RewriteReport,
) -> Result<String, RewriteError> {
    let blocks = parse_blocks(template, content)?;
    let mut next_block = 0;
    let mut out = String::with_capacity(content.len());

    for (index, raw) in content.split_inclusive('\n').enumerate() {
        let line_no = index + 1;
        let body = raw.trim_end_matches(['\n', '\r']);
        let ending = &raw[body.len()..];

        if let Some(block) = blocks.get(next_block) {
            if line_no >= block.start_line && line_no <= block.end_line {
                if line_no == block.start_line {
                    let (reference, target, resolved) = resolver.resolve_block(block);
                    if !resolver.exists(&target) {
                        return Err(RewriteError::Dangling {
                            template: template.to_string(),
                            line: line_no,
                            reference,
                            target,
                        });
                    }
                    if !resolved {
                        report.warnings.push(UnresolvedReference {
                            template: template.to_string(),
                            line: line_no,
                            reference: block.output.clone(),
                        });
                    }
                    let indent = &body[..body.len() - body.trim_start().len()];
                    out.push_str(indent);
                    out.push_str(&block.kind.tag(&reference));
                    out.push_str(ending);
                    report.blocks += 1;
                }
                if line_no == block.end_line {
                    next_block += 1;
                }
                continue;
            }
        }

        out.push_str(&rewrite_line(template, line_no, body, resolver, report)?);
        out.push_str(ending);
    }
    Ok(out)
}

fn rewrite_line(
    template: &str,
    line_no: usize,
    line: &str,
    resolver: &Resolver<'_>,
    report: &mut RewriteReport,
) -> Result<String, RewriteError> {
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;

    for (start, end) in value_spans(line) {
        if start < cursor {
            continue;
        }
        let value = &line[start..end];
        match resolver.resolve_raw(value) {
            Resolution::Revved { value: new, target } => {
                if !resolver.exists(&target) {
                    return Err(RewriteError::Dangling {
                        template: template.to_string(),
                        line: line_no,
                        reference: value.to_string(),
                        target,
                    });
                }
                out.push_str(&line[cursor..start]);
                out.push_str(&new);
                cursor = end;
                report.references += 1;
            }
            Resolution::Unresolved => report.warnings.push(UnresolvedReference {
                template: template.to_string(),
                line: line_no,
                reference: value.to_string(),
            }),
            Resolution::Skip => {}
        }
    }
    out.push_str(&line[cursor..]);
    Ok(out)
}
