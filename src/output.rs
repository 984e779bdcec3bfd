//! CLI output formatting for the release, check and develop commands.
//!
//! # Output Format
//!
//! ## Release
//!
//! Each stage prints a `==> ` header when it starts and indented detail
//! lines when it finishes:
//!
//! ```text
//! ==> Cleaning
//!     removed _layouts
//! ==> Extracting reference blocks
//!     css assets/css/main.css ← 1 input (_layouts/default.html:6)
//! ==> Combining
//!     assets/css/main.css (212 bytes)
//! ==> Revisioning
//!     assets/css/main.css → assets/css/main-1a2b3c4d.css
//! ==> Rewriting references
//!     _layouts/default.html
//!     warning: _layouts/default.html:9: no fingerprinted file for '/img/a.png'
//!
//! Released 1 bundle, 1 fingerprinted file, 1 warning
//! ```
//!
//! ## Develop
//!
//! ```text
//! Watching /srv/site
//! changed dev/sass/main.scss (style source)
//! → style source
//! ✓ style source
//! ```
//!
//! # Architecture
//!
//! Every command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::develop::DevelopEvent;
use crate::pipeline::{CheckReport, PipelineContext, Stage};
use std::path::{Path, PathBuf};

// ============================================================================
// Shared helpers
// ============================================================================

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 bundle`, `2 bundles`.
fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn path_list(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| format!("{}{}", indent(1), p.display()))
        .collect()
}

// ============================================================================
// Release
// ============================================================================

/// Stage header printed before a stage runs.
pub fn format_stage_header(stage: Stage) -> String {
    format!("==> {}", stage.action())
}

/// Detail lines for a stage that just completed.
pub fn format_stage_result(stage: Stage, ctx: &PipelineContext) -> Vec<String> {
    match stage {
        Stage::Fresh | Stage::Compiled | Stage::Generated => Vec::new(),
        Stage::Clean => ctx
            .cleaned
            .iter()
            .map(|p| format!("{}removed {}", indent(1), p.display()))
            .collect(),
        Stage::Assembled => vec![format!(
            "{}{} staged",
            indent(1),
            plural(ctx.staged.len(), "file")
        )],
        Stage::Extracted => ctx
            .blocks
            .iter()
            .map(|b| {
                format!(
                    "{}{} {} ← {} ({}:{})",
                    indent(1),
                    b.kind.annotation(),
                    b.output,
                    plural(b.inputs.len(), "input"),
                    b.template,
                    b.start_line
                )
            })
            .collect(),
        Stage::Combined => ctx
            .artifacts
            .iter()
            .map(|a| format!("{}{} ({} bytes)", indent(1), a.path, a.bytes))
            .collect(),
        Stage::Revisioned => ctx
            .revisions
            .iter()
            .map(|(from, to)| format!("{}{} → {}", indent(1), from, to))
            .collect(),
        Stage::Rewritten => {
            let mut lines: Vec<String> = ctx
                .rewrite
                .templates
                .iter()
                .map(|t| format!("{}{}", indent(1), t))
                .collect();
            lines.extend(
                ctx.rewrite
                    .warnings
                    .iter()
                    .map(|w| format!("{}warning: {}", indent(1), w)),
            );
            lines
        }
    }
}

/// One-line summary after a successful release.
pub fn format_release_summary(ctx: &PipelineContext) -> String {
    format!(
        "Released {}, {}, {}",
        plural(ctx.artifacts.len(), "bundle"),
        plural(ctx.revisions.len(), "fingerprinted file"),
        plural(ctx.rewrite.warnings.len(), "warning")
    )
}

pub fn print_stage_header(stage: Stage) {
    println!("{}", format_stage_header(stage));
}

pub fn print_stage_result(stage: Stage, ctx: &PipelineContext) {
    for line in format_stage_result(stage, ctx) {
        println!("{}", line);
    }
}

pub fn print_release_summary(ctx: &PipelineContext) {
    println!();
    println!("{}", format_release_summary(ctx));
}

// ============================================================================
// Check
// ============================================================================

/// Templates with their blocks, then any missing inputs.
pub fn format_check_output(report: &CheckReport, root: &Path) -> Vec<String> {
    let mut lines = vec!["Templates".to_string()];
    let sources: Vec<PathBuf> = report
        .templates
        .iter()
        .map(|t| PathBuf::from(display_relative(t, root)))
        .collect();
    lines.extend(path_list(&sources));

    lines.push(String::new());
    lines.push("Blocks".to_string());
    if report.blocks.is_empty() {
        lines.push(format!("{}(none)", indent(1)));
    }
    for block in &report.blocks {
        lines.push(format!(
            "{}{} {} ({}:{})",
            indent(1),
            block.kind.annotation(),
            block.output,
            block.template,
            block.start_line
        ));
        for input in &block.inputs {
            lines.push(format!("{}{}", indent(2), input));
        }
    }

    if !report.missing.is_empty() {
        lines.push(String::new());
        lines.push("Missing inputs".to_string());
        for m in &report.missing {
            lines.push(format!(
                "{}{}:{}: {} needs {}",
                indent(1),
                m.template,
                m.line,
                m.output,
                m.input
            ));
        }
    }
    lines
}

pub fn print_check_output(report: &CheckReport, root: &Path) {
    for line in format_check_output(report, root) {
        println!("{}", line);
    }
}

// ============================================================================
// Develop
// ============================================================================

pub fn format_develop_event(event: &DevelopEvent) -> Vec<String> {
    match event {
        DevelopEvent::Watching { root } => vec![format!("Watching {}", root.display())],
        DevelopEvent::Changed { path, trigger } => {
            vec![format!("changed {} ({})", path, trigger)]
        }
        DevelopEvent::Running(trigger) => vec![format!("→ {}", trigger)],
        DevelopEvent::Finished(trigger) => vec![format!("✓ {}", trigger)],
        DevelopEvent::Failed { trigger, message } => {
            vec![format!("✗ {}", trigger), format!("{}{}", indent(1), message)]
        }
        DevelopEvent::ReloadFailed { message } => {
            vec![format!("reload failed: {}", message)]
        }
        DevelopEvent::Shutdown => vec!["Stopped watching".to_string()],
    }
}

pub fn print_develop_event(event: &DevelopEvent) {
    for line in format_develop_event(event) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::develop::Trigger;
    use crate::pipeline::MissingInput;
    use crate::rewrite::UnresolvedReference;
    use crate::types::{AssetKind, CombinedArtifact, ReferenceBlock};

    fn block() -> ReferenceBlock {
        ReferenceBlock {
            template: "_layouts/default.html".into(),
            start_line: 6,
            end_line: 8,
            kind: AssetKind::Style,
            output: "assets/css/main.css".into(),
            inputs: vec!["/assets/css/main.css".into()],
        }
    }

    fn finished_context() -> PipelineContext {
        let mut ctx = PipelineContext::new();
        ctx.cleaned = vec![PathBuf::from("_layouts")];
        ctx.staged = vec![PathBuf::from("index.html"), PathBuf::from("_layouts/default.html")];
        ctx.blocks = vec![block()];
        ctx.artifacts = vec![CombinedArtifact {
            path: "assets/css/main.css".into(),
            kind: AssetKind::Style,
            inputs: Vec::new(),
            bytes: 212,
        }];
        ctx.revisions
            .insert("assets/css/main.css", "assets/css/main-1a2b3c4d.css");
        ctx.rewrite.templates = vec!["_layouts/default.html".into()];
        ctx.rewrite.warnings = vec![UnresolvedReference {
            template: "_layouts/default.html".into(),
            line: 9,
            reference: "/img/a.png".into(),
        }];
        ctx
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "bundle"), "1 bundle");
        assert_eq!(plural(0, "bundle"), "0 bundles");
        assert_eq!(plural(3, "warning"), "3 warnings");
    }

    #[test]
    fn stage_header_uses_action() {
        assert_eq!(format_stage_header(Stage::Revisioned), "==> Revisioning");
        assert_eq!(format_stage_header(Stage::Compiled), "==> Compiling assets");
    }

    #[test]
    fn clean_lists_removed_targets() {
        let ctx = finished_context();
        assert_eq!(
            format_stage_result(Stage::Clean, &ctx),
            vec!["    removed _layouts"]
        );
    }

    #[test]
    fn assembled_counts_files() {
        let ctx = finished_context();
        assert_eq!(
            format_stage_result(Stage::Assembled, &ctx),
            vec!["    2 files staged"]
        );
    }

    #[test]
    fn extracted_shows_block_origin() {
        let ctx = finished_context();
        assert_eq!(
            format_stage_result(Stage::Extracted, &ctx),
            vec!["    css assets/css/main.css ← 1 input (_layouts/default.html:6)"]
        );
    }

    #[test]
    fn combined_shows_sizes() {
        let ctx = finished_context();
        assert_eq!(
            format_stage_result(Stage::Combined, &ctx),
            vec!["    assets/css/main.css (212 bytes)"]
        );
    }

    #[test]
    fn revisioned_shows_mapping() {
        let ctx = finished_context();
        assert_eq!(
            format_stage_result(Stage::Revisioned, &ctx),
            vec!["    assets/css/main.css → assets/css/main-1a2b3c4d.css"]
        );
    }

    #[test]
    fn rewritten_lists_templates_then_warnings() {
        let ctx = finished_context();
        assert_eq!(
            format_stage_result(Stage::Rewritten, &ctx),
            vec![
                "    _layouts/default.html",
                "    warning: _layouts/default.html:9: no fingerprinted file for '/img/a.png'",
            ]
        );
    }

    #[test]
    fn tool_stages_have_no_detail() {
        let ctx = finished_context();
        assert!(format_stage_result(Stage::Compiled, &ctx).is_empty());
        assert!(format_stage_result(Stage::Generated, &ctx).is_empty());
    }

    #[test]
    fn release_summary() {
        assert_eq!(
            format_release_summary(&finished_context()),
            "Released 1 bundle, 1 fingerprinted file, 1 warning"
        );
        assert_eq!(
            format_release_summary(&PipelineContext::new()),
            "Released 0 bundles, 0 fingerprinted files, 0 warnings"
        );
    }

    #[test]
    fn check_output_lists_blocks_and_missing_inputs() {
        let root = Path::new("/srv/site");
        let report = CheckReport {
            templates: vec![root.join("dev/_layouts/default.html")],
            blocks: vec![block()],
            missing: vec![MissingInput {
                template: "_layouts/default.html".into(),
                line: 6,
                output: "assets/css/main.css".into(),
                input: "/assets/css/main.css".into(),
            }],
        };

        assert_eq!(
            format_check_output(&report, root),
            vec![
                "Templates",
                "    dev/_layouts/default.html",
                "",
                "Blocks",
                "    css assets/css/main.css (_layouts/default.html:6)",
                "        /assets/css/main.css",
                "",
                "Missing inputs",
                "    _layouts/default.html:6: assets/css/main.css needs /assets/css/main.css",
            ]
        );
    }

    #[test]
    fn check_output_without_blocks() {
        let report = CheckReport::default();
        let lines = format_check_output(&report, Path::new("/"));
        assert_eq!(lines, vec!["Templates", "", "Blocks", "    (none)"]);
    }

    #[test]
    fn develop_events() {
        assert_eq!(
            format_develop_event(&DevelopEvent::Changed {
                path: "dev/sass/main.scss".into(),
                trigger: Trigger::StyleSource,
            }),
            vec!["changed dev/sass/main.scss (style source)"]
        );
        assert_eq!(
            format_develop_event(&DevelopEvent::Finished(Trigger::Content)),
            vec!["✓ content"]
        );
        assert_eq!(
            format_develop_event(&DevelopEvent::Failed {
                trigger: Trigger::StyleSource,
                message: "compass exited with status 1".into(),
            }),
            vec!["✗ style source", "    compass exited with status 1"]
        );
    }
}
