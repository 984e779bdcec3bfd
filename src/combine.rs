//! Concatenation and minification of reference blocks.
//!
//! Each [`ReferenceBlock`] becomes one [`CombinedArtifact`]: its inputs are
//! read in declared order, joined, optionally minified, and written to the
//! block's output path. Order is never changed; later stylesheets must keep
//! overriding earlier ones and scripts must keep their dependency order.
//!
//! ## Resolution
//!
//! ```text
//! input   "/assets/css/main.css"  →  <staging>/<bundle.root>/assets/css/main.css
//! output  "css/app.css"           →  <staging>/<bundle.dest>/css/app.css
//! ```
//!
//! A leading `/` and any `?query`/`#fragment` are ignored when resolving.
//!
//! ## Failure before write
//!
//! Every input of every block is checked before the first artifact is
//! written, so a missing file aborts the stage with the staging tree exactly
//! as extraction left it.
//!
//! ## Minification
//!
//! Minification only removes bytes that carry no meaning: comments and
//! redundant whitespace. Stylesheets are tokenized just enough to leave
//! strings alone; scripts are handled per line and keep every line break so
//! automatic semicolon insertion behaves the same.

use crate::config::BundleConfig;
use crate::types::{AssetKind, CombinedArtifact, ReferenceBlock, join_key, split_suffix};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CombineError {
    #[error(
        "{template}:{line}: block '{output}' references missing file '{input}' (looked for {})",
        path.display()
    )]
    MissingInput {
        template: String,
        line: usize,
        output: String,
        input: String,
        path: PathBuf,
    },
    #[error("Output '{output}' is declared by blocks with different inputs ({first} and {second})")]
    ConflictingOutput {
        output: String,
        first: String,
        second: String,
    },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A block with every path resolved, ready to be written.
#[derive(Debug)]
struct Planned<'a> {
    block: &'a ReferenceBlock,
    output_key: String,
    inputs: Vec<PathBuf>,
}

/// Resolve and verify every block without writing anything.
///
/// Blocks that declare the same output with the same inputs (a shared
/// partial included by several layouts) collapse into one plan.
fn plan<'a>(
    staging: &Path,
    blocks: &'a [ReferenceBlock],
    bundle: &BundleConfig,
) -> Result<Vec<Planned<'a>>, CombineError> {
    let mut planned: Vec<Planned<'a>> = Vec::new();
    let mut by_output: HashMap<String, usize> = HashMap::new();

    for block in blocks {
        let mut inputs = Vec::with_capacity(block.inputs.len());
        for input in &block.inputs {
            let (path, _) = split_suffix(input);
            let resolved = staging.join(join_key(&bundle.root, path));
            if !resolved.is_file() {
                return Err(CombineError::MissingInput {
                    template: block.template.clone(),
                    line: block.start_line,
                    output: block.output.clone(),
                    input: input.clone(),
                    path: resolved,
                });
            }
            inputs.push(resolved);
        }

        let output_key = join_key(&bundle.dest, split_suffix(&block.output).0);
        if let Some(&existing) = by_output.get(&output_key) {
            let first: &Planned = &planned[existing];
            if first.inputs == inputs && first.block.kind == block.kind {
                continue;
            }
            return Err(CombineError::ConflictingOutput {
                output: output_key,
                first: format!("{}:{}", first.block.template, first.block.start_line),
                second: format!("{}:{}", block.template, block.start_line),
            });
        }
        by_output.insert(output_key.clone(), planned.len());
        planned.push(Planned {
            block,
            output_key,
            inputs,
        });
    }
    Ok(planned)
}

/// Write one combined artifact per distinct block output.
pub fn combine(
    staging: &Path,
    blocks: &[ReferenceBlock],
    bundle: &BundleConfig,
) -> Result<Vec<CombinedArtifact>, CombineError> {
    let planned = plan(staging, blocks, bundle)?;

    let mut artifacts = Vec::with_capacity(planned.len());
    for item in planned {
        let kind = item.block.kind;
        let mut contents = Vec::with_capacity(item.inputs.len());
        for input in &item.inputs {
            let text = fs::read_to_string(input).map_err(|source| CombineError::Io {
                path: input.clone(),
                source,
            })?;
            contents.push(text);
        }

        let joined = concat(kind, &contents);
        let output = if bundle.minify {
            minify(kind, &joined)
        } else {
            joined
        };

        let out_path = staging.join(&item.output_key);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|source| CombineError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&out_path, &output).map_err(|source| CombineError::Io {
            path: out_path.clone(),
            source,
        })?;
        info!(
            output = %item.output_key,
            inputs = item.inputs.len(),
            bytes = output.len(),
            "combined {}",
            kind
        );

        artifacts.push(CombinedArtifact {
            path: item.output_key,
            kind,
            inputs: item.inputs,
            bytes: output.len(),
        });
    }
    Ok(artifacts)
}

/// Join input contents in order.
///
/// Stylesheets are joined byte-for-byte. Scripts get `;\n` between files so
/// a file without a trailing semicolon cannot merge into the next one.
pub fn concat(kind: AssetKind, contents: &[String]) -> String {
    match kind {
        AssetKind::Style => contents.concat(),
        AssetKind::Script => contents.join(";\n"),
    }
}

/// Minify per asset kind.
pub fn minify(kind: AssetKind, source: &str) -> String {
    match kind {
        AssetKind::Style => minify_css(source),
        AssetKind::Script => minify_js(source),
    }
}

/// Characters around which whitespace never matters in CSS.
fn css_tight_before(c: char) -> bool {
    matches!(c, '{' | '}' | ';' | ',')
}

fn css_tight_after(c: char) -> bool {
    matches!(c, '{' | '}' | ';' | ',' | ':')
}

fn css_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '\\' | '%')
}

/// Strip comments (except `/*! ... */`) and redundant whitespace from CSS.
pub fn minify_css(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut pending_space = false;
    let mut i = 0;

    // A pending space survives only between two "loose" characters.
    let flush = |out: &mut String, pending: &mut bool, next: char| {
        if *pending {
            if let Some(last) = out.chars().last() {
                if !css_tight_after(last) && !css_tight_before(next) {
                    out.push(' ');
                }
            }
            *pending = false;
        }
    };

    while i < chars.len() {
        let c = chars[i];

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let end = find_comment_end(&chars, i + 2);
            if chars.get(i + 2) == Some(&'!') {
                flush(&mut out, &mut pending_space, c);
                out.extend(&chars[i..end]);
            } else if !pending_space
                && out.chars().last().is_some_and(css_ident_char)
                && chars.get(end).copied().is_some_and(css_ident_char)
            {
                // Dropping it would merge two tokens into one
                out.push_str("/**/");
            }
            i = end;
            continue;
        }

        if c == '"' || c == '\'' {
            flush(&mut out, &mut pending_space, c);
            let end = find_string_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }

        flush(&mut out, &mut pending_space, c);
        if c == '}' && out.ends_with(';') {
            out.pop();
        }
        out.push(c);
        i += 1;
    }

    out
}

/// Index just past the `*/` closing a comment whose body starts at `from`.
fn find_comment_end(chars: &[char], from: usize) -> usize {
    let mut j = from;
    while j + 1 < chars.len() {
        if chars[j] == '*' && chars[j + 1] == '/' {
            return j + 2;
        }
        j += 1;
    }
    chars.len()
}

/// Index just past the quote closing the string that opens at `start`.
fn find_string_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

/// Drop blank lines and whole-line `//` comments and trim indentation.
///
/// Lines inside a template literal, or continuing a string with a trailing
/// backslash, are kept verbatim.
pub fn minify_js(source: &str) -> String {
    let mut lines = Vec::new();
    let mut in_template = false;
    let mut continued = false;

    for line in source.lines() {
        let toggles = unescaped_backticks(line) % 2 == 1;
        if in_template || continued {
            lines.push(line.to_string());
        } else {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            // The tail of a line that opens a template literal is string content
            let kept = if toggles { trimmed } else { trimmed.trim_end() };
            lines.push(kept.to_string());
        }
        in_template ^= toggles;
        continued = !in_template && line.ends_with('\\');
    }

    lines.join("\n")
}

fn unescaped_backticks(line: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for c in line.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '`' if !escaped => count += 1,
            _ => escaped = false,
        }
        if c != '\\' {
            escaped = false;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{read, write};
    use tempfile::TempDir;

    fn block(output: &str, kind: AssetKind, inputs: &[&str]) -> ReferenceBlock {
        ReferenceBlock {
            template: "_layouts/default.html".into(),
            start_line: 4,
            end_line: 7,
            kind,
            output: output.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn unminified() -> BundleConfig {
        BundleConfig {
            minify: false,
            ..BundleConfig::default()
        }
    }

    // =========================================================================
    // Concatenation
    // =========================================================================

    #[test]
    fn style_concat_is_byte_for_byte_in_declared_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.css", "a { color: red; }\n");
        write(tmp.path(), "b.css", "b { color: blue; }");

        let blocks = vec![block("css/app.css", AssetKind::Style, &["a.css", "b.css"])];
        let artifacts = combine(tmp.path(), &blocks, &unminified()).unwrap();

        let written = read(tmp.path(), "css/app.css");
        assert_eq!(written, "a { color: red; }\nb { color: blue; }");
        assert_eq!(artifacts[0].path, "css/app.css");
        assert_eq!(artifacts[0].bytes, written.len());
        assert_eq!(
            artifacts[0].inputs,
            vec![tmp.path().join("a.css"), tmp.path().join("b.css")]
        );
    }

    #[test]
    fn reversed_inputs_produce_reversed_content() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.css", "A");
        write(tmp.path(), "b.css", "B");

        let blocks = vec![block("out.css", AssetKind::Style, &["b.css", "a.css"])];
        combine(tmp.path(), &blocks, &unminified()).unwrap();
        assert_eq!(read(tmp.path(), "out.css"), "BA");
    }

    #[test]
    fn script_concat_separates_files() {
        assert_eq!(
            concat(AssetKind::Script, &["var a = 1".into(), "var b = 2".into()]),
            "var a = 1;\nvar b = 2"
        );
    }

    #[test]
    fn inputs_resolve_against_root_and_outputs_against_dest() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/assets/main.css", "x{}");
        let bundle = BundleConfig {
            root: "src".into(),
            dest: "public".into(),
            minify: false,
            ..BundleConfig::default()
        };

        let blocks = vec![block(
            "/css/app.css?v=1",
            AssetKind::Style,
            &["/assets/main.css?v=3"],
        )];
        let artifacts = combine(tmp.path(), &blocks, &bundle).unwrap();
        assert_eq!(artifacts[0].path, "public/css/app.css");
        assert!(tmp.path().join("public/css/app.css").exists());
    }

    #[test]
    fn output_may_replace_its_own_input() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "assets/css/main.css", "body {\n  margin: 0;\n}\n");

        let blocks = vec![block(
            "assets/css/main.css",
            AssetKind::Style,
            &["/assets/css/main.css"],
        )];
        combine(tmp.path(), &blocks, &BundleConfig::default()).unwrap();
        assert_eq!(
            read(tmp.path(), "assets/css/main.css"),
            "body{margin:0}"
        );
    }

    // =========================================================================
    // Failure modes
    // =========================================================================

    #[test]
    fn missing_input_aborts_before_any_write() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.css", "a{}");

        let blocks = vec![
            block("css/first.css", AssetKind::Style, &["a.css"]),
            block("css/second.css", AssetKind::Style, &["a.css", "missing.css"]),
        ];
        let err = combine(tmp.path(), &blocks, &BundleConfig::default()).unwrap_err();

        match &err {
            CombineError::MissingInput { input, output, .. } => {
                assert_eq!(input, "missing.css");
                assert_eq!(output, "css/second.css");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("_layouts/default.html:4"));
        // The first block's artifact was never written
        assert!(!tmp.path().join("css/first.css").exists());
        assert!(!tmp.path().join("css").exists());
    }

    #[test]
    fn duplicate_identical_blocks_collapse() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.css", "a{}");
        let mut second = block("css/app.css", AssetKind::Style, &["a.css"]);
        second.template = "_layouts/post.html".into();

        let blocks = vec![block("css/app.css", AssetKind::Style, &["a.css"]), second];
        let artifacts = combine(tmp.path(), &blocks, &BundleConfig::default()).unwrap();
        assert_eq!(artifacts.len(), 1);
    }

    #[test]
    fn conflicting_outputs_are_rejected() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.css", "a{}");
        write(tmp.path(), "b.css", "b{}");

        let blocks = vec![
            block("css/app.css", AssetKind::Style, &["a.css"]),
            block("css/app.css", AssetKind::Style, &["b.css"]),
        ];
        let err = combine(tmp.path(), &blocks, &BundleConfig::default()).unwrap_err();
        assert!(matches!(err, CombineError::ConflictingOutput { .. }));
    }

    // =========================================================================
    // CSS minification
    // =========================================================================

    #[test]
    fn css_minify_strips_whitespace_and_comments() {
        let css = "/* header */\nbody {\n    color: red;\n    margin: 0 auto;\n}\n\na, b {\n  padding: 1px;\n}\n";
        assert_eq!(
            minify_css(css),
            "body{color:red;margin:0 auto}a,b{padding:1px}"
        );
    }

    #[test]
    fn css_minify_keeps_descendant_and_pseudo_selectors() {
        assert_eq!(minify_css("nav  ul  li a:hover { x: y }"), "nav ul li a:hover{x:y}");
        assert_eq!(minify_css("a :first-child {}"), "a :first-child{}");
    }

    #[test]
    fn css_minify_keeps_strings_verbatim() {
        let css = "a::before { content: \"  /* not a comment */  \"; }";
        assert_eq!(
            minify_css(css),
            "a::before{content:\"  /* not a comment */  \"}"
        );
    }

    #[test]
    fn css_minify_keeps_escaped_quotes_in_strings() {
        let css = "a { content: 'it\\'s  here' }";
        assert_eq!(minify_css(css), "a{content:'it\\'s  here'}");
    }

    #[test]
    fn css_minify_preserves_bang_comments() {
        let css = "/*! license */\nbody { margin: 0; }";
        assert_eq!(minify_css(css), "/*! license */ body{margin:0}");
    }

    #[test]
    fn css_minify_keeps_calc_operator_spacing() {
        assert_eq!(
            minify_css("a { width: calc(100% - 2rem); }"),
            "a{width:calc(100% - 2rem)}"
        );
    }

    #[test]
    fn css_minify_media_queries() {
        let css = "@media screen and (max-width: 600px) {\n  body { font-size: 14px; }\n}\n";
        assert_eq!(
            minify_css(css),
            "@media screen and (max-width:600px){body{font-size:14px}}"
        );
    }

    #[test]
    fn css_minify_dropped_comment_adds_no_whitespace() {
        assert_eq!(minify_css(".a/**/.b{}"), ".a.b{}");
        assert_eq!(minify_css(".a/* x */.b{x:y}"), ".a.b{x:y}");
    }

    #[test]
    fn css_minify_whitespace_around_comment_still_separates() {
        assert_eq!(minify_css(".a /* x */ .b{}"), ".a .b{}");
        assert_eq!(minify_css(".a/* x */ .b{}"), ".a .b{}");
    }

    #[test]
    fn css_minify_comment_between_identifiers_stays_a_separator() {
        assert_eq!(minify_css("a{margin:1px/* x */2px}"), "a{margin:1px/**/2px}");
    }

    #[test]
    fn css_minify_unterminated_comment_drops_rest() {
        assert_eq!(minify_css("a{} /* oops"), "a{}");
    }

    // =========================================================================
    // JS minification
    // =========================================================================

    #[test]
    fn js_minify_drops_blank_and_comment_lines() {
        let js = "// header\nfunction f() {\n    return 1;\n}\n\n   // trailing\nf();\n";
        assert_eq!(minify_js(js), "function f() {\nreturn 1;\n}\nf();");
    }

    #[test]
    fn js_minify_keeps_line_breaks_between_statements() {
        let js = "var a = 1\nvar b = 2\n";
        assert_eq!(minify_js(js), "var a = 1\nvar b = 2");
    }

    #[test]
    fn js_minify_keeps_template_literals_verbatim() {
        let js = "const t = `\n    indented\n\n    // not a comment\n`;\n  done();\n";
        assert_eq!(
            minify_js(js),
            "const t = `\n    indented\n\n    // not a comment\n`;\ndone();"
        );
    }

    #[test]
    fn js_minify_keeps_trailing_space_in_opening_template_line() {
        assert_eq!(minify_js("const t = `a   \nb`;\n"), "const t = `a   \nb`;");
        assert_eq!(minify_js("  f(`x  \n`);  \n"), "f(`x  \n`);  ");
    }

    #[test]
    fn js_minify_comment_line_backtick_does_not_open_template() {
        let js = "// use a ` quote\n  go();\n";
        assert_eq!(minify_js(js), "go();");
    }

    #[test]
    fn js_minify_keeps_string_continuations() {
        let js = "var s = 'a\\\n    b';\n";
        assert_eq!(minify_js(js), "var s = 'a\\\n    b';");
    }

    #[test]
    fn js_minify_ignores_escaped_backticks() {
        assert_eq!(unescaped_backticks("a \\` b ` c"), 1);
    }
}
