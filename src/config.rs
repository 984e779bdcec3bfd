//! Pipeline configuration module.
//!
//! Handles loading, validating, and merging `sitepipe.toml`. The file is the
//! site's *layout profile*: it names the directories the pipeline works on,
//! the external tools it drives, and which optional stages exist. Stock
//! defaults describe the classic layout (sources under `dev/`, dev site in
//! `_site.dev/`, release staged in place); a profile overrides only what
//! differs.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [tools.compiler]
//! command = "compass"
//! args = ["compile"]
//! cwd = "dev"
//!
//! [tools.generator]
//! command = "jekyll"
//! args = ["build"]
//! config_flag = "--config"
//!
//! [release]
//! clean = ["assets/css", "_layouts", "_site.release"]
//!
//! [[release.copy]]
//! from = "dev/assets"
//! to = "assets"
//!
//! [bundle]
//! templates = ["_layouts/default.html"]
//! root = "."
//! dest = "."
//! minify = true
//!
//! [revision]
//! patterns = []
//! include_bundles = true
//! length = 8
//!
//! [rewrite]
//! asset_dirs = ["."]
//!
//! [develop]
//! generator_config = "_config.dev.yml"
//! style_sources = ["dev/sass/**/*.scss"]
//! compiled_assets = ["dev/assets/css/**/*.css"]
//! content = ["dev/**/*.html", "_posts/**", "_config.yml"]
//! debounce_ms = 100
//!
//! [processing]
//! max_processes = 4         # Max hashing workers (omit for auto = CPU cores)
//! ```
//!
//! All paths are relative to the project root. Unknown keys are rejected to
//! catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Name of the layout profile file in the project root.
pub const CONFIG_FILENAME: &str = "sitepipe.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Pipeline configuration loaded from `sitepipe.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// External tools the pipeline drives.
    pub tools: ToolsConfig,
    /// Release staging: clean targets, copy rules, generator config.
    pub release: ReleaseConfig,
    /// Reference block extraction and combination.
    pub bundle: BundleConfig,
    /// Content fingerprinting.
    pub revision: RevisionConfig,
    /// Reference rewriting.
    pub rewrite: RewriteConfig,
    /// Development watch loop.
    pub develop: DevelopConfig,
    /// Parallel hashing settings.
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    /// Validate paths, globs and ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for target in &self.release.clean {
            if !is_contained_relative(target) {
                return Err(ConfigError::Validation(format!(
                    "release.clean target '{}' must be a relative path inside the project root",
                    target
                )));
            }
        }
        for spec in self.tools.all() {
            if spec.command.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tools.{} command must not be empty",
                    spec.display_name()
                )));
            }
        }
        if !(4..=64).contains(&self.revision.length) {
            return Err(ConfigError::Validation(
                "revision.length must be between 4 and 64".into(),
            ));
        }
        if self.rewrite.asset_dirs.is_empty() {
            return Err(ConfigError::Validation(
                "rewrite.asset_dirs must not be empty".into(),
            ));
        }
        let rules = self.release.copy.iter().chain(&self.develop.copy);
        let globs = rules
            .flat_map(|rule| rule.files.iter())
            .chain(&self.revision.patterns)
            .chain(&self.develop.style_sources)
            .chain(&self.develop.compiled_assets)
            .chain(&self.develop.content);
        for pattern in globs {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::Validation(format!(
                    "invalid glob '{}': {}",
                    pattern, e
                )));
            }
        }
        Ok(())
    }
}

/// A clean target may not be absolute, climb out of the root, or be the root.
fn is_contained_relative(target: &str) -> bool {
    let path = Path::new(target);
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            _ => return false,
        }
    }
    depth > 0
}

/// How to invoke one external tool.
///
/// The tool runs `command args... [config_flag config]` in `cwd` (relative to
/// the project root) with inherited stdout/stderr.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    /// Label used in logs and errors. Defaults to the command.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Flag placed before a configuration file argument, e.g. `--config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_flag: Option<String>,
}

impl ToolSpec {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            name: String::new(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
            config_flag: None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.command
        } else {
            &self.name
        }
    }
}

/// External tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Style preprocessor (compiles sources to plain stylesheets).
    pub compiler: ToolSpec,
    /// Static-site generator.
    pub generator: ToolSpec,
    /// Extra generators run before the compiler (webfonts, SVG optimization).
    pub prepare: Vec<ToolSpec>,
    /// Long-running dev server spawned by `develop`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ToolSpec>,
    /// Fire-and-forget live-reload notifier run after dev rebuilds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reload: Option<ToolSpec>,
}

impl ToolsConfig {
    fn all(&self) -> impl Iterator<Item = &ToolSpec> {
        [&self.compiler, &self.generator]
            .into_iter()
            .chain(&self.prepare)
            .chain(&self.server)
            .chain(&self.reload)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            compiler: ToolSpec {
                cwd: Some("dev".to_string()),
                ..ToolSpec::new("compass", &["compile"])
            },
            generator: ToolSpec {
                config_flag: Some("--config".to_string()),
                ..ToolSpec::new("jekyll", &["build"])
            },
            prepare: Vec::new(),
            server: None,
            reload: None,
        }
    }
}

/// Copy every file under `from` matching one of `files` into `to`,
/// preserving paths relative to `from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyRule {
    pub from: String,
    #[serde(default = "default_copy_files")]
    pub files: Vec<String>,
    pub to: String,
}

fn default_copy_files() -> Vec<String> {
    vec!["**/*".to_string()]
}

impl CopyRule {
    pub fn tree(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            files: default_copy_files(),
            to: to.to_string(),
        }
    }

    pub fn files(from: &str, files: &[&str], to: &str) -> Self {
        Self {
            from: from.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            to: to.to_string(),
        }
    }
}

/// Release staging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Files and directories removed at the start of every release.
    pub clean: Vec<String>,
    /// Copy rules that assemble the staging tree.
    pub copy: Vec<CopyRule>,
    /// Generator configuration for the final build; unset uses the
    /// generator's own default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_config: Option<String>,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            clean: vec![
                "assets/css".to_string(),
                "_layouts".to_string(),
                "_site.release".to_string(),
            ],
            copy: vec![
                CopyRule::tree("dev/assets", "assets"),
                CopyRule::tree("dev/_layouts", "_layouts"),
                CopyRule::files("dev", &["index.html"], "."),
            ],
            generator_config: None,
        }
    }
}

/// Reference block settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleConfig {
    /// Templates scanned for blocks and later rewritten.
    pub templates: Vec<String>,
    /// Directory block inputs resolve against.
    pub root: String,
    /// Directory block outputs are written under.
    pub dest: String,
    /// Strip comments and redundant whitespace from combined artifacts.
    pub minify: bool,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            templates: vec!["_layouts/default.html".to_string()],
            root: ".".to_string(),
            dest: ".".to_string(),
            minify: true,
        }
    }
}

/// Fingerprinting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RevisionConfig {
    /// Globs (relative to the project root) of extra files to revision.
    pub patterns: Vec<String>,
    /// Also revision every combined artifact.
    pub include_bundles: bool,
    /// Fingerprint width in hex characters.
    pub length: usize,
    /// Where to write the revision mapping as JSON; unset writes nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            include_bundles: true,
            length: 8,
            manifest: None,
        }
    }
}

/// Rewriting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewriteConfig {
    /// Directories raw references are resolved against, in order.
    pub asset_dirs: Vec<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            asset_dirs: vec![".".to_string()],
        }
    }
}

/// Development watch loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevelopConfig {
    /// Generator configuration for dev builds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_config: Option<String>,
    /// Changes here recompile styles.
    pub style_sources: Vec<String>,
    /// Changes here copy compiled assets into the dev site.
    pub compiled_assets: Vec<String>,
    /// Changes here rebuild the dev site.
    pub content: Vec<String>,
    /// Copy rules run when compiled assets change.
    pub copy: Vec<CopyRule>,
    /// Quiet period before queued triggers run.
    pub debounce_ms: u64,
}

impl Default for DevelopConfig {
    fn default() -> Self {
        Self {
            generator_config: Some("_config.dev.yml".to_string()),
            style_sources: vec!["dev/sass/**/*.scss".to_string()],
            compiled_assets: vec!["dev/assets/css/**/*.css".to_string()],
            content: vec![
                "dev/**/*.html".to_string(),
                "_posts/**".to_string(),
                "_config.yml".to_string(),
            ],
            copy: vec![CopyRule::files(
                "dev/assets/css",
                &["main.css"],
                "_site.dev/assets/css",
            )],
            debounce_ms: 100,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel hashing workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(PipelineConfig::default())
        .map_err(|e| ConfigError::Validation(format!("stock defaults: {}", e)))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely, so arrays
///   (copy rules, globs) are replaced, not appended to.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<PipelineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PipelineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `sitepipe.toml` from the project root, falling back to stock
/// defaults when the file is absent.
pub fn load_config(root: &Path) -> Result<PipelineConfig, ConfigError> {
    let overlay = load_raw_config(&root.join(CONFIG_FILENAME))?;
    resolve_config(stock_defaults_value()?, overlay)
}

/// Load an explicitly named config file; a missing file is an error.
pub fn load_config_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let overlay =
        load_raw_config(path)?.ok_or_else(|| ConfigError::NotFound(path.to_path_buf()))?;
    resolve_config(stock_defaults_value()?, Some(overlay))
}

/// A project root together with its resolved layout profile.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: PipelineConfig,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, config: PipelineConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Load the project at `root`, using `config_path` when given.
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) => load_config_file(path)?,
            None => load_config(root)?,
        };
        Ok(Self::new(root, config))
    }

    /// Resolve a project-relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Returns a fully-commented stock `sitepipe.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# sitepipe layout profile
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Paths are relative to the project root.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# External tools
# ---------------------------------------------------------------------------
# Each tool runs `command args... [config_flag <config>]` in `cwd` with the
# terminal attached. A non-zero exit aborts the current command.

[tools.compiler]
command = "compass"
args = ["compile"]
cwd = "dev"

[tools.generator]
command = "jekyll"
args = ["build"]
config_flag = "--config"

# Extra generators run before the compiler, in order.
# [[tools.prepare]]
# name = "webfont"
# command = "fontcustom"
# args = ["compile", "dev/svg", "--output", "dev/sass/modules"]

# Long-running server started by `develop`.
# [tools.server]
# command = "python3"
# args = ["-m", "http.server", "5000", "--directory", "_site.dev"]

# Notifier run after each dev rebuild. Failures are only logged.
# [tools.reload]
# command = "livereload-notify"

# ---------------------------------------------------------------------------
# Release staging
# ---------------------------------------------------------------------------
[release]
# Removed at the start of every release. Must stay inside the project root.
clean = ["assets/css", "_layouts", "_site.release"]

# Generator config for the final build (unset = generator default).
# generator_config = "_config.yml"

[[release.copy]]
from = "dev/assets"
files = ["**/*"]
to = "assets"

[[release.copy]]
from = "dev/_layouts"
files = ["**/*"]
to = "_layouts"

[[release.copy]]
from = "dev"
files = ["index.html"]
to = "."

# ---------------------------------------------------------------------------
# Reference blocks
# ---------------------------------------------------------------------------
# Templates may wrap asset references in
#   <!-- build:css css/app.css --> ... <!-- endbuild -->
# The listed files are concatenated in order, minified, and written to the
# block's output path.
[bundle]
templates = ["_layouts/default.html"]
root = "."
dest = "."
minify = true

# ---------------------------------------------------------------------------
# Fingerprinting
# ---------------------------------------------------------------------------
[revision]
# Extra files to fingerprint, e.g. ["assets/img/**/*.png"].
patterns = []
# Fingerprint every combined artifact.
include_bundles = true
# Hex characters of the content hash embedded in file names.
length = 8
# Write the logical -> fingerprinted mapping as JSON.
# manifest = "_site.release/rev-manifest.json"

# ---------------------------------------------------------------------------
# Reference rewriting
# ---------------------------------------------------------------------------
[rewrite]
# Directories raw references in templates are resolved against.
asset_dirs = ["."]

# ---------------------------------------------------------------------------
# Development watch loop
# ---------------------------------------------------------------------------
[develop]
generator_config = "_config.dev.yml"
style_sources = ["dev/sass/**/*.scss"]
compiled_assets = ["dev/assets/css/**/*.css"]
content = ["dev/**/*.html", "_posts/**", "_config.yml"]
debounce_ms = 100

[[develop.copy]]
from = "dev/assets/css"
files = ["main.css"]
to = "_site.dev/assets/css"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel hashing workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
