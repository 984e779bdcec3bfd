//! # sitepipe
//!
//! Release and development pipeline for Jekyll-style static sites. The heavy
//! lifting (style compilation, site generation, serving, live reload) is
//! done by external tools; sitepipe decides when to run them and owns the
//! file transformations between them.
//!
//! # Architecture: Linear Release Pipeline
//!
//! A release works in the project directory, which doubles as the staging
//! tree. Sources under `dev/` are never modified.
//!
//! ```text
//! 1. Compile     dev/sass/      →  dev/assets/css/     (external compiler)
//! 2. Clean       remove assets/css, _layouts, _site.release
//! 3. Assemble    dev/assets, dev/_layouts, dev/index.html  →  ./
//! 4. Extract     _layouts/*.html  →  reference blocks
//! 5. Combine     blocks  →  one concatenated, minified file per block
//! 6. Revision    app.css  →  app-1a2b3c4d.css
//! 7. Rewrite     templates now point at the fingerprinted files
//! 8. Generate    ./  →  _site/                         (external generator)
//! ```
//!
//! Stages run strictly in this order; the [`pipeline`] state machine rejects
//! anything else. Every stage fails fast and nothing is rolled back. The next
//! release cleans first.
//!
//! Development mode is a separate loop in [`develop`]: one dev build, then a
//! file watcher that recompiles, copies or rebuilds depending on what
//! changed, and pings the live-reload tool.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`tools`] | `Tool` trait for external programs, `ShellTool`, the per-project `Toolchain` |
//! | [`assemble`] | Clean targets and glob copy rules |
//! | [`blocks`] | `build:` reference block parser |
//! | [`combine`] | Concatenation and minification of block inputs |
//! | [`revision`] | SHA-256 fingerprinting and the revision mapping |
//! | [`naming`] | `name-<fingerprint>.ext` filename convention |
//! | [`rewrite`] | Template rewriting against the revision mapping |
//! | [`pipeline`] | Release state machine and source check |
//! | [`develop`] | Watch triggers, debouncing, dev handlers |
//! | [`config`] | `sitepipe.toml` loading, merging and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`output`] | CLI output formatting |
//! | [`types`] | Types shared between stages |
//!
//! # Design Decisions
//!
//! ## One Profile Instead of Per-Site Build Scripts
//!
//! Sites built this way tend to differ only in directory names and in
//! whether an SVG-to-webfont step runs before the style compiler. Those are
//! values in [`config::PipelineConfig`], with stock defaults matching the
//! classic `dev/` layout. Optional steps are entries in `tools.prepare`.
//!
//! ## Tools Behind a Trait
//!
//! Every external program is a [`tools::Tool`]: it has a name and can be
//! invoked with an optional config file. The release logic never builds a
//! command line itself, so tests drive the whole pipeline with a recording
//! mock and no Ruby toolchain installed.
//!
//! ## Verify Before Writing
//!
//! The combiner resolves every input of every block before it writes the
//! first artifact. A typo in a template aborts the release with the staging
//! tree as the assembler left it, instead of half-combined.

pub mod assemble;
pub mod blocks;
pub mod combine;
pub mod config;
pub mod develop;
pub mod logging;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod revision;
pub mod rewrite;
pub mod tools;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
