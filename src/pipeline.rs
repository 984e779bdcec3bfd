//! Release pipeline orchestration.
//!
//! A release is a fixed sequence of stages over the project tree, which is
//! also the staging tree:
//!
//! ```text
//! Fresh → Compiled → Clean → Assembled → Extracted → Combined
//!       → Revisioned → Rewritten → Generated
//! ```
//!
//! Each stage reads the previous stages' results from the
//! [`PipelineContext`] and records its own. Transitions are strictly linear:
//! entering any stage other than the current one's successor is
//! [`PipelineError::OutOfOrder`]. A failing stage leaves the context at the
//! last stage that completed. Nothing is rolled back; the next release
//! starts by cleaning.

use crate::assemble::{self, AssembleError};
use crate::blocks::{self, BlockError};
use crate::combine::{self, CombineError};
use crate::config::Project;
use crate::revision::{self, RevisionError, RevisionMap};
use crate::rewrite::{self, RewriteError, RewriteReport};
use crate::tools::{ToolError, Toolchain};
use crate::types::{CombinedArtifact, ReferenceBlock, join_key, split_suffix};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cannot enter {to} from {from}")]
    OutOfOrder { from: Stage, to: Stage },
    #[error("Tool failed: {0}")]
    Tool(#[from] ToolError),
    #[error("Assembly failed: {0}")]
    Assemble(#[from] AssembleError),
    #[error("Reference block error: {0}")]
    Block(#[from] BlockError),
    #[error("Combine failed: {0}")]
    Combine(#[from] CombineError),
    #[error("Revisioning failed: {0}")]
    Revision(#[from] RevisionError),
    #[error("Rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),
}

/// Release pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Fresh,
    Compiled,
    Clean,
    Assembled,
    Extracted,
    Combined,
    Revisioned,
    Rewritten,
    Generated,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Fresh,
        Stage::Compiled,
        Stage::Clean,
        Stage::Assembled,
        Stage::Extracted,
        Stage::Combined,
        Stage::Revisioned,
        Stage::Rewritten,
        Stage::Generated,
    ];

    /// The only stage that may follow this one.
    pub fn next(self) -> Option<Stage> {
        let index = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(index + 1).copied()
    }

    /// Verb describing the work done to reach this stage.
    pub fn action(self) -> &'static str {
        match self {
            Stage::Fresh => "Start",
            Stage::Compiled => "Compiling assets",
            Stage::Clean => "Cleaning",
            Stage::Assembled => "Assembling",
            Stage::Extracted => "Extracting reference blocks",
            Stage::Combined => "Combining",
            Stage::Revisioned => "Revisioning",
            Stage::Rewritten => "Rewriting references",
            Stage::Generated => "Generating site",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything the stages have produced so far.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    stage: Stage,
    /// Clean targets that existed and were removed.
    pub cleaned: Vec<PathBuf>,
    /// Files copied into the staging tree, relative to it.
    pub staged: Vec<PathBuf>,
    pub blocks: Vec<ReferenceBlock>,
    pub artifacts: Vec<CombinedArtifact>,
    pub revisions: RevisionMap,
    pub rewrite: RewriteReport,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            stage: Stage::Fresh,
            cleaned: Vec::new(),
            staged: Vec::new(),
            blocks: Vec::new(),
            artifacts: Vec::new(),
            revisions: RevisionMap::new(),
            rewrite: RewriteReport::default(),
        }
    }

    /// The last stage that completed.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Check that `to` may be entered next.
    pub fn check_transition(&self, to: Stage) -> Result<(), PipelineError> {
        if self.stage.next() == Some(to) {
            Ok(())
        } else {
            Err(PipelineError::OutOfOrder {
                from: self.stage,
                to,
            })
        }
    }

    fn complete(&mut self, stage: Stage) {
        self.stage = stage;
    }
}

/// Drives one release over a project.
pub struct Pipeline<'a> {
    project: &'a Project,
    tools: &'a Toolchain,
    context: PipelineContext,
}

impl<'a> Pipeline<'a> {
    pub fn new(project: &'a Project, tools: &'a Toolchain) -> Self {
        Self {
            project,
            tools,
            context: PipelineContext::new(),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn into_context(self) -> PipelineContext {
        self.context
    }

    /// Run one stage. Fails without side effects if `stage` is not next.
    pub fn enter(&mut self, stage: Stage) -> Result<(), PipelineError> {
        self.context.check_transition(stage)?;
        let root = &self.project.root;
        let config = &self.project.config;
        let ctx = &mut self.context;

        match stage {
            Stage::Fresh => {}
            Stage::Compiled => self.tools.compile()?,
            Stage::Clean => ctx.cleaned = assemble::clean(root, &config.release.clean)?,
            Stage::Assembled => ctx.staged = assemble::assemble(root, &config.release.copy)?,
            Stage::Extracted => ctx.blocks = blocks::extract(root, &config.bundle.templates)?,
            Stage::Combined => {
                ctx.artifacts = combine::combine(root, &ctx.blocks, &config.bundle)?;
            }
            Stage::Revisioned => {
                ctx.revisions = revision::revision(root, &config.revision, &ctx.artifacts)?;
            }
            Stage::Rewritten => {
                ctx.rewrite = rewrite::rewrite(
                    root,
                    &ctx.revisions,
                    &config.bundle,
                    &config.rewrite,
                    &config.revision,
                )?;
            }
            Stage::Generated => {
                let generator_config = config.release.generator_config.as_deref().map(Path::new);
                self.tools.generator.invoke(generator_config)?;
            }
        }

        ctx.complete(stage);
        info!(stage = %stage, "stage complete");
        Ok(())
    }

    /// Run every remaining stage, calling `on_stage` before and after each.
    pub fn run(&mut self, mut on_stage: impl FnMut(StageEvent<'_>)) -> Result<(), PipelineError> {
        while let Some(next) = self.context.stage().next() {
            on_stage(StageEvent::Started(next));
            self.enter(next)?;
            on_stage(StageEvent::Finished(next, &self.context));
        }
        Ok(())
    }
}

/// Progress notification from [`Pipeline::run`].
#[derive(Debug, Clone, Copy)]
pub enum StageEvent<'a> {
    Started(Stage),
    Finished(Stage, &'a PipelineContext),
}

/// Run a complete release and return the final context.
pub fn release(project: &Project, tools: &Toolchain) -> Result<PipelineContext, PipelineError> {
    let mut pipeline = Pipeline::new(project, tools);
    pipeline.run(|_| {})?;
    Ok(pipeline.into_context())
}

/// A block input the source tree cannot supply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInput {
    pub template: String,
    pub line: usize,
    pub output: String,
    pub input: String,
}

/// Result of inspecting the source tree without building anything.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Source files of the configured templates.
    pub templates: Vec<PathBuf>,
    pub blocks: Vec<ReferenceBlock>,
    pub missing: Vec<MissingInput>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Extract reference blocks from the source templates and verify that every
/// input would be present after assembly. Nothing is written.
///
/// Paths are mapped back through the release copy rules, so a template
/// staged at `_layouts/default.html` is read from its source under `dev/`.
pub fn check(project: &Project) -> Result<CheckReport, PipelineError> {
    let root = &project.root;
    let config = &project.config;
    let rules = &config.release.copy;
    let mut report = CheckReport::default();

    for template in &config.bundle.templates {
        let source = assemble::source_for(root, rules, template)?
            .unwrap_or_else(|| project.path(template));
        let content = std::fs::read_to_string(&source).map_err(|source_err| BlockError::Io {
            path: source.clone(),
            source: source_err,
        })?;
        report.blocks.extend(blocks::parse_blocks(template, &content)?);
        report.templates.push(source);
    }

    for block in &report.blocks {
        for input in &block.inputs {
            let staged = join_key(&config.bundle.root, split_suffix(input).0);
            let found = assemble::source_for(root, rules, &staged)?.is_some()
                || project.path(&staged).is_file();
            if !found {
                report.missing.push(MissingInput {
                    template: block.template.clone(),
                    line: block.start_line,
                    output: block.output.clone(),
                    input: input.clone(),
                });
            }
        }
    }
    Ok(report)
}
