//! External tool capability.
//!
//! Every heavy operation in the pipeline (style compilation, site generation,
//! webfont builds, live-reload notification) belongs to a program we do not
//! own. The [`Tool`] trait is the seam: the pipeline only knows a tool's name
//! and that invoking it with an optional configuration file either succeeds
//! or fails. [`ShellTool`] is the production implementation; tests swap in
//! the recording mock from [`tests`].
//!
//! Tool output is never captured. Child processes inherit stdout and stderr,
//! so compiler diagnostics reach the user verbatim.

use crate::config::{Project, ToolSpec};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {}", exit_description(.code))]
    Failed { tool: String, code: Option<i32> },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "a signal".to_string(),
    }
}

/// Something the pipeline can run to completion.
pub trait Tool: Sync {
    /// Label for logs and errors.
    fn name(&self) -> &str;

    /// Run the tool, optionally pointing it at a configuration file.
    /// Blocks until the tool exits.
    fn invoke(&self, config: Option<&Path>) -> Result<(), ToolError>;
}

/// Runs a [`ToolSpec`] as a child process rooted at the project directory.
#[derive(Debug, Clone)]
pub struct ShellTool {
    spec: ToolSpec,
    root: PathBuf,
}

impl ShellTool {
    pub fn new(spec: ToolSpec, root: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            root: root.into(),
        }
    }

    /// Build the command line without running it.
    pub fn command(&self, config: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args);
        if let Some(config) = config {
            if let Some(flag) = &self.spec.config_flag {
                cmd.arg(flag);
            }
            cmd.arg(config);
        }
        let dir = match &self.spec.cwd {
            Some(cwd) => self.root.join(cwd),
            None => self.root.clone(),
        };
        cmd.current_dir(dir);
        cmd
    }

    /// Start the tool without waiting for it (used for the dev server).
    pub fn spawn(&self) -> Result<Child, ToolError> {
        debug!(tool = self.name(), "spawning");
        self.command(None).spawn().map_err(|source| ToolError::Spawn {
            tool: self.name().to_string(),
            source,
        })
    }
}

impl Tool for ShellTool {
    fn name(&self) -> &str {
        self.spec.display_name()
    }

    fn invoke(&self, config: Option<&Path>) -> Result<(), ToolError> {
        let mut cmd = self.command(config);
        debug!(tool = self.name(), command = ?cmd, "invoking");
        let status = cmd.status().map_err(|source| ToolError::Spawn {
            tool: self.name().to_string(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(ToolError::Failed {
                tool: self.name().to_string(),
                code: status.code(),
            })
        }
    }
}

/// The set of tools one project drives.
pub struct Toolchain {
    /// Run in order before the compiler.
    pub prepare: Vec<Box<dyn Tool>>,
    pub compiler: Box<dyn Tool>,
    pub generator: Box<dyn Tool>,
    /// Optional live-reload notifier; failures are never fatal.
    pub reload: Option<Box<dyn Tool>>,
}

impl Toolchain {
    /// Shell tools for every tool named in the project's profile.
    pub fn from_project(project: &Project) -> Self {
        let tools = &project.config.tools;
        let shell = |spec: &ToolSpec| -> Box<dyn Tool> {
            Box::new(ShellTool::new(spec.clone(), &project.root))
        };
        Self {
            prepare: tools.prepare.iter().map(shell).collect(),
            compiler: shell(&tools.compiler),
            generator: shell(&tools.generator),
            reload: tools.reload.as_ref().map(shell),
        }
    }

    /// Run the prepare tools, then the compiler.
    pub fn compile(&self) -> Result<(), ToolError> {
        for tool in &self.prepare {
            tool.invoke(None)?;
        }
        self.compiler.invoke(None)
    }
}
