//! Development watch loop.
//!
//! After an initial build, the project root is watched and every change is
//! classified into one of three triggers:
//!
//! | Trigger | Default globs | Handler |
//! |---------|---------------|---------|
//! | style source | `dev/sass/**/*.scss` | prepare tools + compiler |
//! | compiled asset | `dev/assets/css/**/*.css` | dev copy rules, then reload |
//! | content | `dev/**/*.html`, `_posts/**`, `_config.yml` | dev site build, then reload |
//!
//! A style change therefore reloads the browser in two hops: the compiler
//! writes a stylesheet, which is itself a compiled-asset change.
//!
//! Changes are debounced: once the tree has been quiet for the configured
//! window, the triggers seen since the last run are executed in the order
//! they first arrived, each at most once, each to completion. A failing
//! handler is reported and the loop keeps watching. Reload notification is
//! fire-and-forget.

use crate::assemble::{self, AssembleError, compile_patterns, matches_any, slash_path};
use crate::config::{DevelopConfig, Project};
use crate::tools::{ToolError, Toolchain};
use glob::Pattern;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

/// How long one poll of the event channel blocks.
const POLL_MS: u64 = 50;

#[derive(Error, Debug)]
pub enum DevelopError {
    #[error("Tool failed: {0}")]
    Tool(#[from] ToolError),
    #[error("Copy failed: {0}")]
    Assemble(#[from] AssembleError),
    #[error("Invalid watch glob: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// What a change means for the dev site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    StyleSource,
    CompiledAsset,
    Content,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::StyleSource => write!(f, "style source"),
            Trigger::CompiledAsset => write!(f, "compiled asset"),
            Trigger::Content => write!(f, "content"),
        }
    }
}

/// Compiled trigger globs.
#[derive(Debug, Clone)]
pub struct TriggerSet {
    style_sources: Vec<Pattern>,
    compiled_assets: Vec<Pattern>,
    content: Vec<Pattern>,
}

impl TriggerSet {
    pub fn new(config: &DevelopConfig) -> Result<Self, glob::PatternError> {
        Ok(Self {
            style_sources: compile_patterns(&config.style_sources)?,
            compiled_assets: compile_patterns(&config.compiled_assets)?,
            content: compile_patterns(&config.content)?,
        })
    }

    /// Classify a `/`-separated path relative to the project root.
    pub fn classify(&self, relative: &str) -> Option<Trigger> {
        if matches_any(&self.style_sources, relative) {
            Some(Trigger::StyleSource)
        } else if matches_any(&self.compiled_assets, relative) {
            Some(Trigger::CompiledAsset)
        } else if matches_any(&self.content, relative) {
            Some(Trigger::Content)
        } else {
            None
        }
    }
}

/// Progress notifications from the watch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum DevelopEvent {
    Watching { root: PathBuf },
    Changed { path: String, trigger: Trigger },
    Running(Trigger),
    Finished(Trigger),
    Failed { trigger: Trigger, message: String },
    ReloadFailed { message: String },
    Shutdown,
}

/// Triggers waiting for a quiet period.
///
/// Keeps first-arrival order and drops repeats until taken.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Vec<Trigger>,
    last_change: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Vec::new(),
            last_change: None,
        }
    }

    pub fn add(&mut self, trigger: Trigger, now: Instant) {
        if !self.pending.contains(&trigger) {
            self.pending.push(trigger);
        }
        self.last_change = Some(now);
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last_change {
            Some(last) => {
                !self.pending.is_empty() && now.saturating_duration_since(last) >= self.window
            }
            None => false,
        }
    }

    pub fn take(&mut self) -> Vec<Trigger> {
        self.last_change = None;
        std::mem::take(&mut self.pending)
    }
}

/// A project and its tools, ready to build the dev site.
pub struct DevSession<'a> {
    project: &'a Project,
    tools: &'a Toolchain,
    triggers: TriggerSet,
}

impl<'a> DevSession<'a> {
    pub fn new(project: &'a Project, tools: &'a Toolchain) -> Result<Self, DevelopError> {
        Ok(Self {
            project,
            tools,
            triggers: TriggerSet::new(&project.config.develop)?,
        })
    }

    /// Compile styles and build the dev site once. Failures here are fatal.
    pub fn initial_build(&self) -> Result<(), DevelopError> {
        self.tools.compile()?;
        self.build_site()?;
        Ok(())
    }

    fn build_site(&self) -> Result<(), ToolError> {
        let config = self.project.config.develop.generator_config.as_deref();
        self.tools.generator.invoke(config.map(Path::new))
    }

    /// Run the handler for one trigger. Does not reload.
    pub fn handle(&self, trigger: Trigger) -> Result<(), DevelopError> {
        match trigger {
            Trigger::StyleSource => self.tools.compile()?,
            Trigger::CompiledAsset => {
                assemble::assemble(&self.project.root, &self.project.config.develop.copy)?;
            }
            Trigger::Content => self.build_site()?,
        }
        Ok(())
    }

    /// Whether a successful run of `trigger` should refresh the browser.
    pub fn reloads_after(trigger: Trigger) -> bool {
        !matches!(trigger, Trigger::StyleSource)
    }

    /// Ask the live-reload tool to refresh. Failures are only reported.
    pub fn reload(&self, callback: &impl Fn(DevelopEvent)) {
        if let Some(reload) = &self.tools.reload {
            if let Err(e) = reload.invoke(None) {
                warn!(error = %e, "live reload failed");
                callback(DevelopEvent::ReloadFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Run queued triggers in order. A failure is reported and the
    /// remaining triggers still run.
    pub fn run_triggers(&self, triggers: &[Trigger], callback: &impl Fn(DevelopEvent)) {
        for &trigger in triggers {
            callback(DevelopEvent::Running(trigger));
            match self.handle(trigger) {
                Ok(()) => {
                    callback(DevelopEvent::Finished(trigger));
                    if Self::reloads_after(trigger) {
                        self.reload(callback);
                    }
                }
                Err(e) => {
                    error!(trigger = %trigger, error = %e, "handler failed");
                    callback(DevelopEvent::Failed {
                        trigger,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Classify an absolute event path.
    fn classify_path(&self, path: &Path) -> Option<(String, Trigger)> {
        let relative = path.strip_prefix(&self.project.root).ok()?;
        let relative = slash_path(relative);
        self.triggers
            .classify(&relative)
            .map(|trigger| (relative, trigger))
    }
}

/// Watch the project root until `running` is cleared.
///
/// The notify callback only forwards paths; handlers run on this thread.
pub fn watch(
    session: &DevSession<'_>,
    running: Arc<AtomicBool>,
    callback: impl Fn(DevelopEvent),
) -> Result<(), DevelopError> {
    let root = session.project.root.clone();
    let (tx, rx) = channel();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) if !event.kind.is_access() => {
                for path in event.paths {
                    let _ = tx.send(path);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    // notify reports canonical paths on some platforms
    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.clone());

    callback(DevelopEvent::Watching { root: root.clone() });

    let window = Duration::from_millis(session.project.config.develop.debounce_ms);
    let mut debouncer = Debouncer::new(window);

    while running.load(Ordering::SeqCst) {
        if let Ok(path) = rx.recv_timeout(Duration::from_millis(POLL_MS)) {
            let path = match path.strip_prefix(&canonical_root) {
                Ok(rel) => root.join(rel),
                Err(_) => path,
            };
            if let Some((relative, trigger)) = session.classify_path(&path) {
                debug!(path = %relative, trigger = %trigger, "change");
                callback(DevelopEvent::Changed {
                    path: relative,
                    trigger,
                });
                debouncer.add(trigger, Instant::now());
            }
        }

        if debouncer.ready(Instant::now()) {
            let triggers = debouncer.take();
            session.run_triggers(&triggers, &callback);
        }
    }

    callback(DevelopEvent::Shutdown);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::setup_site;
    use crate::tools::tests::{MockTool, entries, mock_toolchain, new_log};
    use std::cell::RefCell;

    fn triggers() -> TriggerSet {
        TriggerSet::new(&DevelopConfig::default()).unwrap()
    }

    #[test]
    fn classify_default_globs() {
        let t = triggers();
        assert_eq!(t.classify("dev/sass/main.scss"), Some(Trigger::StyleSource));
        assert_eq!(
            t.classify("dev/sass/modules/_icons.scss"),
            Some(Trigger::StyleSource)
        );
        assert_eq!(
            t.classify("dev/assets/css/main.css"),
            Some(Trigger::CompiledAsset)
        );
        assert_eq!(t.classify("dev/_layouts/default.html"), Some(Trigger::Content));
        assert_eq!(t.classify("dev/index.html"), Some(Trigger::Content));
        assert_eq!(t.classify("_posts/2024-03-02-hello.md"), Some(Trigger::Content));
        assert_eq!(t.classify("_config.yml"), Some(Trigger::Content));
    }

    #[test]
    fn generated_output_is_ignored() {
        let t = triggers();
        assert_eq!(t.classify("_site.dev/index.html"), None);
        assert_eq!(t.classify("_site.dev/assets/css/main.css"), None);
        assert_eq!(t.classify("_config.dev.yml"), None);
    }

    #[test]
    fn debouncer_waits_for_quiet_window() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(100));
        assert!(!d.ready(start));

        d.add(Trigger::Content, start);
        assert!(!d.ready(start + Duration::from_millis(50)));
        assert!(d.ready(start + Duration::from_millis(100)));
    }

    #[test]
    fn debouncer_restarts_window_on_each_change() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(100));
        d.add(Trigger::Content, start);
        d.add(Trigger::Content, start + Duration::from_millis(80));
        assert!(!d.ready(start + Duration::from_millis(150)));
        assert!(d.ready(start + Duration::from_millis(180)));
    }

    #[test]
    fn debouncer_dedups_in_first_arrival_order() {
        let now = Instant::now();
        let mut d = Debouncer::new(Duration::ZERO);
        d.add(Trigger::Content, now);
        d.add(Trigger::StyleSource, now);
        d.add(Trigger::Content, now);
        d.add(Trigger::CompiledAsset, now);

        assert_eq!(
            d.take(),
            vec![Trigger::Content, Trigger::StyleSource, Trigger::CompiledAsset]
        );
        assert!(!d.ready(now));
    }

    #[test]
    fn initial_build_compiles_then_builds_with_dev_config() {
        let (_tmp, project) = setup_site();
        let log = new_log();
        let tools = mock_toolchain(&log);
        let session = DevSession::new(&project, &tools).unwrap();

        session.initial_build().unwrap();
        assert_eq!(
            entries(&log),
            vec!["compiler()", "generator(_config.dev.yml)"]
        );
    }

    #[test]
    fn initial_build_failure_is_fatal() {
        let (_tmp, project) = setup_site();
        let log = new_log();
        let mut tools = mock_toolchain(&log);
        tools.compiler = Box::new(MockTool::new("compiler", &log).failing(1));
        let session = DevSession::new(&project, &tools).unwrap();

        assert!(session.initial_build().is_err());
        assert_eq!(entries(&log), vec!["compiler()"]);
    }

    #[test]
    fn style_change_compiles_without_reload() {
        let (_tmp, project) = setup_site();
        let log = new_log();
        let tools = mock_toolchain(&log);
        let session = DevSession::new(&project, &tools).unwrap();

        session.run_triggers(&[Trigger::StyleSource], &|_| {});
        assert_eq!(entries(&log), vec!["compiler()"]);
    }

    #[test]
    fn compiled_asset_change_copies_then_reloads() {
        let (tmp, project) = setup_site();
        let log = new_log();
        let tools = mock_toolchain(&log);
        let session = DevSession::new(&project, &tools).unwrap();

        session.run_triggers(&[Trigger::CompiledAsset], &|_| {});

        assert!(tmp.path().join("_site.dev/assets/css/main.css").is_file());
        assert_eq!(entries(&log), vec!["reload()"]);
    }

    #[test]
    fn content_change_rebuilds_then_reloads() {
        let (_tmp, project) = setup_site();
        let log = new_log();
        let tools = mock_toolchain(&log);
        let session = DevSession::new(&project, &tools).unwrap();

        session.run_triggers(&[Trigger::Content], &|_| {});
        assert_eq!(
            entries(&log),
            vec!["generator(_config.dev.yml)", "reload()"]
        );
    }

    #[test]
    fn failing_handler_does_not_stop_later_triggers() {
        let (_tmp, project) = setup_site();
        let log = new_log();
        let mut tools = mock_toolchain(&log);
        tools.compiler = Box::new(MockTool::new("compiler", &log).failing(1));
        let session = DevSession::new(&project, &tools).unwrap();
        let events = RefCell::new(Vec::new());

        session.run_triggers(&[Trigger::StyleSource, Trigger::Content], &|e| {
            events.borrow_mut().push(e)
        });

        assert_eq!(
            entries(&log),
            vec!["compiler()", "generator(_config.dev.yml)", "reload()"]
        );
        let events = events.into_inner();
        assert!(matches!(
            events[1],
            DevelopEvent::Failed {
                trigger: Trigger::StyleSource,
                ..
            }
        ));
        assert_eq!(events.last(), Some(&DevelopEvent::Finished(Trigger::Content)));
    }

    #[test]
    fn reload_failure_is_reported_not_fatal() {
        let (_tmp, project) = setup_site();
        let log = new_log();
        let mut tools = mock_toolchain(&log);
        tools.reload = Some(Box::new(MockTool::new("reload", &log).failing(7)));
        let session = DevSession::new(&project, &tools).unwrap();
        let events = RefCell::new(Vec::new());

        session.run_triggers(&[Trigger::Content, Trigger::Content], &|e| {
            events.borrow_mut().push(e)
        });

        let failures = events
            .borrow()
            .iter()
            .filter(|e| matches!(e, DevelopEvent::ReloadFailed { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn no_reload_tool_is_fine() {
        let (_tmp, project) = setup_site();
        let log = new_log();
        let mut tools = mock_toolchain(&log);
        tools.reload = None;
        let session = DevSession::new(&project, &tools).unwrap();

        session.run_triggers(&[Trigger::Content], &|_| {});
        assert_eq!(entries(&log), vec!["generator(_config.dev.yml)"]);
    }

    #[test]
    fn classify_path_strips_project_root() {
        let (tmp, project) = setup_site();
        let log = new_log();
        let tools = mock_toolchain(&log);
        let session = DevSession::new(&project, &tools).unwrap();

        assert_eq!(
            session.classify_path(&tmp.path().join("dev/sass/main.scss")),
            Some(("dev/sass/main.scss".to_string(), Trigger::StyleSource))
        );
        assert_eq!(session.classify_path(Path::new("/elsewhere/x.scss")), None);
    }
}
