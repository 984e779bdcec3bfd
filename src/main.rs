use clap::{Parser, Subcommand};
use sitepipe::config::{self, Project};
use sitepipe::develop::{self, DevSession};
use sitepipe::logging::{self, LoggingConfig};
use sitepipe::output;
use sitepipe::pipeline::{self, Pipeline, StageEvent};
use sitepipe::tools::{ShellTool, Toolchain};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser)]
#[command(name = "sitepipe")]
#[command(about = "Release and development pipeline for Jekyll-style sites")]
#[command(long_about = "\
Release and development pipeline for Jekyll-style sites

Sources live under dev/. A release copies them into place, combines the
assets named in each <!-- build:css|js <output> --> block, fingerprints the
result, points the templates at the fingerprinted files and runs the site
generator.

Project structure (stock profile):

  sitepipe.toml                 # Layout profile (optional)
  _config.yml                   # Generator config for releases
  _config.dev.yml               # Generator config for development
  _posts/
  dev/
  ├── sass/                     # Style sources → compiler
  ├── assets/css/main.css       # Compiled styles
  ├── _layouts/default.html     # Templates with build blocks
  └── index.html

Release stages:
  compile → clean → assemble → extract → combine → revision → rewrite → generate

Run 'sitepipe gen-config' to generate a documented sitepipe.toml.")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Project root
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Layout profile [default: <root>/sitepipe.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when SITEPIPE_LOG / RUST_LOG are unset
    #[arg(
        long,
        default_value = "info",
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the dev site, serve it, and rebuild on change
    Develop,
    /// Run the release pipeline
    Release,
    /// Verify reference blocks in the source templates without building
    Check,
    /// Print a stock sitepipe.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = logging::parse_level(&cli.log_level).unwrap_or(tracing::Level::INFO);
    logging::init_logging(LoggingConfig::with_level(level));

    match cli.command {
        Command::Develop => {
            let project = Project::load(&cli.root, cli.config.as_deref())?;
            let tools = Toolchain::from_project(&project);
            let session = DevSession::new(&project, &tools)?;

            println!("==> Building dev site");
            session.initial_build()?;

            let mut server = match &project.config.tools.server {
                Some(spec) => {
                    let tool = ShellTool::new(spec.clone(), &project.root);
                    println!("==> Serving with {}", spec.display_name());
                    Some(tool.spawn()?)
                }
                None => None,
            };

            let running = Arc::new(AtomicBool::new(true));
            let handler_flag = Arc::clone(&running);
            ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

            let result = develop::watch(&session, running, |event| {
                output::print_develop_event(&event)
            });

            if let Some(child) = server.as_mut() {
                // The server may already have exited on the same Ctrl+C
                let _ = child.kill();
                let _ = child.wait();
            }
            result?;
        }
        Command::Release => {
            let project = Project::load(&cli.root, cli.config.as_deref())?;
            init_thread_pool(&project.config.processing);
            let tools = Toolchain::from_project(&project);

            let mut pipeline = Pipeline::new(&project, &tools);
            pipeline.run(|event| match event {
                StageEvent::Started(stage) => output::print_stage_header(stage),
                StageEvent::Finished(stage, ctx) => output::print_stage_result(stage, ctx),
            })?;
            output::print_release_summary(pipeline.context());
        }
        Command::Check => {
            let project = Project::load(&cli.root, cli.config.as_deref())?;
            println!("==> Checking {}", project.root.display());
            let report = pipeline::check(&project)?;
            output::print_check_output(&report, &project.root);
            if !report.is_ok() {
                return Err(format!("{} block input(s) missing", report.missing.len()).into());
            }
            println!("==> Templates are valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores. User can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
