use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devstack_config::Settings;
use devstack_core::{
    Engine, FunctionRegistry, Hook, Interrupt, LifecycleManager, Project, RunOptions,
    StaticPrompter, run_until_interrupted,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "devstack")]
#[command(about = "Devstack - local multi-service development environments")]
#[command(version)]
struct Cli {
    /// Project root
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// More output (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Run idempotent steps even when already applied
    #[arg(long, global = true)]
    force: bool,

    /// Answer a task question up front (repeatable)
    #[arg(long = "answer", value_name = "NAME=VALUE", global = true, value_parser = parse_answer)]
    answers: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run a pipeline and everything it depends on
    Run {
        /// Module name
        module: String,
        /// Pipeline name
        pipeline: String,
    },

    /// Run a single task and everything it depends on
    Task {
        /// Module name
        module: String,
        /// Task name
        task: String,
    },

    /// Apply pending migrations
    Migrate {
        /// Module name
        module: String,
        /// Only list pending migrations
        #[arg(short, long)]
        list: bool,
    },

    /// Start a module's services, or one of them
    Start {
        /// Module name
        module: String,
        /// Service to start (empty means all)
        service: Option<String>,
    },

    /// Stop a module's services, or one of them
    Stop {
        /// Module name
        module: String,
        /// Service to stop (empty means all)
        service: Option<String>,
    },

    /// Restart one service
    Restart {
        /// Module name
        module: String,
        /// Service name
        service: String,
    },

    /// Show service status
    Status {
        /// Only this module
        module: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print a module's recorded state
    State {
        /// Module name
        module: String,
    },

    /// Forget a module's recorded state
    Reset {
        /// Module name
        module: String,
    },
}

fn parse_answer(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let result = Interrupt::install()
        .context("Failed to install signal handlers")
        .and_then(|interrupt| smol::block_on(run(cli, interrupt)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<devstack_core::Error>() {
        Some(devstack_core::Error::Interrupted) => 130,
        _ => 1,
    }
}

async fn run(cli: Cli, interrupt: Interrupt) -> Result<()> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Project root {} not found", cli.root.display()))?;

    let settings = Settings::load(&root).context("Failed to load settings")?;
    let lifecycle = Arc::new(LifecycleManager::from_settings(&root, &settings));
    let project = Project::discover(&root, settings, &FunctionRegistry::new()).await?;

    let prompter = cli
        .answers
        .into_iter()
        .fold(StaticPrompter::new(), |prompter, (name, value)| {
            prompter.with_answer(name, value)
        });
    let mut engine = Engine::new(project, Arc::clone(&lifecycle))
        .with_prompter(Arc::new(prompter))
        .with_options(RunOptions { force: cli.force });

    let result = run_until_interrupted(&interrupt, &lifecycle, async {
        let modules: Vec<String> = engine.graph().modules().map(|m| m.name.clone()).collect();
        for hook in [Hook::OnInit, Hook::OnCliInit] {
            for module in &modules {
                engine.run_hook(module, hook).await?;
            }
        }
        commands::dispatch(&mut engine, cli.command).await
    })
    .await;

    lifecycle.shutdown().await?;
    Ok(result?)
}
