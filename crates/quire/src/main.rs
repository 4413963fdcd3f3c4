//! Quire CLI - builds, previews, and publishes documentation sites.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quire_tasks::{TaskRegistry, TaskRunner};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;
mod tasks;

use config::{Environment, QuireConfig};
use tasks::Session;

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Build, preview, live-reload, and publish documentation sites")]
#[command(version)]
pub struct Cli {
    /// Task shortcut; runs the `default` task when omitted
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to quire.toml config file
    #[arg(short, long, default_value = "quire.toml", global = true)]
    config: PathBuf,

    /// Output environment
    #[arg(short, long, value_enum, default_value_t = Environment::Prod, global = true)]
    env: Environment,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not open the browser
    #[arg(long, global = true)]
    no_open: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run named tasks in order
    Run {
        /// Task names
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Build the documentation site (`build-docs`)
    Build,

    /// Build, serve, and live-reload on changes (`livereload`)
    Serve,

    /// Publish the production output (`deploy`)
    Deploy,

    /// List registered tasks
    Tasks,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let config = QuireConfig::load(&cli.config)?;
    let root = config::project_root(&cli.config);
    let session = Arc::new(Session::new(config, root, cli.env, !cli.no_open));

    let mut registry = TaskRegistry::new();
    tasks::register(&mut registry, &session)?;
    let runner = TaskRunner::new(registry.build()?);

    let names: Vec<String> = match cli.command {
        None => vec!["default".to_string()],
        Some(Commands::Run { tasks }) => tasks,
        Some(Commands::Build) => vec!["build-docs".to_string()],
        Some(Commands::Serve) => vec!["livereload".to_string()],
        Some(Commands::Deploy) => vec!["deploy".to_string()],
        Some(Commands::Tasks) => {
            commands::list::run(runner.graph());
            return Ok(());
        }
    };

    commands::run::run(&runner, &session, &names).await
}
