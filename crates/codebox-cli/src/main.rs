//! Codebox CLI
//!
//! A command-line tool for running untrusted code in isolated containers.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codebox::{
    Config, Dispatcher, DockerCli, EXAMPLE_CONFIG, ExecuteResponse, ExecutionRequest, Executor,
    LanguageRegistry, Outcome,
};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for a rejected request body
const EXIT_INVALID_REQUEST: i32 = 2;

#[derive(Parser)]
#[command(name = "codebox")]
#[command(about = "Run untrusted code in network-isolated containers")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: codebox.toml)
        #[arg(short, long, default_value = "codebox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a source file and print its output
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., python, javascript, ruby)
        #[arg(short, long)]
        language: String,

        /// Wall time limit in seconds
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Memory limit in MB
        #[arg(short, long)]
        memory_limit: Option<u64>,
    },

    /// Read a JSON request from stdin and write the JSON response to stdout
    Execute,

    /// List available languages
    Languages,

    /// Show effective configuration
    ShowConfig,

    /// Remove containers left behind by a crashed run
    Reap,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // stdout carries program output and JSON responses
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using default configuration");
    }
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            time_limit,
            memory_limit,
        } => {
            if let Some(seconds) = time_limit {
                config.default_limits.wall_time_limit = Some(seconds);
                config.dispatcher.wait_timeout = config.dispatcher.wait_timeout.max(seconds + 10.0);
            }
            if let Some(mb) = memory_limit {
                config.default_limits.memory_limit = Some(mb);
            }
            config
                .validate()
                .context("invalid --time-limit or --memory-limit")?;
            run_file(&config, &source, &language).await
        }
        Commands::Execute => execute_stdin(&config).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Reap => reap(&config).await,
    }
}

/// Build the executor, clear orphans from an earlier crash, and start the workers
async fn start_dispatcher(config: &Config) -> Dispatcher {
    let backend = Arc::new(DockerCli::new(config.docker_binary()));
    let executor = Arc::new(Executor::new(backend, config));

    if let Err(e) = executor.reap_orphans().await {
        warn!(error = %e, "could not check for orphaned containers");
    }

    Dispatcher::start(
        executor,
        LanguageRegistry::from_config(config),
        &config.dispatcher,
    )
}

async fn run_file(config: &Config, source: &Path, language: &str) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;
    let request = ExecutionRequest::new(code, language).context("invalid request")?;

    let dispatcher = start_dispatcher(config).await;
    info!(language = %request.language(), "running program");
    let result = dispatcher.submit(request).await;
    dispatcher.shutdown().await;

    print!("{}", result.output);

    // Log execution info via tracing (stderr), keeping stdout clean for piping
    info!(
        outcome = %result.outcome,
        exit_code = result.exit_code,
        duration = format_args!("{:.3}s", result.duration.as_secs_f64()),
        "execution result"
    );

    match result.outcome {
        Outcome::Succeeded | Outcome::UnsupportedLanguage => Ok(()),
        _ => std::process::exit(result.exit_code.unwrap_or(1)),
    }
}

async fn execute_stdin(config: &Config) -> Result<()> {
    let mut body = String::new();
    std::io::stdin()
        .read_to_string(&mut body)
        .context("failed to read request from stdin")?;

    let request = match ExecutionRequest::from_json(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejected request");
            println!("{}", e.to_json());
            std::process::exit(EXIT_INVALID_REQUEST);
        }
    };

    let dispatcher = start_dispatcher(config).await;
    let result = dispatcher.submit(request).await;
    dispatcher.shutdown().await;

    info!(
        outcome = %result.outcome,
        task_id = ?result.task_id,
        duration = format_args!("{:.3}s", result.duration.as_secs_f64()),
        "execution result"
    );

    let response = ExecuteResponse::from(result);
    println!(
        "{}",
        serde_json::to_string(&response).context("failed to encode response")?
    );
    Ok(())
}

async fn reap(config: &Config) -> Result<()> {
    let backend = Arc::new(DockerCli::new(config.docker_binary()));
    let executor = Executor::new(backend, config);

    let removed = executor
        .reap_orphans()
        .await
        .context("failed to remove orphaned containers")?;

    println!("Removed {removed} container(s)");
    Ok(())
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let registry = LanguageRegistry::from_config(config);
    for id in registry.ids() {
        if let Ok(lang) = registry.lookup(id) {
            println!("  {:<15} {} ({})", id, lang.name, lang.image);
        }
    }
}

fn show_config(config: &Config) {
    let limits = &config.default_limits;
    println!("Default resource limits:");
    println!("  Memory limit: {:?} MB", limits.memory_limit);
    println!("  CPU limit: {:?} cores", limits.cpu_limit);
    println!("  Max processes: {:?}", limits.max_processes);
    println!("  Wall time limit: {:?} s", limits.wall_time_limit);
    println!();
    println!("Dispatcher:");
    println!("  Workers: {}", config.dispatcher.workers);
    println!("  Queue capacity: {}", config.dispatcher.queue_capacity);
    println!("  Wait timeout: {} s", config.dispatcher.wait_timeout);
    println!();
    println!("Docker binary: {}", config.docker_binary().display());
    println!("Container prefix: {}", config.container_prefix);
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
