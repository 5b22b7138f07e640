use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use forkwarden::github::auth_setup;
use forkwarden::health::{self, CheckResult};
use forkwarden::logging::init_logging;
use forkwarden::summary;
use forkwarden::sync::default_run_id;
use forkwarden::{
    BranchPolicy, Config, GitHubClient, HealthCheck, Redactor, RunOptions, StartupValues,
    SyncEngine,
};

#[derive(Parser)]
#[command(name = "forkwarden")]
#[command(about = "Keeps an organisation's forks tracking their upstreams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every fork in the organisation
    Sync {
        /// Organisation to process (overrides target.org)
        #[arg(long)]
        org: Option<String>,

        /// Process only this repository
        #[arg(long)]
        repo: Option<String>,

        /// Append the markdown summary to this file instead of printing it
        #[arg(long, env = "GITHUB_STEP_SUMMARY")]
        summary_path: Option<PathBuf>,

        /// Ignore and do not update the metadata cache
        #[arg(long)]
        no_cache: bool,

        /// Identifier used in issue comments and the summary
        #[arg(long)]
        run_id: Option<String>,
    },

    /// List the forks a sync would process
    List {
        #[arg(long)]
        org: Option<String>,

        #[arg(long)]
        repo: Option<String>,
    },

    /// Validate the branch policy and print the resolved plan
    Policy {
        /// Policy file (overrides policy.path)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Preflight checks and diagnostics
    Doctor,

    /// Manage authentication
    Auth {
        #[command(subcommand)]
        auth_command: AuthCommands,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Show authentication status and remaining quota
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let redactor = Redactor::new(config.logging.redact.iter().cloned());
    init_logging(&config.logging, cli.verbose, redactor.clone())?;
    info!("Starting Forkwarden v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Sync {
            org,
            repo,
            summary_path,
            no_cache,
            run_id,
        } => {
            let config = config.with_target(org, repo);
            cmd_sync(config, redactor, summary_path, no_cache, run_id).await
        }
        Commands::List { org, repo } => cmd_list(config.with_target(org, repo), redactor).await,
        Commands::Policy { path } => cmd_policy(&config, path),
        Commands::Doctor => cmd_doctor(&config, redactor).await,
        Commands::Auth {
            auth_command: AuthCommands::Status,
        } => auth_setup::test_authentication(&config.github, redactor).await,
    }
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Resolve the policy's indirection keys once, at startup
fn load_policy(config: &Config, path: Option<&Path>) -> Result<BranchPolicy> {
    let values = StartupValues::from_process(config);
    let path = path.unwrap_or_else(|| Path::new(&config.policy.path));
    BranchPolicy::load(path, &values)
}

async fn cmd_sync(
    config: Config,
    redactor: Redactor,
    summary_path: Option<PathBuf>,
    no_cache: bool,
    run_id: Option<String>,
) -> Result<()> {
    let run_id = run_id
        .or_else(|| config.sync.run_id.clone())
        .unwrap_or_else(|| default_run_id(std::env::var("GITHUB_RUN_ID").ok()));

    let policy = load_policy(&config, None)?;
    let client = GitHubClient::from_config(&config.github, redactor)?;
    let org = config.target_org()?.to_string();

    let quota = health::preflight(&client, &org)
        .await
        .with_context(|| format!("Preflight failed for organisation {}", org))?;
    info!(
        "Preflight passed: {} reachable, {}/{} requests remaining",
        org, quota.remaining, quota.limit
    );

    let engine = SyncEngine::new(
        Arc::new(config),
        Arc::new(client),
        Arc::new(policy),
        RunOptions {
            run_id,
            use_cache: !no_cache,
        },
    );
    let run = engine.run_sync().await?;
    let markdown = summary::render(&run);

    match summary_path {
        Some(path) => {
            summary::append_to(&path, &markdown)?;
            info!("Summary written to {:?}", path);
        }
        None => print!("{}", markdown),
    }

    Ok(())
}

async fn cmd_list(config: Config, redactor: Redactor) -> Result<()> {
    let policy = load_policy(&config, None)?;
    let client = GitHubClient::from_config(&config.github, redactor)?;
    let engine = SyncEngine::new(
        Arc::new(config),
        Arc::new(client),
        Arc::new(policy),
        RunOptions {
            run_id: default_run_id(None),
            use_cache: false,
        },
    );

    let repositories = engine.discover().await?;
    println!("Forks ({}):", repositories.len());
    for repo in repositories {
        println!("  📁 {}", repo);
    }
    Ok(())
}

fn cmd_policy(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let policy = load_policy(config, path.as_deref())?;

    println!("✅ Branch policy valid");
    println!("   Prefix: {}", policy.prefix);
    println!("   Create order:");
    for (index, spec) in policy.order.iter().enumerate() {
        let seed = spec
            .role
            .seed_source()
            .map(|role| role.as_str())
            .unwrap_or("-");
        println!(
            "   {}. {} `{}` (track {}, seeded from {}, {})",
            index + 1,
            spec.role,
            spec.full_ref,
            spec.track,
            seed,
            if spec.update { "updated" } else { "create-once" }
        );
    }
    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config, redactor: Redactor) -> Result<()> {
    let policy = load_policy(config, None);

    let client = match GitHubClient::from_config(&config.github, redactor) {
        Ok(client) => client,
        Err(e) => {
            println!("❌ No usable GitHub token: {:#}", e);
            std::process::exit(1);
        }
    };

    let health = HealthCheck::run(&client, config, &policy).await;
    print_health_report(&health);
    if !health.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 Forkwarden Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
