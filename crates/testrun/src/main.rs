//! CLI for managing ephemeral test infrastructure
//!
//! Run `testrun --help` for usage information.

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use testrun::commands::{
    run_create, run_delete, run_gc, CreateOptions, DeleteOptions, DeleteOutcome, GcOptions,
};
use testrun::config::parse_duration;
use testrun::repos::GitHubRepositoryReaper;
use testrun::{Clients, LabelSet, Lineage, Settings, SweepReport};

#[derive(Parser)]
#[command(name = "testrun")]
#[command(about = "Create, delete and garbage collect ephemeral test infrastructure")]
#[command(version)]
struct Cli {
    /// Settings file (YAML)
    #[arg(long, global = true, env = "TESTRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format: text, json
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a test resource, replacing earlier ones of the same lineage
    Create(CreateArgs),

    /// Garbage collect expired, flagged and superseded test resources
    Gc(GcArgs),

    /// Remove a test's cloud resources and mark its record for deletion
    #[command(visible_aliases = ["rm", "remove", "del"])]
    Delete(DeleteArgs),
}

#[derive(Args)]
struct CreateArgs {
    /// Template file of the resource to create
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Namespace (defaults to the current kube context's)
    #[arg(short = 'n', long = "ns")]
    namespace: Option<String>,

    /// Prefix of the generated resource name
    #[arg(long, default_value = "tf-")]
    prefix: String,

    #[arg(long, env = "REPO_OWNER")]
    owner: Option<String>,

    #[arg(long, env = "REPO_NAME")]
    repo: Option<String>,

    #[arg(long, env = "PULL_NUMBER")]
    pr: Option<u64>,

    /// Pipeline context, e.g. the cluster flavour under test
    #[arg(long, env = "PIPELINE_CONTEXT")]
    context: Option<String>,

    #[arg(long, env = "BUILD_NUMBER")]
    build: Option<String>,

    /// Regex of environment variables passed through to the resource
    #[arg(long, default_value = testrun::env::DEFAULT_ENV_PATTERN)]
    env_pattern: String,

    /// Extra NAME=VALUE variable for the resource (repeatable)
    #[arg(long = "env")]
    env: Vec<String>,

    /// Return after creating instead of waiting for the provisioning Job
    #[arg(long)]
    no_watch: bool,

    /// Keep the resource after its Job finishes
    #[arg(long)]
    no_delete: bool,

    /// Fail unless the provisioning Job succeeded
    #[arg(long)]
    verify_result: bool,

    /// Git URL of the test case, recorded on the resource for `delete`
    #[arg(long)]
    test_url: Option<String>,

    /// Log the resource before it is created
    #[arg(long)]
    log_resource: bool,
}

#[derive(Args)]
struct GcArgs {
    #[arg(short = 'n', long = "ns")]
    namespace: Option<String>,

    /// Label selector of the resources to consider
    #[arg(short = 'l', long)]
    selector: Option<String>,

    /// Maximum age of a resource, e.g. 2h or 90m
    #[arg(short, long, default_value = "2h")]
    duration: String,

    /// Name prefix of the versions ConfigMaps to clean up
    #[arg(short = 't', long)]
    tf_cm_prefix: Option<String>,

    /// Token used to delete old repositories
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Organisation whose test repositories are cleaned up
    #[arg(long)]
    github_org: Option<String>,
}

#[derive(Args)]
struct DeleteArgs {
    #[arg(short = 'n', long = "ns")]
    namespace: Option<String>,

    /// Git URL of the test case whose resources are removed
    #[arg(short = 'u', long)]
    test_url: Option<String>,

    /// Existing checkout of the test case (cloned when omitted)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Removal script inside the test repository
    #[arg(short, long)]
    script: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }

    let settings = Settings::load(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current operation");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Create(args) => create(args, &settings, &cancel).await,
        Commands::Gc(args) => gc(args, &settings, &cancel).await,
        Commands::Delete(args) => delete(args, &settings, &cancel).await,
    }
}

async fn clients(namespace: Option<String>, settings: &Settings) -> Result<Clients> {
    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let namespace = namespace
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| client.default_namespace().to_string());
    Ok(Clients::kubernetes(client, &namespace, settings))
}

async fn create(args: CreateArgs, settings: &Settings, cancel: &CancellationToken) -> Result<()> {
    let options = CreateOptions {
        file: args.file,
        prefix: args.prefix,
        lineage: Lineage {
            owner: args.owner,
            repo: args.repo,
            pull_request: args.pr,
            context: args.context,
            build_number: args.build,
        },
        env_pattern: args.env_pattern,
        env_overrides: args.env,
        watch: !args.no_watch,
        delete_after: !args.no_delete,
        verify_result: args.verify_result,
        test_url: args.test_url,
        log_resource: args.log_resource,
        watch_timeout: settings.watch_timeout()?.to_std()?,
    };
    options.validate()?;
    let clients = clients(args.namespace, settings).await?;
    let summary = run_create(&clients, settings, &options, std::env::vars(), cancel).await?;

    println!("{} {}", "Created".green().bold(), summary.name.cyan());
    for name in &summary.superseded {
        println!("  {} {}", "replaced".yellow(), name);
    }
    if summary.deleted {
        println!("  {} after the run", "deleted".yellow());
    }
    Ok(())
}

async fn gc(args: GcArgs, settings: &Settings, cancel: &CancellationToken) -> Result<()> {
    let options = GcOptions {
        selector: args.selector.as_deref().map(LabelSet::parse).transpose()?,
        ttl: parse_duration(&args.duration)?,
        config_map_prefix: args.tf_cm_prefix,
    };
    let mut clients = clients(args.namespace, settings).await?;
    match (args.github_token, args.github_org) {
        (Some(token), Some(org)) if !token.is_empty() && !org.is_empty() => {
            clients = clients.with_repositories(Arc::new(GitHubRepositoryReaper::new(&token, &org)?));
        }
        (_, Some(_)) => warn!("--github-org given without a token, not cleaning repositories"),
        _ => {}
    }

    let report = run_gc(&clients, settings, &options, Utc::now(), cancel).await?;
    print_summary(&report);
    report.into_result()?;
    Ok(())
}

async fn delete(args: DeleteArgs, settings: &Settings, cancel: &CancellationToken) -> Result<()> {
    let options = DeleteOptions {
        test_url: args.test_url,
        dir: args.dir,
        script: args.script,
    };
    options.validate()?;
    let clients = clients(args.namespace, settings).await?;
    match run_delete(&clients, settings, &options, cancel).await? {
        DeleteOutcome::Kept(name) => println!("{} {} is marked keep", "Skipped".yellow(), name.cyan()),
        DeleteOutcome::AlreadyMarked(name) => {
            println!("{} {} is already marked for deletion", "Skipped".yellow(), name.cyan());
        }
        DeleteOutcome::Marked(name) => {
            info!(name = %name, "Done");
            println!("{} {} for deletion", "Marked".green().bold(), name.cyan());
        }
    }
    Ok(())
}

fn print_summary(report: &SweepReport) {
    println!(
        "{} deleted {}, retained {}, failed {}",
        "GC".bold(),
        report.deleted.len().to_string().green(),
        report.retained.len(),
        report.failures.len().to_string().red()
    );
    for name in &report.deleted {
        println!("  {} {}", "deleted".green(), name);
    }
    for failure in &report.failures {
        println!("  {} {}: {}", "failed".red(), failure.target, failure.error);
    }
}
