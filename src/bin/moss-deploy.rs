// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use moss_deploy::{
    branch::{detect_branch, ensure_repository, DEFAULT_BRANCH},
    config::DeployConfig,
    git::{GitCli, GitPort},
    path::default_config_path,
    remote::{ensure_remote, pages_url},
    Deployer,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{path::PathBuf, process::exit, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "moss-deploy [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to repository to deploy from.
    #[arg(short = 'C', long = "repo", global = true, value_name = "path", default_value = ".")]
    pub repo: PathBuf,

    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => default_config_path()?,
        };
        let config = DeployConfig::load(config_path)?;
        let git = GitCli::open(&self.repo).with_timeouts(config.command_timeouts());

        match self.command {
            Command::Deploy(opts) => run_deploy(git, config, opts).await,
            Command::Status(opts) => run_status(git, config, opts).await,
            Command::Remote(opts) => run_remote(git, opts).await,
            Command::Branch => run_branch(git).await,
            Command::Init => run_init(git).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Deploy compiled site to GitHub Pages branch.
    #[command(override_usage = "moss-deploy deploy [options] <site_dir>")]
    Deploy(DeployOptions),

    /// Show what a deploy would change.
    #[command(override_usage = "moss-deploy status [options] <site_dir>")]
    Status(StatusOptions),

    /// Point remote at target URL.
    #[command(override_usage = "moss-deploy remote [options] <url>")]
    Remote(RemoteOptions),

    /// Show detected default branch.
    Branch,

    /// Initialize repository if there is none.
    Init,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployOptions {
    /// Directory holding compiled site.
    #[arg(required = true, value_name = "site_dir")]
    pub site_dir: PathBuf,

    /// Deploy even if nothing seems to have changed.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Directory holding compiled site.
    #[arg(required = true, value_name = "site_dir")]
    pub site_dir: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoteOptions {
    /// URL remote must point at.
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Name of remote.
    #[arg(short, long, value_name = "name", default_value = "origin")]
    pub name: String,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

async fn run_deploy(git: GitCli, config: DeployConfig, opts: DeployOptions) -> Result<()> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.green} {elapsed:.dim}  {msg}")?);
    bar.enable_steady_tick(Duration::from_millis(100));
    let deployer = Deployer::new(git, config).with_progress(bar.clone());

    if !opts.force && !deployer.needs_deploy(&opts.site_dir).await {
        bar.finish_and_clear();
        println!("nothing to deploy");
        return Ok(());
    }

    let outcome = deployer.deploy_to_gh_pages(&opts.site_dir).await?;
    if outcome.is_noop() {
        println!("no changes");
    } else {
        println!("{}", outcome.commit_sha);
    }

    outcome.cleanup.run().await;

    Ok(())
}

async fn run_status(git: GitCli, config: DeployConfig, opts: StatusOptions) -> Result<()> {
    let deployer = Deployer::new(git, config);
    let Some(changes) = deployer.pending_changes(&opts.site_dir).await else {
        warn!(
            "cannot compare {:?} against {}, a deploy would publish everything",
            opts.site_dir.display(),
            deployer.config().deploy.branch
        );
        return Ok(());
    };

    if !changes.has_changes() {
        println!("up to date");
        return Ok(());
    }

    let mut entries = changes
        .added
        .iter()
        .map(|path| (path, "added"))
        .chain(changes.modified.iter().map(|path| (path, "modified")))
        .chain(changes.deleted.iter().map(|path| (path, "deleted")))
        .collect::<Vec<_>>();
    entries.sort();
    for (path, kind) in entries {
        println!("{:<9} {path}", format!("{kind}:"));
    }

    Ok(())
}

async fn run_remote(git: GitCli, opts: RemoteOptions) -> Result<()> {
    let change = ensure_remote(&git, &opts.name, &opts.url).await?;
    println!("remote {}: {change}", opts.name);
    match pages_url(&opts.url) {
        Some(url) => println!("site will be served at {url}"),
        None => info!("{} is not a GitHub remote", opts.url),
    }

    Ok(())
}

async fn run_branch(git: GitCli) -> Result<()> {
    if !git.is_repository().await {
        return Err(anyhow!("{:?} is not a git repository", git.repo().display()));
    }

    println!("{}", detect_branch(&git).await?);

    Ok(())
}

async fn run_init(git: GitCli) -> Result<()> {
    if ensure_repository(&git, DEFAULT_BRANCH).await? {
        println!("initialized repository at {}", git.repo().display());
    } else {
        println!("repository already exists at {}", git.repo().display());
    }

    Ok(())
}
