//! `autofix` command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use autofix::core::types::IssueId;
use autofix::error::{FailureReport, FixError};
use autofix::exit_codes;
use autofix::io::config::{AutofixConfig, CONFIG_FILE, ScaffoldMode, load_config, write_config};
use autofix::io::git::Git;
use autofix::io::github::GhCli;
use autofix::io::llm::{AnthropicClient, TextGenerator};
use autofix::io::test_runner::CommandTestRunner;
use autofix::logging;
use autofix::publish::PrStatus;
use autofix::run::{RunOptions, RunOutcome, Services, run_issue, run_scaffold};

#[derive(Parser)]
#[command(
    name = "autofix",
    version,
    about = "Fix a labelled issue: scaffold tests, patch until they pass, open a pull request"
)]
struct Cli {
    /// Repository checkout to work in.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/.autofix.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (ignored when `RUST_LOG` is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Repair one issue and publish the fix.
    Run {
        /// Issue to repair (default: first open issue with the trigger label).
        #[arg(long)]
        issue: Option<String>,
        /// Trigger label override.
        #[arg(long)]
        label: Option<String>,
        /// Scaffold and repair, but do not commit, push or open a pull request.
        #[arg(long)]
        dry_run: bool,
    },
    /// Create missing test files only.
    Scaffold,
    /// Write a default config file.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => report(&err),
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join(CONFIG_FILE));

    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Scaffold => {
            let cfg = load_config(&config_path)?;
            cmd_scaffold(&cli.root, &cfg)
        }
        Command::Run {
            issue,
            label,
            dry_run,
        } => {
            let cfg = load_config(&config_path)?;
            let options = RunOptions {
                issue: issue.as_deref().map(IssueId::parse).transpose()?,
                label,
                dry_run,
            };
            cmd_run(&cli.root, &cfg, &options)
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        return Err(FixError::config(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        ))
        .into());
    }
    write_config(config_path, &AutofixConfig::default())
        .with_context(|| format!("write {}", config_path.display()))?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_scaffold(root: &Path, cfg: &AutofixConfig) -> Result<i32> {
    let client = match cfg.scaffold.mode {
        ScaffoldMode::Model => Some(AnthropicClient::from_config(&cfg.model)?),
        ScaffoldMode::Template => None,
    };
    let generator = client.as_ref().map(|c| c as &dyn TextGenerator);
    let report = run_scaffold(root, cfg, generator)?;
    for path in &report.written {
        println!("wrote {path}");
    }
    println!(
        "{} test file(s) written, {} source file(s) already covered",
        report.written.len(),
        report.skipped.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, cfg: &AutofixConfig, options: &RunOptions) -> Result<i32> {
    let needs_model = cfg.model_attempts() > 0 || cfg.scaffold.mode == ScaffoldMode::Model;
    // Built up front: a missing key fails before any issue or network access.
    let client = if needs_model {
        Some(AnthropicClient::from_config(&cfg.model)?)
    } else {
        debug!("no model attempts planned, skipping model client");
        None
    };

    let gh = GhCli::new(root);
    let git = Git::new(root);
    let tests = CommandTestRunner;
    let services = Services {
        issues: &gh,
        prs: &gh,
        vcs: &git,
        tests: &tests,
        generator: client.as_ref().map(|c| c as &dyn TextGenerator),
    };

    match run_issue(root, cfg, options, &services)? {
        RunOutcome::NoIssuesFound { label } => {
            println!("no open issues labelled '{label}'");
        }
        RunOutcome::Succeeded {
            issue,
            passing_attempt,
            attempts,
            publish,
        } => {
            println!("issue #{issue}: tests pass after attempt {passing_attempt} of {attempts}");
            match publish {
                Some(outcome) => {
                    let (verb, pr) = match &outcome.pr {
                        PrStatus::Created(pr) => ("opened", pr),
                        PrStatus::Existing(pr) => ("already open", pr),
                    };
                    println!(
                        "branch {}: pull request #{} {verb}: {}",
                        outcome.branch, pr.number, pr.url
                    );
                }
                None => println!("dry run: nothing published"),
            }
        }
    }
    Ok(exit_codes::OK)
}

fn report(err: &anyhow::Error) -> i32 {
    let report = FailureReport::from_error(err);
    eprintln!("error: {}", report.message);
    if let Some(detail) = &report.detail {
        eprintln!("{detail}");
    }
    report.exit_code
}
