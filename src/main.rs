mod architecture;
mod budget;
mod changes;
mod config;
mod discovery;
mod errors;
mod git;
mod host;
mod issue;
mod llm;
mod pipeline;
mod project;
mod prompt;
mod repo;
mod report;
mod retry;
mod source;
#[cfg(test)]
mod testing;
mod triage;
mod validation;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info, info_span};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, ConfigError};
use crate::git::GitCli;
use crate::host::{CodeHost, GitHubHost, OfflineHost};
use crate::issue::{Issue, IssueSource};
use crate::llm::HttpGenerator;
use crate::pipeline::{Collaborators, Pipeline};
use crate::report::ArtifactWriter;
use crate::validation::ShellRunner;

/// Issue autofix: triages a GitHub issue, and when the risk gate allows it,
/// plans, applies, validates and commits a fix on its own branch.
#[derive(Parser, Debug)]
#[command(name = "autofix", version, about)]
struct Cli {
    /// GitHub issue URL (https://github.com/org/repo/issues/42) or a JSON
    /// issue file. Not required when --mock is used.
    issue: Option<String>,

    /// Repository working copy to fix
    #[arg(long, default_value = ".")]
    repo_dir: PathBuf,

    /// Configuration file (defaults to .autofix.toml in the repository)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after triage and its comment
    #[arg(long)]
    triage_only: bool,

    /// Record comments and pull requests locally instead of calling GitHub
    #[arg(long)]
    offline: bool,

    /// Directory for triage, plan and commit artifacts
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Triage a built-in sample issue offline (no GitHub token needed)
    #[arg(long)]
    r#mock: bool,
}

/// The code host for this run and, when it is offline, a handle to read
/// back what it recorded.
enum Host {
    GitHub(GitHubHost),
    Offline(OfflineHost),
}

impl Host {
    fn as_dyn(&self) -> &dyn CodeHost {
        match self {
            Host::GitHub(host) => host,
            Host::Offline(host) => host,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether the run ended without an error.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    info!("loading configuration");
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(&cli.repo_dir)?,
    };

    let (issue, host) = if cli.r#mock {
        info!("using the built-in sample issue");
        let issue: Issue = serde_json::from_str(include_str!("../tests/fixtures/sample_issue.json"))?;
        (issue.clone(), Host::Offline(OfflineHost::new(Some(issue))))
    } else {
        let arg = cli.issue.as_deref().ok_or(
            "An issue URL or file is required unless --mock is used. Usage: autofix <URL|FILE> or autofix --mock",
        )?;
        resolve_issue(arg, &config, cli.offline).await?
    };
    let triage_only = cli.triage_only || cli.r#mock;

    let _main_span = info_span!("autofix", issue = issue.id).entered();
    debug!(title = %issue.title, labels = ?issue.labels, "resolved issue");

    let generator = HttpGenerator::new(&config.llm, config.pipeline.retry_policy());
    let vcs = GitCli::new(
        cli.repo_dir.clone(),
        Duration::from_secs(config.pipeline.call_timeout_secs),
    );
    let runner = ShellRunner;
    let artifacts_dir = cli
        .artifacts
        .clone()
        .or_else(|| config.pipeline.artifacts_dir.as_ref().map(PathBuf::from));

    let pipeline = Pipeline::new(
        &config,
        cli.repo_dir.clone(),
        Collaborators {
            host: host.as_dyn(),
            generator: &generator,
            vcs: &vcs,
            runner: &runner,
        },
    )?
    .with_artifacts(ArtifactWriter::new(artifacts_dir))
    .triage_only(triage_only);

    let report = pipeline.run(&issue).await;
    report::print_summary(&report);
    if let Host::Offline(offline) = &host {
        report::print_host_actions(&offline.actions());
    }
    info!(status = %report.status, "done");
    Ok(report.succeeded())
}

/// Load the issue and pick the host to talk to.
async fn resolve_issue(
    arg: &str,
    config: &Config,
    offline: bool,
) -> Result<(Issue, Host), Box<dyn std::error::Error>> {
    match issue::parse_source(arg)? {
        IssueSource::Url(url) => {
            debug!(owner = %url.owner, repo = %url.repo, issue = url.number, "parsed issue URL");
            let host = GitHubHost::new(
                &config.github.api_url,
                &url.owner,
                &url.repo,
                config.github_token()?,
                config.pipeline.retry_policy(),
            );
            info!("fetching issue from GitHub");
            let issue = host.fetch_issue(url.number).await?;
            if offline {
                Ok((issue.clone(), Host::Offline(OfflineHost::new(Some(issue)))))
            } else {
                Ok((issue, Host::GitHub(host)))
            }
        }
        IssueSource::File(path) => {
            let issue = issue::load_issue_file(&path)?;
            if offline {
                return Ok((issue.clone(), Host::Offline(OfflineHost::new(Some(issue)))));
            }
            let (Some(owner), Some(repo)) = (&config.github.owner, &config.github.repo) else {
                return Err(ConfigError::Invalid(
                    "github.owner and github.repo are required for issue files unless --offline is used"
                        .to_string(),
                )
                .into());
            };
            let host = GitHubHost::new(
                &config.github.api_url,
                owner,
                repo,
                config.github_token()?,
                config.pipeline.retry_policy(),
            );
            Ok((issue, Host::GitHub(host)))
        }
    }
}
