//! One run for one issue: triage, gate, plan, apply, validate, commit, and
//! roll back when anything after branch creation fails.

use std::path::PathBuf;
use tokio::time::timeout;
use tracing::{info, info_span, instrument, warn, Instrument};

use crate::architecture::{ArchitectureValidator, RuleRegistry, Violation};
use crate::budget::TokenBudget;
use crate::changes::{ComputedChange, FileChangeHandler, HallucinationCheck};
use crate::config::{Config, ConfigError};
use crate::discovery::{DiscoveredFile, DiscoveryInput, FileDiscovery, GeneratorAssist};
use crate::errors::PipelineError;
use crate::git::{commit_message, BranchLease, CommitPipeline, RollbackReport, Vcs};
use crate::host::{CodeHost, PullRequestDraft};
use crate::issue::Issue;
use crate::llm::{GenerationParams, TextGenerator};
use crate::project::{ProjectAnalyzer, ProjectContext};
use crate::prompt::{parse_edit_plan, BuiltPrompt, EditPlan, PromptBuilder, PromptFile, PromptInput, Template};
use crate::repo::RepoTree;
use crate::report::{
    error_comment, held_for_review_comment, pull_request_body, triage_comment, ArtifactWriter,
    ErrorReport, PullRequestContent, RunArtifact, RunReport, RunStatus, COMMIT_ARTIFACT,
    PLAN_ARTIFACT, TRIAGE_ARTIFACT,
};
use crate::triage::{Decision, RiskLevel, SecurityGate, TriageResult, Triager};
use crate::validation::{CommandRunner, ValidationOutcome, ValidationRunner};

pub const AUTO_FIX_LABEL: &str = "auto-fix";
pub const NEEDS_REVIEW_LABEL: &str = "needs review";

/// External systems a run talks to.
pub struct Collaborators<'a> {
    pub host: &'a dyn CodeHost,
    pub generator: &'a dyn TextGenerator,
    pub vcs: &'a dyn Vcs,
    pub runner: &'a dyn CommandRunner,
}

/// Where a run was when it stopped; decides which artifact records a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    Triage,
    Plan,
    Commit,
}

impl Stage {
    fn artifact(self) -> &'static str {
        match self {
            Stage::Triage => TRIAGE_ARTIFACT,
            Stage::Plan => PLAN_ARTIFACT,
            Stage::Commit => COMMIT_ARTIFACT,
        }
    }
}

/// Side effects made so far, so a failure can undo them.
#[derive(Debug, Default)]
struct RunState {
    stage: Stage,
    lease: Option<BranchLease>,
    written: Vec<ComputedChange>,
    pushed: bool,
    details: Vec<String>,
}

/// Contents of `fix-plan.json`.
#[derive(Debug, serde::Serialize)]
struct FixPlan<'a> {
    decision: Decision,
    risk_level: RiskLevel,
    attempts: u32,
    template: Template,
    prompt_tokens: usize,
    discovered: &'a [DiscoveredFile],
    prompt_files: &'a [PromptFile],
    omitted: &'a [String],
    plan: &'a EditPlan,
    changes: &'a [ComputedChange],
    warnings: &'a [Violation],
}

/// Contents of `commit-result.json`.
#[derive(Debug, serde::Serialize)]
struct CommitResult<'a> {
    commit: &'a crate::git::Commit,
    validations: &'a [ValidationOutcome],
    pull_request: Option<&'a crate::host::PullRequestInfo>,
    draft: bool,
    labels: &'a [String],
}

/// A plan that passed every check and is ready to write.
struct PlannedFix {
    plan: EditPlan,
    computed: Vec<ComputedChange>,
    decision: Decision,
    level: RiskLevel,
    prompt: BuiltPrompt,
    attempts: u32,
}

enum PlanOutcome {
    Ready(Box<PlannedFix>),
    /// The plan reaches further than triage cleared
    Held { paths: Vec<String>, reasons: Vec<String> },
}

pub struct Pipeline<'a> {
    config: &'a Config,
    root: PathBuf,
    host: &'a dyn CodeHost,
    generator: &'a dyn TextGenerator,
    vcs: &'a dyn Vcs,
    runner: &'a dyn CommandRunner,
    triager: Triager,
    artifacts: ArtifactWriter,
    triage_only: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        root: impl Into<PathBuf>,
        collaborators: Collaborators<'a>,
    ) -> Result<Self, ConfigError> {
        let gate = SecurityGate::with_config(&config.security)?;
        Ok(Self {
            config,
            root: root.into(),
            host: collaborators.host,
            generator: collaborators.generator,
            vcs: collaborators.vcs,
            runner: collaborators.runner,
            triager: Triager::new(gate),
            artifacts: ArtifactWriter::disabled(),
            triage_only: false,
        })
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactWriter) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Stop after triage and its comment.
    pub fn triage_only(mut self, triage_only: bool) -> Self {
        self.triage_only = triage_only;
        self
    }

    /// Run the whole pipeline under the configured deadline. Failures are
    /// reported, rolled back and returned inside the report.
    #[instrument(skip_all, fields(issue = issue.id))]
    pub async fn run(&self, issue: &Issue) -> RunReport {
        let deadline = self.config.pipeline.run_deadline();
        let mut report = RunReport::new(issue);
        let mut state = RunState::default();

        let result = match timeout(deadline, self.execute(issue, &mut state, &mut report)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(deadline)),
        };

        match result {
            Ok(status) => {
                info!(%status, "run finished");
                report.status = status;
            }
            Err(error) => self.fail(issue, error, &state, &mut report).await,
        }
        report
    }

    async fn execute(
        &self,
        issue: &Issue,
        state: &mut RunState,
        report: &mut RunReport,
    ) -> Result<RunStatus, PipelineError> {
        let params = GenerationParams::from(&self.config.llm);
        let tree = RepoTree::scan(&self.root).map_err(PipelineError::WorkingCopy)?;

        let triage = self
            .triager
            .triage(issue, &tree, self.generator, &params)
            .await?;
        report.triage = Some(triage.clone());
        report.decision = Some(triage.risk.decision);
        self.artifacts
            .write(TRIAGE_ARTIFACT, &RunArtifact::success(&triage))?;
        self.host
            .post_comment(issue.id, &triage_comment(&triage))
            .await?;

        if triage.risk.decision == Decision::HumanReviewRequired {
            info!("held for human review at triage");
            return Ok(RunStatus::HeldForReview);
        }
        if self.triage_only {
            return Ok(RunStatus::TriageOnly);
        }

        state.stage = Stage::Plan;
        let context = info_span!("project_analysis").in_scope(|| {
            ProjectAnalyzer::new(self.config.architecture.spec_documents.clone()).analyze(&tree)
        });
        let files = self.discover(issue, &triage, &tree, &context, &params).await;
        if files.is_empty() {
            return Err(PipelineError::NoFilesFound);
        }

        let fix = match self
            .plan_fix(issue, &triage, &tree, &context, &files, &params)
            .await?
        {
            PlanOutcome::Ready(fix) => fix,
            PlanOutcome::Held { paths, reasons } => {
                info!(?paths, "plan held for human review");
                report.decision = Some(Decision::HumanReviewRequired);
                self.host
                    .post_comment(issue.id, &held_for_review_comment(&paths, &reasons))
                    .await?;
                return Ok(RunStatus::HeldForReview);
            }
        };
        report.decision = Some(fix.decision);
        report.changes = fix.computed.clone();

        let architecture = self.check_architecture(&context, &fix.computed);
        report.warnings = architecture.warnings.clone();
        if architecture.has_errors() {
            state.details = architecture
                .errors
                .iter()
                .map(|v| format!("`{}` [{}]: {} ({})", v.path, v.rule_id, v.message, v.suggestion))
                .collect();
            let summary = architecture
                .errors
                .iter()
                .map(|v| format!("{}: {}", v.path, v.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PipelineError::ArchitectureViolation {
                count: architecture.errors.len(),
                summary,
            });
        }

        self.artifacts.write(
            PLAN_ARTIFACT,
            &RunArtifact::success(FixPlan {
                decision: fix.decision,
                risk_level: fix.level,
                attempts: fix.attempts,
                template: fix.prompt.template,
                prompt_tokens: fix.prompt.tokens,
                discovered: &files,
                prompt_files: &fix.prompt.files,
                omitted: &fix.prompt.omitted,
                plan: &fix.plan,
                changes: &fix.computed,
                warnings: &architecture.warnings,
            }),
        )?;

        state.stage = Stage::Commit;
        self.deliver(issue, &triage, &fix, &architecture.warnings, state, report)
            .await?;
        Ok(RunStatus::Committed)
    }

    async fn discover(
        &self,
        issue: &Issue,
        triage: &TriageResult,
        tree: &RepoTree,
        context: &ProjectContext,
        params: &GenerationParams,
    ) -> Vec<DiscoveredFile> {
        let ceiling = self.config.input_token_ceiling();
        let share = (ceiling as f64 * self.config.discovery.file_budget_share) as usize;
        let mut budget = TokenBudget::new(share);
        let discovery = FileDiscovery::new(self.config.discovery.max_files, self.config.llm.provider);
        let input = DiscoveryInput {
            issue,
            classification: &triage.classification,
            tree,
            context,
        };
        let assist = GeneratorAssist {
            generator: self.generator,
            params,
        };
        discovery.discover(&input, &assist, &mut budget).await
    }

    /// Ask for a plan until one applies cleanly or attempts run out.
    async fn plan_fix(
        &self,
        issue: &Issue,
        triage: &TriageResult,
        tree: &RepoTree,
        context: &ProjectContext,
        files: &[DiscoveredFile],
        params: &GenerationParams,
    ) -> Result<PlanOutcome, PipelineError> {
        let builder = PromptBuilder::new(self.config.llm.provider, self.config.input_token_ceiling());
        let max_attempts = self.config.pipeline.max_plan_attempts.max(1);
        let mut feedback: Option<String> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let prompt = builder.build(&PromptInput {
                issue,
                classification: &triage.classification,
                context,
                tree,
                files,
                feedback: feedback.as_deref(),
            })?;

            let result = self
                .attempt_plan(triage, prompt, params)
                .instrument(info_span!("plan_attempt", attempt))
                .await;
            match result {
                Ok(PlanOutcome::Ready(mut fix)) => {
                    fix.attempts = attempt;
                    return Ok(PlanOutcome::Ready(fix));
                }
                Ok(held) => return Ok(held),
                Err(e) if e.warrants_new_plan() && attempt < max_attempts => {
                    warn!(attempt, code = %e.code(), error = %e, "plan rejected, asking again");
                    feedback = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_plan(
        &self,
        triage: &TriageResult,
        prompt: BuiltPrompt,
        params: &GenerationParams,
    ) -> Result<PlanOutcome, PipelineError> {
        let raw = self.generator.generate(&prompt.text, params).await?;
        let plan = parse_edit_plan(&raw)?;
        let paths = plan.paths();
        info!(files = paths.len(), changes = plan.changes.len(), "received edit plan");

        // Re-gate on what the plan actually touches, before reading any of it
        let gate = self.triager.gate();
        let flagged: Vec<String> = paths
            .iter()
            .flat_map(|p| gate.check_path(p))
            .map(|m| format!("{} `{}`", m.label, m.path.as_deref().unwrap_or(&m.matched)))
            .collect();
        if !flagged.is_empty() {
            return Err(PipelineError::SecurityViolation(flagged.join(", ")));
        }
        let plan_risk = self
            .triager
            .assessor()
            .assess(&paths, &crate::triage::SecurityReport::default());
        let decision = triage.risk.decision.stricter(plan_risk.decision);
        if decision == Decision::HumanReviewRequired {
            return Ok(PlanOutcome::Held {
                paths,
                reasons: plan_risk.reasoning,
            });
        }

        let computed = self.handler().compute_all(&plan.changes)?;
        let secrets: Vec<String> = computed
            .iter()
            .flat_map(|c| gate.check_added_lines(&c.path, c.original.as_deref(), &c.content))
            .map(|m| format!("{} in `{}`", m.label, m.path.unwrap_or_default()))
            .collect();
        if !secrets.is_empty() {
            return Err(PipelineError::SecurityViolation(secrets.join(", ")));
        }

        Ok(PlanOutcome::Ready(Box::new(PlannedFix {
            plan,
            computed,
            decision,
            level: triage.risk.level.max(plan_risk.level),
            prompt,
            attempts: 0,
        })))
    }

    fn check_architecture(
        &self,
        context: &ProjectContext,
        computed: &[ComputedChange],
    ) -> crate::architecture::ArchitectureReport {
        let validator = ArchitectureValidator::new(RuleRegistry::for_project(context));
        let files: Vec<(String, String)> = computed
            .iter()
            .map(|c| (c.path.clone(), c.content.clone()))
            .collect();
        validator.validate(&files)
    }

    /// Branch, write, validate, commit, push and open the pull request.
    #[instrument(skip_all, fields(decision = %fix.decision))]
    async fn deliver(
        &self,
        issue: &Issue,
        triage: &TriageResult,
        fix: &PlannedFix,
        warnings: &[Violation],
        state: &mut RunState,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let commits = CommitPipeline::new(self.vcs, &self.config.pipeline);
        let branch = commits.branch_name(issue);
        let lease = commits.acquire_branch(&branch).await?;
        state.lease = Some(lease.clone());

        state.written = fix.computed.clone();
        let paths = self.handler().write_all(&fix.computed)?;

        let validations = ValidationRunner::new(&self.config.validation, self.runner)
            .run(&self.root, &paths, fix.level)
            .await?;
        report.validations = validations.clone();

        let message = commit_message(
            triage.classification.classification,
            &fix.plan.commit_message,
            issue.id,
        );
        let commit = commits.commit_and_push(&lease, &paths, &message).await?;
        state.pushed = commit.pushed;
        report.commit = Some(commit.clone());

        let draft = fix.decision == Decision::DraftPr;
        let labels = vec![if draft { NEEDS_REVIEW_LABEL } else { AUTO_FIX_LABEL }.to_string()];
        let pull_request = if commit.pushed {
            let body = pull_request_body(&PullRequestContent {
                issue,
                triage,
                decision: fix.decision,
                changes: &fix.computed,
                validations: &validations,
                warnings,
            });
            let request = PullRequestDraft {
                title: message.clone(),
                body,
                head: lease.name.clone(),
                base: self.config.pipeline.default_branch.clone(),
                draft,
                labels: labels.clone(),
                reviewers: if draft {
                    self.config.github.reviewers.clone()
                } else {
                    Vec::new()
                },
            };
            let info = self.host.create_pull_request(&request).await?;
            info!(number = info.number, url = %info.url, draft, "opened pull request");
            Some(info)
        } else {
            info!("commit not pushed, skipping pull request");
            None
        };
        report.pull_request = pull_request.clone();

        self.artifacts.write(
            COMMIT_ARTIFACT,
            &RunArtifact::success(CommitResult {
                commit: &commit,
                validations: &validations,
                pull_request: pull_request.as_ref(),
                draft,
                labels: &labels,
            }),
        )?;
        Ok(())
    }

    fn handler(&self) -> FileChangeHandler {
        FileChangeHandler::new(
            self.root.clone(),
            HallucinationCheck::from(&self.config.hallucination),
        )
    }

    async fn fail(&self, issue: &Issue, error: PipelineError, state: &RunState, report: &mut RunReport) {
        warn!(code = %error.code(), error = %error, "run failed");
        let rollback = self.roll_back(state).await;
        let error_report =
            ErrorReport::new(&error, rollback).with_details(state.details.iter().cloned());

        self.artifacts.write_quietly(
            state.stage.artifact(),
            &RunArtifact::<()>::failure(&error_report),
        );
        if let Err(e) = self
            .host
            .post_comment(issue.id, &error_comment(&error_report))
            .await
        {
            warn!(error = %e, "could not post error comment");
        }
        report.status = RunStatus::Failed;
        report.error = Some(error_report);
    }

    /// Undo everything the run changed: the pushed branch first, then files
    /// the plan created, then the working tree and local branch.
    async fn roll_back(&self, state: &RunState) -> Option<RollbackReport> {
        if state.lease.is_none() && state.written.is_empty() {
            return None;
        }
        let commits = CommitPipeline::new(self.vcs, &self.config.pipeline);
        let mut rollback = RollbackReport::default();
        if let (true, Some(lease)) = (state.pushed, &state.lease) {
            rollback.absorb(commits.retract_push(lease).await);
        }
        if state.written.iter().any(|c| c.created) {
            self.handler().discard_created(&state.written);
            rollback.steps.push("removed files created by the plan".to_string());
        }
        rollback.absorb(commits.rollback(state.lease.as_ref()).await);
        Some(rollback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::git::GitCli;
    use crate::host::{HostAction, OfflineHost};
    use crate::llm::LlmError;
    use crate::testing::{sample_issue, write_tree, FakeVcs, RejectingHost, ScriptedRunner};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers file-suggestion prompts with nothing and fix prompts with
    /// the scripted plans, in order.
    struct PlanGenerator {
        plans: Mutex<Vec<String>>,
        fix_prompts: Mutex<Vec<String>>,
    }

    impl PlanGenerator {
        fn new(plans: &[&str]) -> Self {
            Self {
                plans: Mutex::new(plans.iter().rev().map(|p| p.to_string()).collect()),
                fix_prompts: Mutex::new(Vec::new()),
            }
        }

        fn fix_prompts(&self) -> Vec<String> {
            self.fix_prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for PlanGenerator {
        async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, LlmError> {
            if prompt.starts_with("Which files in this repository") {
                return Ok(r#"{"files": []}"#.to_string());
            }
            self.fix_prompts.lock().unwrap().push(prompt.to_string());
            self.plans.lock().unwrap().pop().ok_or(LlmError::EmptyResponse)
        }
    }

    const TYPO_PLAN: &str = r#"{"changes": [{"path": "README.md", "summary": "fix typo",
        "search_replace": [{"search": "teh", "replace": "the"}]}],
        "commit_message": "correct typo in README"}"#;

    fn comments(actions: &[HostAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                HostAction::Comment { body, .. } => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_typo_issue_is_fixed_automatically() {
        let dir = write_tree(&[
            ("README.md", "# Forms\n\nUse teh form builder.\n"),
            ("src/index.ts", "export const x = 1;\n"),
        ]);
        let config = Config::default();
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[TYPO_PLAN]);
        let vcs = FakeVcs::new(&["main"]);
        let runner = ScriptedRunner::passing();
        let artifacts = dir.path().join(".autofix-artifacts");
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap()
        .with_artifacts(ArtifactWriter::new(Some(artifacts.clone())));

        let issue = sample_issue(
            101,
            "fix typo: 'teh' → 'the' in README.md",
            "The getting started section of README.md says teh form builder.",
        );
        let report = pipeline.run(&issue).await;

        assert_eq!(report.status, RunStatus::Committed, "{:?}", report.error);
        let triage = report.triage.as_ref().unwrap();
        assert_eq!(triage.classification.classification.to_string(), "DOCS");
        assert_eq!(triage.risk.level, RiskLevel::Low);
        assert_eq!(report.decision, Some(Decision::AutoFix));
        assert_eq!(
            report.changes[0].strategies,
            vec![crate::changes::EditStrategy::SearchReplace]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "# Forms\n\nUse the form builder.\n"
        );

        let commit = report.commit.as_ref().unwrap();
        assert!(commit.branch.contains("issue-101"));
        assert_eq!(commit.message, "docs: correct typo in README (#101)");
        assert_eq!(vcs.commits(&commit.branch).len(), 1);
        assert_eq!(vcs.staged(), Vec::<String>::new());

        let actions = host.actions();
        let pr = actions
            .iter()
            .find_map(|a| match a {
                HostAction::PullRequest { draft, .. } => Some(draft.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!pr.draft);
        assert_eq!(pr.labels, vec![AUTO_FIX_LABEL]);
        assert!(comments(&actions)[0].contains("AUTO_FIX"));

        for name in [TRIAGE_ARTIFACT, PLAN_ARTIFACT, COMMIT_ARTIFACT] {
            let value: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(artifacts.join(name)).unwrap())
                    .unwrap();
            assert_eq!(value["success"], true, "{name}");
        }
    }

    #[tokio::test]
    async fn test_secret_rotation_issue_only_gets_a_comment() {
        let dir = write_tree(&[(".env", "API_KEY=abc\n"), ("src/api.ts", "export {}\n")]);
        let config = Config::default();
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[]);
        let vcs = FakeVcs::new(&["main"]);
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap();

        let mut issue = sample_issue(
            7,
            "Rotate API key in .env",
            "The key in .env leaked, please rotate API key.",
        );
        issue.labels = vec!["chore".to_string()];
        let report = pipeline.run(&issue).await;

        assert_eq!(report.status, RunStatus::HeldForReview);
        let triage = report.triage.unwrap();
        assert!(triage.risk.security_flagged);
        assert_eq!(triage.risk.decision, Decision::HumanReviewRequired);
        assert!(generator.fix_prompts().is_empty());
        assert_eq!(vcs.branches(), vec!["main"]);
        assert!(runner.calls().is_empty());

        let actions = host.actions();
        assert_eq!(actions.len(), 1);
        assert!(comments(&actions)[0].contains("HUMAN_REVIEW_REQUIRED"));
    }

    #[tokio::test]
    async fn test_six_file_docs_change_opens_draft_pull_request() {
        let files: Vec<(String, String)> = (1..=6)
            .map(|n| (format!("docs/guide-{}.md", n), format!("Welcome to Acme Forms guide {}.\n", n)))
            .collect();
        let borrowed: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
        let dir = write_tree(&borrowed);

        let plan_changes: Vec<String> = (1..=6)
            .map(|n| {
                format!(
                    r#"{{"path": "docs/guide-{n}.md", "summary": "rename product",
                    "search_replace": [{{"search": "Acme Forms", "replace": "FormKit"}}]}}"#
                )
            })
            .collect();
        let plan = format!(
            r#"{{"changes": [{}], "commit_message": "rename product in guides"}}"#,
            plan_changes.join(",")
        );

        let mut config = Config::default();
        config.github.reviewers = vec!["docs-team".to_string()];
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[plan.as_str()]);
        let vcs = FakeVcs::new(&["main"]);
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap();

        let mut issue = sample_issue(
            55,
            "Rename product in the guides",
            "Replace Acme Forms with FormKit in docs/guide-1.md, docs/guide-2.md, \
             docs/guide-3.md, docs/guide-4.md, docs/guide-5.md and docs/guide-6.md.",
        );
        issue.labels = vec!["documentation".to_string()];
        let report = pipeline.run(&issue).await;

        assert_eq!(report.status, RunStatus::Committed, "{:?}", report.error);
        let triage = report.triage.as_ref().unwrap();
        assert_eq!(triage.risk.file_count, 6);
        assert_eq!(triage.risk.level, RiskLevel::Medium);
        assert_eq!(report.decision, Some(Decision::DraftPr));

        let pr = host
            .actions()
            .into_iter()
            .find_map(|a| match a {
                HostAction::PullRequest { draft, .. } => Some(draft),
                _ => None,
            })
            .unwrap();
        assert!(pr.draft);
        assert_eq!(pr.labels, vec![NEEDS_REVIEW_LABEL]);
        assert_eq!(pr.reviewers, vec!["docs-team"]);
        assert!(pr.body.contains("Opened as a draft"));
    }

    fn git_repo(files: &[(&str, &str)]) -> (tempfile::TempDir, GitCli) {
        let dir = write_tree(files);
        let git = GitCli::new(dir.path(), Duration::from_secs(30));
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap()
        };
        run(&["init", "-q"]);
        run(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        run(&["config", "user.email", "bot@example.com"]);
        run(&["config", "user.name", "autofix"]);
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "initial"]);
        (dir, git)
    }

    #[tokio::test]
    async fn test_failed_type_check_rolls_back_everything() {
        let original = "export function formatDate(d: Date): string {\n  return d.toISOString();\n}\n";
        let (dir, git) = git_repo(&[("src/utils/format.ts", original)]);
        let plan = r#"{"changes": [
            {"path": "src/utils/format.ts", "summary": "guard null dates",
             "search_replace": [{"search": "export function formatDate(d: Date): string {",
                                 "replace": "export function formatDate(d: Date | null): string {\n  if (!d) return 0;"}]},
            {"path": "src/utils/format.test.ts", "summary": "cover null", "content": "test('null', () => {});\n"}
        ], "commit_message": "guard null dates in formatDate"}"#;

        let mut config = Config::default();
        config.pipeline.push = false;
        config.validation.lint = Some("lint".to_string());
        config.validation.type_check = Some("tsc".to_string());
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[plan]);
        let runner = ScriptedRunner::failing(&["tsc"]);
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &git,
                runner: &runner,
            },
        )
        .unwrap();

        let mut issue = sample_issue(
            12,
            "formatDate crashes on null",
            "Calling formatDate in src/utils/format.ts with null throws.",
        );
        issue.labels = vec!["bug".to_string()];
        let report = pipeline.run(&issue).await;

        assert_eq!(report.status, RunStatus::Failed);
        let error = report.error.as_ref().unwrap();
        assert_eq!(error.code, ErrorCode::ValidationFailed);
        assert!(error.details.iter().any(|d| d.contains("TS2322")));
        assert!(error.rollback.as_ref().unwrap().clean());
        assert_eq!(runner.calls(), vec!["lint", "tsc"]);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/utils/format.ts")).unwrap(),
            original
        );
        assert!(!dir.path().join("src/utils/format.test.ts").exists());
        assert_eq!(git.current_branch().await.unwrap(), "main");
        assert!(!git.branch_exists("autofix/issue-12-formatdate-crashes-on-null").await.unwrap());

        let last = comments(&host.actions()).pop().unwrap();
        assert!(last.contains("`VALIDATION_FAILED`"));
        assert!(last.contains("completed, no changes were left behind"));
    }

    #[tokio::test]
    async fn test_unapplicable_plan_is_retried_with_feedback() {
        let dir = write_tree(&[("README.md", "Use teh form builder.\n")]);
        let bad = r#"{"changes": [{"path": "README.md", "summary": "fix",
            "search_replace": [{"search": "tha form", "replace": "the form"}]}], "commit_message": "fix"}"#;
        let config = Config::default();
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[bad, TYPO_PLAN]);
        let vcs = FakeVcs::new(&["main"]);
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap();

        let issue = sample_issue(3, "fix typo: 'teh' → 'the' in README.md", "");
        let report = pipeline.run(&issue).await;

        assert_eq!(report.status, RunStatus::Committed, "{:?}", report.error);
        let prompts = generator.fix_prompts();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("Previous attempt rejected"));
        assert!(prompts[1].contains("Previous attempt rejected"));
        assert!(prompts[1].contains("tha form"));
    }

    #[tokio::test]
    async fn test_plan_touching_ci_is_a_security_violation() {
        let dir = write_tree(&[
            ("README.md", "Use teh form builder.\n"),
            (".github/workflows/ci.yml", "on: push\n"),
        ]);
        let plan = r#"{"changes": [{"path": ".github/workflows/ci.yml", "summary": "x",
            "search_replace": [{"search": "push", "replace": "pull_request"}]}], "commit_message": "ci"}"#;
        let config = Config::default();
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[plan, TYPO_PLAN]);
        let vcs = FakeVcs::new(&["main"]);
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap();

        let issue = sample_issue(4, "fix typo: 'teh' → 'the' in README.md", "");
        let report = pipeline.run(&issue).await;

        assert_eq!(report.status, RunStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.code, ErrorCode::SecurityViolation);
        assert!(error.rollback.is_none());
        assert_eq!(generator.fix_prompts().len(), 1);
        assert_eq!(vcs.branches(), vec!["main"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".github/workflows/ci.yml")).unwrap(),
            "on: push\n"
        );
    }

    #[tokio::test]
    async fn test_pull_request_failure_retracts_pushed_branch() {
        let dir = write_tree(&[("README.md", "Use teh form builder.\n")]);
        let config = Config::default();
        let host = RejectingHost::new();
        let generator = PlanGenerator::new(&[TYPO_PLAN]);
        let vcs = FakeVcs::new(&["main"]);
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap();

        let issue = sample_issue(8, "fix typo: 'teh' → 'the' in README.md", "");
        let report = pipeline.run(&issue).await;

        assert_eq!(report.status, RunStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.code, ErrorCode::GithubApiError);
        let rollback = error.rollback.unwrap();
        assert!(rollback.steps[0].starts_with("deleted origin/autofix/issue-8"));
        assert!(vcs.pushed().is_empty());
        assert_eq!(vcs.branches(), vec!["main"]);
        assert_eq!(vcs.current_branch().await.unwrap(), "main");
        assert!(comments(&host.actions())
            .last()
            .is_some_and(|c| c.contains("`GITHUB_API_ERROR`")));
    }

    #[tokio::test]
    async fn test_pull_request_failure_restores_pre_existing_remote_branch() {
        let branch = "autofix/issue-8-fix-typo-teh-the-in-readme-md";
        let dir = write_tree(&[("README.md", "Use teh form builder.\n")]);
        let config = Config::default();
        let host = RejectingHost::new();
        let generator = PlanGenerator::new(&[TYPO_PLAN]);
        let vcs = FakeVcs::new(&["main", branch]).with_remote(&[branch]);
        let base = vcs.remote_head("origin", branch).await.unwrap();
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap();

        let issue = sample_issue(8, "fix typo: 'teh' → 'the' in README.md", "");
        let report = pipeline.run(&issue).await;

        assert_eq!(report.status, RunStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.code, ErrorCode::GithubApiError);
        let rollback = error.rollback.unwrap();
        assert!(rollback.clean(), "{:?}", rollback.failures);
        assert_eq!(
            rollback.steps[0],
            format!("restored origin/{} to root-{}", branch, branch)
        );
        assert_eq!(vcs.remote_head("origin", branch).await.unwrap(), base);
        assert!(vcs.commits(branch).is_empty());
        assert!(vcs.branch_exists(branch).await.unwrap());
        assert_eq!(vcs.current_branch().await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_push_conflict_is_reported_as_git_conflict() {
        let dir = write_tree(&[("README.md", "Use teh form builder.\n")]);
        let config = Config::default();
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[TYPO_PLAN]);
        let vcs = FakeVcs::new(&["main"]).failing_push();
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap();

        let report = pipeline
            .run(&sample_issue(9, "fix typo: 'teh' → 'the' in README.md", ""))
            .await;
        assert_eq!(report.error.unwrap().code, ErrorCode::GitConflict);
        assert!(vcs.commits("autofix/issue-9-fix-typo-teh-the-in-readme-md").is_empty());
        assert_eq!(vcs.branches(), vec!["main"]);
    }

    #[tokio::test]
    async fn test_triage_only_stops_after_comment() {
        let dir = write_tree(&[("README.md", "Use teh form builder.\n")]);
        let config = Config::default();
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[]);
        let vcs = FakeVcs::new(&["main"]);
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap()
        .triage_only(true);

        let report = pipeline
            .run(&sample_issue(2, "fix typo: 'teh' → 'the' in README.md", ""))
            .await;
        assert_eq!(report.status, RunStatus::TriageOnly);
        assert_eq!(host.actions().len(), 1);
        assert!(generator.fix_prompts().is_empty());
    }

    #[tokio::test]
    async fn test_no_relevant_files_fails_with_guidance() {
        let dir = write_tree(&[("assets/logo.png", "\u{0}")]);
        let config = Config::default();
        let host = OfflineHost::new(None);
        let generator = PlanGenerator::new(&[]);
        let vcs = FakeVcs::new(&["main"]);
        let runner = ScriptedRunner::passing();
        let pipeline = Pipeline::new(
            &config,
            dir.path(),
            Collaborators {
                host: &host,
                generator: &generator,
                vcs: &vcs,
                runner: &runner,
            },
        )
        .unwrap();

        let mut issue = sample_issue(5, "Wrong colour", "Looks off.");
        issue.labels = vec!["bug".to_string()];
        let report = pipeline.run(&issue).await;

        let error = report.error.unwrap();
        assert_eq!(error.code, ErrorCode::NoFilesFound);
        assert!(error.remediation.contains("exact file paths"));
        assert!(error.rollback.is_none());
    }
}
