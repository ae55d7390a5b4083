use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{FailureKind, JobFailure, JobKind, JobOutcome, JobQueue, JobReport, JobRequest};
use crate::broadcast::{JobEvent, NotificationSink};
use crate::config::Settings;
use crate::context::{ContextBuilder, ContextPayload};
use crate::db::project_repo::{self, ProjectRow};
use crate::db::section_repo;
use crate::db::status_repo::{Claim, ClaimToken};
use crate::db::Database;
use crate::domain::{RepositoryRef, RunStatus, SectionStatus};
use crate::output::{OutputDir, ParseOutcome};
use crate::persist::ResultPersister;
use crate::sandbox::{
    EntryPoint, SandboxExecutor, SandboxInvocation, SandboxWorkspace, API_KEY_ENV, MODEL_ENV,
    REPOSITORIES_ENV, REPOSITORY_TOKENS_ENV, REPOSITORY_TOKEN_ENV,
};
use crate::secrets::duplicate_secret;
use crate::upstream::{RepoTokenProvider, SourceHost};
use crate::usage::{UsageAttempt, UsageTracker};
use crate::workflow::{StatusTarget, WorkflowStateMachine};

/// Everything a run needs from the outside world.
pub struct JobEnv {
    pub db: Database,
    pub settings: Arc<Settings>,
    pub sandbox: Arc<dyn SandboxExecutor>,
    pub source_host: Arc<dyn SourceHost>,
    pub tokens: Arc<dyn RepoTokenProvider>,
    pub notifications: Arc<dyn NotificationSink>,
    pub queue: Arc<dyn JobQueue>,
    /// Credential for the generation capability. A missing key fails each
    /// run at invocation time, which is still recorded as an attempt.
    pub api_key: Option<SecretString>,
}

/// Facts gathered during a run that the fallback path needs.
#[derive(Debug, Default)]
pub(super) struct RunState {
    pub diff_lines: Option<usize>,
}

/// A claimed status column and the token that lets this run resolve it.
type Held = (StatusTarget, ClaimToken);

enum Claimed {
    Held(Vec<Held>),
    AlreadyRunning,
    Skip(String),
}

/// Runs jobs end to end. Shared by all workers.
pub struct JobRunner {
    pub(super) env: JobEnv,
    pub(super) workflow: WorkflowStateMachine,
    pub(super) persister: ResultPersister,
    pub(super) usage: UsageTracker,
    pub(super) context: ContextBuilder,
}

impl JobRunner {
    pub fn new(env: JobEnv) -> Self {
        let workflow = WorkflowStateMachine::new(
            env.db.clone(),
            Arc::clone(&env.queue),
            env.settings.features,
        );
        let persister = ResultPersister::new(env.db.clone());
        let usage = UsageTracker::new(env.db.clone(), env.settings.model.clone());
        let context = ContextBuilder::new(env.settings.sandbox.max_diff_bytes);
        Self {
            env,
            workflow,
            persister,
            usage,
            context,
        }
    }

    pub fn workflow(&self) -> &WorkflowStateMachine {
        &self.workflow
    }

    pub fn database(&self) -> &Database {
        &self.env.db
    }

    /// Runs one job to completion. Never panics and never leaves a status
    /// it claimed in `running`.
    pub async fn run(&self, request: JobRequest) -> JobReport {
        let span = info_span!("job", kind = %request.kind(), target = request.target_id());
        async {
            let started = Instant::now();
            let outcome = match self.claim(&request) {
                Ok(Claimed::Held(targets)) => self.execute(&request, &targets).await,
                Ok(Claimed::AlreadyRunning) => JobOutcome::AlreadyRunning,
                Ok(Claimed::Skip(reason)) => {
                    debug!(%reason, "Skipping job");
                    JobOutcome::Skipped { reason }
                }
                Err(failure) => JobOutcome::Failed(failure),
            };
            match &outcome {
                JobOutcome::Completed { summary } => info!(%summary, "Job completed"),
                JobOutcome::Failed(failure) => warn!(error = %failure, "Job failed"),
                _ => {}
            }
            self.publish(&request, &outcome);
            JobReport {
                kind: request.kind(),
                target_id: request.target_id().to_string(),
                outcome,
                duration: started.elapsed(),
            }
        }
        .instrument(span)
        .await
    }

    fn claim(&self, request: &JobRequest) -> Result<Claimed, JobFailure> {
        if let Some(column) = request.status_column() {
            let target = StatusTarget::new(column, request.target_id());
            return Ok(match self.workflow.begin(&target)? {
                Claim::Claimed(token) => Claimed::Held(vec![(target, token)]),
                Claim::AlreadyRunning => Claimed::AlreadyRunning,
                Claim::Missing => Claimed::Skip(not_found(request)),
            });
        }

        let project_id = request.target_id();
        if project_repo::find_by_id(&self.env.db, project_id)?.is_none() {
            return Ok(Claimed::Skip(not_found(request)));
        }
        if !matches!(request, JobRequest::GenerateAllRecommendations { .. }) {
            return Ok(Claimed::Held(Vec::new()));
        }

        let accepted: Vec<_> = section_repo::list_by_project(&self.env.db, project_id)?
            .into_iter()
            .filter(|s| s.status == SectionStatus::Accepted)
            .collect();
        let mut held = Vec::new();
        let mut busy = 0;
        for section in &accepted {
            let target = StatusTarget::section_recommendations(&section.id);
            match self.workflow.begin(&target) {
                Ok(Claim::Claimed(token)) => held.push((target, token)),
                Ok(Claim::AlreadyRunning) => busy += 1,
                Ok(Claim::Missing) => {}
                Err(e) => {
                    self.resolve_all(&held, RunStatus::Failed);
                    return Err(e.into());
                }
            }
        }
        Ok(match (held.is_empty(), busy) {
            (false, _) => Claimed::Held(held),
            (true, 0) => Claimed::Skip("project has no accepted sections".to_string()),
            (true, _) => Claimed::AlreadyRunning,
        })
    }

    async fn execute(&self, request: &JobRequest, targets: &[Held]) -> JobOutcome {
        let mut state = RunState::default();
        let result = AssertUnwindSafe(self.body(request, &mut state))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                error!(panic = %panic_message(panic.as_ref()), "Job panicked");
                Err(JobFailure::new(
                    FailureKind::Panic,
                    format!("job panicked: {}", panic_message(panic.as_ref())),
                ))
            });

        match result {
            Ok(summary) => {
                self.resolve_all(targets, RunStatus::Completed);
                JobOutcome::Completed { summary }
            }
            Err(failure) if failure.target_missing => {
                self.resolve_all(targets, RunStatus::Failed);
                JobOutcome::Skipped {
                    reason: failure.message,
                }
            }
            Err(failure) => {
                self.write_fallback(request, &state, &failure);
                self.resolve_all(targets, RunStatus::Failed);
                JobOutcome::Failed(failure)
            }
        }
    }

    async fn body(&self, request: &JobRequest, state: &mut RunState) -> Result<String, JobFailure> {
        match request {
            JobRequest::AnalyzeCodebase { project_id } => self.analyze_codebase(project_id).await,
            JobRequest::SuggestSections { project_id } => self.suggest_sections(project_id).await,
            JobRequest::AnalyzeCommit { update_id } | JobRequest::AnalyzePullRequest { update_id } => {
                self.analyze_update(request.kind(), update_id, state).await
            }
            JobRequest::GenerateArticle { article_id } => self.generate_article(article_id).await,
            JobRequest::GenerateSectionRecommendations { section_id } => {
                self.section_recommendations(section_id).await
            }
            JobRequest::GenerateAllRecommendations { project_id } => {
                self.all_recommendations(project_id).await
            }
            JobRequest::CheckArticleUpdates { check_id } => {
                self.check_article_updates(check_id, state).await
            }
            JobRequest::GenerateTheme { project_id } => self.generate_theme(project_id).await,
        }
    }

    fn resolve_all(&self, targets: &[Held], status: RunStatus) {
        for (target, token) in targets {
            if let Err(e) = self.workflow.resolve(target, token, status) {
                error!(%target, %status, error = %e, "Failed to resolve status");
            }
        }
    }

    /// Stores placeholder content for entities users would otherwise see
    /// empty. Runs after the failure, before the status turns `failed`.
    fn write_fallback(&self, request: &JobRequest, state: &RunState, failure: &JobFailure) {
        let message = failure.to_string();
        let written = std::panic::catch_unwind(AssertUnwindSafe(|| match request {
            JobRequest::GenerateArticle { article_id } => {
                self.persister.article_fallback(article_id, &message).map(|_| true)
            }
            JobRequest::AnalyzeCommit { update_id } | JobRequest::AnalyzePullRequest { update_id } => {
                self.persister
                    .update_fallback(update_id, state.diff_lines)
                    .map(|_| true)
            }
            JobRequest::CheckArticleUpdates { check_id } => {
                self.persister.update_check_error(check_id, &message).map(|_| true)
            }
            _ => Ok(false),
        }));
        match written {
            Ok(Ok(true)) => debug!("Fallback content stored"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to store fallback content"),
            Err(panic) => error!(panic = %panic_message(panic.as_ref()), "Fallback panicked"),
        }
    }

    fn publish(&self, request: &JobRequest, outcome: &JobOutcome) {
        let (kind, entity, id) = (request.kind(), request.entity_kind(), request.target_id());
        let event = match outcome {
            JobOutcome::Completed { summary } => JobEvent::completed(kind, entity, id, summary),
            JobOutcome::Failed(failure) => {
                JobEvent::failed(Some(kind), entity, id, &failure.to_string())
            }
            JobOutcome::Skipped { .. } | JobOutcome::AlreadyRunning => return,
        };
        self.env.notifications.publish(event);
    }

    /// The project's primary repository and its token, for upstream calls.
    pub(super) async fn primary_repository<'p>(
        &self,
        project: &'p ProjectRow,
    ) -> Result<(&'p RepositoryRef, Option<SecretString>), JobFailure> {
        let repo = project.primary_repository().ok_or_else(|| {
            JobFailure::new(
                FailureKind::Upstream,
                format!("Project '{}' has no repository", project.id),
            )
        })?;
        let token = self.env.tokens.token_for(repo).await?;
        Ok((repo, token))
    }

    /// Stages `payload`, runs the entry point for `kind`, records usage and
    /// parses the output directory.
    pub(super) async fn run_sandbox<T>(
        &self,
        kind: JobKind,
        project: &ProjectRow,
        metadata: Value,
        payload: &ContextPayload,
        parse: impl FnOnce(&OutputDir<'_>) -> ParseOutcome<T>,
    ) -> Result<T, JobFailure> {
        let entry_point = kind.entry_point();
        let workspace = SandboxWorkspace::create(self.env.settings.staging_directory.as_deref())?;
        payload
            .write_to(workspace.input_dir())
            .map_err(JobFailure::staging)?;
        let invocation = self.invocation(entry_point, project).await?;

        let started = Instant::now();
        let result = self
            .env
            .sandbox
            .execute(&invocation, &workspace)
            .instrument(info_span!("sandbox", entry_point = %entry_point))
            .await;
        let output = OutputDir::new(
            workspace.output_dir(),
            self.env.settings.sandbox.output_excerpt_bytes,
        );
        self.usage.record(
            UsageAttempt {
                project_id: project.id.clone(),
                job_type: kind.as_str(),
                metadata,
                duration: started.elapsed(),
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            },
            output.usage(),
        );
        let report = result?;
        debug!(
            duration_ms = report.duration.as_millis() as u64,
            "Sandbox exited cleanly"
        );

        match parse(&output) {
            ParseOutcome::Success(value) => Ok(value),
            ParseOutcome::Failure(failure) => {
                warn!(
                    reason = %failure.reason,
                    excerpt = failure.excerpt.as_deref().unwrap_or(""),
                    "Unusable sandbox output"
                );
                Err(failure.into())
            }
        }
    }

    /// Builds the structured invocation. Secrets only ever travel in its
    /// secret map.
    async fn invocation(
        &self,
        entry_point: EntryPoint,
        project: &ProjectRow,
    ) -> Result<SandboxInvocation, JobFailure> {
        let settings = &self.env.settings;
        let mut invocation =
            SandboxInvocation::new(entry_point, settings.sandbox.timeout_for(entry_point))
                .secret(API_KEY_ENV, self.env.api_key.as_ref().map(duplicate_secret))
                .require(API_KEY_ENV);
        if let Some(model) = &settings.model {
            invocation = invocation.config(MODEL_ENV, model.as_str());
        }

        let Some(primary) = project.primary_repository() else {
            return Ok(invocation);
        };
        let names: Vec<&str> = project
            .repositories
            .iter()
            .map(|r| r.full_name.as_str())
            .collect();
        invocation = invocation.config(
            REPOSITORIES_ENV,
            serde_json::to_string(&names).map_err(JobFailure::staging)?,
        );
        if !entry_point.reads_repository() {
            return Ok(invocation);
        }

        let mut tokens = BTreeMap::new();
        for repo in &project.repositories {
            if let Some(token) = self.env.tokens.token_for(repo).await? {
                tokens.insert(repo.full_name.as_str(), token);
            }
        }
        invocation = invocation
            .secret(
                REPOSITORY_TOKEN_ENV,
                tokens.get(primary.full_name.as_str()).map(duplicate_secret),
            )
            .require(REPOSITORY_TOKEN_ENV);
        if project.repositories.len() > 1 && !tokens.is_empty() {
            let exposed: BTreeMap<&str, &str> = tokens
                .iter()
                .map(|(name, token)| (*name, token.expose_secret()))
                .collect();
            let json = serde_json::to_string(&exposed).map_err(JobFailure::staging)?;
            invocation = invocation.secret(REPOSITORY_TOKENS_ENV, Some(SecretString::from(json)));
        }
        Ok(invocation)
    }
}

fn not_found(request: &JobRequest) -> String {
    format!("{} '{}' not found", request.entity_kind(), request.target_id())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
