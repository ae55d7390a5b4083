//! Status transitions and the cascades they fire.
//!
//! Every pipeline status column moves `… → running → {completed, failed}`.
//! Entry into `running` is an atomic compare-and-set; exit happens through
//! [`WorkflowStateMachine::resolve`], which is also where follow-on work is
//! triggered.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::FeatureSettings;
use crate::db::status_repo::{self, Claim, ClaimToken, StatusColumn};
use crate::db::{article_repo, project_repo, section_repo, Database, DatabaseError};
use crate::domain::{EntityKind, OnboardingStep, ReviewStatus, RunStatus};
use crate::jobs::{JobQueue, JobRequest};

/// One status column of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusTarget {
    pub column: StatusColumn,
    pub id: String,
}

impl StatusTarget {
    pub fn new(column: StatusColumn, id: impl Into<String>) -> Self {
        Self {
            column,
            id: id.into(),
        }
    }

    pub fn project_analysis(id: impl Into<String>) -> Self {
        Self::new(StatusColumn::ProjectAnalysis, id)
    }

    pub fn project_theme(id: impl Into<String>) -> Self {
        Self::new(StatusColumn::ProjectTheme, id)
    }

    pub fn section_recommendations(id: impl Into<String>) -> Self {
        Self::new(StatusColumn::SectionRecommendations, id)
    }

    pub fn article_generation(id: impl Into<String>) -> Self {
        Self::new(StatusColumn::ArticleGeneration, id)
    }

    pub fn update_analysis(id: impl Into<String>) -> Self {
        Self::new(StatusColumn::UpdateAnalysis, id)
    }

    pub fn update_check(id: impl Into<String>) -> Self {
        Self::new(StatusColumn::UpdateCheck, id)
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.column.entity_kind()
    }
}

impl std::fmt::Display for StatusTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.column, self.id)
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Cannot resolve {target} to non-terminal status '{status}'")]
    NotTerminal { target: String, status: RunStatus },

    #[error("{kind} '{id}' not found")]
    TargetMissing { kind: EntityKind, id: String },

    #[error("Article '{article_id}' has not completed generation")]
    GenerationIncomplete { article_id: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Owns the pipeline status columns.
#[derive(Clone)]
pub struct WorkflowStateMachine {
    db: Database,
    queue: Arc<dyn JobQueue>,
    features: FeatureSettings,
}

impl WorkflowStateMachine {
    pub fn new(db: Database, queue: Arc<dyn JobQueue>, features: FeatureSettings) -> Self {
        Self {
            db,
            queue,
            features,
        }
    }

    /// Moves `target` into `running` unless another run holds it.
    pub fn begin(&self, target: &StatusTarget) -> Result<Claim, WorkflowError> {
        let claim = status_repo::claim(&self.db, target.column, &target.id)?;
        match claim {
            Claim::Claimed(_) => debug!(%target, "Claimed"),
            Claim::AlreadyRunning => info!(%target, "Already running, not starting another run"),
            Claim::Missing => debug!(%target, "Target row is gone"),
        }
        Ok(claim)
    }

    /// Writes a terminal status and fires its cascades. Returns false when
    /// the row no longer exists or `token` was superseded (the run was
    /// reaped); the row is then left alone.
    ///
    /// Cascade failures are logged; they never undo the resolution.
    pub fn resolve(
        &self,
        target: &StatusTarget,
        token: &ClaimToken,
        status: RunStatus,
    ) -> Result<bool, WorkflowError> {
        if !status.is_terminal() {
            return Err(WorkflowError::NotTerminal {
                target: target.to_string(),
                status,
            });
        }
        let changed = status_repo::resolve(&self.db, target.column, &target.id, token, status)?;
        if !changed {
            warn!(%target, %status, "Claim no longer held, result not recorded as status");
            return Ok(false);
        }
        info!(%target, %status, "Resolved");
        if let Err(e) = self.cascade(target, status) {
            warn!(%target, error = %e, "Cascade failed");
        }
        Ok(true)
    }

    pub fn current(&self, target: &StatusTarget) -> Result<Option<RunStatus>, WorkflowError> {
        Ok(status_repo::current(&self.db, target.column, &target.id)?)
    }

    fn cascade(&self, target: &StatusTarget, status: RunStatus) -> Result<(), WorkflowError> {
        match (target.column, status) {
            (StatusColumn::ProjectAnalysis, RunStatus::Completed) => {
                self.after_project_analysis(&target.id)
            }
            (StatusColumn::SectionRecommendations, _) => self.after_section_recommendations(&target.id),
            _ => Ok(()),
        }
    }

    fn after_project_analysis(&self, project_id: &str) -> Result<(), WorkflowError> {
        if project_repo::advance_onboarding(
            &self.db,
            project_id,
            OnboardingStep::Analyze,
            OnboardingStep::Sections,
        )? {
            info!(project_id, "Onboarding advanced to sections");
        }
        if self.features.cascade_section_suggestions {
            let request = JobRequest::SuggestSections {
                project_id: project_id.to_string(),
            };
            if let Err(e) = self.queue.enqueue(request) {
                warn!(project_id, error = %e, "Could not enqueue section suggestions");
            }
        }
        Ok(())
    }

    /// Completes onboarding once no accepted section is still waiting for,
    /// or running, recommendation generation.
    fn after_section_recommendations(&self, section_id: &str) -> Result<(), WorkflowError> {
        let Some(section) = section_repo::find_by_id(&self.db, section_id)? else {
            return Ok(());
        };
        let Some(project) = project_repo::find_by_id(&self.db, &section.project_id)? else {
            return Ok(());
        };
        if !project.onboarding_step.is_mid_generation() {
            return Ok(());
        }
        if section_repo::count_unfinished_accepted(&self.db, &project.id)? > 0 {
            return Ok(());
        }
        if project_repo::advance_onboarding(
            &self.db,
            &project.id,
            project.onboarding_step,
            OnboardingStep::Complete,
        )? {
            info!(project_id = %project.id, "Onboarding complete");
        }
        Ok(())
    }

    /// Sets an article's review status. Only completed articles can be reviewed.
    pub fn set_review_status(
        &self,
        article_id: &str,
        status: ReviewStatus,
    ) -> Result<(), WorkflowError> {
        match article_repo::set_review_status(&self.db, article_id, status)? {
            Some(true) => Ok(()),
            Some(false) => Err(WorkflowError::GenerationIncomplete {
                article_id: article_id.to_string(),
            }),
            None => Err(WorkflowError::TargetMissing {
                kind: EntityKind::Article,
                id: article_id.to_string(),
            }),
        }
    }

    /// Fails every run that has been `running` for longer than `older_than`.
    /// Section cascades run for reaped sections so onboarding cannot stall.
    pub fn reap_stale(&self, older_than: Duration) -> Result<Vec<StatusTarget>, WorkflowError> {
        let age = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let cutoff = crate::db::timestamp(
            chrono::Utc::now()
                .checked_sub_signed(age)
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC),
        );

        let mut reaped = Vec::new();
        for column in StatusColumn::ALL {
            for id in status_repo::reap_stale(&self.db, column, &cutoff)? {
                let target = StatusTarget::new(column, id);
                warn!(%target, "Reaped stale run");
                if let Err(e) = self.cascade(&target, RunStatus::Failed) {
                    warn!(%target, error = %e, "Cascade failed");
                }
                reaped.push(target);
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::article_repo::ArticleRow;
    use crate::db::project_repo::ProjectRow;
    use crate::db::recommendation_repo::{self, RecommendationRow};
    use crate::db::section_repo::SectionRow;
    use crate::domain::SectionStatus;
    use crate::error::WorkerError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<JobRequest>>);

    impl JobQueue for Recorder {
        fn enqueue(&self, request: JobRequest) -> Result<(), WorkerError> {
            self.0.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn claim(workflow: &WorkflowStateMachine, target: &StatusTarget) -> ClaimToken {
        match workflow.begin(target).unwrap() {
            Claim::Claimed(token) => token,
            other => panic!("expected to claim {target}, got {other:?}"),
        }
    }

    /// Claims `target` and resolves it straight away.
    fn run_to(workflow: &WorkflowStateMachine, target: &StatusTarget, status: RunStatus) -> bool {
        let token = claim(workflow, target);
        workflow.resolve(target, &token, status).unwrap()
    }

    fn setup(cascade: bool) -> (Database, Arc<Recorder>, WorkflowStateMachine, ProjectRow) {
        let db = Database::open_in_memory().unwrap();
        let project = ProjectRow::new("Docs", Vec::new());
        project_repo::insert(&db, &project).unwrap();
        let queue = Arc::new(Recorder::default());
        let workflow = WorkflowStateMachine::new(
            db.clone(),
            queue.clone(),
            FeatureSettings {
                cascade_section_suggestions: cascade,
            },
        );
        (db, queue, workflow, project)
    }

    #[test]
    fn test_begin_is_exclusive() {
        let (_db, _queue, workflow, project) = setup(true);
        let target = StatusTarget::project_analysis(&project.id);
        let token = claim(&workflow, &target);
        assert_eq!(workflow.begin(&target).unwrap(), Claim::AlreadyRunning);
        workflow.resolve(&target, &token, RunStatus::Failed).unwrap();
        claim(&workflow, &target);
        assert_eq!(
            workflow.begin(&StatusTarget::project_analysis("gone")).unwrap(),
            Claim::Missing
        );
    }

    #[test]
    fn test_resolve_rejects_non_terminal() {
        let (_db, _queue, workflow, project) = setup(true);
        let target = StatusTarget::project_analysis(&project.id);
        let token = claim(&workflow, &target);
        assert!(matches!(
            workflow.resolve(&target, &token, RunStatus::Running),
            Err(WorkflowError::NotTerminal { .. })
        ));
    }

    #[test]
    fn test_completed_analysis_advances_onboarding_and_enqueues() {
        let (db, queue, workflow, project) = setup(true);
        let target = StatusTarget::project_analysis(&project.id);
        assert!(run_to(&workflow, &target, RunStatus::Completed));

        let stored = project_repo::find_by_id(&db, &project.id).unwrap().unwrap();
        assert_eq!(stored.onboarding_step, OnboardingStep::Sections);
        assert_eq!(
            queue.0.lock().unwrap().as_slice(),
            &[JobRequest::SuggestSections {
                project_id: project.id.clone()
            }]
        );
    }

    #[test]
    fn test_failed_analysis_and_disabled_toggle_do_not_cascade() {
        let (db, queue, workflow, project) = setup(false);
        let target = StatusTarget::project_analysis(&project.id);
        run_to(&workflow, &target, RunStatus::Failed);
        let stored = project_repo::find_by_id(&db, &project.id).unwrap().unwrap();
        assert_eq!(stored.onboarding_step, OnboardingStep::Analyze);

        run_to(&workflow, &target, RunStatus::Completed);
        assert!(queue.0.lock().unwrap().is_empty());
        let stored = project_repo::find_by_id(&db, &project.id).unwrap().unwrap();
        assert_eq!(stored.onboarding_step, OnboardingStep::Sections);
    }

    #[test]
    fn test_last_accepted_section_completes_onboarding() {
        let (db, _queue, workflow, project) = setup(true);
        project_repo::set_onboarding_step(&db, &project.id, OnboardingStep::Generating).unwrap();
        let mut first = SectionRow::new(&project.id, "Guides", None, 0);
        first.status = SectionStatus::Accepted;
        let mut second = SectionRow::new(&project.id, "API", None, 1);
        second.status = SectionStatus::Accepted;
        section_repo::insert(&db, &first).unwrap();
        section_repo::insert(&db, &second).unwrap();

        let first_target = StatusTarget::section_recommendations(&first.id);
        let second_target = StatusTarget::section_recommendations(&second.id);
        let first_token = claim(&workflow, &first_target);
        let second_token = claim(&workflow, &second_target);

        workflow
            .resolve(&first_target, &first_token, RunStatus::Completed)
            .unwrap();
        let stored = project_repo::find_by_id(&db, &project.id).unwrap().unwrap();
        assert_eq!(stored.onboarding_step, OnboardingStep::Generating);

        workflow
            .resolve(&second_target, &second_token, RunStatus::Failed)
            .unwrap();
        let stored = project_repo::find_by_id(&db, &project.id).unwrap().unwrap();
        assert_eq!(stored.onboarding_step, OnboardingStep::Complete);
    }

    #[test]
    fn test_review_only_after_completion() {
        let (db, _queue, workflow, project) = setup(true);
        let rec = RecommendationRow::new(&project.id, "Guide");
        recommendation_repo::insert(&db, &rec).unwrap();
        let article = ArticleRow::new(&project.id, &rec.id, None, "Guide");
        article_repo::insert(&db, &article).unwrap();

        assert!(matches!(
            workflow.set_review_status(&article.id, ReviewStatus::Approved),
            Err(WorkflowError::GenerationIncomplete { .. })
        ));
        run_to(
            &workflow,
            &StatusTarget::article_generation(&article.id),
            RunStatus::Completed,
        );
        workflow
            .set_review_status(&article.id, ReviewStatus::Approved)
            .unwrap();
        assert!(matches!(
            workflow.set_review_status("gone", ReviewStatus::Rejected),
            Err(WorkflowError::TargetMissing { .. })
        ));
    }

    #[test]
    fn test_reap_stale_fails_old_runs_only() {
        let (db, queue, workflow, project) = setup(true);
        let target = StatusTarget::project_analysis(&project.id);
        let token = claim(&workflow, &target);

        assert!(workflow.reap_stale(Duration::from_secs(3600)).unwrap().is_empty());
        assert_eq!(workflow.current(&target).unwrap(), Some(RunStatus::Running));

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE projects SET updated_at = '2000-01-01T00:00:00.000Z' WHERE id = ?1",
                [&project.id],
            )?;
            Ok(())
        })
        .unwrap();
        let reaped = workflow.reap_stale(Duration::from_secs(3600)).unwrap();
        assert_eq!(reaped, vec![target.clone()]);
        assert_eq!(workflow.current(&target).unwrap(), Some(RunStatus::Failed));

        // The reaped run finishing late changes nothing and fires no cascade.
        assert!(!workflow
            .resolve(&target, &token, RunStatus::Completed)
            .unwrap());
        assert_eq!(workflow.current(&target).unwrap(), Some(RunStatus::Failed));
        let stored = project_repo::find_by_id(&db, &project.id).unwrap().unwrap();
        assert_eq!(stored.onboarding_step, OnboardingStep::Analyze);
        assert!(queue.0.lock().unwrap().is_empty());
    }
}
