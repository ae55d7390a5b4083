//! Test harness for running jobs in isolation.
//!
//! Each harness owns an in-memory database, a temp staging directory and a
//! `JobRunner` wired to the fakes, so a test can seed rows, script the
//! sandbox and call `run` directly without a worker pool.

#![allow(dead_code)]

use std::sync::Arc;

use secrecy::SecretString;
use tempfile::TempDir;

use docsmith::config::Settings;
use docsmith::db::article_repo::{self, ArticleRow};
use docsmith::db::project_repo::{self, ProjectRow};
use docsmith::db::recommendation_repo::{self, RecommendationRow};
use docsmith::db::section_repo::{self, SectionRow};
use docsmith::db::usage_repo::{self, UsageRow};
use docsmith::db::Database;
use docsmith::domain::{RepositoryRef, SectionStatus};
use docsmith::jobs::{JobEnv, JobReport, JobRequest, JobRunner};
use docsmith::service::ServiceComponents;
use docsmith::upstream::StaticTokenProvider;

use super::fakes::{FakeSourceHost, RecordingQueue, RecordingSink, Script, ScriptedSandbox};

pub const TEST_API_KEY: &str = "sk-test-api-key-7f3a9c";
pub const TEST_REPO_TOKEN: &str = "ghs-test-repo-token-41bd";
pub const TEST_MODEL: &str = "test-model";

pub struct TestHarness {
    staging: TempDir,
    pub db: Database,
    pub sandbox: Arc<ScriptedSandbox>,
    pub source_host: Arc<FakeSourceHost>,
    pub queue: Arc<RecordingQueue>,
    pub events: Arc<RecordingSink>,
    pub runner: JobRunner,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_api_key(Some(TEST_API_KEY))
    }

    /// A harness whose runner has the given API key (or none).
    pub fn with_api_key(api_key: Option<&str>) -> Self {
        let staging = TempDir::new().expect("Failed to create staging directory");
        let db = Database::open_in_memory().expect("Failed to open database");
        let sandbox = Arc::new(ScriptedSandbox::default());
        let source_host = Arc::new(FakeSourceHost::default());
        let queue = Arc::new(RecordingQueue::default());
        let events = Arc::new(RecordingSink::default());

        let runner = JobRunner::new(JobEnv {
            db: db.clone(),
            settings: Arc::new(Self::settings(&staging)),
            sandbox: sandbox.clone(),
            source_host: source_host.clone(),
            tokens: Arc::new(StaticTokenProvider::new(Some(SecretString::from(
                TEST_REPO_TOKEN.to_string(),
            )))),
            notifications: events.clone(),
            queue: queue.clone(),
            api_key: api_key.map(|key| SecretString::from(key.to_string())),
        });

        Self {
            staging,
            db,
            sandbox,
            source_host,
            queue,
            events,
            runner,
        }
    }

    fn settings(staging: &TempDir) -> Settings {
        Settings {
            staging_directory: Some(staging.path().to_path_buf()),
            model: Some(TEST_MODEL.to_string()),
            worker_count: 2,
            ..Settings::default()
        }
    }

    /// Settings and fake components for starting a full service.
    pub fn service_parts(&self) -> (Settings, ServiceComponents) {
        let mut settings = Self::settings(&self.staging);
        settings.sweep.enabled = false;
        let components = ServiceComponents {
            db: self.db.clone(),
            sandbox: self.sandbox.clone(),
            source_host: self.source_host.clone(),
            tokens: Arc::new(StaticTokenProvider::new(Some(SecretString::from(
                TEST_REPO_TOKEN.to_string(),
            )))),
            api_key: Some(SecretString::from(TEST_API_KEY.to_string())),
        };
        (settings, components)
    }

    pub fn script(&self, script: Script) {
        self.sandbox.push(script);
    }

    pub async fn run(&self, request: JobRequest) -> JobReport {
        self.runner.run(request).await
    }

    /// A project with one repository attached.
    pub fn project(&self) -> ProjectRow {
        let project = ProjectRow::new(
            "Acme Docs",
            vec![RepositoryRef::new("acme/widgets", "main")],
        );
        project_repo::insert(&self.db, &project).expect("Failed to insert project");
        project
    }

    pub fn reload_project(&self, id: &str) -> ProjectRow {
        project_repo::find_by_id(&self.db, id)
            .expect("Failed to load project")
            .expect("project missing")
    }

    pub fn accepted_section(&self, project_id: &str, name: &str) -> SectionRow {
        let section = SectionRow::new(project_id, name, Some(format!("All about {name}")), 0);
        section_repo::insert(&self.db, &section).expect("Failed to insert section");
        section_repo::set_status(&self.db, &section.id, SectionStatus::Accepted)
            .expect("Failed to accept section");
        section_repo::find_by_id(&self.db, &section.id)
            .expect("Failed to load section")
            .expect("section missing")
    }

    pub fn recommendation(
        &self,
        project_id: &str,
        section_id: Option<&str>,
        title: &str,
    ) -> RecommendationRow {
        let mut rec = RecommendationRow::new(project_id, title);
        rec.section_id = section_id.map(str::to_string);
        rec.description = format!("How to use {title}");
        rec.justification = "Frequently asked".to_string();
        recommendation_repo::insert(&self.db, &rec).expect("Failed to insert recommendation");
        rec
    }

    /// An article waiting for generation, backed by a fresh recommendation.
    pub fn article(&self, project_id: &str, title: &str) -> ArticleRow {
        let rec = self.recommendation(project_id, None, title);
        let article = ArticleRow::new(project_id, &rec.id, None, title);
        article_repo::insert(&self.db, &article).expect("Failed to insert article");
        article
    }

    pub fn reload_article(&self, id: &str) -> ArticleRow {
        article_repo::find_by_id(&self.db, id)
            .expect("Failed to load article")
            .expect("article missing")
    }

    pub fn usage(&self, project_id: &str) -> Vec<UsageRow> {
        usage_repo::list_by_project(&self.db, project_id).expect("Failed to list usage")
    }
}
