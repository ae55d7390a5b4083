//! End-to-end job runs against the scripted sandbox.

mod common;

use docsmith::broadcast::EventOutcome;
use docsmith::db::project_repo;
use docsmith::db::recommendation_repo::{self, RecommendationScope};
use docsmith::db::section_repo;
use docsmith::db::update_check_repo::{self, UpdateCheckRow};
use docsmith::db::update_repo::{self, UpdateRow};
use docsmith::domain::{
    OnboardingStep, RecommendationStatus, ReviewStatus, RunStatus, SuggestionType,
};
use docsmith::jobs::{FailureKind, JobOutcome, JobRequest};
use docsmith::sandbox::{EntryPoint, API_KEY_ENV, MODEL_ENV, REPOSITORY_TOKEN_ENV};
use docsmith::workflow::StatusTarget;

use common::harness::{TEST_API_KEY, TEST_REPO_TOKEN};
use common::{Script, TestHarness};

const EMPTY_DIFF: &str = "diff --git a/README.md b/README.md\nindex 1111111..1111111 100644\n";

fn section_recommendations(harness: &TestHarness, section_id: &str) -> Vec<recommendation_repo::RecommendationRow> {
    recommendation_repo::list_in_scope(
        &harness.db,
        &RecommendationScope::Section(section_id.to_string()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_empty_commit_completes_and_advances_baseline() {
    let harness = TestHarness::new();
    let project = harness.project();
    let update = UpdateRow::commit(&project.id, "abc123def4567890", "Touch README");
    update_repo::insert(&harness.db, &update).unwrap();
    harness.source_host.set_diff(EMPTY_DIFF);
    harness.script(Script::file("recommendations.json", r#"{"articles": []}"#));

    let report = harness
        .run(JobRequest::AnalyzeCommit {
            update_id: update.id.clone(),
        })
        .await;

    assert!(report.is_completed(), "unexpected outcome: {:?}", report.outcome);
    let update = update_repo::find_by_id(&harness.db, &update.id).unwrap().unwrap();
    assert_eq!(update.analysis_status, RunStatus::Completed);
    assert!(recommendation_repo::list_by_project(&harness.db, &project.id)
        .unwrap()
        .is_empty());
    assert_eq!(
        project_repo::baseline(&harness.db, &project.id).unwrap().as_deref(),
        Some("abc123def4567890")
    );
}

#[tokio::test]
async fn test_article_timeout_stores_fallback() {
    let harness = TestHarness::new();
    let project = harness.project();
    let article = harness.article(&project.id, "Setup Guide");
    harness.script(Script::Timeout);

    let report = harness
        .run(JobRequest::GenerateArticle {
            article_id: article.id.clone(),
        })
        .await;

    assert_eq!(report.failure().map(|f| f.kind), Some(FailureKind::Timeout));
    let article = harness.reload_article(&article.id);
    assert_eq!(article.generation_status, RunStatus::Failed);
    let content = article.content.expect("fallback content");
    assert!(content.contains("Setup Guide"));
    assert!(content.contains("How to use Setup Guide"));
}

#[tokio::test]
async fn test_fenced_recommendations_are_persisted() {
    let harness = TestHarness::new();
    let project = harness.project();
    let section = harness.accepted_section(&project.id, "Getting Started");
    harness.script(Script::file(
        "recommendations.json",
        "```json\n{\"articles\":[{\"title\":\"Setup Guide\",\"description\":\"Install and configure\",\"justification\":\"New users\"}]}\n```",
    ));

    let report = harness
        .run(JobRequest::GenerateSectionRecommendations {
            section_id: section.id.clone(),
        })
        .await;

    assert!(report.is_completed(), "unexpected outcome: {:?}", report.outcome);
    let recs = section_recommendations(&harness, &section.id);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].title, "Setup Guide");
    assert_eq!(recs[0].status, RecommendationStatus::Pending);
    let section = section_repo::find_by_id(&harness.db, &section.id).unwrap().unwrap();
    assert_eq!(section.recommendations_status, Some(RunStatus::Completed));
}

#[tokio::test]
async fn test_rerun_replaces_section_recommendations() {
    let harness = TestHarness::new();
    let project = harness.project();
    let section = harness.accepted_section(&project.id, "Guides");
    let old_ids: Vec<String> = ["One", "Two", "Three"]
        .iter()
        .map(|title| harness.recommendation(&project.id, Some(&section.id), title).id)
        .collect();
    harness.script(Script::file(
        "recommendations.json",
        r#"{"articles":[{"title":"Alpha"},{"title":"Beta"}]}"#,
    ));

    let report = harness
        .run(JobRequest::GenerateSectionRecommendations {
            section_id: section.id.clone(),
        })
        .await;

    assert!(report.is_completed(), "unexpected outcome: {:?}", report.outcome);
    let recs = section_recommendations(&harness, &section.id);
    assert_eq!(recs.len(), 2);
    assert!(recs.iter().all(|r| !old_ids.contains(&r.id)));
    let mut titles: Vec<_> = recs.iter().map(|r| r.title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["Alpha", "Beta"]);
}

#[tokio::test]
async fn test_update_check_drops_unresolved_suggestions() {
    let harness = TestHarness::new();
    let project = harness.project();
    let existing = harness.article(&project.id, "Configuration");
    let check = UpdateCheckRow::new(&project.id, "1111111", "2222222");
    update_check_repo::insert(&harness.db, &check).unwrap();
    harness.source_host.set_diff("diff --git a/a b/a\n+new line\n");
    let suggestions = serde_json::json!({
        "summary": "Two changes",
        "suggestions": [
            { "type": "update_needed", "articleId": "does-not-exist", "title": "Fix ghost" },
            { "type": "update_needed", "articleId": existing.id, "title": "Refresh config" },
            { "type": "new_article", "title": "Write about plugins", "priority": "HIGH" }
        ]
    });
    harness.script(Script::file("suggestions.json", suggestions.to_string()));

    let report = harness
        .run(JobRequest::CheckArticleUpdates {
            check_id: check.id.clone(),
        })
        .await;

    assert!(report.is_completed(), "unexpected outcome: {:?}", report.outcome);
    let stored = update_check_repo::list_suggestions(&harness.db, &check.id).unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|s| s.title != "Fix ghost"));
    let new_article = stored
        .iter()
        .find(|s| s.suggestion_type == SuggestionType::NewArticle)
        .unwrap();
    assert_eq!(new_article.article_id, None);
    let update_needed = stored
        .iter()
        .find(|s| s.suggestion_type == SuggestionType::UpdateNeeded)
        .unwrap();
    assert_eq!(update_needed.article_id.as_deref(), Some(existing.id.as_str()));
    let check = update_check_repo::find_by_id(&harness.db, &check.id).unwrap().unwrap();
    assert_eq!(check.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_failed_analysis_keeps_baseline() {
    let harness = TestHarness::new();
    let project = harness.project();
    harness.source_host.set_diff("diff --git a/x b/x\n+one\n+two\n");

    let first = UpdateRow::commit(&project.id, "aaaaaaaaaaaa", "First");
    update_repo::insert(&harness.db, &first).unwrap();
    harness.script(Script::file("summary.md", "Small change"));
    let report = harness
        .run(JobRequest::AnalyzeCommit {
            update_id: first.id.clone(),
        })
        .await;
    assert!(report.is_completed());

    let second = UpdateRow::commit(&project.id, "bbbbbbbbbbbb", "Second");
    update_repo::insert(&harness.db, &second).unwrap();
    harness.script(Script::Exit(2));
    let report = harness
        .run(JobRequest::AnalyzeCommit {
            update_id: second.id.clone(),
        })
        .await;

    assert_eq!(report.failure().map(|f| f.kind), Some(FailureKind::Subprocess));
    assert_eq!(
        project_repo::baseline(&harness.db, &project.id).unwrap().as_deref(),
        Some("aaaaaaaaaaaa")
    );
    let second = update_repo::find_by_id(&harness.db, &second.id).unwrap().unwrap();
    assert_eq!(second.analysis_status, RunStatus::Failed);
    let summary = second.summary.expect("fallback summary");
    assert!(summary.contains("Second"));
    assert!(summary.contains("3 lines"));
}

#[tokio::test]
async fn test_pull_request_analysis_advances_baseline_to_merge_sha() {
    let harness = TestHarness::new();
    let project = harness.project();
    let update = UpdateRow::pull_request(
        &project.id,
        "feedface0000111122223333444455556666aaaa",
        42,
        "Add webhooks",
        Some("Adds outbound webhooks.".to_string()),
    );
    update_repo::insert(&harness.db, &update).unwrap();
    harness
        .source_host
        .set_diff("diff --git a/hooks.rs b/hooks.rs\n+pub fn deliver() {}\n");
    harness.script(Script::Files(vec![
        ("summary.md", "Adds webhook delivery.".to_string()),
        (
            "recommendations.json",
            r#"{"articles":[{"title":"Webhooks","description":"Receiving events"}]}"#.to_string(),
        ),
    ]));

    let report = harness
        .run(JobRequest::AnalyzePullRequest {
            update_id: update.id.clone(),
        })
        .await;

    assert!(report.is_completed(), "unexpected outcome: {:?}", report.outcome);
    assert_eq!(harness.source_host.methods(), vec!["pull_request_diff"]);
    let calls = harness.sandbox.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].entry_point, EntryPoint::AnalyzePr);
    assert!(calls[0].context_json.contains("\"pull_request\""));
    assert!(calls[0].context_json.contains("\"number\": 42"));
    assert!(calls[0].context_json.contains("Adds outbound webhooks."));

    let stored = update_repo::find_by_id(&harness.db, &update.id).unwrap().unwrap();
    assert_eq!(stored.analysis_status, RunStatus::Completed);
    assert_eq!(stored.summary.as_deref(), Some("Adds webhook delivery."));
    let recs = recommendation_repo::list_in_scope(
        &harness.db,
        &RecommendationScope::Update(update.id.clone()),
    )
    .unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].title, "Webhooks");
    assert_eq!(
        project_repo::baseline(&harness.db, &project.id).unwrap().as_deref(),
        Some("feedface0000111122223333444455556666aaaa")
    );
}

#[tokio::test]
async fn test_failed_pull_request_analysis_keeps_baseline() {
    let harness = TestHarness::new();
    let project = harness.project();
    harness.source_host.set_diff("diff --git a/x b/x\n+one\n+two\n");

    let merged = UpdateRow::commit(&project.id, "aaaaaaaaaaaa", "Earlier");
    update_repo::insert(&harness.db, &merged).unwrap();
    harness.script(Script::file("summary.md", "Earlier change"));
    assert!(harness
        .run(JobRequest::AnalyzeCommit {
            update_id: merged.id.clone(),
        })
        .await
        .is_completed());

    let update = UpdateRow::pull_request(&project.id, "bbbbbbbbbbbb", 7, "Refactor storage", None);
    update_repo::insert(&harness.db, &update).unwrap();
    harness.script(Script::Timeout);
    let report = harness
        .run(JobRequest::AnalyzePullRequest {
            update_id: update.id.clone(),
        })
        .await;

    assert_eq!(report.failure().map(|f| f.kind), Some(FailureKind::Timeout));
    assert_eq!(
        project_repo::baseline(&harness.db, &project.id).unwrap().as_deref(),
        Some("aaaaaaaaaaaa")
    );
    let stored = update_repo::find_by_id(&harness.db, &update.id).unwrap().unwrap();
    assert_eq!(stored.analysis_status, RunStatus::Failed);
    let summary = stored.summary.expect("fallback summary");
    assert!(summary.contains("Pull request #7 (bbbbbbb)"), "{summary}");
    assert!(summary.contains("Refactor storage"));
    assert!(summary.contains("3 lines"));

    let events = harness.events.events();
    let last = events.last().expect("failure event");
    assert_eq!(last.outcome, EventOutcome::Failed);
    assert_eq!(last.entity_id, update.id);
}

#[tokio::test]
async fn test_unparseable_output_fails_the_run() {
    let harness = TestHarness::new();
    let project = harness.project();
    let section = harness.accepted_section(&project.id, "Reference");
    harness.script(Script::file("recommendations.json", "{ this is not json"));

    let report = harness
        .run(JobRequest::GenerateSectionRecommendations {
            section_id: section.id.clone(),
        })
        .await;

    assert_eq!(report.failure().map(|f| f.kind), Some(FailureKind::OutputParse));
    let section = section_repo::find_by_id(&harness.db, &section.id).unwrap().unwrap();
    assert_eq!(section.recommendations_status, Some(RunStatus::Failed));
}

#[tokio::test]
async fn test_panic_resolves_to_failed() {
    let harness = TestHarness::new();
    let project = harness.project();
    let article = harness.article(&project.id, "Deployment");
    harness.script(Script::Panic);

    let report = harness
        .run(JobRequest::GenerateArticle {
            article_id: article.id.clone(),
        })
        .await;

    assert_eq!(report.failure().map(|f| f.kind), Some(FailureKind::Panic));
    let article = harness.reload_article(&article.id);
    assert_eq!(article.generation_status, RunStatus::Failed);
    assert!(article.content.unwrap_or_default().contains("Deployment"));

    let events = harness.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, EventOutcome::Failed);
    assert_eq!(events[0].entity_id, article.id);
}

#[tokio::test]
async fn test_every_invocation_records_usage() {
    let harness = TestHarness::new();
    let project = harness.project();
    let section = harness.accepted_section(&project.id, "Tutorials");
    let article = harness.article(&project.id, "First Steps");

    harness.script(Script::Files(vec![
        ("recommendations.json", r#"{"articles":[{"title":"Intro"}]}"#.to_string()),
        (
            "usage.json",
            r#"{"inputTokens": 1200, "outputTokens": 300, "costUsd": 0.02}"#.to_string(),
        ),
    ]));
    harness
        .run(JobRequest::GenerateSectionRecommendations {
            section_id: section.id.clone(),
        })
        .await;
    harness.script(Script::Timeout);
    harness
        .run(JobRequest::GenerateArticle {
            article_id: article.id.clone(),
        })
        .await;
    harness.script(Script::file("recommendations.json", "[]"));
    harness
        .run(JobRequest::GenerateSectionRecommendations {
            section_id: section.id.clone(),
        })
        .await;

    let mut usage = harness.usage(&project.id);
    usage.sort_by(|a, b| a.job_type.cmp(&b.job_type).then(a.success.cmp(&b.success)));
    assert_eq!(harness.sandbox.call_count(), 3);
    assert_eq!(usage.len(), 3);

    assert_eq!(usage[0].job_type, "article_generation");
    assert!(!usage[0].success);
    assert!(usage[0].error.as_deref().unwrap_or("").contains("timed out"));

    // A clean exit with unusable output is still a successful invocation.
    assert_eq!(usage[1].job_type, "section_recommendations");
    assert_eq!(usage[2].job_type, "section_recommendations");
    assert!(usage[1].success && usage[2].success);
    assert_eq!(usage.iter().map(|u| u.input_tokens).sum::<u64>(), 1200);
    assert!(usage.iter().all(|u| u.model.as_deref() == Some("test-model")));
}

#[tokio::test]
async fn test_missing_api_key_is_a_configuration_failure() {
    let harness = TestHarness::with_api_key(None);
    let project = harness.project();
    let article = harness.article(&project.id, "Upgrading");

    let report = harness
        .run(JobRequest::GenerateArticle {
            article_id: article.id.clone(),
        })
        .await;

    let failure = report.failure().expect("run should fail");
    assert_eq!(failure.kind, FailureKind::Configuration);
    assert!(failure.message.contains(API_KEY_ENV));
    assert_eq!(harness.sandbox.call_count(), 0);
    assert_eq!(harness.reload_article(&article.id).generation_status, RunStatus::Failed);

    let usage = harness.usage(&project.id);
    assert_eq!(usage.len(), 1);
    assert!(!usage[0].success);
}

#[tokio::test]
async fn test_secrets_stay_out_of_the_context_payload() {
    let harness = TestHarness::new();
    let project = harness.project();
    let article = harness.article(&project.id, "Security");
    harness.script(Script::file("content.md", "# Security\n\nUse tokens."));

    let report = harness
        .run(JobRequest::GenerateArticle {
            article_id: article.id.clone(),
        })
        .await;
    assert!(report.is_completed(), "unexpected outcome: {:?}", report.outcome);

    let calls = harness.sandbox.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert!(call.context_json.contains("Security"));
    assert!(!call.context_json.contains(TEST_API_KEY));
    assert!(!call.context_json.contains(TEST_REPO_TOKEN));
    for name in [API_KEY_ENV, MODEL_ENV, REPOSITORY_TOKEN_ENV] {
        assert!(call.env_names.iter().any(|n| n == name), "{name} not passed");
    }

    let article = harness.reload_article(&article.id);
    assert_eq!(article.generation_status, RunStatus::Completed);
    assert!(article.content.unwrap_or_default().contains("Use tokens."));
}

#[tokio::test]
async fn test_claimed_target_is_not_run_twice() {
    let harness = TestHarness::new();
    let project = harness.project();
    let article = harness.article(&project.id, "Locking");
    harness
        .runner
        .workflow()
        .begin(&StatusTarget::article_generation(&article.id))
        .unwrap();

    let report = harness
        .run(JobRequest::GenerateArticle {
            article_id: article.id.clone(),
        })
        .await;

    assert_eq!(report.outcome, JobOutcome::AlreadyRunning);
    assert_eq!(harness.sandbox.call_count(), 0);
    assert!(harness.events.events().is_empty());
}

#[tokio::test]
async fn test_missing_target_exits_quietly() {
    let harness = TestHarness::new();

    let report = harness
        .run(JobRequest::GenerateArticle {
            article_id: "gone".to_string(),
        })
        .await;

    assert!(matches!(report.outcome, JobOutcome::Skipped { .. }));
    assert_eq!(harness.sandbox.call_count(), 0);
    assert!(harness.events.events().is_empty());
}

#[tokio::test]
async fn test_codebase_analysis_cascades_to_section_suggestions() {
    let harness = TestHarness::new();
    let project = harness.project();
    harness.script(Script::Files(vec![
        (
            "metadata.json",
            r#"{"techStack": ["Rust", "tokio"], "components": ["api"]}"#.to_string(),
        ),
        ("summary.md", "A widget service.".to_string()),
    ]));

    let report = harness
        .run(JobRequest::AnalyzeCodebase {
            project_id: project.id.clone(),
        })
        .await;

    assert!(report.is_completed(), "unexpected outcome: {:?}", report.outcome);
    let project = harness.reload_project(&project.id);
    assert_eq!(project.analysis_status, RunStatus::Completed);
    assert_eq!(project.onboarding_step, OnboardingStep::Sections);
    let metadata = project.analysis_metadata.expect("metadata stored");
    assert_eq!(metadata.tech_stack, vec!["Rust", "tokio"]);
    assert_eq!(metadata.summary.as_deref(), Some("A widget service."));
    assert_eq!(
        project.analysis_commit_sha.as_deref(),
        Some("0123456789abcdef0123456789abcdef01234567")
    );
    assert_eq!(
        harness.queue.requests(),
        vec![JobRequest::SuggestSections {
            project_id: project.id.clone(),
        }]
    );
}

#[tokio::test]
async fn test_upstream_failure_fails_commit_analysis() {
    let harness = TestHarness::new();
    let project = harness.project();
    let update = UpdateRow::commit(&project.id, "cccccccccccc", "Broken fetch");
    update_repo::insert(&harness.db, &update).unwrap();
    harness.source_host.set_failing(true);

    let report = harness
        .run(JobRequest::AnalyzeCommit {
            update_id: update.id.clone(),
        })
        .await;

    assert_eq!(report.failure().map(|f| f.kind), Some(FailureKind::Upstream));
    assert_eq!(harness.sandbox.call_count(), 0);
    let update = update_repo::find_by_id(&harness.db, &update.id).unwrap().unwrap();
    assert_eq!(update.analysis_status, RunStatus::Failed);
    assert!(update
        .summary
        .unwrap_or_default()
        .contains("could not be retrieved"));
}

#[tokio::test]
async fn test_all_recommendations_completes_onboarding() {
    let harness = TestHarness::new();
    let project = harness.project();
    project_repo::set_onboarding_step(&harness.db, &project.id, OnboardingStep::Generating)
        .unwrap();
    let install = harness.accepted_section(&project.id, "Install");
    let usage = harness.accepted_section(&project.id, "Usage");
    harness.script(Script::file(
        "recommendations.json",
        r#"{"articles":[
            {"title":"Installing on Linux","sectionName":"install"},
            {"title":"First request","sectionName":"Usage"}
        ]}"#,
    ));

    let report = harness
        .run(JobRequest::GenerateAllRecommendations {
            project_id: project.id.clone(),
        })
        .await;

    assert!(report.is_completed(), "unexpected outcome: {:?}", report.outcome);
    assert_eq!(section_recommendations(&harness, &install.id).len(), 1);
    assert_eq!(section_recommendations(&harness, &usage.id).len(), 1);
    for id in [&install.id, &usage.id] {
        let section = section_repo::find_by_id(&harness.db, id).unwrap().unwrap();
        assert_eq!(section.recommendations_status, Some(RunStatus::Completed));
    }
    assert_eq!(
        harness.reload_project(&project.id).onboarding_step,
        OnboardingStep::Complete
    );
}

#[tokio::test]
async fn test_review_requires_generated_article() {
    let harness = TestHarness::new();
    let project = harness.project();
    let article = harness.article(&project.id, "Reviewing");
    let workflow = harness.runner.workflow();

    assert!(workflow
        .set_review_status(&article.id, ReviewStatus::Approved)
        .is_err());

    harness.script(Script::file("content.md", "Body"));
    let report = harness
        .run(JobRequest::GenerateArticle {
            article_id: article.id.clone(),
        })
        .await;
    assert!(report.is_completed());

    workflow
        .set_review_status(&article.id, ReviewStatus::Approved)
        .unwrap();
    assert_eq!(
        harness.reload_article(&article.id).review_status,
        ReviewStatus::Approved
    );
}
