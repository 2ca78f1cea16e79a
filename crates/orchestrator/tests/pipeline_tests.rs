use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use db::{create_pool, run_migrations, BatchJobRepository, CampaignRepository, Claim, SqlitePool};
use hookline_core::{
    BatchJob, BatchKind, BatchStatus, Campaign, CampaignStatus, CreateCampaignRequest, Phase,
};
use orchestrator::{
    CampaignPipeline, OrchestratorError, PipelineConfig, ReconcileAction,
};
use provider::testing::FakeProvider;
use provider::{BatchItemOutcome, BatchRequest, Provider, ProviderError, RetryPolicy};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::watch;

const CATEGORIES: [&str; 7] = [
    "curiosity",
    "urgency",
    "proof",
    "story",
    "contrast",
    "question",
    "benefit",
];
const HOOKS_PER_CATEGORY: usize = 3;

async fn setup_db() -> (SqlitePool, TempDir) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("pipeline.db").display());
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (pool, dir)
}

fn config() -> PipelineConfig {
    PipelineConfig::default().with_retry(RetryPolicy::no_delay(2))
}

fn pipeline(pool: &SqlitePool, fake: &Arc<FakeProvider>, config: PipelineConfig) -> CampaignPipeline {
    let provider: Arc<dyn Provider> = fake.clone();
    CampaignPipeline::new(pool.clone(), provider, config)
}

fn angles_response() -> Value {
    let angles = |prefix: &str| -> Vec<Value> {
        (1..=7)
            .map(|n| {
                json!({
                    "number": n,
                    "category": format!("{} {}", prefix, n),
                    "concept": format!("{} concept {}", prefix, n),
                })
            })
            .collect()
    };
    json!({
        "positive_angles": angles("Gain"),
        "negative_angles": angles("Pain"),
    })
}

/// The `target` section of a rendered batch context.
fn target(request: &BatchRequest) -> Value {
    let bundle: Value = serde_json::from_str(&request.context).unwrap();
    bundle["sections"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "target")
        .map(|s| s["content"].clone())
        .unwrap()
}

fn hooks_for(angle_id: &str) -> Value {
    let mut by_category = serde_json::Map::new();
    for category in CATEGORIES {
        let hooks: Vec<Value> = (1..=HOOKS_PER_CATEGORY)
            .map(|n| {
                json!({
                    "hook_id": format!("{}{}", category, n),
                    "hook_text": format!("{} {} hook {}", angle_id, category, n),
                })
            })
            .collect();
        by_category.insert(category.to_string(), Value::Array(hooks));
    }
    json!({"angle_id": angle_id, "hooks_by_category": by_category})
}

fn scripts_for(angle_id: &str, hook_id: &str) -> Value {
    json!({
        "angle_id": angle_id,
        "hooks": [{
            "hook_id": hook_id,
            "scripts": [{
                "script_id": "s1",
                "content": format!("script for {}", hook_id),
                "cta": "Buy now",
            }]
        }]
    })
}

fn hooks_responder(request: &BatchRequest) -> Option<BatchItemOutcome> {
    let target = target(request);
    let angle_id = target["angle_id"].as_str()?;
    Some(BatchItemOutcome::Succeeded(hooks_for(angle_id)))
}

fn scripts_responder(request: &BatchRequest) -> Option<BatchItemOutcome> {
    let target = target(request);
    let angle_id = target["angle_id"].as_str()?;
    let hook_id = target["hook_id"].as_str()?;
    Some(BatchItemOutcome::Succeeded(scripts_for(angle_id, hook_id)))
}

fn queue_single_shot_responses(fake: &FakeProvider) {
    fake.push_response("avatar", json!({"persona": "busy parent", "age": "30-45"}));
    fake.push_response("journey", json!({"stages": ["aware", "compare", "buy"]}));
    fake.push_response("objections", json!({"objections": ["price", "trust"]}));
    fake.push_response("angles", angles_response());
}

async fn campaign_with_angles(pipeline: &CampaignPipeline, fake: &FakeProvider) -> Campaign {
    queue_single_shot_responses(fake);
    let campaign = pipeline
        .create_campaign(CreateCampaignRequest {
            owner: "user-1".to_string(),
            product_info: json!({"name": "Kettle", "description": "Boils fast"}),
        })
        .await
        .unwrap();

    for phase in [Phase::Avatar, Phase::Journey, Phase::Objections, Phase::Angles] {
        pipeline.run_phase(campaign.id, phase).await.unwrap();
    }
    let campaign = pipeline.get(campaign.id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::AnglesGenerated);
    assert_eq!(campaign.angles.len(), 14);
    campaign
}

async fn campaign_with_hooks(pipeline: &CampaignPipeline, fake: &FakeProvider) -> Campaign {
    let campaign = campaign_with_angles(pipeline, fake).await;
    fake.set_batch_responder(hooks_responder);
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::HooksBatchCompleted);
    assert_eq!(outcome.campaign.hooks.len(), 294);
    outcome.campaign
}

fn assert_graph_is_consistent(campaign: &Campaign) {
    let angle_ids: HashSet<&str> = campaign.angles.iter().map(|a| a.id.as_str()).collect();
    let hook_ids: HashSet<&str> = campaign.hooks.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(hook_ids.len(), campaign.hooks.len(), "hook ids are unique");
    assert!(campaign.hooks.iter().all(|h| angle_ids.contains(h.angle_id.as_str())));
    assert!(campaign.scripts.iter().all(|s| hook_ids.contains(s.hook_id.as_str())));
}

#[tokio::test]
async fn test_fourteen_angles_fan_out_to_294_hooks() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new().with_polls_before_end(1));
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);

    let submitted = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(submitted.created);
    assert_eq!(submitted.job.request_count, 14);
    assert!(submitted.job.custom_ids.iter().all(|id| id.starts_with("hooks-")));
    let stored = pipeline.get(campaign.id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::HooksBatchSubmitted);
    assert_eq!(stored.hooks_batch_id, submitted.job.external_batch_id);

    let first = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(first.action, ReconcileAction::InFlight);
    assert_eq!(first.campaign.batch_status, Some(BatchStatus::Processing));
    assert_eq!(first.poll.unwrap().processing_count, 14);

    let second = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(second.action, ReconcileAction::Harvested);
    assert_eq!(second.campaign.status, CampaignStatus::HooksBatchCompleted);
    assert_eq!(second.campaign.batch_status, Some(BatchStatus::Completed));
    assert_eq!(second.campaign.hooks.len(), 294);
    let report = second.harvest.unwrap();
    assert_eq!(report.added, 294);
    assert!(report.failed_custom_ids.is_empty());
    assert_graph_is_consistent(&second.campaign);

    let grouped = second.campaign.hooks_by_angle();
    assert_eq!(grouped.len(), 14);
    assert!(grouped.values().all(|hooks| hooks.len() == 21));

    let third = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(third.action, ReconcileAction::Idle);
    assert_eq!(third.campaign.hooks.len(), 294);
}

#[tokio::test]
async fn test_partial_hook_failure_keeps_successes_and_retries_only_missing() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;

    fake.set_batch_responder(|request: &BatchRequest| {
        if request.custom_id == "hooks-pos-1" || request.custom_id == "hooks-neg-7" {
            Some(BatchItemOutcome::Errored("overloaded".into()))
        } else {
            hooks_responder(request)
        }
    });
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Harvested);
    assert_eq!(outcome.campaign.status, CampaignStatus::PartiallyCompleted);
    assert_eq!(outcome.campaign.resume_status, Some(CampaignStatus::AnglesGenerated));
    assert_eq!(outcome.campaign.hooks_by_angle().len(), 12);
    assert_eq!(
        outcome.campaign.error_message.as_deref(),
        Some("2 of 14 hooks items failed")
    );
    assert!(outcome.campaign.batch_error.is_some());

    let report = outcome.harvest.unwrap();
    let mut failed = report.failed_custom_ids.clone();
    failed.sort();
    assert_eq!(failed, vec!["hooks-neg-7", "hooks-pos-1"]);
    assert_eq!(report.batch_status, BatchStatus::PartiallyCompleted);
    assert!(matches!(
        report.ensure_complete(),
        Err(OrchestratorError::PartialBatchFailure { .. })
    ));

    fake.set_batch_responder(hooks_responder);
    let retry = pipeline.retry_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(retry.created);
    assert_eq!(retry.job.attempt, 2);
    let mut retried = retry.job.custom_ids.clone();
    retried.sort();
    assert_eq!(retried, vec!["hooks-neg-7", "hooks-pos-1"]);
    let sent = fake
        .batch_requests(retry.job.external_batch_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(sent.len(), 2);

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::HooksBatchCompleted);
    assert_eq!(outcome.campaign.hooks.len(), 294);
    assert_graph_is_consistent(&outcome.campaign);

    let jobs = pipeline.list_batches(campaign.id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| !j.active && j.harvested_at.is_some()));
}

#[tokio::test]
async fn test_scripts_with_malformed_results_get_a_scoped_follow_up() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_hooks(&pipeline, &fake).await;

    let malformed: HashSet<&str> = [
        "scripts-pos-1-curiosity1",
        "scripts-pos-2-urgency3",
        "scripts-neg-5-proof3",
    ]
    .into_iter()
    .collect();
    fake.set_batch_responder(move |request: &BatchRequest| {
        if malformed.contains(request.custom_id.as_str()) {
            Some(BatchItemOutcome::Succeeded(json!({"unexpected": true})))
        } else {
            scripts_responder(request)
        }
    });

    let submitted = pipeline.submit_batch(campaign.id, BatchKind::Scripts).await.unwrap();
    assert_eq!(submitted.job.request_count, 294);

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::ScriptsBatchCompleted);
    assert_eq!(outcome.campaign.scripts.len(), 291);
    let report = outcome.harvest.unwrap();
    assert_eq!(report.failed_custom_ids.len(), 3);
    assert!(report.coverage >= 0.9);
    assert_eq!(report.skipped_with_reason.len(), 3);

    fake.set_batch_responder(scripts_responder);
    let follow_up = pipeline.retry_batch(campaign.id, BatchKind::Scripts).await.unwrap();
    let mut scoped = follow_up.job.custom_ids.clone();
    scoped.sort();
    assert_eq!(
        scoped,
        vec!["scripts-neg-5-proof3", "scripts-pos-1-curiosity1", "scripts-pos-2-urgency3"]
    );
    assert_eq!(follow_up.job.parent_job_id, Some(submitted.job.id));

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::Completed);
    assert_eq!(outcome.campaign.scripts.len(), 294);
    assert_graph_is_consistent(&outcome.campaign);

    let versions: HashSet<&str> = outcome
        .campaign
        .scripts_for_hook("pos-1-curiosity1")
        .map(|s| s.version.as_str())
        .collect();
    assert_eq!(versions, HashSet::from(["v2"]));
}

#[tokio::test]
async fn test_submit_is_idempotent() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new().with_polls_before_end(5));
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);

    let (a, b) = tokio::join!(
        pipeline.submit_batch(campaign.id, BatchKind::Hooks),
        pipeline.submit_batch(campaign.id, BatchKind::Hooks)
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.job.id, b.job.id);
    assert_eq!(a.job.external_batch_id, b.job.external_batch_id);
    assert!(a.created != b.created);

    let again = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(!again.created);
    assert_eq!(again.job.id, a.job.id);

    // A second process sharing the database sees the same active job.
    let other = self::pipeline(&pool, &fake, config());
    let from_other = other.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert_eq!(from_other.job.id, a.job.id);

    assert_eq!(fake.submit_count(), 1);
    assert_eq!(pipeline.list_batches(campaign.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_harvested_batch_is_not_resubmitted_or_reharvested() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_hooks(&pipeline, &fake).await;

    let again = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(!again.created);
    assert_eq!(fake.submit_count(), 1);

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Idle);
    assert_eq!(outcome.campaign.version, campaign.version);
}

#[tokio::test]
async fn test_reconciliation_resumes_in_a_fresh_pipeline() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new().with_polls_before_end(1));

    let campaign_id = {
        let first = pipeline(&pool, &fake, config());
        let campaign = campaign_with_angles(&first, &fake).await;
        fake.set_batch_responder(hooks_responder);
        first.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
        let outcome = first.check_and_process_batch(campaign.id).await.unwrap();
        assert_eq!(outcome.action, ReconcileAction::InFlight);
        campaign.id
    };

    let restarted = pipeline(&pool, &fake, config());
    let outcome = restarted.check_and_process_batch(campaign_id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Harvested);
    assert_eq!(outcome.campaign.status, CampaignStatus::HooksBatchCompleted);
    assert_eq!(outcome.campaign.hooks.len(), 294);
    assert_eq!(fake.submit_count(), 1);
}

#[tokio::test]
async fn test_context_is_identical_after_thread_reconstruction() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());

    let mut ids = Vec::new();
    for _ in 0..2 {
        let campaign = pipeline
            .create_campaign(CreateCampaignRequest {
                owner: "user-1".to_string(),
                product_info: json!({"name": "Kettle"}),
            })
            .await
            .unwrap();
        fake.push_response("avatar", json!({"persona": "busy parent"}));
        pipeline.run_phase(campaign.id, Phase::Avatar).await.unwrap();
        ids.push(campaign.id);
    }

    fake.push_response("journey", json!({"stages": ["aware"]}));
    fake.push_response("journey", json!({"stages": ["aware"]}));

    // First campaign continues on its live thread.
    pipeline.run_phase(ids[0], Phase::Journey).await.unwrap();
    // Second campaign's thread has expired and is rebuilt.
    fake.expire_threads();
    pipeline.run_phase(ids[1], Phase::Journey).await.unwrap();

    let avatar = fake.requests_for("avatar");
    let journey = fake.requests_for("journey");
    assert_eq!(journey.len(), 2);
    assert_eq!(journey[0].context, journey[1].context);
    assert_eq!(journey[0].thread_id, avatar[0].thread_id);
    assert_ne!(journey[1].thread_id, avatar[1].thread_id);

    let rebuilt = pipeline.get(ids[1]).await.unwrap();
    assert_eq!(rebuilt.conversation_thread_id, journey[1].thread_id);
}

#[tokio::test]
async fn test_vanished_batch_fails_campaign_and_allows_resubmission() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new().with_polls_before_end(3));
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);

    let submitted = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    fake.remove_batch(submitted.job.external_batch_id.as_deref().unwrap());

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Failed);
    assert_eq!(outcome.campaign.status, CampaignStatus::Failed);
    assert_eq!(outcome.campaign.resume_status, Some(CampaignStatus::AnglesGenerated));
    assert_eq!(outcome.campaign.batch_status, Some(BatchStatus::Failed));
    assert!(outcome.poll.unwrap().error.unwrap().contains("no longer exists"));

    let jobs = pipeline.list_batches(campaign.id).await.unwrap();
    assert_eq!(jobs[0].status, BatchStatus::Failed);
    assert!(!jobs[0].active);

    let idle = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(idle.action, ReconcileAction::Idle);

    let retried = pipeline.retry(campaign.id).await.unwrap();
    assert_eq!(retried.status, CampaignStatus::AnglesGenerated);
    let resubmitted = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(resubmitted.created);
    assert_ne!(resubmitted.job.external_batch_id, submitted.job.external_batch_id);
    assert_eq!(fake.submit_count(), 2);
}

#[tokio::test]
async fn test_mismatched_parent_is_skipped_not_merged() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;

    fake.set_batch_responder(|request: &BatchRequest| {
        if request.custom_id == "hooks-pos-3" {
            Some(BatchItemOutcome::Succeeded(hooks_for("pos-99")))
        } else {
            hooks_responder(request)
        }
    });
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    // 13 of 14 angles covered clears the 0.9 threshold.
    assert_eq!(outcome.campaign.status, CampaignStatus::HooksBatchCompleted);
    assert_eq!(outcome.campaign.hooks.len(), 13 * 21);
    assert!(outcome.campaign.hooks.iter().all(|h| h.angle_id != "pos-99"));
    assert!(outcome.campaign.hooks.iter().all(|h| h.angle_id != "pos-3"));
    assert_graph_is_consistent(&outcome.campaign);

    let report = outcome.harvest.unwrap();
    assert_eq!(report.failed_custom_ids, vec!["hooks-pos-3"]);
    assert!(report.skipped_with_reason[0].reason.contains("pos-99"));
}

#[tokio::test]
async fn test_lower_threshold_advances_despite_failures() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config().with_min_success_ratio(0.8));
    let campaign = campaign_with_angles(&pipeline, &fake).await;

    fake.set_batch_responder(|request: &BatchRequest| {
        if request.custom_id == "hooks-pos-1" || request.custom_id == "hooks-pos-2" {
            None
        } else {
            hooks_responder(request)
        }
    });
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::HooksBatchCompleted);
    let report = outcome.harvest.unwrap();
    let mut failed = report.failed_custom_ids.clone();
    failed.sort();
    assert_eq!(failed, vec!["hooks-pos-1", "hooks-pos-2"]);
}

#[tokio::test]
async fn test_paused_campaign_is_left_alone_until_resumed() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();

    let paused = pipeline.pause(campaign.id).await.unwrap();
    assert_eq!(paused.status, CampaignStatus::Paused);
    assert_eq!(paused.resume_status, Some(CampaignStatus::HooksBatchSubmitted));

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Idle);
    assert!(outcome.campaign.hooks.is_empty());

    let resumed = pipeline.resume(campaign.id).await.unwrap();
    assert_eq!(resumed.status, CampaignStatus::HooksBatchSubmitted);
    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Harvested);
    assert_eq!(outcome.campaign.hooks.len(), 294);
}

#[tokio::test]
async fn test_auto_resubmission_respects_budget() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config().with_auto_resubmit(true, 1));
    let campaign = campaign_with_angles(&pipeline, &fake).await;

    fake.set_batch_responder(|request: &BatchRequest| {
        if request.custom_id == "hooks-pos-1" || request.custom_id == "hooks-pos-2" {
            Some(BatchItemOutcome::Errored("refused".into()))
        } else {
            hooks_responder(request)
        }
    });
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();

    let first = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(first.action, ReconcileAction::Resubmitted);
    assert!(first.harvest.is_some());
    let follow_up = first.resubmitted.unwrap();
    assert_eq!(follow_up.attempt, 2);
    assert_eq!(follow_up.request_count, 2);
    assert_eq!(first.campaign.status, CampaignStatus::HooksBatchSubmitted);

    // The follow-up returns nothing usable, which fails the campaign while
    // keeping the twelve covered angles.
    let second = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(second.action, ReconcileAction::Harvested);
    assert_eq!(second.campaign.status, CampaignStatus::Failed);
    assert_eq!(second.campaign.resume_status, Some(CampaignStatus::PartiallyCompleted));
    assert_eq!(second.campaign.hooks_by_angle().len(), 12);
    assert_eq!(fake.submit_count(), 2);
}

#[tokio::test]
async fn test_finalize_accepts_missing_scripts() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_hooks(&pipeline, &fake).await;

    fake.set_batch_responder(|request: &BatchRequest| {
        if request.custom_id == "scripts-pos-1-proof1" {
            Some(BatchItemOutcome::Errored("refused".into()))
        } else {
            scripts_responder(request)
        }
    });
    pipeline.submit_batch(campaign.id, BatchKind::Scripts).await.unwrap();
    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::ScriptsBatchCompleted);

    let finalized = pipeline.finalize(campaign.id).await.unwrap();
    assert_eq!(finalized.status, CampaignStatus::Completed);
    assert_eq!(finalized.scripts.len(), 293);

    let err = pipeline.pause(campaign.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_worker_harvests_without_client_polling() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(
        &pool,
        &fake,
        config().with_poll_interval(Duration::from_millis(20)),
    );
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();

    let pass = pipeline.worker().run_once().await.unwrap();
    assert_eq!(pass.visited, 1);
    assert_eq!(pass.harvested, 1);
    assert_eq!(pass.errors, 0);

    let (tx, rx) = watch::channel(false);
    let handle = pipeline.worker().spawn(rx);
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    let stored = pipeline.get(campaign.id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::HooksBatchCompleted);
}

#[tokio::test]
async fn test_submit_failure_releases_the_claim() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);

    fake.fail_next_submit(provider::ProviderError::Unauthorized("bad key".into()));
    let err = pipeline
        .submit_batch(campaign.id, BatchKind::Hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Provider(_)));
    assert!(pipeline.list_batches(campaign.id).await.unwrap().is_empty());
    assert_eq!(
        pipeline.get(campaign.id).await.unwrap().status,
        CampaignStatus::AnglesGenerated
    );

    let submitted = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(submitted.created);
}

#[tokio::test]
async fn test_batch_with_no_successes_fails_the_campaign() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;

    fake.set_batch_responder(|_: &BatchRequest| Some(BatchItemOutcome::Errored("overloaded".into())));
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Harvested);
    assert_eq!(outcome.campaign.status, CampaignStatus::Failed);
    assert_eq!(outcome.campaign.resume_status, Some(CampaignStatus::AnglesGenerated));
    assert_eq!(outcome.campaign.batch_status, Some(BatchStatus::Failed));
    assert_eq!(
        outcome.campaign.error_message.as_deref(),
        Some("14 of 14 hooks items failed")
    );
    assert!(outcome.campaign.hooks.is_empty());
    assert_eq!(outcome.harvest.unwrap().batch_status, BatchStatus::Failed);

    let retried = pipeline.retry(campaign.id).await.unwrap();
    assert_eq!(retried.status, CampaignStatus::AnglesGenerated);
    assert!(retried.error_message.is_none());

    fake.set_batch_responder(hooks_responder);
    let resubmitted = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(resubmitted.created);
    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::HooksBatchCompleted);
    assert_eq!(outcome.campaign.hooks.len(), 294);
}

#[tokio::test]
async fn test_long_hook_ids_still_fit_script_custom_ids() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;

    fake.set_batch_responder(|request: &BatchRequest| {
        let target = target(request);
        let angle_id = target["angle_id"].as_str()?;
        let mut by_category = serde_json::Map::new();
        for category in CATEGORIES {
            let hooks: Vec<Value> = (1..=HOOKS_PER_CATEGORY)
                .map(|n| {
                    json!({
                        "hook_id": format!("{}_hook_about_saving_time_every_single_morning_{:02}", category, n),
                        "hook_text": format!("{} {} hook {}", angle_id, category, n),
                    })
                })
                .collect();
            by_category.insert(category.to_string(), Value::Array(hooks));
        }
        Some(BatchItemOutcome::Succeeded(
            json!({"angle_id": angle_id, "hooks_by_category": by_category}),
        ))
    });
    pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::HooksBatchCompleted);
    assert_eq!(outcome.campaign.hooks.len(), 294);
    assert!(outcome.campaign.hooks.iter().all(|h| h.id.len() <= 56));
    assert_graph_is_consistent(&outcome.campaign);

    fake.set_batch_responder(scripts_responder);
    let submitted = pipeline.submit_batch(campaign.id, BatchKind::Scripts).await.unwrap();
    assert!(submitted.created);
    assert_eq!(submitted.job.request_count, 294);
    assert!(submitted.job.custom_ids.iter().all(|id| id.len() <= 64));

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.campaign.status, CampaignStatus::Completed);
    assert_eq!(outcome.campaign.scripts.len(), 294);
    assert_graph_is_consistent(&outcome.campaign);
}

#[tokio::test]
async fn test_claim_without_batch_id_is_released_after_grace() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let patient = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&patient, &fake).await;
    fake.set_batch_responder(hooks_responder);

    // A submission that died after claiming the slot.
    let orphan = BatchJob::new(campaign.id, BatchKind::Hooks, vec!["hooks-pos-1".to_string()]);
    let jobs = BatchJobRepository::new(pool.clone());
    assert!(matches!(jobs.claim(&orphan).await.unwrap(), Claim::Claimed(_)));

    let blocked = patient.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(!blocked.created);
    assert_eq!(blocked.job.id, orphan.id);
    assert_eq!(fake.submit_count(), 0);

    let sweeper = pipeline(&pool, &fake, config().with_submit_grace(Duration::ZERO));
    let pass = sweeper.worker().run_once().await.unwrap();
    assert_eq!(pass.visited, 1);
    assert_eq!(pass.released, 1);
    assert_eq!(pass.errors, 0);

    let released = patient.list_batches(campaign.id).await.unwrap();
    assert_eq!(released[0].status, BatchStatus::Failed);
    assert!(!released[0].active);
    assert!(released[0].error.as_deref().unwrap().contains("never reached the provider"));
    assert_eq!(
        patient.get(campaign.id).await.unwrap().status,
        CampaignStatus::AnglesGenerated
    );

    let submitted = patient.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(submitted.created);
    assert_eq!(fake.submit_count(), 1);
}

#[tokio::test]
async fn test_submitted_campaign_stuck_on_unsent_claim_is_failed() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config().with_submit_grace(Duration::ZERO));
    let campaign = campaign_with_angles(&pipeline, &fake).await;

    let orphan = BatchJob::new(campaign.id, BatchKind::Hooks, vec!["hooks-pos-1".to_string()]);
    BatchJobRepository::new(pool.clone()).claim(&orphan).await.unwrap();
    let campaigns = CampaignRepository::new(pool.clone());
    let mut stuck = campaigns.get(campaign.id).await.unwrap();
    stuck.status = CampaignStatus::HooksBatchSubmitted;
    stuck.current_phase = Some(Phase::Hooks);
    campaigns.save(&stuck).await.unwrap();

    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Failed);
    assert!(outcome.poll.unwrap().error.unwrap().contains("never reached the provider"));
    assert_eq!(outcome.campaign.status, CampaignStatus::Failed);
    assert_eq!(outcome.campaign.resume_status, Some(CampaignStatus::AnglesGenerated));
    assert_eq!(fake.submit_count(), 0);
}

#[tokio::test]
async fn test_batch_past_timeout_is_abandoned() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new().with_polls_before_end(5));
    let pipeline = pipeline(&pool, &fake, config().with_batch_timeout(Duration::ZERO));
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);

    let submitted = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    let outcome = pipeline.check_and_process_batch(campaign.id).await.unwrap();
    assert_eq!(outcome.action, ReconcileAction::Failed);
    assert!(outcome.poll.unwrap().error.unwrap().contains("still in flight"));
    assert_eq!(outcome.campaign.status, CampaignStatus::Failed);
    assert_eq!(outcome.campaign.resume_status, Some(CampaignStatus::AnglesGenerated));
    assert!(outcome.campaign.error_message.is_some());

    let jobs = pipeline.list_batches(campaign.id).await.unwrap();
    assert_eq!(jobs[0].status, BatchStatus::Failed);
    assert!(!jobs[0].active);

    pipeline.retry(campaign.id).await.unwrap();
    let fresh = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(fresh.created);
    assert_ne!(fresh.job.external_batch_id, submitted.job.external_batch_id);
    assert_eq!(fake.submit_count(), 2);
}

#[tokio::test]
async fn test_ambiguous_submit_failure_is_not_resent() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);

    fake.fail_next_submit(ProviderError::Timeout("no response".into()));
    let err = pipeline
        .submit_batch(campaign.id, BatchKind::Hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::TransientProvider { .. }));
    assert_eq!(fake.submit_count(), 1);

    // The claim stays so an immediate retry cannot create a second batch.
    let again = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(!again.created);
    assert!(again.job.external_batch_id.is_none());
    assert_eq!(fake.submit_count(), 1);

    let after_grace = self::pipeline(&pool, &fake, config().with_submit_grace(Duration::ZERO));
    let submitted = after_grace.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(submitted.created);
    assert_eq!(fake.submit_count(), 2);
}

#[tokio::test]
async fn test_rate_limited_submit_is_retried() {
    let (pool, _dir) = setup_db().await;
    let fake = Arc::new(FakeProvider::new());
    let pipeline = pipeline(&pool, &fake, config());
    let campaign = campaign_with_angles(&pipeline, &fake).await;
    fake.set_batch_responder(hooks_responder);

    fake.fail_next_submit(ProviderError::RateLimited { retry_after: None });
    let submitted = pipeline.submit_batch(campaign.id, BatchKind::Hooks).await.unwrap();
    assert!(submitted.created);
    assert_eq!(fake.submit_count(), 2);
    assert_eq!(pipeline.list_batches(campaign.id).await.unwrap().len(), 1);
}
