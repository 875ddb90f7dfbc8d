//! Integration tests for the workflow engine: trigger validation, the step
//! state machine, idempotent redelivery and cursor pagination.
//!
//! Every test runs against an in-memory SQLite database, a recording work
//! queue and scripted step handlers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use agentflow_core::models::{
    Agent, InstanceStatus, ListInstancesQuery, StepOutcome, StepSpec, StepType,
    TriggerWorkflowInput, WorkflowTemplate,
};
use agentflow_core::workflow::{
    HandlerRegistry, JobOptions, JobOutcome, StepContext, StepHandler, StepJob, WorkQueue,
};
use agentflow_core::{AppState, AppStateInner, Database, EngineConfig, ServerError};

// ─── Test doubles ─────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingQueue {
    jobs: Mutex<Vec<(String, StepJob, JobOptions)>>,
    broken: bool,
}

impl RecordingQueue {
    fn broken() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            broken: true,
        }
    }

    fn jobs(&self) -> Vec<StepJob> {
        self.jobs.lock().unwrap().iter().map(|(_, j, _)| j.clone()).collect()
    }
}

#[async_trait]
impl WorkQueue for RecordingQueue {
    async fn enqueue(&self, name: &str, job: StepJob, options: JobOptions) -> Result<(), ServerError> {
        if self.broken {
            return Err(ServerError::Internal("broker unavailable".into()));
        }
        self.jobs.lock().unwrap().push((name.to_string(), job, options));
        Ok(())
    }
}

struct Succeed;

#[async_trait]
impl StepHandler for Succeed {
    async fn run(&self, _ctx: &StepContext) -> Result<(), String> {
        Ok(())
    }
}

/// Fails every step whose name is listed.
struct FailNamed(Vec<&'static str>);

#[async_trait]
impl StepHandler for FailNamed {
    async fn run(&self, ctx: &StepContext) -> Result<(), String> {
        if self.0.contains(&ctx.step.name.as_str()) {
            Err(format!("{} exploded", ctx.step.name))
        } else {
            Ok(())
        }
    }
}

struct Sleep(u64);

#[async_trait]
impl StepHandler for Sleep {
    async fn run(&self, _ctx: &StepContext) -> Result<(), String> {
        tokio::time::sleep(Duration::from_millis(self.0)).await;
        Ok(())
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────

struct Harness {
    state: AppState,
    queue: Arc<RecordingQueue>,
}

fn registry_with(handler: Arc<dyn StepHandler>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(StepType::Wait, handler.clone());
    registry.register(StepType::Webhook, handler);
    registry
}

async fn harness_with(queue: RecordingQueue, handlers: HandlerRegistry) -> Harness {
    let db = Database::open_in_memory().expect("Failed to open in-memory database");
    let queue = Arc::new(queue);
    let state: AppState = Arc::new(AppStateInner::new(
        db,
        queue.clone(),
        handlers,
        EngineConfig::default(),
    ));
    Harness { state, queue }
}

async fn harness() -> Harness {
    harness_with(RecordingQueue::default(), registry_with(Arc::new(Succeed))).await
}

fn template(id: &str, tenant_id: Option<&str>, steps: Vec<StepSpec>) -> WorkflowTemplate {
    WorkflowTemplate::new(
        id.to_string(),
        id.to_string(),
        format!("{} label", id),
        None,
        tenant_id.map(String::from),
        steps,
    )
}

fn wait_step(name: &str) -> StepSpec {
    StepSpec::new(name, StepType::Wait, 300_000)
}

async fn add_agent(state: &AppState, id: &str, tenant_id: &str) {
    state
        .agent_store
        .save(&Agent::new(id.into(), tenant_id.into(), format!("{} name", id)))
        .await
        .unwrap();
}

/// tenant-1 owns agent-1, tenant-2 owns agent-2; `tpl-1` is tenant-1's
/// one-step template.
async fn seeded() -> Harness {
    let h = harness().await;
    add_agent(&h.state, "agent-1", "tenant-1").await;
    add_agent(&h.state, "agent-2", "tenant-2").await;
    h.state
        .template_store
        .save(&template("tpl-1", Some("tenant-1"), vec![wait_step("provision")]))
        .await
        .unwrap();
    h
}

fn agents(ids: &[&str]) -> TriggerWorkflowInput {
    TriggerWorkflowInput {
        agent_ids: ids.iter().map(|s| s.to_string()).collect(),
    }
}

async fn list_all(state: &AppState, tenant_id: &str) -> Vec<String> {
    let page = state
        .query
        .get_instances(
            tenant_id,
            ListInstancesQuery {
                limit: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    page.items.into_iter().map(|i| i.id).collect()
}

// ─── TemplateCatalog ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_templates_are_tenant_isolated() {
    let h = harness().await;
    let store = &h.state.template_store;
    store.save(&template("sys", None, vec![wait_step("a")])).await.unwrap();
    store.save(&template("mine", Some("tenant-1"), vec![wait_step("a")])).await.unwrap();
    store.save(&template("theirs", Some("tenant-2"), vec![wait_step("a")])).await.unwrap();

    let visible = h.state.catalog.get_templates("tenant-1").await.unwrap();
    let ids: Vec<&str> = visible.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["sys", "mine"]);
    assert!(visible
        .iter()
        .all(|t| t.tenant_id.is_none() || t.tenant_id.as_deref() == Some("tenant-1")));

    let other = h.state.catalog.get_templates("tenant-3").await.unwrap();
    assert_eq!(other.len(), 1);
    assert!(other[0].is_system);
}

#[tokio::test]
async fn test_template_owner_cannot_change() {
    let h = harness().await;
    let store = &h.state.template_store;
    store.save(&template("shared-id", Some("tenant-1"), vec![wait_step("a")])).await.unwrap();

    let err = store
        .save(&template("shared-id", Some("tenant-2"), vec![wait_step("a")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    // The owner cannot rewrite a published definition either.
    let err = store
        .save(&template("shared-id", Some("tenant-1"), vec![wait_step("a"), wait_step("b")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    // Publishing the identical definition again is accepted and changes nothing.
    store.save(&template("shared-id", Some("tenant-1"), vec![wait_step("a")])).await.unwrap();
    let visible = h.state.catalog.get_templates("tenant-1").await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].steps, vec![wait_step("a")]);
}

#[tokio::test]
async fn test_republishing_shorter_steps_cannot_strand_a_running_run() {
    let h = seeded().await;
    let store = &h.state.template_store;
    store
        .save(&template(
            "three",
            Some("tenant-1"),
            vec![wait_step("a"), wait_step("b"), wait_step("c")],
        ))
        .await
        .unwrap();
    let id = h
        .state
        .trigger
        .trigger_workflow("three", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;
    let coordinator = &h.state.coordinator;
    coordinator.handle_job(StepJob::new(id.clone(), 0)).await.unwrap();
    coordinator.handle_job(StepJob::new(id.clone(), 1)).await.unwrap();

    let err = store
        .save(&template("three", Some("tenant-1"), vec![wait_step("a")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    assert_eq!(
        coordinator.handle_job(StepJob::new(id.clone(), 2)).await.unwrap(),
        JobOutcome::Completed
    );
    let detail = h
        .state
        .query
        .get_instance_by_id(&id, "tenant-1")
        .await
        .unwrap();
    assert_eq!(detail.steps.len(), 3);
    assert_eq!(detail.instance.status, InstanceStatus::Completed);
}

// ─── InstanceTrigger ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_trigger_creates_pending_run_and_one_step_zero_job() {
    let h = seeded().await;

    let summary = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap();

    assert_eq!(summary.template_id, "tpl-1");
    assert_eq!(summary.status, InstanceStatus::Pending);
    assert_eq!(summary.current_step, 0);

    let jobs = h.queue.jobs();
    assert_eq!(jobs, vec![StepJob::new(summary.id.clone(), 0)]);
    let recorded = h.queue.jobs.lock().unwrap();
    assert_eq!(recorded[0].0, agentflow_core::workflow::STEP_JOB);
    assert_eq!(recorded[0].2.job_id.as_deref(), Some(format!("{}:0", summary.id).as_str()));
    drop(recorded);

    let stored = h.state.instance_store.get(&summary.id).await.unwrap().unwrap();
    assert_eq!(stored.tenant_id, "tenant-1");
    assert_eq!(stored.triggered_by, "user-1");
    assert_eq!(stored.input_data.agent_ids, vec!["agent-1"]);
    assert!(stored.step_logs.is_empty());
}

#[tokio::test]
async fn test_trigger_with_foreign_agent_is_rejected_without_a_run() {
    let h = seeded().await;

    let err = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1", "agent-2"]), "tenant-1", "user-1")
        .await
        .unwrap_err();

    match err {
        ServerError::BadRequest(msg) => {
            assert!(msg.contains("agent-2"));
            assert!(!msg.contains("agent-1"));
        }
        other => panic!("expected BadRequest, got {:?}", other),
    }
    assert!(list_all(&h.state, "tenant-1").await.is_empty());
    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn test_trigger_rejects_malformed_payload() {
    let h = seeded().await;
    for input in [agents(&[]), agents(&["agent-1", " "])] {
        let err = h
            .state
            .trigger
            .trigger_workflow("tpl-1", input, "tenant-1", "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }
    assert!(list_all(&h.state, "tenant-1").await.is_empty());
}

#[tokio::test]
async fn test_trigger_cannot_see_other_tenants_template() {
    let h = seeded().await;

    let err = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-2"]), "tenant-2", "user-2")
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));

    let err = h
        .state
        .trigger
        .trigger_workflow("missing", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));
    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn test_trigger_on_system_template() {
    let h = seeded().await;
    h.state
        .template_store
        .save(&template("sys", None, vec![wait_step("a")]))
        .await
        .unwrap();

    let summary = h
        .state
        .trigger
        .trigger_workflow("sys", agents(&["agent-2"]), "tenant-2", "user-2")
        .await
        .unwrap();
    assert_eq!(summary.status, InstanceStatus::Pending);
    assert_eq!(list_all(&h.state, "tenant-2").await, vec![summary.id]);
}

#[tokio::test]
async fn test_failed_first_enqueue_leaves_a_failed_run() {
    let h = harness_with(RecordingQueue::broken(), registry_with(Arc::new(Succeed))).await;
    add_agent(&h.state, "agent-1", "tenant-1").await;
    h.state
        .template_store
        .save(&template("tpl-1", Some("tenant-1"), vec![wait_step("a")]))
        .await
        .unwrap();

    let err = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Internal(_)));

    let page = h
        .state
        .query
        .get_instances("tenant-1", ListInstancesQuery::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    let run = &page.items[0];
    assert_eq!(run.status, InstanceStatus::Failed);
    assert_eq!(run.current_step, 0);
    assert!(run.failure_reason.as_deref().unwrap().contains("broker unavailable"));
}

// ─── StepCoordinator ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_single_step_success_completes_run() {
    let h = seeded().await;
    let summary = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap();

    let outcome = h
        .state
        .coordinator
        .handle_job(StepJob::new(summary.id.clone(), 0))
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    let run = h.state.instance_store.get(&summary.id).await.unwrap().unwrap();
    assert_eq!(run.status, InstanceStatus::Completed);
    assert_eq!(run.current_step, 1);
    assert!(run.completed_at.is_some());
    assert!(run.failure_reason.is_none());
    assert_eq!(run.step_logs.len(), 1);
    assert_eq!(run.step_logs[0].outcome, StepOutcome::Success);
    assert_eq!(run.step_logs[0].step_name, "provision");
    // Only the trigger's step-0 job was ever enqueued.
    assert_eq!(h.queue.jobs().len(), 1);
}

#[tokio::test]
async fn test_redelivery_after_completion_is_a_noop() {
    let h = seeded().await;
    let summary = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap();
    let job = StepJob::new(summary.id.clone(), 0);
    h.state.coordinator.handle_job(job.clone()).await.unwrap();
    let before = h.state.instance_store.get(&summary.id).await.unwrap().unwrap();

    let outcome = h.state.coordinator.handle_job(job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Stale);

    let after = h.state.instance_store.get(&summary.id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(h.queue.jobs().len(), 1);
}

#[tokio::test]
async fn test_multi_step_run_advances_one_step_at_a_time() {
    let h = seeded().await;
    h.state
        .template_store
        .save(&template(
            "three",
            Some("tenant-1"),
            vec![wait_step("a"), wait_step("b"), wait_step("c")],
        ))
        .await
        .unwrap();
    let id = h
        .state
        .trigger
        .trigger_workflow("three", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;
    let coordinator = &h.state.coordinator;

    assert_eq!(
        coordinator.handle_job(StepJob::new(id.clone(), 0)).await.unwrap(),
        JobOutcome::Advanced { next_step: 1 }
    );
    let run = h.state.instance_store.get(&id).await.unwrap().unwrap();
    assert_eq!(run.status, InstanceStatus::Running);
    assert_eq!(run.current_step, 1);
    assert_eq!(run.step_logs.len(), 1);
    assert!(run.completed_at.is_none());

    // A job for a future step is not the current one either.
    assert_eq!(
        coordinator.handle_job(StepJob::new(id.clone(), 2)).await.unwrap(),
        JobOutcome::Stale
    );
    assert_eq!(
        coordinator.handle_job(StepJob::new(id.clone(), 1)).await.unwrap(),
        JobOutcome::Advanced { next_step: 2 }
    );
    assert_eq!(
        coordinator.handle_job(StepJob::new(id.clone(), 1)).await.unwrap(),
        JobOutcome::Stale
    );
    assert_eq!(
        coordinator.handle_job(StepJob::new(id.clone(), 2)).await.unwrap(),
        JobOutcome::Completed
    );

    let run = h.state.instance_store.get(&id).await.unwrap().unwrap();
    assert_eq!(run.status, InstanceStatus::Completed);
    assert_eq!(run.current_step, 3);
    let indices: Vec<usize> = run.step_logs.iter().map(|l| l.step_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);

    assert_eq!(
        h.queue.jobs(),
        vec![
            StepJob::new(id.clone(), 0),
            StepJob::new(id.clone(), 1),
            StepJob::new(id.clone(), 2),
        ]
    );
}

#[tokio::test]
async fn test_step_failure_is_terminal_and_not_retried() {
    let h = harness_with(
        RecordingQueue::default(),
        registry_with(Arc::new(FailNamed(vec!["b"]))),
    )
    .await;
    add_agent(&h.state, "agent-1", "tenant-1").await;
    h.state
        .template_store
        .save(&template("two", Some("tenant-1"), vec![wait_step("a"), wait_step("b")]))
        .await
        .unwrap();
    let id = h
        .state
        .trigger
        .trigger_workflow("two", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;

    h.state.coordinator.handle_job(StepJob::new(id.clone(), 0)).await.unwrap();
    let jobs_before_failure = h.queue.jobs().len();
    assert_eq!(jobs_before_failure, 2);

    let outcome = h
        .state
        .coordinator
        .handle_job(StepJob::new(id.clone(), 1))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            reason: "b exploded".into()
        }
    );

    let run = h.state.instance_store.get(&id).await.unwrap().unwrap();
    assert_eq!(run.status, InstanceStatus::Failed);
    assert_eq!(run.current_step, 1);
    assert_eq!(run.failure_reason.as_deref(), Some("b exploded"));
    assert!(run.failed_at.is_some());
    assert!(run.completed_at.is_none());
    assert_eq!(run.step_logs.len(), 2);
    assert_eq!(run.step_logs[1].outcome, StepOutcome::Failure);
    assert_eq!(run.step_logs[1].error.as_deref(), Some("b exploded"));

    // No second job after failure, and redelivery changes nothing.
    assert_eq!(h.queue.jobs().len(), jobs_before_failure);
    assert_eq!(
        h.state.coordinator.handle_job(StepJob::new(id.clone(), 1)).await.unwrap(),
        JobOutcome::Stale
    );
    let again = h.state.instance_store.get(&id).await.unwrap().unwrap();
    assert_eq!(again, run);
    assert_eq!(h.queue.jobs().len(), jobs_before_failure);
}

#[tokio::test]
async fn test_step_overrunning_its_timeout_fails_the_run() {
    let h = harness_with(RecordingQueue::default(), registry_with(Arc::new(Sleep(5_000)))).await;
    add_agent(&h.state, "agent-1", "tenant-1").await;
    h.state
        .template_store
        .save(&template(
            "slow",
            Some("tenant-1"),
            vec![StepSpec::new("crawl", StepType::Wait, 50)],
        ))
        .await
        .unwrap();
    let id = h
        .state
        .trigger
        .trigger_workflow("slow", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;

    let started = std::time::Instant::now();
    let outcome = h
        .state
        .coordinator
        .handle_job(StepJob::new(id.clone(), 0))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));

    let JobOutcome::Failed { reason } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(reason, "Step 'crawl' timed out after 50ms");

    let run = h.state.instance_store.get(&id).await.unwrap().unwrap();
    assert_eq!(run.status, InstanceStatus::Failed);
    assert_eq!(run.current_step, 0);
    assert_eq!(run.step_logs.len(), 1);
    assert_eq!(h.queue.jobs().len(), 1);
}

#[tokio::test]
async fn test_step_without_handler_fails_the_run() {
    let h = seeded().await;
    h.state
        .template_store
        .save(&template(
            "skilled",
            Some("tenant-1"),
            vec![StepSpec::new("install", StepType::Skill, 1_000)],
        ))
        .await
        .unwrap();
    let id = h
        .state
        .trigger
        .trigger_workflow("skilled", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;

    let outcome = h.state.coordinator.handle_job(StepJob::new(id, 0)).await.unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            reason: "No handler registered for step type 'skill'".into()
        }
    );
}

#[tokio::test]
async fn test_job_for_unknown_instance_is_dropped() {
    let h = seeded().await;
    let outcome = h
        .state
        .coordinator
        .handle_job(StepJob::new("does-not-exist", 0))
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Stale);
    assert!(h.queue.jobs().is_empty());
}

#[tokio::test]
async fn test_concurrent_duplicate_delivery_applies_once() {
    let h = harness_with(RecordingQueue::default(), registry_with(Arc::new(Sleep(20)))).await;
    add_agent(&h.state, "agent-1", "tenant-1").await;
    h.state
        .template_store
        .save(&template("tpl-1", Some("tenant-1"), vec![wait_step("a")]))
        .await
        .unwrap();
    let id = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;

    let c1 = h.state.coordinator.clone();
    let c2 = h.state.coordinator.clone();
    let (a, b) = tokio::join!(
        c1.handle_job(StepJob::new(id.clone(), 0)),
        c2.handle_job(StepJob::new(id.clone(), 0)),
    );
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, JobOutcome::Stale));
    assert_eq!(outcomes, vec![JobOutcome::Completed, JobOutcome::Stale]);

    let run = h.state.instance_store.get(&id).await.unwrap().unwrap();
    assert_eq!(run.current_step, 1);
    assert_eq!(run.step_logs.len(), 1);
}

#[tokio::test]
async fn test_resume_active_redelivers_current_step() {
    let h = seeded().await;
    let id = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;

    assert_eq!(h.state.coordinator.resume_active().await.unwrap(), 1);
    assert_eq!(
        h.queue.jobs(),
        vec![StepJob::new(id.clone(), 0), StepJob::new(id.clone(), 0)]
    );

    h.state.coordinator.handle_job(StepJob::new(id.clone(), 0)).await.unwrap();
    assert_eq!(h.state.coordinator.resume_active().await.unwrap(), 0);
}

// ─── InstanceQuery ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cursor_pagination_is_complete_for_any_limit() {
    let h = seeded().await;
    let mut created = Vec::new();
    for _ in 0..7 {
        let s = h
            .state
            .trigger
            .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
            .await
            .unwrap();
        created.push(s.id);
    }
    // Another tenant's runs never leak into the listing.
    h.state
        .template_store
        .save(&template("sys", None, vec![wait_step("a")]))
        .await
        .unwrap();
    h.state
        .trigger
        .trigger_workflow("sys", agents(&["agent-2"]), "tenant-2", "user-2")
        .await
        .unwrap();

    let expected: HashSet<String> = created.iter().cloned().collect();
    let full_order = list_all(&h.state, "tenant-1").await;
    assert_eq!(full_order.len(), 7);

    for limit in 1..=8 {
        let mut seen = Vec::new();
        let mut cursor = None;
        let mut pages = 0;
        loop {
            let page = h
                .state
                .query
                .get_instances(
                    "tenant-1",
                    ListInstancesQuery {
                        status: None,
                        limit: Some(limit),
                        cursor: cursor.clone(),
                    },
                )
                .await
                .unwrap();
            pages += 1;
            assert!(page.items.len() <= limit);
            seen.extend(page.items.iter().map(|i| i.id.clone()));
            match page.next_cursor {
                Some(next) => {
                    assert_eq!(page.items.len(), limit);
                    cursor = Some(next);
                }
                None => break,
            }
            assert!(pages <= 8, "pagination did not terminate for limit {}", limit);
        }
        assert_eq!(seen, full_order, "order differs for limit {}", limit);
        let unique: HashSet<String> = seen.into_iter().collect();
        assert_eq!(unique, expected, "wrong set for limit {}", limit);
    }
}

#[tokio::test]
async fn test_listing_is_newest_first_and_filters_by_status() {
    let h = seeded().await;
    let first = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;
    h.state.coordinator.handle_job(StepJob::new(first.clone(), 0)).await.unwrap();

    assert_eq!(list_all(&h.state, "tenant-1").await, vec![second.clone(), first.clone()]);

    let completed = h
        .state
        .query
        .get_instances(
            "tenant-1",
            ListInstancesQuery {
                status: Some(InstanceStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(completed.items.len(), 1);
    assert_eq!(completed.items[0].id, first);
    assert!(completed.next_cursor.is_none());

    let err = h
        .state
        .query
        .get_instances(
            "tenant-1",
            ListInstancesQuery {
                cursor: Some("not a cursor".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::BadRequest(_)));
}

#[tokio::test]
async fn test_get_instance_by_id_joins_template_and_hides_other_tenants() {
    let h = seeded().await;
    let id = h
        .state
        .trigger
        .trigger_workflow("tpl-1", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;

    let detail = h.state.query.get_instance_by_id(&id, "tenant-1").await.unwrap();
    assert_eq!(detail.instance.id, id);
    assert_eq!(detail.template_name, "tpl-1");
    assert_eq!(detail.template_label, "tpl-1 label");
    assert_eq!(detail.steps.len(), 1);

    let json = serde_json::to_value(&detail).unwrap();
    assert_eq!(json["templateName"], "tpl-1");
    assert_eq!(json["status"], "pending");
    assert_eq!(json["currentStep"], 0);
    assert!(json["stepLogs"].as_array().unwrap().is_empty());

    for (run, tenant) in [(id.as_str(), "tenant-2"), ("nope", "tenant-1")] {
        let err = h.state.query.get_instance_by_id(run, tenant).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }
}

// ─── End to end with the in-process worker pool ───────────────────────────

#[tokio::test]
async fn test_worker_pool_drives_run_to_completion() {
    let db = Database::open_in_memory().unwrap();
    let state = AppStateInner::start(db, HandlerRegistry::with_defaults(), EngineConfig::default())
        .await
        .unwrap();
    add_agent(&state, "agent-1", "tenant-1").await;
    state
        .template_store
        .save(&template(
            "pipeline",
            Some("tenant-1"),
            vec![
                StepSpec::new("settle", StepType::Wait, 1_000)
                    .with_config(serde_json::json!({ "durationMs": 10 })),
                StepSpec::new("settle-again", StepType::Wait, 1_000),
            ],
        ))
        .await
        .unwrap();

    let id = state
        .trigger
        .trigger_workflow("pipeline", agents(&["agent-1"]), "tenant-1", "user-1")
        .await
        .unwrap()
        .id;

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let run = loop {
        let run = state.instance_store.get(&id).await.unwrap().unwrap();
        if run.status.is_terminal() {
            break run;
        }
        assert!(std::time::Instant::now() < deadline, "run did not finish in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    assert_eq!(run.status, InstanceStatus::Completed);
    assert_eq!(run.current_step, 2);
    assert_eq!(run.step_logs.len(), 2);
}

async fn wait_until_terminal(state: &AppState, ids: &[String]) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    for id in ids {
        loop {
            let run = state.instance_store.get(id).await.unwrap().unwrap();
            if run.status.is_terminal() {
                assert_eq!(run.status, InstanceStatus::Completed, "run {} failed", id);
                assert_eq!(run.current_step, 2);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "run {} did not finish in time", id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn two_short_waits() -> Vec<StepSpec> {
    vec![
        StepSpec::new("first", StepType::Wait, 1_000)
            .with_config(serde_json::json!({ "durationMs": 50 })),
        StepSpec::new("second", StepType::Wait, 1_000)
            .with_config(serde_json::json!({ "durationMs": 50 })),
    ]
}

#[tokio::test]
async fn test_single_worker_finishes_more_runs_than_it_has_slots() {
    let db = Database::open_in_memory().unwrap();
    let config = EngineConfig {
        worker_concurrency: 1,
        ..Default::default()
    };
    let state = AppStateInner::start(db, HandlerRegistry::with_defaults(), config)
        .await
        .unwrap();
    add_agent(&state, "agent-1", "tenant-1").await;
    state
        .template_store
        .save(&template("pair", Some("tenant-1"), two_short_waits()))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let run = tokio::time::timeout(
            Duration::from_secs(1),
            state
                .trigger
                .trigger_workflow("pair", agents(&["agent-1"]), "tenant-1", "user-1"),
        )
        .await
        .expect("trigger blocked on the queue")
        .unwrap();
        ids.push(run.id);
    }

    wait_until_terminal(&state, &ids).await;
}

#[tokio::test]
async fn test_engine_start_resumes_more_runs_than_workers() {
    let db = Database::open_in_memory().unwrap();
    let parked: AppState = Arc::new(AppStateInner::new(
        db.clone(),
        Arc::new(RecordingQueue::default()),
        HandlerRegistry::with_defaults(),
        EngineConfig::default(),
    ));
    add_agent(&parked, "agent-1", "tenant-1").await;
    parked
        .template_store
        .save(&template("pair", Some("tenant-1"), two_short_waits()))
        .await
        .unwrap();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let run = parked
            .trigger
            .trigger_workflow("pair", agents(&["agent-1"]), "tenant-1", "user-1")
            .await
            .unwrap();
        ids.push(run.id);
    }

    let config = EngineConfig {
        worker_concurrency: 1,
        ..Default::default()
    };
    let state = tokio::time::timeout(
        Duration::from_secs(1),
        AppStateInner::start(db, HandlerRegistry::with_defaults(), config),
    )
    .await
    .expect("engine start blocked while resuming runs")
    .unwrap();

    wait_until_terminal(&state, &ids).await;
}
