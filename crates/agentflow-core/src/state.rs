//! Shared application state: stores plus the engine components wired to them.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::ServerError;
use crate::store::{AgentStore, InstanceStore, TemplateStore};
use crate::workflow::{
    HandlerRegistry, InProcessQueue, InstanceQuery, InstanceTrigger, StepCoordinator,
    TemplateCatalog, WorkQueue, WorkerPool,
};

/// Shared state accessible by all API handlers and CLI commands.
pub struct AppStateInner {
    pub db: Database,
    pub agent_store: AgentStore,
    pub template_store: TemplateStore,
    pub instance_store: InstanceStore,
    pub catalog: TemplateCatalog,
    pub trigger: InstanceTrigger,
    pub coordinator: Arc<StepCoordinator>,
    pub query: InstanceQuery,
    pub config: EngineConfig,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Wire the engine over an arbitrary queue. Nothing consumes the queue
    /// here; callers decide how jobs reach `coordinator`.
    pub fn new(
        db: Database,
        queue: Arc<dyn WorkQueue>,
        handlers: HandlerRegistry,
        config: EngineConfig,
    ) -> Self {
        let agent_store = AgentStore::new(db.clone());
        let template_store = TemplateStore::new(db.clone());
        let instance_store = InstanceStore::new(db.clone());
        let catalog = TemplateCatalog::new(template_store.clone());
        Self {
            trigger: InstanceTrigger::new(
                catalog.clone(),
                instance_store.clone(),
                Arc::new(agent_store.clone()),
                queue.clone(),
            ),
            coordinator: Arc::new(StepCoordinator::new(
                instance_store.clone(),
                template_store.clone(),
                handlers,
                queue,
            )),
            query: InstanceQuery::new(instance_store.clone(), template_store.clone(), config.clone()),
            catalog,
            agent_store,
            template_store,
            instance_store,
            config,
            db,
        }
    }

    /// Build the state over an in-process queue, start the worker pool and
    /// redeliver the current step of every run left active by a previous process.
    pub async fn start(
        db: Database,
        handlers: HandlerRegistry,
        config: EngineConfig,
    ) -> Result<AppState, ServerError> {
        let (queue, receiver) = InProcessQueue::new();
        let state: AppState = Arc::new(Self::new(db, Arc::new(queue), handlers, config));

        WorkerPool::spawn(
            receiver,
            state.coordinator.clone(),
            state.config.worker_concurrency,
        );
        state.coordinator.resume_active().await?;

        tracing::info!(
            "Workflow engine started ({} worker(s))",
            state.config.worker_concurrency
        );
        Ok(state)
    }
}
