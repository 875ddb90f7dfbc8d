//! Workflow orchestration engine.
//!
//! ```text
//!  trigger ──► InstanceTrigger ──create run──► InstanceStore
//!                    │
//!                    └──enqueue {instanceId, stepIndex: 0}──► WorkQueue
//!                                                               │
//!                               WorkerPool ◄────────────────────┘
//!                                   │
//!                              StepCoordinator ──► StepHandler (per StepType)
//!                                   │
//!                     success: log + advance + enqueue next / complete
//!                     failure: log + fail (terminal, never retried)
//!
//!  TemplateCatalog / InstanceQuery read the same records independently.
//! ```

pub mod catalog;
pub mod coordinator;
pub mod cursor;
pub mod handler;
pub mod query;
pub mod queue;
pub mod trigger;

pub use catalog::TemplateCatalog;
pub use coordinator::{JobOutcome, StepCoordinator};
pub use cursor::InstanceCursor;
pub use handler::{HandlerRegistry, StepContext, StepHandler, WaitHandler, WebhookHandler};
pub use query::InstanceQuery;
pub use queue::{InProcessQueue, JobHandler, JobOptions, StepJob, WorkQueue, WorkerPool, STEP_JOB};
pub use trigger::{AgentDirectory, InstanceTrigger};
