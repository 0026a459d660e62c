//! # BotClaw Scheduler
//!
//! Turns bot schedules into audited, retried platform actions.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio interval, first sweep immediate)
//!   ├── per-bot sweep ──────────┐
//!   └── campaign fan-out ───────┤
//! manual trigger / approval ────┤
//!                               ▼
//!                         Orchestrator
//!   PolicyChain → AuditLog (Proposed) → claim bot → ExecutionQueue
//!                                                     ├── bot-execution   (3 attempts)
//!                                                     ├── action-executor (2 attempts)
//!                                                     └── media-content   (2 attempts)
//!                                                           ▼
//!                                     WorkerPool → BotWorker → ActionExecutor
//!                                                     → AuditLog (Executed | Failed)
//! ```

pub mod engine;
pub mod executor;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod worker;

pub use engine::{spawn_scheduler, SchedulerEngine, SchedulerHandle, SweepReport};
pub use executor::{executor_from_config, DryRunExecutor, WebhookExecutor};
pub use orchestrator::{
    DispatchOutcome, DispatchRequest, ManualTrigger, ManualTriggerResponse, ManualTriggerStatus,
    Orchestrator,
};
pub use persistence::SchedulerDb;
pub use pipeline::{BotPipeline, PipelineStores};
pub use queue::{ExecutionQueue, JobDisposition, QueueStats};
pub use store::MemoryStore;
pub use worker::{BotWorker, JobHandler, WorkerPool};
