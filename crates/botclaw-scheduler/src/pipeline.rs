//! Wiring: stores + config + executor → orchestrator, queues, workers and
//! the scheduler engine, sharing one audit log.

use std::sync::Arc;
use std::time::Duration;

use botclaw_core::config::BotClawConfig;
use botclaw_core::error::Result;
use botclaw_core::traits::{ActionExecutor, AuditStore, BotStore, CampaignStore, JobJournal};
use botclaw_governance::AuditLog;

use crate::engine::{spawn_scheduler, SchedulerEngine, SchedulerHandle};
use crate::orchestrator::Orchestrator;
use crate::persistence::SchedulerDb;
use crate::queue::ExecutionQueue;
use crate::store::MemoryStore;
use crate::worker::{BotWorker, WorkerPool};

/// The boundary stores the pipeline runs on.
#[derive(Clone)]
pub struct PipelineStores {
    pub bots: Arc<dyn BotStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub audit: Arc<dyn AuditStore>,
    pub journal: Option<Arc<dyn JobJournal>>,
}

impl PipelineStores {
    /// Everything in one SQLite database, journal included.
    pub fn sqlite(db: Arc<SchedulerDb>) -> Self {
        Self {
            bots: db.clone(),
            campaigns: db.clone(),
            audit: db.clone(),
            journal: Some(db),
        }
    }

    /// Everything in process memory.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            bots: store.clone(),
            campaigns: store.clone(),
            audit: store.clone(),
            journal: Some(store),
        }
    }
}

/// A fully wired pipeline.
pub struct BotPipeline {
    pub config: BotClawConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub queue: Arc<ExecutionQueue>,
    pub workers: WorkerPool,
    pub engine: Arc<SchedulerEngine>,
}

impl BotPipeline {
    pub fn build(
        config: BotClawConfig,
        stores: PipelineStores,
        executor: Arc<dyn ActionExecutor>,
    ) -> Result<Self> {
        let sweep = Duration::from_secs(config.scheduler.sweep_interval_secs.max(1));
        let mut queue = ExecutionQueue::new(config.queue.clone(), sweep);
        if let Some(journal) = stores.journal.clone() {
            queue = queue.with_journal(journal);
        }
        let queue = Arc::new(queue);
        let audit = AuditLog::new(stores.audit.clone());

        let orchestrator = Arc::new(Orchestrator::new(
            &config,
            stores.bots.clone(),
            stores.campaigns.clone(),
            audit.clone(),
            queue.clone(),
        )?);
        let worker = BotWorker::new(
            stores.bots.clone(),
            stores.campaigns.clone(),
            audit,
            executor,
            config.workers.clone(),
        );
        let workers = WorkerPool::new(queue.clone(), Arc::new(worker));
        let engine = Arc::new(SchedulerEngine::new(
            stores.bots,
            stores.campaigns,
            orchestrator.clone(),
            config.scheduler.clone(),
        ));

        Ok(Self { config, orchestrator, queue, workers, engine })
    }

    pub fn audit(&self) -> &AuditLog {
        self.orchestrator.audit()
    }

    /// Recover journaled jobs and start consuming every queue.
    pub async fn start_workers(&self) -> Result<usize> {
        let recovered = self.queue.recover().await?;
        self.workers.subscribe_all(&self.config.workers).await;
        Ok(recovered)
    }

    /// Start the periodic sweep.
    pub fn start_scheduler(&self) -> SchedulerHandle {
        let every = Duration::from_secs(self.config.scheduler.sweep_interval_secs.max(1));
        spawn_scheduler(self.engine.clone(), every)
    }

    /// Wait until every queue is idle or `timeout` elapses.
    /// Returns `true` when drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.queue.is_idle().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::select! {
                _ = self.queue.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    }

    /// Stop workers; in-flight attempts finish first.
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
    }
}
