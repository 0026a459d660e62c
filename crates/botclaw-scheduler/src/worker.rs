//! Workers: pull jobs off the execution queues, run the platform action and
//! write the outcome back to the bot store and the decision audit log.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use botclaw_core::config::WorkerConfig;
use botclaw_core::error::{BotClawError, Result};
use botclaw_core::traits::{ActionExecutor, ActionReceipt, ActionRequest, BotStore, CampaignStore};
use botclaw_core::types::{ActionType, Bot, BotStatus, ExecutionJob, QueueName, RunStateUpdate};
use botclaw_governance::AuditLog;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::queue::{ExecutionQueue, JobDisposition};

/// Idle poll fallback when no notification arrives.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Processes one attempt of one job. `Err` feeds the queue's retry logic.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, job: &ExecutionJob) -> Result<()>;
}

/// The production handler: executes the bot's action and records outcomes.
pub struct BotWorker {
    bots: Arc<dyn BotStore>,
    campaigns: Arc<dyn CampaignStore>,
    audit: AuditLog,
    executor: Arc<dyn ActionExecutor>,
    config: WorkerConfig,
}

impl BotWorker {
    pub fn new(
        bots: Arc<dyn BotStore>,
        campaigns: Arc<dyn CampaignStore>,
        audit: AuditLog,
        executor: Arc<dyn ActionExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self { bots, campaigns, audit, executor, config }
    }

    /// Narrow the job payload into an action request. Malformed payloads
    /// are fatal: retrying cannot fix them.
    fn build_request(&self, job: &ExecutionJob, bot: &Bot) -> Result<ActionRequest> {
        let action: ActionType = match job.payload.get("action") {
            Some(serde_json::Value::String(s)) => s.parse()?,
            Some(other) => {
                return Err(BotClawError::fatal_config(format!(
                    "payload field 'action' must be a string, got {other}"
                )));
            }
            None => return Err(BotClawError::fatal_config("payload is missing 'action'")),
        };
        let campaign_id = match job.payload.get("campaign_id") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(BotClawError::fatal_config(format!(
                    "payload field 'campaign_id' must be a string, got {other}"
                )));
            }
        };
        Ok(ActionRequest {
            job_id: job.id.clone(),
            trace_id: job.trace_id.clone(),
            tenant_id: job.tenant_id.clone(),
            bot_id: bot.id.clone(),
            kind: bot.kind,
            action,
            campaign_id,
            attempt: job.attempt,
            config: bot.config.clone(),
        })
    }

    async fn run_action(&self, job: &ExecutionJob) -> Result<(ActionRequest, ActionReceipt)> {
        let bot = self
            .bots
            .get(&job.bot_id)?
            .ok_or_else(|| BotClawError::fatal_config(format!("bot {} no longer exists", job.bot_id)))?;
        let request = self.build_request(job, &bot)?;

        self.bots
            .update_run_state(&bot.id, RunStateUpdate::status(BotStatus::Running))?;

        let limit = self.config.timeout(job.queue);
        let receipt = match tokio::time::timeout(limit, self.executor.execute(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BotClawError::transient(format!(
                    "{} timed out after {}s",
                    request.action,
                    limit.as_secs()
                )));
            }
        };
        Ok((request, receipt))
    }

    fn record_success(&self, job: &ExecutionJob, request: &ActionRequest, receipt: &ActionReceipt) {
        let summary = match &receipt.external_ref {
            Some(r) => format!("{} ({r})", receipt.summary),
            None => receipt.summary.clone(),
        };
        if let Err(e) = self.audit.mark_executed(&job.decision_id, &summary) {
            tracing::error!("❌ Audit update for decision {} failed: {}", job.decision_id, e);
        }
        if let Err(e) = self
            .bots
            .update_run_state(&job.bot_id, RunStateUpdate::completed(Utc::now()))
        {
            tracing::error!("❌ Run state update for {} failed: {}", job.bot_id, e);
        }
        if let Err(e) = self.bots.update_daily_stats(&job.bot_id, 1) {
            tracing::warn!("⚠️ Daily stats update for {} failed: {}", job.bot_id, e);
        }
        if let Some(campaign_id) = &request.campaign_id {
            if receipt.cost > 0.0 {
                if let Err(e) = self.campaigns.record_spend(campaign_id, receipt.cost) {
                    tracing::warn!("⚠️ Spend update for campaign {} failed: {}", campaign_id, e);
                }
            }
        }
    }

    fn record_failure(&self, job: &ExecutionJob, error: &BotClawError) {
        let terminal = !error.is_retryable() || job.is_final_attempt();
        let result = if terminal {
            self.audit.mark_failed(&job.decision_id, &error.to_string())
        } else {
            self.audit.note(
                &job.decision_id,
                &format!("attempt {}/{} failed: {error}; retrying", job.attempt, job.max_attempts),
            )
        };
        if let Err(e) = result {
            tracing::error!("❌ Audit update for decision {} failed: {}", job.decision_id, e);
        }
        match self
            .bots
            .update_run_state(&job.bot_id, RunStateUpdate::status(BotStatus::Error))
        {
            Ok(()) | Err(BotClawError::NotFound(_)) => {}
            Err(e) => tracing::error!("❌ Run state update for {} failed: {}", job.bot_id, e),
        }
    }
}

#[async_trait]
impl JobHandler for BotWorker {
    async fn process(&self, job: &ExecutionJob) -> Result<()> {
        match self.run_action(job).await {
            Ok((request, receipt)) => {
                tracing::info!(
                    "🤖 {} {} done (job {}, attempt {}/{})",
                    request.bot_id,
                    request.action,
                    job.id,
                    job.attempt,
                    job.max_attempts
                );
                self.record_success(job, &request, &receipt);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ {} job {} attempt {}/{} failed: {}",
                    job.bot_id,
                    job.id,
                    job.attempt,
                    job.max_attempts,
                    e
                );
                self.record_failure(job, &e);
                Err(e)
            }
        }
    }
}

/// Run one attempt and report it to the queue.
pub async fn process_one(
    queue: &ExecutionQueue,
    handler: &dyn JobHandler,
    job: ExecutionJob,
) -> JobDisposition {
    let result = handler.process(&job).await;
    queue.complete(job, result.as_ref().err()).await
}

/// Background consumers, one loop per subscribed queue.
pub struct WorkerPool {
    queue: Arc<ExecutionQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<ExecutionQueue>, handler: Arc<dyn JobHandler>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            handler,
            shutdown,
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Start consuming `name` with up to `concurrency` jobs in flight.
    pub async fn subscribe(&self, name: QueueName, concurrency: usize) {
        self.queue.set_concurrency(name, concurrency).await;

        let queue = self.queue.clone();
        let handler = self.handler.clone();
        let mut stop = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            tracing::info!("👷 Worker subscribed to {} (concurrency {})", name, concurrency);
            let mut in_flight = JoinSet::new();
            loop {
                while in_flight.try_join_next().is_some() {}
                if *stop.borrow() {
                    break;
                }
                match queue.next(name).await {
                    Some(job) => {
                        let queue = queue.clone();
                        let handler = handler.clone();
                        in_flight.spawn(async move {
                            process_one(&queue, handler.as_ref(), job).await;
                        });
                    }
                    None => {
                        tokio::select! {
                            _ = queue.notified() => {}
                            _ = tokio::time::sleep(IDLE_POLL) => {}
                            changed = stop.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            if !in_flight.is_empty() {
                tracing::info!("⏳ Worker for {} waiting on {} in-flight job(s)", name, in_flight.len());
            }
            while in_flight.join_next().await.is_some() {}
            tracing::info!("👷 Worker for {} stopped", name);
        });

        if let Ok(mut loops) = self.loops.lock() {
            loops.push(handle);
        }
    }

    /// Subscribe every queue with the configured concurrency.
    pub async fn subscribe_all(&self, config: &WorkerConfig) {
        for name in QueueName::all() {
            self.subscribe(name, config.concurrency(name)).await;
        }
    }

    /// Stop pulling new jobs and wait for in-flight attempts to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let loops = match self.loops.lock() {
            Ok(mut loops) => std::mem::take(&mut *loops),
            Err(_) => Vec::new(),
        };
        for handle in loops {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobRequest, SubmitOptions};
    use crate::store::MemoryStore;
    use botclaw_core::config::QueueConfig;
    use botclaw_core::traits::AuditStore;
    use botclaw_core::types::{
        BotKind, Campaign, CampaignStatus, DecisionAuditEntry, DecisionSource, DecisionStatus,
        DecisionType, Document, TriggerSource,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails transiently `failures` times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        cost: f64,
    }

    #[async_trait]
    impl ActionExecutor for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(BotClawError::transient("platform 503"))
            } else {
                Ok(ActionReceipt {
                    external_ref: Some(format!("ext-{n}")),
                    cost: self.cost,
                    summary: format!("{} ok", request.action),
                })
            }
        }
    }

    /// Succeeds after a delay.
    struct Slow(Duration);

    #[async_trait]
    impl ActionExecutor for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt> {
            tokio::time::sleep(self.0).await;
            Ok(ActionReceipt {
                summary: format!("{} ok", request.action),
                ..Default::default()
            })
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: ExecutionQueue,
        worker: BotWorker,
        bot_id: String,
        decision_id: String,
    }

    fn fixture(failures: u32, max_attempts: u32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut bot = Bot::new("t1", BotKind::Creator, 60);
        bot.status = BotStatus::Running;
        bot.campaign_id = Some("c1".into());
        let bot_id = bot.id.clone();
        store.insert_bot(bot).unwrap();
        let mut campaign = Campaign::new("c1", "t1", "Launch");
        campaign.status = CampaignStatus::Active;
        store.insert_campaign(campaign).unwrap();

        let audit = AuditLog::new(store.clone());
        let mut entry = DecisionAuditEntry::proposed(
            DecisionType::BotAction,
            DecisionSource::RuleEngine,
            TriggerSource::Scheduled,
            "post for t1/creator",
        );
        entry.bot_id = Some(bot_id.clone());
        let decision_id = audit.propose(&entry).unwrap();

        let config = QueueConfig {
            bot_max_attempts: max_attempts,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            ..QueueConfig::default()
        };
        let queue = ExecutionQueue::new(config, std::time::Duration::from_secs(60));
        let executor = Arc::new(Flaky { failures, calls: AtomicU32::new(0), cost: 2.5 });
        let worker = BotWorker::new(store.clone(), store.clone(), audit, executor, WorkerConfig::default());
        Fixture { store, queue, worker, bot_id, decision_id }
    }

    async fn submit(f: &Fixture, payload: Document) {
        let max_attempts = f.queue.config().max_attempts(QueueName::BotExecution);
        f.queue
            .enqueue(
                JobRequest {
                    queue: QueueName::BotExecution,
                    tenant_id: "t1".into(),
                    bot_id: f.bot_id.clone(),
                    decision_id: f.decision_id.clone(),
                    trigger: TriggerSource::Scheduled,
                    trace_id: "trace".into(),
                    payload,
                },
                SubmitOptions { idempotency_key: "k".into(), max_attempts },
            )
            .await
            .unwrap();
    }

    fn post_payload() -> Document {
        let mut payload = Document::new();
        payload.insert("action".into(), json!("post"));
        payload.insert("campaign_id".into(), json!("c1"));
        payload
    }

    async fn drive(f: &Fixture) -> JobDisposition {
        let later = Utc::now() + chrono::Duration::seconds(5);
        let job = f.queue.next_ready(QueueName::BotExecution, later).await.unwrap();
        process_one(&f.queue, &f.worker, job).await
    }

    #[tokio::test]
    async fn test_success_updates_bot_audit_and_spend() {
        let f = fixture(0, 3);
        submit(&f, post_payload()).await;
        assert_eq!(drive(&f).await, JobDisposition::Completed);

        let bot = BotStore::get(f.store.as_ref(), &f.bot_id).unwrap().unwrap();
        assert_eq!(bot.status, BotStatus::Idle);
        assert!(bot.last_run_at.is_some());
        assert_eq!(bot.daily_action_count, 1);

        let entry = f.store.get_by_id(&f.decision_id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Executed);
        assert!(bot.last_run_at.unwrap() >= entry.timestamp);

        let campaign = CampaignStore::get(f.store.as_ref(), "c1").unwrap().unwrap();
        assert_eq!(campaign.daily_spend, 2.5);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let f = fixture(1, 3);
        submit(&f, post_payload()).await;

        assert!(matches!(drive(&f).await, JobDisposition::RetryScheduled { .. }));
        let bot = BotStore::get(f.store.as_ref(), &f.bot_id).unwrap().unwrap();
        assert_eq!(bot.status, BotStatus::Error);
        let entry = f.store.get_by_id(&f.decision_id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Proposed);
        assert!(entry.reasoning.contains("attempt 1/3 failed"));

        assert_eq!(drive(&f).await, JobDisposition::Completed);
        let entry = f.store.get_by_id(&f.decision_id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Executed);
        let bot = BotStore::get(f.store.as_ref(), &f.bot_id).unwrap().unwrap();
        assert_eq!(bot.status, BotStatus::Idle);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed() {
        let f = fixture(10, 3);
        submit(&f, post_payload()).await;
        for _ in 0..2 {
            assert!(matches!(drive(&f).await, JobDisposition::RetryScheduled { .. }));
        }
        assert!(matches!(drive(&f).await, JobDisposition::Failed { .. }));

        let entry = f.store.get_by_id(&f.decision_id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Failed);
        assert!(entry.reasoning.contains("platform 503"));
        let bot = BotStore::get(f.store.as_ref(), &f.bot_id).unwrap().unwrap();
        assert_eq!(bot.status, BotStatus::Error);
        assert_eq!(bot.daily_action_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_fails_without_retry() {
        let f = fixture(0, 3);
        let mut payload = Document::new();
        payload.insert("action".into(), json!(42));
        submit(&f, payload).await;

        assert!(matches!(drive(&f).await, JobDisposition::Failed { .. }));
        let entry = f.store.get_by_id(&f.decision_id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Failed);
        assert!(entry.reasoning.contains("Fatal config"));
    }

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let f = fixture(0, 3);
        submit(&f, post_payload()).await;
        let Fixture { store, queue, worker, decision_id, .. } = f;
        let queue = Arc::new(queue);
        let pool = WorkerPool::new(queue.clone(), Arc::new(worker));
        pool.subscribe(QueueName::BotExecution, 2).await;

        for _ in 0..50 {
            if queue.is_idle().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.shutdown().await;

        assert!(queue.is_idle().await);
        let entry = store.get_by_id(&decision_id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Executed);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_attempt() {
        let f = fixture(0, 3);
        submit(&f, post_payload()).await;
        let Fixture { store, queue, bot_id, decision_id, .. } = f;
        let worker = BotWorker::new(
            store.clone(),
            store.clone(),
            AuditLog::new(store.clone()),
            Arc::new(Slow(Duration::from_millis(400))),
            WorkerConfig::default(),
        );
        let queue = Arc::new(queue);
        let pool = WorkerPool::new(queue.clone(), Arc::new(worker));
        pool.subscribe(QueueName::BotExecution, 1).await;

        for _ in 0..50 {
            if queue.stats().await[0].active == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.shutdown().await;

        assert!(queue.is_idle().await);
        let entry = store.get_by_id(&decision_id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Executed);
        let bot = BotStore::get(store.as_ref(), &bot_id).unwrap().unwrap();
        assert_eq!(bot.status, BotStatus::Idle);
    }
}
