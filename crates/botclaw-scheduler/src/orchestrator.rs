//! Orchestrator. The single entry point for every activation: scheduler
//! sweep, campaign fan-out, manual "run now" and approved decisions.
//!
//! Order of side effects: policy chain → audit write → bot claim → enqueue.
//! A crash between the audit write and the enqueue leaves a `Proposed`
//! record and no job, never a job without a record.

use std::collections::HashMap;
use std::sync::Arc;

use botclaw_core::config::BotClawConfig;
use botclaw_core::error::{BotClawError, Result};
use botclaw_core::traits::{BotStore, CampaignStore, StrategyAdvisor};
use botclaw_core::types::{
    ActionType, Bot, BotKind, BotStatus, DecisionAuditEntry, DecisionSource, DecisionStatus,
    DecisionType, Document, QueueName, RunContext, RunStateUpdate, TriggerSource,
};
use botclaw_governance::{AuditLog, PolicyChain};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::queue::{ExecutionQueue, JobRequest, SubmitOptions};

/// One candidate activation.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub bot_id: String,
    pub tenant_id: String,
    pub trigger: TriggerSource,
    pub operator_override: bool,
    /// Set by campaign fan-out: the job goes to the derived action queue.
    pub derived_action: Option<ActionType>,
}

impl DispatchRequest {
    pub fn new(bot_id: &str, tenant_id: &str, trigger: TriggerSource) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            tenant_id: tenant_id.to_string(),
            trigger,
            operator_override: false,
            derived_action: None,
        }
    }

    pub fn scheduled(bot_id: &str, tenant_id: &str) -> Self {
        Self::new(bot_id, tenant_id, TriggerSource::Scheduled)
    }

    pub fn campaign_action(bot_id: &str, tenant_id: &str, action: ActionType) -> Self {
        Self {
            derived_action: Some(action),
            ..Self::scheduled(bot_id, tenant_id)
        }
    }

    pub fn with_override(mut self, operator_override: bool) -> Self {
        self.operator_override = operator_override;
        self
    }
}

/// Result of a dispatch. Denials are values, not errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchOutcome {
    pub accepted: bool,
    pub job_id: Option<String>,
    pub decision_id: Option<String>,
    pub reason: Option<String>,
    /// Parked until a human approves or rejects.
    pub pending_approval: bool,
}

impl DispatchOutcome {
    fn accepted(decision_id: &str, job_id: &str) -> Self {
        Self {
            accepted: true,
            job_id: Some(job_id.to_string()),
            decision_id: Some(decision_id.to_string()),
            ..Default::default()
        }
    }

    fn rejected(decision_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            decision_id: decision_id.map(str::to_string),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Operator "run now" request.
#[derive(Debug, Clone)]
pub struct ManualTrigger {
    pub bot_kind: BotKind,
    pub tenant_id: String,
    pub operator_override: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualTriggerStatus {
    Queued,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualTriggerResponse {
    pub status: ManualTriggerStatus,
    pub job_id: Option<String>,
    pub decision_id: Option<String>,
    pub reason: Option<String>,
}

/// Unified dispatcher over the policy chain, the audit log and the queues.
pub struct Orchestrator {
    bots: Arc<dyn BotStore>,
    campaigns: Arc<dyn CampaignStore>,
    audit: AuditLog,
    queue: Arc<ExecutionQueue>,
    default_chain: PolicyChain,
    kind_chains: HashMap<BotKind, PolicyChain>,
    advisor: Option<Arc<dyn StrategyAdvisor>>,
    default_confidence: f64,
    tick_secs: i64,
}

impl Orchestrator {
    /// Build with the standard policy chain from config.
    pub fn new(
        config: &BotClawConfig,
        bots: Arc<dyn BotStore>,
        campaigns: Arc<dyn CampaignStore>,
        audit: AuditLog,
        queue: Arc<ExecutionQueue>,
    ) -> Result<Self> {
        Ok(Self {
            bots,
            campaigns,
            audit,
            queue,
            default_chain: PolicyChain::standard(&config.policy)?,
            kind_chains: HashMap::new(),
            advisor: None,
            default_confidence: config.policy.default_confidence.clamp(0.0, 1.0),
            tick_secs: config.scheduler.sweep_interval_secs.max(1) as i64,
        })
    }

    /// Use a dedicated chain for one bot kind.
    pub fn with_kind_chain(mut self, kind: BotKind, chain: PolicyChain) -> Self {
        self.kind_chains.insert(kind, chain);
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn StrategyAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    fn chain_for(&self, kind: BotKind) -> &PolicyChain {
        self.kind_chains.get(&kind).unwrap_or(&self.default_chain)
    }

    /// Scheduling tick an instant falls into.
    pub fn tick(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.tick_secs)
    }

    /// Dispatch a bot now.
    pub async fn dispatch(
        &self,
        bot_id: &str,
        tenant_id: &str,
        trigger: TriggerSource,
    ) -> Result<DispatchOutcome> {
        self.dispatch_at(DispatchRequest::new(bot_id, tenant_id, trigger), Utc::now())
            .await
    }

    /// Dispatch against an explicit evaluation instant.
    pub async fn dispatch_at(
        &self,
        request: DispatchRequest,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let bot = match self.bots.get(&request.bot_id)? {
            Some(bot) if bot.tenant_id == request.tenant_id => bot,
            _ => {
                tracing::debug!("🔍 Dispatch for unknown bot {} ({})", request.bot_id, request.tenant_id);
                return Ok(DispatchOutcome::rejected(None, "not found"));
            }
        };
        if !bot.enabled && request.trigger != TriggerSource::Manual {
            return Ok(DispatchOutcome::rejected(None, "bot disabled"));
        }
        // One parked activation per bot: later ticks wait for the human.
        if request.trigger == TriggerSource::Scheduled {
            if let Some(parked) = self.audit.pending_approval(&bot.id)? {
                tracing::debug!("✋ {} still awaiting approval of {}", bot.id, parked.id);
                return Ok(DispatchOutcome {
                    pending_approval: true,
                    ..DispatchOutcome::rejected(Some(&parked.id), "awaiting approval")
                });
            }
        }

        let campaign = match &bot.campaign_id {
            Some(id) => self.campaigns.get(id)?,
            None => None,
        };
        let tenant_running = self.bots.count_running(&bot.tenant_id)?;
        let mut ctx = RunContext::new(bot.clone(), request.trigger, now)
            .with_campaign(campaign)
            .with_override(request.operator_override)
            .with_tenant_running(tenant_running);
        if let Some(action) = request.derived_action {
            ctx.action = action;
        }

        let chain = self.chain_for(bot.kind);
        let verdict = chain.evaluate(&ctx);

        let decision_type = if request.derived_action.is_some() {
            DecisionType::CampaignAction
        } else {
            DecisionType::BotAction
        };
        let mut entry = DecisionAuditEntry::proposed(
            decision_type,
            DecisionSource::RuleEngine,
            request.trigger,
            &format!("{} for {} ({} trigger)", ctx.action, bot.id, request.trigger.as_str()),
        );
        entry.bot_id = Some(bot.id.clone());
        entry.campaign_id = bot.campaign_id.clone();
        entry.confidence = self.confidence(&ctx);
        entry.reasoning = format!(
            "{} trigger evaluated against {} policies",
            request.trigger.as_str(),
            chain.len()
        );
        let decision_id = self.audit.propose(&entry)?;

        if verdict.requires_approval {
            self.audit.note(&decision_id, &verdict.reasoning())?;
            tracing::info!("✋ {} parked for approval (decision {})", bot.id, decision_id);
            return Ok(DispatchOutcome {
                pending_approval: true,
                ..DispatchOutcome::rejected(
                    Some(&decision_id),
                    verdict.reason.clone().unwrap_or_else(|| "approval required".into()),
                )
            });
        }
        if !verdict.allowed {
            self.audit.reject_by_policy(&decision_id, &verdict.reasoning())?;
            return Ok(DispatchOutcome::rejected(
                Some(&decision_id),
                verdict.reason.clone().unwrap_or_else(|| "denied by policy".into()),
            ));
        }

        if request.trigger == TriggerSource::Manual {
            self.bots
                .update_run_state(&bot.id, RunStateUpdate::status(BotStatus::Running))?;
        } else if !self.bots.claim_running(&bot.id)? {
            let conflict = BotClawError::ConcurrencyConflict(format!("{} already running", bot.id));
            tracing::debug!("⏭️ {}", conflict);
            self.audit
                .reject_by_policy(&decision_id, "bot already running; dispatch dropped")?;
            return Ok(DispatchOutcome::rejected(Some(&decision_id), "bot already running"));
        }

        let key = match request.trigger {
            TriggerSource::Manual => format!("manual:{}", uuid::Uuid::new_v4().simple()),
            TriggerSource::Scheduled => format!("{}:{}", bot.id, self.tick(now)),
        };
        let note = verdict.reasoning();
        self.enqueue_decision(&entry, &bot, request.derived_action, key, Some(&note))
            .await
    }

    /// Operator "run now" for a tenant's bot of the given kind.
    pub async fn manual_trigger(&self, trigger: ManualTrigger) -> Result<ManualTriggerResponse> {
        let bot_id = Bot::make_id(&trigger.tenant_id, trigger.bot_kind);
        let request = DispatchRequest::new(&bot_id, &trigger.tenant_id, TriggerSource::Manual)
            .with_override(trigger.operator_override);
        let outcome = self.dispatch_at(request, Utc::now()).await?;
        tracing::info!(
            "🔔 Manual trigger {} → {}",
            bot_id,
            if outcome.accepted { "queued" } else { "rejected" }
        );
        Ok(ManualTriggerResponse {
            status: if outcome.accepted {
                ManualTriggerStatus::Queued
            } else {
                ManualTriggerStatus::Rejected
            },
            job_id: outcome.job_id,
            decision_id: outcome.decision_id,
            reason: outcome.reason,
        })
    }

    /// Human approval: `Proposed → Approved`, then enqueue the withheld job.
    pub async fn approve(
        &self,
        decision_id: &str,
        approver: &str,
        notes: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let parked = self.audit.require_proposed(decision_id, "approve")?;
        let bot_id = parked
            .bot_id
            .clone()
            .ok_or_else(|| BotClawError::not_found(format!("bot for decision {decision_id}")))?;
        let Some(bot) = self.bots.get(&bot_id)? else {
            self.audit.mark_failed(decision_id, &format!("bot {bot_id} no longer exists"))?;
            return Err(BotClawError::not_found(format!("bot {bot_id}")));
        };

        // The decision stays Proposed while the bot is busy; approve again later.
        if !self.bots.claim_running(&bot.id)? {
            self.audit.note(
                decision_id,
                &format!("approval by {approver} deferred: {} already running", bot.id),
            )?;
            tracing::info!("⏸️ Approval of {} deferred: {} is running", decision_id, bot.id);
            return Ok(DispatchOutcome {
                pending_approval: true,
                ..DispatchOutcome::rejected(Some(decision_id), "bot already running")
            });
        }
        let entry = match self.audit.approve(decision_id, approver, notes) {
            Ok(entry) => entry,
            Err(e) => {
                self.release(&bot);
                return Err(e);
            }
        };
        let derived = match entry.decision_type {
            DecisionType::CampaignAction => Some(bot.kind.action_type()),
            DecisionType::BotAction => None,
        };
        self.enqueue_decision(&entry, &bot, derived, format!("approval:{decision_id}"), None)
            .await
    }

    /// Human rejection. Never enqueues.
    pub fn reject(&self, decision_id: &str, approver: &str, reason: &str) -> Result<DecisionAuditEntry> {
        self.audit.reject(decision_id, approver, reason)
    }

    /// Enqueue the job for a claimed bot and link it to the decision.
    /// `bot` is the snapshot taken before the claim.
    async fn enqueue_decision(
        &self,
        entry: &DecisionAuditEntry,
        bot: &Bot,
        derived_action: Option<ActionType>,
        idempotency_key: String,
        verdict_note: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let action = derived_action.unwrap_or_else(|| bot.kind.action_type());
        let queue_name = match derived_action {
            Some(action) => QueueName::for_action(action),
            None => QueueName::BotExecution,
        };
        let mut payload = Document::new();
        payload.insert("action".into(), json!(action.as_str()));
        payload.insert("kind".into(), json!(bot.kind.as_str()));
        payload.insert("decision_type".into(), json!(entry.decision_type.as_str()));
        if let Some(campaign_id) = &bot.campaign_id {
            payload.insert("campaign_id".into(), json!(campaign_id));
        }

        let job = JobRequest {
            queue: queue_name,
            tenant_id: bot.tenant_id.clone(),
            bot_id: bot.id.clone(),
            decision_id: entry.id.clone(),
            trigger: entry.trigger,
            trace_id: entry.trace_id.clone(),
            payload,
        };
        let options = SubmitOptions {
            idempotency_key,
            max_attempts: self.queue.config().max_attempts(queue_name),
        };

        let submission = match self.queue.enqueue(job, options).await {
            Ok(s) => s,
            Err(e) => {
                self.release(bot);
                self.audit.mark_failed(&entry.id, &format!("enqueue failed: {e}"))?;
                return Err(e);
            }
        };

        if submission.duplicate {
            self.release(bot);
            let line = format!("duplicate of job {} within this tick", submission.job_id);
            match entry.status {
                DecisionStatus::Proposed => self.audit.reject_by_policy(&entry.id, &line)?,
                _ => self.audit.mark_failed(&entry.id, &line)?,
            }
            return Ok(DispatchOutcome::rejected(Some(&entry.id), "duplicate"));
        }

        let note = match verdict_note {
            Some(v) => format!("{v}; queued as {} on {}", submission.job_id, queue_name),
            None => format!("queued as {} on {}", submission.job_id, queue_name),
        };
        self.audit.attach_job(&entry.id, &submission.job_id, &note)?;
        tracing::info!("📤 {} {} queued as {} ({})", bot.id, action, submission.job_id, queue_name);
        Ok(DispatchOutcome::accepted(&entry.id, &submission.job_id))
    }

    /// Put the bot back to its pre-claim status.
    fn release(&self, bot: &Bot) {
        let status = if bot.status == BotStatus::Running { BotStatus::Idle } else { bot.status };
        if let Err(e) = self.bots.update_run_state(&bot.id, RunStateUpdate::status(status)) {
            tracing::warn!("⚠️ Failed to release claim on {}: {}", bot.id, e);
        }
    }

    fn confidence(&self, ctx: &RunContext) -> f64 {
        self.advisor
            .as_ref()
            .and_then(|a| a.confidence(ctx))
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(self.default_confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::worker::{process_one, BotWorker};
    use botclaw_core::config::{PolicyConfig, QueueConfig, WorkerConfig};
    use botclaw_core::traits::{ActionExecutor, ActionReceipt, ActionRequest, AuditStore};
    use botclaw_core::types::{Campaign, CampaignStatus};
    use chrono::{Duration, TimeZone};

    struct AlwaysOk;

    #[async_trait::async_trait]
    impl ActionExecutor for AlwaysOk {
        fn name(&self) -> &str {
            "ok"
        }

        async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt> {
            Ok(ActionReceipt {
                summary: format!("{} ok", request.action),
                ..Default::default()
            })
        }
    }

    struct FixedAdvisor(f64);

    impl StrategyAdvisor for FixedAdvisor {
        fn confidence(&self, _: &RunContext) -> Option<f64> {
            Some(self.0)
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        orch: Orchestrator,
        worker: BotWorker,
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn config() -> BotClawConfig {
        BotClawConfig {
            policy: PolicyConfig { max_running_per_tenant: 5, ..PolicyConfig::default() },
            queue: QueueConfig { backoff_base_ms: 0, backoff_max_ms: 0, ..QueueConfig::default() },
            ..BotClawConfig::default()
        }
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let mut campaign = Campaign::new("c1", "t1", "Spring launch");
        campaign.status = CampaignStatus::Active;
        campaign.bot_ids = vec!["t1/creator".into()];
        store.insert_campaign(campaign).unwrap();

        let mut bot = Bot::new("t1", BotKind::Creator, 60);
        bot.last_run_at = Some(noon() - Duration::minutes(61));
        bot.campaign_id = Some("c1".into());
        store.insert_bot(bot).unwrap();

        let config = config();
        let audit = AuditLog::new(store.clone());
        let queue = Arc::new(ExecutionQueue::new(config.queue.clone(), std::time::Duration::from_secs(60)));
        let orch = Orchestrator::new(&config, store.clone(), store.clone(), audit.clone(), queue).unwrap();
        let worker = BotWorker::new(store.clone(), store.clone(), audit, Arc::new(AlwaysOk), WorkerConfig::default());
        Harness { store, orch, worker }
    }

    async fn run_next(h: &Harness, queue: QueueName) {
        let job = h.orch.queue().next(queue).await.unwrap();
        process_one(h.orch.queue(), &h.worker, job).await;
    }

    fn bot(h: &Harness) -> Bot {
        BotStore::get(h.store.as_ref(), "t1/creator").unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_scheduled_dispatch_executes() {
        let h = harness();
        let outcome = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon())
            .await
            .unwrap();
        assert!(outcome.accepted);
        assert_eq!(bot(&h).status, BotStatus::Running);

        run_next(&h, QueueName::BotExecution).await;

        let id = outcome.decision_id.unwrap();
        let entry = h.store.get_by_id(&id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Executed);
        assert_eq!(entry.job_id, outcome.job_id);
        assert_eq!(entry.confidence, 0.75);
        assert_eq!(bot(&h).status, BotStatus::Idle);
        assert_eq!(h.store.decision_count(), 1);
    }

    #[tokio::test]
    async fn test_quiet_hours_denies_without_enqueue() {
        let h = harness();
        let late = Utc.with_ymd_and_hms(2026, 3, 14, 23, 30, 0).unwrap();
        let outcome = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), late)
            .await
            .unwrap();
        assert!(!outcome.accepted);
        assert!(outcome.reason.unwrap().contains("Quiet Hours"));
        assert!(h.orch.queue().is_idle().await);

        let entry = h.store.get_by_id(&outcome.decision_id.unwrap()).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Rejected);
        assert!(entry.approval.is_none());
        assert!(entry.reasoning.contains("quiet_hours"));
        assert_eq!(bot(&h).status, BotStatus::Idle);
    }

    #[tokio::test]
    async fn test_approval_then_execute() {
        let h = harness();
        let mut b = bot(&h);
        b.config.insert("requiresApproval".into(), json!(true));
        h.store.insert_bot(b).unwrap();

        let outcome = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon())
            .await
            .unwrap();
        assert!(!outcome.accepted);
        assert!(outcome.pending_approval);
        assert!(outcome.reason.unwrap().contains("approval"));
        let id = outcome.decision_id.unwrap();
        assert_eq!(h.store.get_by_id(&id).unwrap().unwrap().status, DecisionStatus::Proposed);
        assert!(h.orch.queue().is_idle().await);

        let approved = h.orch.approve(&id, "ops", None).await.unwrap();
        assert!(approved.accepted);
        run_next(&h, QueueName::BotExecution).await;

        let entry = h.store.get_by_id(&id).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Executed);
        assert_eq!(entry.approval.unwrap().approver, "ops");
    }

    #[tokio::test]
    async fn test_reject_never_enqueues() {
        let h = harness();
        let mut b = bot(&h);
        b.config.insert("requiresApproval".into(), json!(true));
        h.store.insert_bot(b).unwrap();
        let outcome = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon())
            .await
            .unwrap();
        let id = outcome.decision_id.unwrap();

        let rejected = h.orch.reject(&id, "ops", "off-brand").unwrap();
        assert_eq!(rejected.status, DecisionStatus::Rejected);
        assert!(h.orch.queue().is_idle().await);
        assert!(matches!(
            h.orch.approve(&id, "ops", None).await,
            Err(BotClawError::InvalidTransition(_))
        ));
        assert!(matches!(
            h.orch.approve("dec-nope", "ops", None).await,
            Err(BotClawError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_running_bot_is_single_flight() {
        let h = harness();
        let first = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon())
            .await
            .unwrap();
        assert!(first.accepted);

        // Next tick, previous job still in flight.
        let later = noon() + Duration::minutes(5);
        let second = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), later)
            .await
            .unwrap();
        assert!(!second.accepted);
        assert_eq!(second.reason.as_deref(), Some("bot already running"));
        let entry = h.store.get_by_id(&second.decision_id.unwrap()).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Rejected);

        let stats = h.orch.queue().stats().await;
        assert_eq!(stats[0].ready, 1);
    }

    #[tokio::test]
    async fn test_manual_trigger_bypasses_schedule_policies() {
        let h = harness();
        let mut b = bot(&h);
        b.enabled = false;
        b.campaign_id = None;
        h.store.insert_bot(b).unwrap();

        let resp = h
            .orch
            .manual_trigger(ManualTrigger {
                bot_kind: BotKind::Creator,
                tenant_id: "t1".into(),
                operator_override: false,
            })
            .await
            .unwrap();
        assert_eq!(resp.status, ManualTriggerStatus::Queued);
        assert!(resp.job_id.is_some());

        let missing = h
            .orch
            .manual_trigger(ManualTrigger {
                bot_kind: BotKind::Growth,
                tenant_id: "t1".into(),
                operator_override: false,
            })
            .await
            .unwrap();
        assert_eq!(missing.status, ManualTriggerStatus::Rejected);
        assert_eq!(missing.reason.as_deref(), Some("not found"));
        assert!(missing.decision_id.is_none());
    }

    #[tokio::test]
    async fn test_override_skips_approval() {
        let h = harness();
        let mut b = bot(&h);
        b.config.insert("requiresApproval".into(), json!(true));
        h.store.insert_bot(b).unwrap();
        let resp = h
            .orch
            .manual_trigger(ManualTrigger {
                bot_kind: BotKind::Creator,
                tenant_id: "t1".into(),
                operator_override: true,
            })
            .await
            .unwrap();
        assert_eq!(resp.status, ManualTriggerStatus::Queued);
    }

    #[tokio::test]
    async fn test_tenant_mismatch_and_disabled() {
        let h = harness();
        let wrong = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t2"), noon())
            .await
            .unwrap();
        assert_eq!(wrong.reason.as_deref(), Some("not found"));

        h.store.set_enabled("t1/creator", false).unwrap();
        let off = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon())
            .await
            .unwrap();
        assert!(!off.accepted);
        assert_eq!(h.store.decision_count(), 0);
    }

    #[tokio::test]
    async fn test_campaign_action_goes_to_media_queue() {
        let h = harness();
        let outcome = h
            .orch
            .dispatch_at(
                DispatchRequest::campaign_action("t1/creator", "t1", ActionType::Post),
                noon(),
            )
            .await
            .unwrap();
        assert!(outcome.accepted);
        let entry = h.store.get_by_id(&outcome.decision_id.unwrap()).unwrap().unwrap();
        assert_eq!(entry.decision_type, DecisionType::CampaignAction);
        assert_eq!(entry.campaign_id.as_deref(), Some("c1"));

        let stats = h.orch.queue().stats().await;
        let media = stats.iter().find(|s| s.queue == QueueName::MediaContent).unwrap();
        assert_eq!(media.ready, 1);
        run_next(&h, QueueName::MediaContent).await;
        assert_eq!(bot(&h).daily_action_count, 1);
    }

    #[tokio::test]
    async fn test_advisor_sets_confidence() {
        let h = harness();
        let orch = h.orch.with_advisor(Arc::new(FixedAdvisor(1.7)));
        let outcome = orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon())
            .await
            .unwrap();
        let entry = h.store.get_by_id(&outcome.decision_id.unwrap()).unwrap().unwrap();
        assert_eq!(entry.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_kind_chain_override() {
        let h = harness();
        let late = Utc.with_ymd_and_hms(2026, 3, 14, 23, 30, 0).unwrap();
        // Creators get a chain without quiet hours.
        let mut relaxed = PolicyChain::standard(&PolicyConfig::default()).unwrap();
        assert!(relaxed.remove("quiet_hours"));
        let orch = h.orch.with_kind_chain(BotKind::Creator, relaxed);
        let outcome = orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), late)
            .await
            .unwrap();
        assert!(outcome.accepted);
    }

    #[tokio::test]
    async fn test_approval_defers_while_bot_running() {
        let h = harness();
        let mut b = bot(&h);
        b.config.insert("requiresApproval".into(), json!(true));
        h.store.insert_bot(b).unwrap();

        let park = || ManualTrigger {
            bot_kind: BotKind::Creator,
            tenant_id: "t1".into(),
            operator_override: false,
        };
        let first = h.orch.manual_trigger(park()).await.unwrap().decision_id.unwrap();
        let second = h.orch.manual_trigger(park()).await.unwrap().decision_id.unwrap();

        assert!(h.orch.approve(&first, "ops", None).await.unwrap().accepted);
        assert_eq!(bot(&h).status, BotStatus::Running);

        let deferred = h.orch.approve(&second, "ops", None).await.unwrap();
        assert!(!deferred.accepted);
        assert!(deferred.pending_approval);
        assert_eq!(deferred.reason.as_deref(), Some("bot already running"));
        let entry = h.store.get_by_id(&second).unwrap().unwrap();
        assert_eq!(entry.status, DecisionStatus::Proposed);
        assert!(entry.approval.is_none());
        assert!(entry.reasoning.contains("deferred"));
        assert_eq!(h.orch.queue().stats().await[0].ready, 1);

        // Once the first job finishes the parked one can go.
        run_next(&h, QueueName::BotExecution).await;
        assert!(h.orch.approve(&second, "ops", None).await.unwrap().accepted);
        run_next(&h, QueueName::BotExecution).await;
        assert_eq!(h.store.get_by_id(&second).unwrap().unwrap().status, DecisionStatus::Executed);
    }

    #[tokio::test]
    async fn test_scheduled_dispatch_waits_for_parked_decision() {
        let h = harness();
        let mut b = bot(&h);
        b.config.insert("requiresApproval".into(), json!(true));
        h.store.insert_bot(b).unwrap();

        let parked = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon())
            .await
            .unwrap();
        let later = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon() + Duration::minutes(5))
            .await
            .unwrap();
        assert!(!later.accepted);
        assert!(later.pending_approval);
        assert_eq!(later.decision_id, parked.decision_id);
        assert_eq!(h.store.decision_count(), 1);
    }

    #[tokio::test]
    async fn test_same_tick_redispatch_is_duplicate() {
        let h = harness();
        let first = h
            .orch
            .dispatch_at(DispatchRequest::scheduled("t1/creator", "t1"), noon())
            .await
            .unwrap();
        assert!(first.accepted);
        let first_job = first.job_id.clone().unwrap();

        // Bot freed while the first job is still queued.
        h.store
            .update_run_state("t1/creator", RunStateUpdate::status(BotStatus::Idle))
            .unwrap();
        let second = h
            .orch
            .dispatch_at(
                DispatchRequest::scheduled("t1/creator", "t1"),
                noon() + Duration::seconds(10),
            )
            .await
            .unwrap();
        assert!(!second.accepted);
        assert_eq!(second.reason.as_deref(), Some("duplicate"));
        assert!(second.job_id.is_none());
        assert_eq!(bot(&h).status, BotStatus::Idle);

        let dup = h.store.get_by_id(&second.decision_id.unwrap()).unwrap().unwrap();
        assert_eq!(dup.status, DecisionStatus::Rejected);
        assert!(dup.reasoning.contains(&format!("duplicate of job {first_job}")));

        run_next(&h, QueueName::BotExecution).await;
        assert!(h.orch.queue().is_idle().await);
        let executed = h
            .store
            .query_by_bot("t1/creator")
            .unwrap()
            .into_iter()
            .filter(|e| e.status == DecisionStatus::Executed)
            .count();
        assert_eq!(executed, 1);
        assert_eq!(bot(&h).daily_action_count, 1);
    }
}
