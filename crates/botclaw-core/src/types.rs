//! Data model shared across the pipeline: bots, campaigns, run contexts,
//! decision audit entries and execution jobs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::BotClawError;

/// Schema-less key/value document (bot config, job payload).
/// Consumers narrow the fields they need and fail on malformed ones.
pub type Document = serde_json::Map<String, serde_json::Value>;

// ─── Bots ──────────────────────────────────────────────────

/// Closed set of agent kinds a tenant can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotKind {
    /// Publishes new content.
    Creator,
    /// Replies to mentions and comments.
    Engagement,
    /// Follows accounts to grow the audience.
    Growth,
    /// Reads platform metrics and produces reports.
    Analyst,
}

impl BotKind {
    pub fn all() -> [BotKind; 4] {
        [BotKind::Creator, BotKind::Engagement, BotKind::Growth, BotKind::Analyst]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BotKind::Creator => "creator",
            BotKind::Engagement => "engagement",
            BotKind::Growth => "growth",
            BotKind::Analyst => "analyst",
        }
    }

    /// The platform action this kind performs when activated.
    pub fn action_type(&self) -> ActionType {
        match self {
            BotKind::Creator => ActionType::Post,
            BotKind::Engagement => ActionType::Reply,
            BotKind::Growth => ActionType::Follow,
            BotKind::Analyst => ActionType::Analyze,
        }
    }
}

impl std::fmt::Display for BotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotKind {
    type Err = BotClawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "creator" => Ok(BotKind::Creator),
            "engagement" => Ok(BotKind::Engagement),
            "growth" => Ok(BotKind::Growth),
            "analyst" => Ok(BotKind::Analyst),
            other => Err(BotClawError::not_found(format!("bot kind '{other}'"))),
        }
    }
}

/// Action performed against the external platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Post,
    Reply,
    Follow,
    Analyze,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Post => "post",
            ActionType::Reply => "reply",
            ActionType::Follow => "follow",
            ActionType::Analyze => "analyze",
        }
    }

    /// Posting generates media/content and runs on the heavy queue.
    pub fn is_media_heavy(&self) -> bool {
        matches!(self, ActionType::Post)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = BotClawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "post" => Ok(ActionType::Post),
            "reply" => Ok(ActionType::Reply),
            "follow" => Ok(ActionType::Follow),
            "analyze" => Ok(ActionType::Analyze),
            other => Err(BotClawError::fatal_config(format!("unknown action '{other}'"))),
        }
    }
}

/// Bot run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Idle,
    Running,
    Error,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Idle => "idle",
            BotStatus::Running => "running",
            BotStatus::Error => "error",
        }
    }

    /// Lenient parse for persisted values; unknown → Idle.
    pub fn from_db(s: &str) -> Self {
        match s {
            "running" => BotStatus::Running,
            "error" => BotStatus::Error,
            _ => BotStatus::Idle,
        }
    }
}

/// A tenant-scoped bot. Identity is `(tenant_id, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    /// Derived id: `"{tenant_id}/{kind}"`.
    pub id: String,
    pub tenant_id: String,
    pub kind: BotKind,
    pub enabled: bool,
    pub interval_minutes: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub status: BotStatus,
    /// Opaque config interpreted by policies and by the action.
    #[serde(default)]
    pub config: Document,
    #[serde(default)]
    pub daily_action_count: u32,
    /// 0 = unlimited.
    #[serde(default)]
    pub daily_action_limit: u32,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

impl Bot {
    /// Create an enabled, idle bot that has never run.
    pub fn new(tenant_id: &str, kind: BotKind, interval_minutes: u32) -> Self {
        Self {
            id: Self::make_id(tenant_id, kind),
            tenant_id: tenant_id.to_string(),
            kind,
            enabled: true,
            interval_minutes,
            last_run_at: None,
            status: BotStatus::Idle,
            config: Document::new(),
            daily_action_count: 0,
            daily_action_limit: 0,
            campaign_id: None,
        }
    }

    pub fn make_id(tenant_id: &str, kind: BotKind) -> String {
        format!("{tenant_id}/{kind}")
    }

    /// When the next scheduled run is due. `None` = never ran, due now.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
            .map(|last| last + Duration::minutes(self.interval_minutes as i64))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.due_at() {
            Some(due) => now >= due,
            None => true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == BotStatus::Running
    }
}

/// Partial run-state write. Applied as a single-record update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStateUpdate {
    pub status: BotStatus,
    /// `None` leaves `last_run_at` untouched.
    pub last_run_at: Option<DateTime<Utc>>,
}

impl RunStateUpdate {
    pub fn status(status: BotStatus) -> Self {
        Self { status, last_run_at: None }
    }

    pub fn completed(at: DateTime<Utc>) -> Self {
        Self { status: BotStatus::Idle, last_run_at: Some(at) }
    }
}

// ─── Campaigns ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Draft,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Draft => "draft",
            CampaignStatus::Completed => "completed",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "active" => CampaignStatus::Active,
            "completed" => CampaignStatus::Completed,
            _ => CampaignStatus::Draft,
        }
    }
}

/// Groups bots under an objective and a daily budget envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub objective: String,
    pub status: CampaignStatus,
    #[serde(default)]
    pub bot_ids: Vec<String>,
    /// `None` = no cap.
    #[serde(default)]
    pub daily_budget_cap: Option<f64>,
    #[serde(default)]
    pub daily_spend: f64,
}

impl Campaign {
    pub fn new(id: &str, tenant_id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            objective: String::new(),
            status: CampaignStatus::Draft,
            bot_ids: Vec::new(),
            daily_budget_cap: None,
            daily_spend: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }

    pub fn budget_exhausted(&self) -> bool {
        self.daily_budget_cap
            .is_some_and(|cap| self.daily_spend >= cap)
    }
}

// ─── Run context ───────────────────────────────────────────

/// What started a candidate activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Operator-initiated "run now".
    Manual,
    /// Scheduler sweep or campaign fan-out.
    Scheduled,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduled => "scheduled",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "manual" => TriggerSource::Manual,
            _ => TriggerSource::Scheduled,
        }
    }
}

/// Everything a policy may look at. Built per activation, never persisted.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub bot: Bot,
    pub tenant_id: String,
    pub trigger: TriggerSource,
    pub campaign: Option<Campaign>,
    /// Admin approval bypass.
    pub operator_override: bool,
    pub action: ActionType,
    /// Evaluation instant; policies never read the clock themselves.
    pub now: DateTime<Utc>,
    /// Bots currently `Running` in this tenant.
    pub tenant_running: usize,
}

impl RunContext {
    pub fn new(bot: Bot, trigger: TriggerSource, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: bot.tenant_id.clone(),
            action: bot.kind.action_type(),
            bot,
            trigger,
            campaign: None,
            operator_override: false,
            now,
            tenant_running: 0,
        }
    }

    pub fn with_campaign(mut self, campaign: Option<Campaign>) -> Self {
        self.campaign = campaign;
        self
    }

    pub fn with_override(mut self, operator_override: bool) -> Self {
        self.operator_override = operator_override;
        self
    }

    pub fn with_tenant_running(mut self, running: usize) -> Self {
        self.tenant_running = running;
        self
    }

    pub fn is_manual(&self) -> bool {
        self.trigger == TriggerSource::Manual
    }
}

// ─── Decision audit ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// Single-bot activation.
    BotAction,
    /// Activation derived from a campaign fan-out.
    CampaignAction,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::BotAction => "bot_action",
            DecisionType::CampaignAction => "campaign_action",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "campaign_action" => DecisionType::CampaignAction,
            _ => DecisionType::BotAction,
        }
    }
}

/// Who last wrote the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    RuleEngine,
    Scheduler,
    Worker,
    Operator,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::RuleEngine => "rule_engine",
            DecisionSource::Scheduler => "scheduler",
            DecisionSource::Worker => "worker",
            DecisionSource::Operator => "operator",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "scheduler" => DecisionSource::Scheduler,
            "worker" => DecisionSource::Worker,
            "operator" => DecisionSource::Operator,
            _ => DecisionSource::RuleEngine,
        }
    }
}

/// Decision lifecycle.
///
/// ```text
/// Proposed ─┬─> Approved ─┬─> Executed
///           │             └─> Failed
///           ├─> Rejected
///           ├─> Executed
///           └─> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Proposed,
    Approved,
    Rejected,
    Executed,
    Failed,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Proposed => "proposed",
            DecisionStatus::Approved => "approved",
            DecisionStatus::Rejected => "rejected",
            DecisionStatus::Executed => "executed",
            DecisionStatus::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "approved" => DecisionStatus::Approved,
            "rejected" => DecisionStatus::Rejected,
            "executed" => DecisionStatus::Executed,
            "failed" => DecisionStatus::Failed,
            _ => DecisionStatus::Proposed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DecisionStatus::Rejected | DecisionStatus::Executed | DecisionStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: DecisionStatus) -> bool {
        use DecisionStatus::*;
        matches!(
            (self, next),
            (Proposed, Approved)
                | (Proposed, Rejected)
                | (Proposed, Executed)
                | (Proposed, Failed)
                | (Approved, Executed)
                | (Approved, Failed)
        )
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalVerdict {
    Approved,
    Rejected,
}

/// A human sign-off on a decision that required approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approver: String,
    pub verdict: ApprovalVerdict,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One compliance record per decision. Append-only; only status moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionAuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub decision_type: DecisionType,
    pub source: DecisionSource,
    pub description: String,
    pub reasoning: String,
    /// 0.0 – 1.0.
    pub confidence: f64,
    pub status: DecisionStatus,
    pub campaign_id: Option<String>,
    pub bot_id: Option<String>,
    pub trigger: TriggerSource,
    pub trace_id: String,
    pub job_id: Option<String>,
    pub approval: Option<ApprovalRecord>,
    pub updated_at: DateTime<Utc>,
}

impl DecisionAuditEntry {
    /// A fresh `Proposed` entry with generated id and trace id.
    pub fn proposed(
        decision_type: DecisionType,
        source: DecisionSource,
        trigger: TriggerSource,
        description: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("dec-{}", uuid::Uuid::new_v4().simple()),
            timestamp: now,
            decision_type,
            source,
            description: description.to_string(),
            reasoning: String::new(),
            confidence: 0.0,
            status: DecisionStatus::Proposed,
            campaign_id: None,
            bot_id: None,
            trigger,
            trace_id: uuid::Uuid::new_v4().to_string(),
            job_id: None,
            approval: None,
            updated_at: now,
        }
    }
}

/// Additive update to an audit entry.
///
/// `expected` makes the write a compare-and-set: the store rejects the update
/// when the entry is no longer in that status.
#[derive(Debug, Clone, Default)]
pub struct DecisionUpdate {
    pub expected: Option<DecisionStatus>,
    pub status: Option<DecisionStatus>,
    pub source: Option<DecisionSource>,
    /// Appended on a new line; existing reasoning is never erased.
    pub append_reasoning: Option<String>,
    pub approval: Option<ApprovalRecord>,
    pub job_id: Option<String>,
}

impl DecisionUpdate {
    pub fn transition(from: DecisionStatus, to: DecisionStatus, source: DecisionSource) -> Self {
        Self {
            expected: Some(from),
            status: Some(to),
            source: Some(source),
            ..Default::default()
        }
    }

    pub fn note(reasoning: impl Into<String>) -> Self {
        Self {
            append_reasoning: Some(reasoning.into()),
            ..Default::default()
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.append_reasoning = Some(reasoning.into());
        self
    }

    pub fn with_approval(mut self, approval: ApprovalRecord) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn with_job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }
}

/// Join existing reasoning with an appended line.
pub fn append_reasoning(existing: &str, addition: &str) -> String {
    if existing.is_empty() {
        addition.to_string()
    } else {
        format!("{existing}\n{addition}")
    }
}

// ─── Execution jobs ────────────────────────────────────────

/// Named execution queues, each with its own concurrency ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    /// Bot-level jobs from the sweep, manual runs and approvals.
    BotExecution,
    /// Lightweight derived actions (reply, follow, analyze).
    ActionExecutor,
    /// Derived content/media actions (post).
    MediaContent,
}

impl QueueName {
    pub fn all() -> [QueueName; 3] {
        [QueueName::BotExecution, QueueName::ActionExecutor, QueueName::MediaContent]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::BotExecution => "bot-execution",
            QueueName::ActionExecutor => "action-executor",
            QueueName::MediaContent => "media-content",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "action-executor" => QueueName::ActionExecutor,
            "media-content" => QueueName::MediaContent,
            _ => QueueName::BotExecution,
        }
    }

    /// Queue for a campaign-derived action.
    pub fn for_action(action: ActionType) -> Self {
        if action.is_media_heavy() {
            QueueName::MediaContent
        } else {
            QueueName::ActionExecutor
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Journaled job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Retrying,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Retrying => "retrying",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// A unit of approved work sitting in (or retired from) an execution queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub id: String,
    pub idempotency_key: String,
    pub queue: QueueName,
    pub tenant_id: String,
    pub bot_id: String,
    pub decision_id: String,
    pub trigger: TriggerSource,
    pub trace_id: String,
    /// Action-specific fields, validated by the worker.
    pub payload: Document,
    /// Attempts started so far (1-based once dequeued).
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl ExecutionJob {
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
