//! Store traits: implemented by the in-memory fake and by SQLite.
//!
//! Every method is a single-record (or single-statement) operation so the
//! scheduler and workers never do read-modify-write across a round trip.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    Bot, Campaign, DecisionAuditEntry, DecisionUpdate, ExecutionJob, JobState, RunStateUpdate,
};

/// Bot persistence.
pub trait BotStore: Send + Sync {
    /// Bots whose `enabled` flag equals `enabled`.
    fn list(&self, enabled: bool) -> Result<Vec<Bot>>;

    fn get(&self, id: &str) -> Result<Option<Bot>>;

    fn update_run_state(&self, id: &str, update: RunStateUpdate) -> Result<()>;

    /// Add `delta` to the bot's daily action count.
    fn update_daily_stats(&self, id: &str, delta: u32) -> Result<()>;

    /// Atomically move a bot to `Running` if it is not already running.
    /// Returns `false` when another dispatch holds the bot.
    fn claim_running(&self, id: &str) -> Result<bool>;

    /// Bots currently `Running` in a tenant.
    fn count_running(&self, tenant_id: &str) -> Result<usize>;

    /// Zero every bot's daily action count.
    fn reset_daily_stats(&self) -> Result<()>;
}

/// Campaign persistence.
pub trait CampaignStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Campaign>>;

    /// Active campaigns that have at least one bot assigned.
    fn list_active_with_bots(&self) -> Result<Vec<Campaign>>;

    /// Add `amount` to today's tracked spend.
    fn record_spend(&self, id: &str, amount: f64) -> Result<()>;

    fn reset_daily_spend(&self) -> Result<()>;
}

/// Append-only decision audit store.
pub trait AuditStore: Send + Sync {
    /// Persist a new entry, returning its id.
    fn append(&self, entry: &DecisionAuditEntry) -> Result<String>;

    /// Apply an additive update. Fails with `InvalidTransition` when
    /// `update.expected` no longer matches, `NotFound` for unknown ids.
    fn update_status(&self, id: &str, update: &DecisionUpdate) -> Result<()>;

    fn get_by_id(&self, id: &str) -> Result<Option<DecisionAuditEntry>>;

    /// Newest first.
    fn query_by_campaign(&self, campaign_id: &str) -> Result<Vec<DecisionAuditEntry>>;

    /// Newest first.
    fn query_by_bot(&self, bot_id: &str) -> Result<Vec<DecisionAuditEntry>>;

    /// Newest first.
    fn query_recent(&self, limit: usize) -> Result<Vec<DecisionAuditEntry>>;
}

/// Durable journal behind the execution queue.
pub trait JobJournal: Send + Sync {
    fn record(&self, job: &ExecutionJob, state: JobState) -> Result<()>;

    /// Non-terminal jobs to re-enqueue after a restart.
    fn pending(&self) -> Result<Vec<ExecutionJob>>;

    /// Drop terminal jobs last touched before `before`.
    fn prune(&self, before: DateTime<Utc>) -> Result<usize>;
}
