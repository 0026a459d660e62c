//! In-memory stores: the same contracts as [`crate::SchedulerDb`], held in
//! process. Backs the tests and embedders that persist state elsewhere.

use std::collections::HashMap;
use std::sync::Mutex;

use botclaw_core::error::{BotClawError, Result};
use botclaw_core::traits::{AuditStore, BotStore, CampaignStore, JobJournal};
use botclaw_core::types::{
    append_reasoning, Bot, BotStatus, Campaign, DecisionAuditEntry, DecisionUpdate, ExecutionJob,
    JobState, RunStateUpdate,
};
use chrono::{DateTime, Utc};

/// In-memory implementation of every pipeline store.
#[derive(Default)]
pub struct MemoryStore {
    bots: Mutex<HashMap<String, Bot>>,
    campaigns: Mutex<HashMap<String, Campaign>>,
    decisions: Mutex<Vec<DecisionAuditEntry>>,
    jobs: Mutex<HashMap<String, (ExecutionJob, JobState, DateTime<Utc>)>>,
}

fn poisoned<T>(_: T) -> BotClawError {
    BotClawError::Other("memory store lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a bot.
    pub fn insert_bot(&self, bot: Bot) -> Result<()> {
        self.bots.lock().map_err(poisoned)?.insert(bot.id.clone(), bot);
        Ok(())
    }

    /// Insert or replace a campaign.
    pub fn insert_campaign(&self, campaign: Campaign) -> Result<()> {
        self.campaigns
            .lock()
            .map_err(poisoned)?
            .insert(campaign.id.clone(), campaign);
        Ok(())
    }

    /// Operator toggle.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut bots = self.bots.lock().map_err(poisoned)?;
        let bot = bots
            .get_mut(id)
            .ok_or_else(|| BotClawError::not_found(format!("bot {id}")))?;
        bot.enabled = enabled;
        Ok(())
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Journaled state of a job, if known.
    pub fn job_state(&self, id: &str) -> Option<JobState> {
        self.jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.get(id).map(|(_, state, _)| *state))
    }
}

impl BotStore for MemoryStore {
    fn list(&self, enabled: bool) -> Result<Vec<Bot>> {
        let bots = self.bots.lock().map_err(poisoned)?;
        let mut out: Vec<Bot> = bots.values().filter(|b| b.enabled == enabled).cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn get(&self, id: &str) -> Result<Option<Bot>> {
        Ok(self.bots.lock().map_err(poisoned)?.get(id).cloned())
    }

    fn update_run_state(&self, id: &str, update: RunStateUpdate) -> Result<()> {
        let mut bots = self.bots.lock().map_err(poisoned)?;
        let bot = bots
            .get_mut(id)
            .ok_or_else(|| BotClawError::not_found(format!("bot {id}")))?;
        bot.status = update.status;
        if let Some(at) = update.last_run_at {
            bot.last_run_at = Some(at);
        }
        Ok(())
    }

    fn update_daily_stats(&self, id: &str, delta: u32) -> Result<()> {
        let mut bots = self.bots.lock().map_err(poisoned)?;
        let bot = bots
            .get_mut(id)
            .ok_or_else(|| BotClawError::not_found(format!("bot {id}")))?;
        bot.daily_action_count = bot.daily_action_count.saturating_add(delta);
        Ok(())
    }

    fn claim_running(&self, id: &str) -> Result<bool> {
        let mut bots = self.bots.lock().map_err(poisoned)?;
        let bot = bots
            .get_mut(id)
            .ok_or_else(|| BotClawError::not_found(format!("bot {id}")))?;
        if bot.status == BotStatus::Running {
            return Ok(false);
        }
        bot.status = BotStatus::Running;
        Ok(true)
    }

    fn count_running(&self, tenant_id: &str) -> Result<usize> {
        let bots = self.bots.lock().map_err(poisoned)?;
        Ok(bots
            .values()
            .filter(|b| b.tenant_id == tenant_id && b.status == BotStatus::Running)
            .count())
    }

    fn reset_daily_stats(&self) -> Result<()> {
        let mut bots = self.bots.lock().map_err(poisoned)?;
        for bot in bots.values_mut() {
            bot.daily_action_count = 0;
        }
        Ok(())
    }
}

impl CampaignStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<Campaign>> {
        Ok(self.campaigns.lock().map_err(poisoned)?.get(id).cloned())
    }

    fn list_active_with_bots(&self) -> Result<Vec<Campaign>> {
        let campaigns = self.campaigns.lock().map_err(poisoned)?;
        let mut out: Vec<Campaign> = campaigns
            .values()
            .filter(|c| c.is_active() && !c.bot_ids.is_empty())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn record_spend(&self, id: &str, amount: f64) -> Result<()> {
        let mut campaigns = self.campaigns.lock().map_err(poisoned)?;
        let campaign = campaigns
            .get_mut(id)
            .ok_or_else(|| BotClawError::not_found(format!("campaign {id}")))?;
        campaign.daily_spend += amount;
        Ok(())
    }

    fn reset_daily_spend(&self) -> Result<()> {
        let mut campaigns = self.campaigns.lock().map_err(poisoned)?;
        for campaign in campaigns.values_mut() {
            campaign.daily_spend = 0.0;
        }
        Ok(())
    }
}

impl AuditStore for MemoryStore {
    fn append(&self, entry: &DecisionAuditEntry) -> Result<String> {
        let mut decisions = self.decisions.lock().map_err(poisoned)?;
        if decisions.iter().any(|d| d.id == entry.id) {
            return Err(BotClawError::Other(format!("decision {} already exists", entry.id)));
        }
        decisions.push(entry.clone());
        Ok(entry.id.clone())
    }

    fn update_status(&self, id: &str, update: &DecisionUpdate) -> Result<()> {
        let mut decisions = self.decisions.lock().map_err(poisoned)?;
        let entry = decisions
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| BotClawError::not_found(format!("decision {id}")))?;
        if let Some(expected) = update.expected {
            if entry.status != expected {
                return Err(BotClawError::InvalidTransition(format!(
                    "decision {id} is {}, expected {expected}",
                    entry.status
                )));
            }
        }
        if let Some(status) = update.status {
            entry.status = status;
        }
        if let Some(source) = update.source {
            entry.source = source;
        }
        if let Some(line) = &update.append_reasoning {
            entry.reasoning = append_reasoning(&entry.reasoning, line);
        }
        if let Some(approval) = &update.approval {
            entry.approval = Some(approval.clone());
        }
        if let Some(job_id) = &update.job_id {
            entry.job_id = Some(job_id.clone());
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<DecisionAuditEntry>> {
        let decisions = self.decisions.lock().map_err(poisoned)?;
        Ok(decisions.iter().find(|d| d.id == id).cloned())
    }

    fn query_by_campaign(&self, campaign_id: &str) -> Result<Vec<DecisionAuditEntry>> {
        let decisions = self.decisions.lock().map_err(poisoned)?;
        Ok(decisions
            .iter()
            .rev()
            .filter(|d| d.campaign_id.as_deref() == Some(campaign_id))
            .cloned()
            .collect())
    }

    fn query_by_bot(&self, bot_id: &str) -> Result<Vec<DecisionAuditEntry>> {
        let decisions = self.decisions.lock().map_err(poisoned)?;
        Ok(decisions
            .iter()
            .rev()
            .filter(|d| d.bot_id.as_deref() == Some(bot_id))
            .cloned()
            .collect())
    }

    fn query_recent(&self, limit: usize) -> Result<Vec<DecisionAuditEntry>> {
        let decisions = self.decisions.lock().map_err(poisoned)?;
        Ok(decisions.iter().rev().take(limit).cloned().collect())
    }
}

impl JobJournal for MemoryStore {
    fn record(&self, job: &ExecutionJob, state: JobState) -> Result<()> {
        self.jobs
            .lock()
            .map_err(poisoned)?
            .insert(job.id.clone(), (job.clone(), state, Utc::now()));
        Ok(())
    }

    fn pending(&self) -> Result<Vec<ExecutionJob>> {
        let jobs = self.jobs.lock().map_err(poisoned)?;
        let mut out: Vec<ExecutionJob> = jobs
            .values()
            .filter(|(_, state, _)| !state.is_terminal())
            .map(|(job, _, _)| job.clone())
            .collect();
        out.sort_by_key(|j| j.enqueued_at);
        Ok(out)
    }

    fn prune(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut jobs = self.jobs.lock().map_err(poisoned)?;
        let len = jobs.len();
        jobs.retain(|_, (_, state, touched)| !(state.is_terminal() && *touched < before));
        Ok(len - jobs.len())
    }
}
