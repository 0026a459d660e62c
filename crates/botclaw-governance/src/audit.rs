//! Decision audit log: lifecycle transitions and human-readable
//! explanations over an injected [`AuditStore`].
//!
//! Entries are created once and only move forward:
//! `Proposed → Approved | Rejected | Executed | Failed`,
//! `Approved → Executed | Failed`. Reasoning is append-only.

use std::sync::Arc;

use botclaw_core::error::{BotClawError, Result};
use botclaw_core::traits::AuditStore;
use botclaw_core::types::{
    ApprovalRecord, ApprovalVerdict, DecisionAuditEntry, DecisionSource, DecisionStatus,
    DecisionUpdate,
};
use chrono::Utc;

/// Governance audit log.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Record a new `Proposed` decision.
    pub fn propose(&self, entry: &DecisionAuditEntry) -> Result<String> {
        if entry.status != DecisionStatus::Proposed {
            return Err(BotClawError::InvalidTransition(format!(
                "new decisions start as proposed, got {}",
                entry.status
            )));
        }
        let id = self.store.append(entry)?;
        tracing::debug!("📝 Decision {} proposed: {}", id, entry.description);
        Ok(id)
    }

    /// Close a decision the policy chain denied. Never enqueued.
    pub fn reject_by_policy(&self, id: &str, reasoning: &str) -> Result<()> {
        self.store.update_status(
            id,
            &DecisionUpdate::transition(
                DecisionStatus::Proposed,
                DecisionStatus::Rejected,
                DecisionSource::RuleEngine,
            )
            .with_reasoning(reasoning),
        )
    }

    /// Link the enqueued job to the decision without moving its status.
    pub fn attach_job(&self, id: &str, job_id: &str, note: &str) -> Result<()> {
        self.store
            .update_status(id, &DecisionUpdate::note(note).with_job(job_id))
    }

    /// Append a line of reasoning.
    pub fn note(&self, id: &str, note: &str) -> Result<()> {
        self.store.update_status(id, &DecisionUpdate::note(note))
    }

    /// Human approval: `Proposed → Approved`.
    pub fn approve(
        &self,
        id: &str,
        approver: &str,
        notes: Option<&str>,
    ) -> Result<DecisionAuditEntry> {
        let entry = self.require_proposed(id, "approve")?;
        let record = ApprovalRecord {
            approver: approver.to_string(),
            verdict: ApprovalVerdict::Approved,
            at: Utc::now(),
            notes: notes.map(str::to_string),
        };
        let mut line = format!("approved by {approver}");
        if let Some(n) = notes {
            line.push_str(&format!(": {n}"));
        }
        self.store.update_status(
            &entry.id,
            &DecisionUpdate::transition(
                DecisionStatus::Proposed,
                DecisionStatus::Approved,
                DecisionSource::Operator,
            )
            .with_reasoning(line)
            .with_approval(record),
        )?;
        tracing::info!("👍 Decision {} approved by {}", id, approver);
        self.get_required(id)
    }

    /// Human rejection: `Proposed → Rejected`, reason appended.
    pub fn reject(&self, id: &str, approver: &str, reason: &str) -> Result<DecisionAuditEntry> {
        let entry = self.require_proposed(id, "reject")?;
        let record = ApprovalRecord {
            approver: approver.to_string(),
            verdict: ApprovalVerdict::Rejected,
            at: Utc::now(),
            notes: Some(reason.to_string()),
        };
        self.store.update_status(
            &entry.id,
            &DecisionUpdate::transition(
                DecisionStatus::Proposed,
                DecisionStatus::Rejected,
                DecisionSource::Operator,
            )
            .with_reasoning(format!("rejected by {approver}: {reason}"))
            .with_approval(record),
        )?;
        tracing::info!("👎 Decision {} rejected by {}: {}", id, approver, reason);
        self.get_required(id)
    }

    /// Worker success. Redelivery of an already executed decision is a no-op.
    pub fn mark_executed(&self, id: &str, summary: &str) -> Result<()> {
        self.finish(id, DecisionStatus::Executed, format!("executed: {summary}"))
    }

    /// Worker gave up. The error message is kept in the reasoning.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.finish(id, DecisionStatus::Failed, format!("failed: {error}"))
    }

    fn finish(&self, id: &str, to: DecisionStatus, line: String) -> Result<()> {
        let entry = self.get_required(id)?;
        if entry.status == to {
            return Ok(());
        }
        if !entry.status.can_transition_to(to) {
            return Err(BotClawError::InvalidTransition(format!(
                "decision {id} is {}, cannot become {to}",
                entry.status
            )));
        }
        self.store.update_status(
            id,
            &DecisionUpdate::transition(entry.status, to, DecisionSource::Worker)
                .with_reasoning(line),
        )
    }

    pub fn get(&self, id: &str) -> Result<Option<DecisionAuditEntry>> {
        self.store.get_by_id(id)
    }

    pub fn by_campaign(&self, campaign_id: &str) -> Result<Vec<DecisionAuditEntry>> {
        self.store.query_by_campaign(campaign_id)
    }

    pub fn by_bot(&self, bot_id: &str) -> Result<Vec<DecisionAuditEntry>> {
        self.store.query_by_bot(bot_id)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<DecisionAuditEntry>> {
        self.store.query_recent(limit)
    }

    /// Newest decision for `bot_id` parked for a human: `Proposed` with no job.
    pub fn pending_approval(&self, bot_id: &str) -> Result<Option<DecisionAuditEntry>> {
        Ok(self
            .store
            .query_by_bot(bot_id)?
            .into_iter()
            .find(|e| e.status == DecisionStatus::Proposed && e.job_id.is_none()))
    }

    /// Human-readable account of one decision.
    pub fn explain(&self, id: &str) -> Result<String> {
        Ok(explain_entry(&self.get_required(id)?))
    }

    fn get_required(&self, id: &str) -> Result<DecisionAuditEntry> {
        self.store
            .get_by_id(id)?
            .ok_or_else(|| BotClawError::not_found(format!("decision {id}")))
    }

    /// The entry, if it is still `Proposed`. `NotFound` or `InvalidTransition` otherwise.
    pub fn require_proposed(&self, id: &str, op: &str) -> Result<DecisionAuditEntry> {
        let entry = self.get_required(id)?;
        if entry.status != DecisionStatus::Proposed {
            return Err(BotClawError::InvalidTransition(format!(
                "cannot {op} decision {id}: it is {}, not proposed",
                entry.status
            )));
        }
        Ok(entry)
    }
}

/// Render an entry for operators.
pub fn explain_entry(entry: &DecisionAuditEntry) -> String {
    let mut out = format!(
        "Decision {} [{}]: {}\n",
        entry.id,
        entry.status.as_str().to_uppercase(),
        entry.description
    );
    out.push_str(&format!(
        "  When:       {}\n",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!(
        "  Type:       {} via {} trigger (source: {})\n",
        entry.decision_type.as_str(),
        entry.trigger.as_str(),
        entry.source.as_str()
    ));
    if let Some(bot) = &entry.bot_id {
        out.push_str(&format!("  Bot:        {bot}\n"));
    }
    if let Some(campaign) = &entry.campaign_id {
        out.push_str(&format!("  Campaign:   {campaign}\n"));
    }
    if let Some(job) = &entry.job_id {
        out.push_str(&format!("  Job:        {job}\n"));
    }
    out.push_str(&format!("  Trace:      {}\n", entry.trace_id));
    out.push_str(&format!("  Confidence: {:.0}%\n", entry.confidence * 100.0));
    if let Some(approval) = &entry.approval {
        let verdict = match approval.verdict {
            ApprovalVerdict::Approved => "approved",
            ApprovalVerdict::Rejected => "rejected",
        };
        out.push_str(&format!(
            "  Sign-off:   {} by {} at {}",
            verdict,
            approval.approver,
            approval.at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if let Some(notes) = &approval.notes {
            out.push_str(&format!(" ({notes})"));
        }
        out.push('\n');
    }
    out.push_str("  Reasoning:\n");
    for line in entry.reasoning.lines() {
        out.push_str(&format!("    - {line}\n"));
    }
    out
}
