//! Campaign-scoped policies: only active campaigns produce scheduled work,
//! and only while their daily budget lasts.

use botclaw_core::types::RunContext;

use crate::policy::{Policy, Verdict};

/// Denies scheduled triggers when the bot has no `Active` campaign.
#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignStatusGate;

impl Policy for CampaignStatusGate {
    fn name(&self) -> &str {
        "campaign_status"
    }

    fn evaluate(&self, ctx: &RunContext) -> Verdict {
        if ctx.is_manual() {
            tracing::debug!("🧪 {} campaign check skipped (manual test mode)", ctx.bot.id);
            return Verdict::Allow;
        }

        match (&ctx.campaign, &ctx.bot.campaign_id) {
            (Some(campaign), _) if campaign.is_active() => Verdict::Allow,
            (Some(campaign), _) => Verdict::Deny(format!(
                "Campaign Status: campaign '{}' is {}, not active",
                campaign.name,
                campaign.status.as_str()
            )),
            (None, Some(id)) => {
                Verdict::Deny(format!("Campaign Status: campaign '{id}' not found"))
            }
            (None, None) => Verdict::Deny("Campaign Status: bot has no active campaign".into()),
        }
    }
}

/// Denies scheduled triggers once the campaign's daily spend hits its cap.
#[derive(Debug, Clone, Copy, Default)]
pub struct Budget;

impl Policy for Budget {
    fn name(&self) -> &str {
        "budget"
    }

    fn evaluate(&self, ctx: &RunContext) -> Verdict {
        if ctx.is_manual() {
            return Verdict::Allow;
        }
        let Some(campaign) = &ctx.campaign else {
            return Verdict::Allow;
        };
        match campaign.daily_budget_cap {
            Some(cap) if campaign.budget_exhausted() => Verdict::Deny(format!(
                "Budget: campaign '{}' spent {:.2} of its {:.2} daily cap",
                campaign.name, campaign.daily_spend, cap
            )),
            _ => Verdict::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::fixtures::{at, manual, scheduled};
    use botclaw_core::types::CampaignStatus;

    #[test]
    fn test_active_campaign_passes() {
        assert!(CampaignStatusGate.evaluate(&scheduled(at(12, 0))).is_allow());
    }

    #[test]
    fn test_draft_campaign_denied() {
        let mut ctx = scheduled(at(12, 0));
        if let Some(c) = ctx.campaign.as_mut() {
            c.status = CampaignStatus::Draft;
        }
        match CampaignStatusGate.evaluate(&ctx) {
            Verdict::Deny(reason) => assert!(reason.contains("draft")),
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_campaign_denied_but_manual_passes() {
        let mut ctx = scheduled(at(12, 0));
        ctx.campaign = None;
        assert!(!CampaignStatusGate.evaluate(&ctx).is_allow());

        ctx.bot.campaign_id = None;
        match CampaignStatusGate.evaluate(&ctx) {
            Verdict::Deny(reason) => assert!(reason.contains("no active campaign")),
            other => panic!("expected deny, got {other:?}"),
        }

        let mut manual_ctx = manual(at(12, 0));
        manual_ctx.campaign = None;
        assert!(CampaignStatusGate.evaluate(&manual_ctx).is_allow());
    }

    #[test]
    fn test_budget_cap_reached() {
        let mut ctx = scheduled(at(12, 0));
        if let Some(c) = ctx.campaign.as_mut() {
            c.daily_budget_cap = Some(20.0);
            c.daily_spend = 19.99;
        }
        assert!(Budget.evaluate(&ctx).is_allow());

        if let Some(c) = ctx.campaign.as_mut() {
            c.daily_spend = 20.0;
        }
        match Budget.evaluate(&ctx) {
            Verdict::Deny(reason) => assert!(reason.starts_with("Budget")),
            other => panic!("expected deny, got {other:?}"),
        }

        ctx.trigger = botclaw_core::types::TriggerSource::Manual;
        assert!(Budget.evaluate(&ctx).is_allow());
    }

    #[test]
    fn test_uncapped_budget_passes() {
        let mut ctx = scheduled(at(12, 0));
        if let Some(c) = ctx.campaign.as_mut() {
            c.daily_spend = 1_000_000.0;
        }
        assert!(Budget.evaluate(&ctx).is_allow());
    }
}
