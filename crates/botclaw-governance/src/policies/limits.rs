//! Rate-style limits: per-bot daily actions and per-tenant concurrency.

use botclaw_core::types::RunContext;

use crate::policy::{Policy, Verdict};

/// Denies scheduled triggers once the bot used up its daily action limit.
/// A limit of 0 means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyLimit;

impl Policy for DailyLimit {
    fn name(&self) -> &str {
        "daily_limit"
    }

    fn evaluate(&self, ctx: &RunContext) -> Verdict {
        let bot = &ctx.bot;
        if ctx.is_manual() || bot.daily_action_limit == 0 {
            return Verdict::Allow;
        }
        if bot.daily_action_count >= bot.daily_action_limit {
            Verdict::Deny(format!(
                "Daily Limit: {}/{} actions used today",
                bot.daily_action_count, bot.daily_action_limit
            ))
        } else {
            Verdict::Allow
        }
    }
}

/// Denies any activation that would push the tenant past its ceiling of
/// concurrently running bots.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyThrottle {
    max_running: usize,
}

impl ConcurrencyThrottle {
    pub fn new(max_running: usize) -> Self {
        Self { max_running }
    }
}

impl Policy for ConcurrencyThrottle {
    fn name(&self) -> &str {
        "concurrency_throttle"
    }

    fn evaluate(&self, ctx: &RunContext) -> Verdict {
        if ctx.tenant_running >= self.max_running {
            Verdict::Deny(format!(
                "Concurrency Throttle: {} bots already running for tenant '{}' (max {})",
                ctx.tenant_running, ctx.tenant_id, self.max_running
            ))
        } else {
            Verdict::Allow
        }
    }
}
