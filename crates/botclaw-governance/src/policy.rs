//! Policy interface and the ordered chain that composes policies.

use std::sync::Arc;

use botclaw_core::config::PolicyConfig;
use botclaw_core::error::Result;
use botclaw_core::types::RunContext;
use serde::Serialize;

use crate::policies::{
    Budget, CampaignStatusGate, ConcurrencyThrottle, DailyLimit, GovernanceApproval, QuietHours,
};

/// Outcome of a single policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum Verdict {
    Allow,
    Deny(String),
    /// Deny until a human approves the decision.
    RequireApproval(String),
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// A named rule over a `RunContext`.
///
/// Implementations must be pure: the same context always yields the same
/// verdict. Malformed config is reported as a deny, never as an error.
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, ctx: &RunContext) -> Verdict;
}

/// Result of running a whole chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerdict {
    pub allowed: bool,
    /// The policy that stopped the chain. `None` when everything passed.
    pub policy_name: Option<String>,
    pub reason: Option<String>,
    /// Stopped by an approval gate rather than a hard deny.
    pub requires_approval: bool,
    /// Policies that passed, in evaluation order.
    pub passed: Vec<String>,
}

impl ChainVerdict {
    /// Human-readable reasoning line for the audit trail.
    pub fn reasoning(&self) -> String {
        match (&self.policy_name, &self.reason) {
            (None, _) if self.passed.is_empty() => "all policies passed (empty chain)".to_string(),
            (None, _) => format!("all policies passed ({})", self.passed.join(", ")),
            (Some(policy), reason) => {
                let reason = reason.as_deref().unwrap_or("no reason given");
                if self.requires_approval {
                    format!("approval required by policy '{policy}': {reason}")
                } else {
                    format!("denied by policy '{policy}': {reason}")
                }
            }
        }
    }
}

/// Ordered list of policies, evaluated short-circuit on the first non-allow.
#[derive(Clone, Default)]
pub struct PolicyChain {
    policies: Vec<Arc<dyn Policy>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default production chain.
    ///
    /// Approval comes last so operators are only asked about activations
    /// every other policy already allows.
    pub fn standard(config: &PolicyConfig) -> Result<Self> {
        let mut chain = Self::new();
        if config.quiet_hours_enabled {
            chain.push(QuietHours::from_config(config)?);
        }
        chain.push(CampaignStatusGate);
        chain.push(Budget);
        chain.push(DailyLimit);
        chain.push(ConcurrencyThrottle::new(config.max_running_per_tenant));
        chain.push(GovernanceApproval);
        Ok(chain)
    }

    /// Builder-style append.
    pub fn with<P: Policy + 'static>(mut self, policy: P) -> Self {
        self.push(policy);
        self
    }

    pub fn push<P: Policy + 'static>(&mut self, policy: P) {
        self.policies.push(Arc::new(policy));
    }

    /// Remove a policy by name. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let len = self.policies.len();
        self.policies.retain(|p| p.name() != name);
        self.policies.len() < len
    }

    /// Policy names in evaluation order.
    pub fn names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn evaluate(&self, ctx: &RunContext) -> ChainVerdict {
        let mut passed = Vec::with_capacity(self.policies.len());

        for policy in &self.policies {
            match policy.evaluate(ctx) {
                Verdict::Allow => passed.push(policy.name().to_string()),
                Verdict::Deny(reason) => {
                    tracing::info!(
                        "🚫 Policy '{}' denied {} ({}): {}",
                        policy.name(),
                        ctx.bot.id,
                        ctx.trigger.as_str(),
                        reason
                    );
                    return ChainVerdict {
                        allowed: false,
                        policy_name: Some(policy.name().to_string()),
                        reason: Some(reason),
                        requires_approval: false,
                        passed,
                    };
                }
                Verdict::RequireApproval(reason) => {
                    tracing::info!(
                        "✋ Policy '{}' requires approval for {}: {}",
                        policy.name(),
                        ctx.bot.id,
                        reason
                    );
                    return ChainVerdict {
                        allowed: false,
                        policy_name: Some(policy.name().to_string()),
                        reason: Some(reason),
                        requires_approval: true,
                        passed,
                    };
                }
            }
        }

        tracing::debug!("✅ All {} policies passed for {}", passed.len(), ctx.bot.id);
        ChainVerdict {
            allowed: true,
            policy_name: None,
            reason: None,
            requires_approval: false,
            passed,
        }
    }
}

impl std::fmt::Debug for PolicyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyChain")
            .field("policies", &self.names())
            .finish()
    }
}
