//! Governance gate: actions a tenant marked as sensitive wait for a human.

use botclaw_core::types::{ActionType, Document, RunContext};
use serde_json::Value;

use crate::policy::{Policy, Verdict};

/// Parks the decision for human approval when the bot config asks for it.
///
/// `requiresApproval` may be `true`/`false` or a list of action names
/// (`["post", "follow"]`, `"*"` for all). An operator override bypasses the
/// gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GovernanceApproval;

impl GovernanceApproval {
    /// Read the approval requirement for `action` from a bot config.
    pub fn requires_approval(config: &Document, action: ActionType) -> Result<bool, String> {
        match config.get("requiresApproval") {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Array(items)) => {
                let mut required = false;
                for item in items {
                    match item.as_str() {
                        Some(name) if name == "*" || name.eq_ignore_ascii_case(action.as_str()) => {
                            required = true;
                        }
                        Some(_) => {}
                        None => {
                            return Err(format!("requiresApproval entries must be strings, got {item}"));
                        }
                    }
                }
                Ok(required)
            }
            Some(other) => Err(format!(
                "requiresApproval must be a bool or a list of actions, got {other}"
            )),
        }
    }
}

impl Policy for GovernanceApproval {
    fn name(&self) -> &str {
        "governance_approval"
    }

    fn evaluate(&self, ctx: &RunContext) -> Verdict {
        match Self::requires_approval(&ctx.bot.config, ctx.action) {
            Err(e) => Verdict::Deny(format!("invalid config: {e}")),
            Ok(false) => Verdict::Allow,
            Ok(true) if ctx.operator_override => {
                tracing::info!("🔓 Approval gate bypassed by operator override for {}", ctx.bot.id);
                Verdict::Allow
            }
            Ok(true) => Verdict::RequireApproval(format!(
                "Approval required: '{}' actions for this bot need explicit human approval",
                ctx.action
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::fixtures::{at, manual, scheduled};
    use serde_json::json;

    #[test]
    fn test_no_flag_allows() {
        assert!(GovernanceApproval.evaluate(&scheduled(at(12, 0))).is_allow());
    }

    #[test]
    fn test_flag_requires_approval_even_when_manual() {
        let mut ctx = manual(at(12, 0));
        ctx.bot.config.insert("requiresApproval".into(), json!(true));
        match GovernanceApproval.evaluate(&ctx) {
            Verdict::RequireApproval(reason) => assert!(reason.contains("approval")),
            other => panic!("expected approval, got {other:?}"),
        }
    }

    #[test]
    fn test_override_bypasses_gate() {
        let mut ctx = scheduled(at(12, 0)).with_override(true);
        ctx.bot.config.insert("requiresApproval".into(), json!(true));
        assert!(GovernanceApproval.evaluate(&ctx).is_allow());
    }

    #[test]
    fn test_per_action_list() {
        let mut config = Document::new();
        config.insert("requiresApproval".into(), json!(["follow"]));
        assert!(!GovernanceApproval::requires_approval(&config, ActionType::Post).unwrap());
        assert!(GovernanceApproval::requires_approval(&config, ActionType::Follow).unwrap());

        config.insert("requiresApproval".into(), json!(["*"]));
        assert!(GovernanceApproval::requires_approval(&config, ActionType::Analyze).unwrap());
    }

    #[test]
    fn test_malformed_flag_denies() {
        let mut ctx = scheduled(at(12, 0));
        ctx.bot.config.insert("requiresApproval".into(), json!("yes please"));
        match GovernanceApproval.evaluate(&ctx) {
            Verdict::Deny(reason) => assert!(reason.starts_with("invalid config")),
            other => panic!("expected deny, got {other:?}"),
        }
    }
}
