//! Side-effecting action layer and advisory strategy memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ActionType, BotKind, Document, RunContext};

/// What the worker asks the platform layer to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub job_id: String,
    pub trace_id: String,
    pub tenant_id: String,
    pub bot_id: String,
    pub kind: BotKind,
    pub action: ActionType,
    pub campaign_id: Option<String>,
    pub attempt: u32,
    /// Bot config snapshot taken at dispatch time.
    pub config: Document,
}

/// Result of a successful platform action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionReceipt {
    /// Platform-side reference (post id, reply id, report id).
    pub external_ref: Option<String>,
    /// Spend charged against the campaign budget.
    pub cost: f64,
    pub summary: String,
}

/// Performs the actual post/reply/follow/analyze.
///
/// Return `TransientExecution` for retryable failures and `FatalConfig` for
/// requests that can never succeed.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &ActionRequest) -> Result<ActionReceipt>;
}

/// Strategy-memory hook: mines historical outcomes to bias confidence.
pub trait StrategyAdvisor: Send + Sync {
    /// Confidence in `[0, 1]` for this activation, or `None` if unknown.
    fn confidence(&self, ctx: &RunContext) -> Option<f64>;
}
