//! # BotClaw Governance
//!
//! Decides whether a bot activation is allowed *right now* and keeps the
//! compliance trail of every decision.
//!
//! ## Architecture
//! ```text
//! RunContext
//!   → PolicyChain (ordered, stops at first non-allow)
//!       ├── QuietHours          scheduled only
//!       ├── CampaignStatus      scheduled only
//!       ├── Budget              scheduled only
//!       ├── DailyLimit          scheduled only
//!       ├── ConcurrencyThrottle all triggers
//!       └── GovernanceApproval  unless operator override
//!   → ChainVerdict
//!   → AuditLog: Proposed → Approved | Rejected | Executed | Failed
//! ```

pub mod audit;
pub mod policies;
pub mod policy;

pub use audit::{explain_entry, AuditLog};
pub use policy::{ChainVerdict, Policy, PolicyChain, Verdict};
