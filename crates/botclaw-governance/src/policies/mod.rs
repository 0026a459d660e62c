//! Built-in policies.
//!
//! Each policy is a plain value; build chains from them with
//! [`crate::PolicyChain`].

mod approval;
mod campaign;
mod limits;
mod quiet_hours;

pub use approval::GovernanceApproval;
pub use campaign::{Budget, CampaignStatusGate};
pub use limits::{ConcurrencyThrottle, DailyLimit};
pub use quiet_hours::QuietHours;
