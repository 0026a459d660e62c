//! Boundary interfaces: the pipeline talks to storage, the platform action
//! layer and the strategy-memory advisor only through these traits.

pub mod action;
pub mod store;

pub use action::{ActionExecutor, ActionReceipt, ActionRequest, StrategyAdvisor};
pub use store::{AuditStore, BotStore, CampaignStore, JobJournal};
