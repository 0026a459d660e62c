//! Scheduler Engine: the periodic sweep that finds due bots and hands them
//! to the orchestrator. Uses tokio::interval for ticking (sleeps between
//! sweeps); the first sweep runs immediately.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use botclaw_core::config::SchedulerConfig;
use botclaw_core::traits::{BotStore, CampaignStore};
use botclaw_core::types::{Bot, Campaign};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::orchestrator::{DispatchOutcome, DispatchRequest, Orchestrator};

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub considered: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub not_due: usize,
    pub skipped_running: usize,
    pub errors: usize,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.considered += other.considered;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.not_due += other.not_due;
        self.skipped_running += other.skipped_running;
        self.errors += other.errors;
    }

    pub fn dispatched(&self) -> usize {
        self.accepted + self.rejected
    }
}

/// The scheduler engine.
pub struct SchedulerEngine {
    bots: Arc<dyn BotStore>,
    campaigns: Arc<dyn CampaignStore>,
    orchestrator: Arc<Orchestrator>,
    config: SchedulerConfig,
    halted: AtomicBool,
    last_reset: Mutex<Option<NaiveDate>>,
}

impl SchedulerEngine {
    pub fn new(
        bots: Arc<dyn BotStore>,
        campaigns: Arc<dyn CampaignStore>,
        orchestrator: Arc<Orchestrator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            bots,
            campaigns,
            orchestrator,
            config,
            halted: AtomicBool::new(false),
            last_reset: Mutex::new(None),
        }
    }

    /// Refuse all further dispatches.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// One pass over all enabled bots. A failing bot never aborts the pass.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        if self.is_halted() {
            return report;
        }
        self.roll_daily(now);

        let bots = match self.bots.list(true) {
            Ok(bots) => bots,
            Err(e) => {
                tracing::warn!("⚠️ Sweep could not list bots: {e}");
                report.errors += 1;
                return report;
            }
        };

        let mut fanned_out: HashSet<String> = HashSet::new();
        if self.config.campaign_fan_out {
            match self.campaigns.list_active_with_bots() {
                Ok(campaigns) => {
                    for campaign in campaigns {
                        fanned_out.extend(campaign.bot_ids.iter().cloned());
                        report.merge(self.fan_out_campaign_at(&campaign, now).await);
                    }
                }
                Err(e) => {
                    tracing::warn!("⚠️ Sweep could not list campaigns: {e}");
                    report.errors += 1;
                }
            }
        }

        for bot in bots.iter().filter(|b| !fanned_out.contains(&b.id)) {
            let request = DispatchRequest::scheduled(&bot.id, &bot.tenant_id);
            self.consider(bot, request, now, &mut report).await;
        }

        if report.dispatched() > 0 || report.errors > 0 {
            tracing::info!(
                "📅 Sweep: {} due, {} accepted, {} rejected, {} errors",
                report.dispatched(),
                report.accepted,
                report.rejected,
                report.errors
            );
        }
        report
    }

    /// Expand an active campaign into one derived-action dispatch per bot.
    pub async fn fan_out_campaign_at(&self, campaign: &Campaign, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        if !campaign.is_active() {
            tracing::debug!("⏸️ Campaign {} is {}, no fan-out", campaign.id, campaign.status.as_str());
            return report;
        }
        for bot_id in &campaign.bot_ids {
            let bot = match self.bots.get(bot_id) {
                Ok(Some(bot)) if bot.enabled => bot,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("⚠️ Fan-out could not load {}: {}", bot_id, e);
                    report.errors += 1;
                    continue;
                }
            };
            let request =
                DispatchRequest::campaign_action(&bot.id, &bot.tenant_id, bot.kind.action_type());
            self.consider(&bot, request, now, &mut report).await;
        }
        report
    }

    async fn consider(
        &self,
        bot: &Bot,
        request: DispatchRequest,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        report.considered += 1;
        if !bot.is_due(now) {
            report.not_due += 1;
            return;
        }
        if bot.is_running() {
            report.skipped_running += 1;
            return;
        }
        if self.is_halted() {
            return;
        }
        match self.orchestrator.dispatch_at(request, now).await {
            Ok(DispatchOutcome { accepted: true, .. }) => report.accepted += 1,
            Ok(outcome) => {
                tracing::debug!(
                    "🚫 {} not dispatched: {}",
                    bot.id,
                    outcome.reason.as_deref().unwrap_or("rejected")
                );
                report.rejected += 1;
            }
            Err(e) => {
                tracing::warn!("⚠️ Dispatch for {} failed: {}", bot.id, e);
                report.errors += 1;
            }
        }
    }

    /// Reset daily counters and spend when the UTC date changes.
    fn roll_daily(&self, now: DateTime<Utc>) {
        let today = now.date_naive();
        let Ok(mut last) = self.last_reset.lock() else {
            return;
        };
        match *last {
            None => *last = Some(today),
            Some(day) if day < today => {
                tracing::info!("🌅 New day {}: resetting daily counters", today);
                if let Err(e) = self.bots.reset_daily_stats() {
                    tracing::warn!("⚠️ Daily stats reset failed: {e}");
                    return;
                }
                if let Err(e) = self.campaigns.reset_daily_spend() {
                    tracing::warn!("⚠️ Daily spend reset failed: {e}");
                    return;
                }
                *last = Some(today);
            }
            Some(_) => {}
        }
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    engine: Arc<SchedulerEngine>,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Cancel the timer and wait for the loop to exit. No dispatch happens
    /// after this returns.
    pub async fn stop(self) {
        self.engine.halt();
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
        tracing::info!("⏹️ Scheduler stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn the sweep loop as a background tokio task.
pub fn spawn_scheduler(engine: Arc<SchedulerEngine>, every: Duration) -> SchedulerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let loop_engine = engine.clone();
    let join = tokio::spawn(async move {
        tracing::info!("⏰ Scheduler started (sweep every {}s)", every.as_secs());
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = interval.tick() => {
                    if *stop_rx.borrow() || loop_engine.is_halted() {
                        break;
                    }
                    loop_engine.sweep().await;
                }
            }
        }
    });
    SchedulerHandle { engine, stop_tx, join }
}
