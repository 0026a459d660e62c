//! # BotClaw: policy-gated bot scheduler
//!
//! Usage:
//!   botclaw init                                  # Write ~/.botclaw/config.toml
//!   botclaw run                                   # Scheduler + workers until Ctrl-C
//!   botclaw import fleet.toml                     # Load bots and campaigns
//!   botclaw trigger --tenant acme --kind creator  # Manual "run now"
//!   botclaw approve dec-… --by ops                # Release a parked decision
//!   botclaw audit --bot acme/creator              # Decision trail
//!   botclaw explain dec-…                         # Why a decision went the way it did

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use botclaw_core::traits::BotStore;
use botclaw_core::types::{Bot, BotKind, BotStatus, Campaign, CampaignStatus, DecisionAuditEntry, Document};
use botclaw_core::BotClawConfig;
use botclaw_scheduler::{
    executor_from_config, BotPipeline, ManualTrigger, PipelineStores, SchedulerDb,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "botclaw",
    version,
    about = "🤖 BotClaw — policy-gated scheduler for tenant social bots"
)]
struct Cli {
    /// Config file (default: ~/.botclaw/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run the scheduler and workers until interrupted
    Run,
    /// Trigger a bot now, bypassing the schedule
    Trigger {
        #[arg(long)]
        tenant: String,
        /// creator | engagement | growth | analyst
        #[arg(long)]
        kind: BotKind,
        /// Skip the approval gate
        #[arg(long = "override")]
        operator_override: bool,
        /// Seconds to wait for the job to finish
        #[arg(long, default_value = "120")]
        wait: u64,
    },
    /// Approve a decision waiting for sign-off
    Approve {
        decision_id: String,
        #[arg(long = "by")]
        approver: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, default_value = "120")]
        wait: u64,
    },
    /// Reject a decision waiting for sign-off
    Reject {
        decision_id: String,
        #[arg(long = "by")]
        approver: String,
        #[arg(long)]
        reason: String,
    },
    /// List decisions, newest first
    Audit {
        #[arg(long)]
        bot: Option<String>,
        #[arg(long)]
        campaign: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Explain one decision
    Explain { decision_id: String },
    /// List bots and their run state
    Bots,
    /// Import bots and campaigns from a TOML fleet file
    Import { file: String },
}

/// Fleet file: `[[campaigns]]` and `[[bots]]` tables.
#[derive(Debug, Deserialize)]
struct FleetFile {
    #[serde(default)]
    campaigns: Vec<FleetCampaign>,
    #[serde(default)]
    bots: Vec<FleetBot>,
}

#[derive(Debug, Deserialize)]
struct FleetCampaign {
    id: String,
    tenant_id: String,
    name: String,
    #[serde(default)]
    objective: String,
    #[serde(default = "default_campaign_status")]
    status: CampaignStatus,
    #[serde(default)]
    bot_ids: Vec<String>,
    daily_budget_cap: Option<f64>,
}

fn default_campaign_status() -> CampaignStatus {
    CampaignStatus::Draft
}

#[derive(Debug, Deserialize)]
struct FleetBot {
    tenant_id: String,
    kind: BotKind,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_interval")]
    interval_minutes: u32,
    #[serde(default)]
    daily_action_limit: u32,
    campaign_id: Option<String>,
    #[serde(default)]
    config: Document,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u32 {
    60
}

fn load_config(cli: &Cli) -> Result<BotClawConfig> {
    let mut config = match &cli.config {
        Some(path) => BotClawConfig::load_from(Path::new(&expand_path(path)))?,
        None => BotClawConfig::load()?,
    };
    if let Some(db) = &cli.db_path {
        config.database.path = db.clone();
    }
    Ok(config)
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn open_db(config: &BotClawConfig) -> Result<Arc<SchedulerDb>> {
    let path = config.database.resolved_path();
    let db = SchedulerDb::open(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(Arc::new(db))
}

fn build_pipeline(config: &BotClawConfig, db: Arc<SchedulerDb>) -> Result<BotPipeline> {
    let executor = executor_from_config(&config.executor);
    Ok(BotPipeline::build(config.clone(), PipelineStores::sqlite(db), executor)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "botclaw=debug,botclaw_scheduler=debug,botclaw_governance=debug"
    } else {
        "botclaw=info,botclaw_scheduler=info,botclaw_governance=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    if let Command::Init { force } = cli.command {
        let path = match &cli.config {
            Some(p) => PathBuf::from(expand_path(p)),
            None => BotClawConfig::default_path(),
        };
        return init(&path, force);
    }

    let config = load_config(&cli)?;
    let db = open_db(&config)?;

    match cli.command {
        Command::Init { .. } => Ok(()),
        Command::Run => run(&config, db).await,
        Command::Trigger { tenant, kind, operator_override, wait } => {
            let pipeline = build_pipeline(&config, db)?;
            pipeline.start_workers().await?;
            let resp = pipeline
                .orchestrator
                .manual_trigger(ManualTrigger { bot_kind: kind, tenant_id: tenant, operator_override })
                .await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
            if resp.job_id.is_some() {
                finish(&pipeline, wait).await;
            }
            if let Some(id) = &resp.decision_id {
                println!("\n{}", pipeline.audit().explain(id)?);
            }
            Ok(())
        }
        Command::Approve { decision_id, approver, notes, wait } => {
            let pipeline = build_pipeline(&config, db)?;
            pipeline.start_workers().await?;
            let outcome = pipeline
                .orchestrator
                .approve(&decision_id, &approver, notes.as_deref())
                .await?;
            println!("✅ Approved, job {}", outcome.job_id.as_deref().unwrap_or("-"));
            finish(&pipeline, wait).await;
            println!("\n{}", pipeline.audit().explain(&decision_id)?);
            Ok(())
        }
        Command::Reject { decision_id, approver, reason } => {
            let pipeline = build_pipeline(&config, db)?;
            let entry = pipeline.orchestrator.reject(&decision_id, &approver, &reason)?;
            println!("👎 Decision {} rejected", entry.id);
            Ok(())
        }
        Command::Audit { bot, campaign, limit, json } => {
            let pipeline = build_pipeline(&config, db)?;
            let audit = pipeline.audit();
            let mut entries = match (&bot, &campaign) {
                (Some(b), _) => audit.by_bot(b)?,
                (None, Some(c)) => audit.by_campaign(c)?,
                (None, None) => audit.recent(limit)?,
            };
            entries.truncate(limit);
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries(&entries);
            }
            Ok(())
        }
        Command::Explain { decision_id } => {
            let pipeline = build_pipeline(&config, db)?;
            println!("{}", pipeline.audit().explain(&decision_id)?);
            Ok(())
        }
        Command::Bots => {
            print_bots(&db.list_all_bots()?);
            Ok(())
        }
        Command::Import { file } => import(&db, Path::new(&expand_path(&file))),
    }
}

async fn run(config: &BotClawConfig, db: Arc<SchedulerDb>) -> Result<()> {
    let pipeline = build_pipeline(config, db.clone())?;

    let recovered = pipeline.start_workers().await?;
    let enabled = db.list(true)?.len();
    println!("🤖 BotClaw running");
    println!("   Bots enabled:  {enabled}");
    println!("   Sweep every:   {}s", config.scheduler.sweep_interval_secs);
    println!("   Fan-out:       {}", if config.scheduler.campaign_fan_out { "on" } else { "off" });
    println!("   Jobs recovered: {recovered}");

    let scheduler = pipeline.start_scheduler();

    let retention = chrono::Duration::hours(config.queue.history_retention_hours as i64);
    let pruner_db = db.clone();
    let pruner = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match botclaw_core::traits::JobJournal::prune(pruner_db.as_ref(), chrono::Utc::now() - retention) {
                Ok(0) => {}
                Ok(n) => tracing::info!("🧹 Pruned {} finished job(s) from journal", n),
                Err(e) => tracing::warn!("⚠️ Journal prune failed: {e}"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("\n⏹️ Shutting down...");
    scheduler.stop().await;
    pruner.abort();
    pipeline.shutdown().await;
    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("⚠️ {} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    BotClawConfig::default().save_to(path)?;
    println!("📝 Wrote default config to {}", path.display());
    Ok(())
}

/// Wait for the queues to drain so a one-shot command sees the outcome.
async fn finish(pipeline: &BotPipeline, wait: u64) {
    if !pipeline.drain(Duration::from_secs(wait)).await {
        println!("⏳ Job still pending after {wait}s; it resumes on the next `botclaw run`");
    }
    pipeline.shutdown().await;
}

fn import(db: &SchedulerDb, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let fleet: FleetFile = toml::from_str(&content)
        .with_context(|| format!("parsing {}", file.display()))?;

    for c in &fleet.campaigns {
        let mut campaign = Campaign::new(&c.id, &c.tenant_id, &c.name);
        campaign.objective = c.objective.clone();
        campaign.status = c.status;
        campaign.bot_ids = c.bot_ids.clone();
        campaign.daily_budget_cap = c.daily_budget_cap;
        db.upsert_campaign(&campaign)?;
    }
    for b in &fleet.bots {
        let mut bot = match BotStore::get(db, &Bot::make_id(&b.tenant_id, b.kind))? {
            // Keep run state and counters of bots that already exist.
            Some(existing) => existing,
            None => Bot::new(&b.tenant_id, b.kind, b.interval_minutes),
        };
        bot.enabled = b.enabled;
        bot.interval_minutes = b.interval_minutes;
        bot.daily_action_limit = b.daily_action_limit;
        bot.campaign_id = b.campaign_id.clone();
        bot.config = b.config.clone();
        db.upsert_bot(&bot)?;
    }
    println!(
        "📦 Imported {} campaign(s) and {} bot(s) from {}",
        fleet.campaigns.len(),
        fleet.bots.len(),
        file.display()
    );
    Ok(())
}

fn print_bots(bots: &[Bot]) {
    if bots.is_empty() {
        println!("No bots. Use `botclaw import <fleet.toml>` first.");
        return;
    }
    println!(
        "{:<28} {:<8} {:<8} {:>8} {:<20} {:>9}",
        "BOT", "ENABLED", "STATUS", "EVERY", "LAST RUN", "TODAY"
    );
    for bot in bots {
        let last = bot
            .last_run_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".into());
        let today = if bot.daily_action_limit > 0 {
            format!("{}/{}", bot.daily_action_count, bot.daily_action_limit)
        } else {
            bot.daily_action_count.to_string()
        };
        let status = match bot.status {
            BotStatus::Running => "🟢 run",
            BotStatus::Error => "🔴 err",
            BotStatus::Idle => "⚪ idle",
        };
        println!(
            "{:<28} {:<8} {:<8} {:>7}m {:<20} {:>9}",
            bot.id,
            if bot.enabled { "yes" } else { "no" },
            status,
            bot.interval_minutes,
            last,
            today
        );
    }
}

fn print_entries(entries: &[DecisionAuditEntry]) {
    if entries.is_empty() {
        println!("No decisions recorded.");
        return;
    }
    for e in entries {
        println!(
            "{}  {:<9} {:<10} {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.status.as_str(),
            e.trigger.as_str(),
            e.description
        );
        println!("    {}", e.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fleet_file_parses() {
        let fleet: FleetFile = toml::from_str(
            r#"
            [[campaigns]]
            id = "spring"
            tenant_id = "acme"
            name = "Spring launch"
            status = "active"
            bot_ids = ["acme/creator"]
            daily_budget_cap = 25.0

            [[bots]]
            tenant_id = "acme"
            kind = "creator"
            interval_minutes = 90
            campaign_id = "spring"
            [bots.config]
            requiresApproval = ["post"]
            quietHoursStart = "22:00"
            "#,
        )
        .unwrap();
        assert_eq!(fleet.campaigns[0].status, CampaignStatus::Active);
        assert_eq!(fleet.bots[0].kind, BotKind::Creator);
        assert!(fleet.bots[0].enabled);
        assert_eq!(fleet.bots[0].config.get("quietHoursStart").and_then(|v| v.as_str()), Some("22:00"));
    }

    #[test]
    fn test_import_preserves_run_state() {
        let dir = std::env::temp_dir().join(format!("botclaw-import-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("fleet.toml");
        std::fs::write(
            &file,
            "[[bots]]\ntenant_id = \"acme\"\nkind = \"growth\"\ninterval_minutes = 30\n",
        )
        .unwrap();

        let db = SchedulerDb::open_in_memory().unwrap();
        let mut existing = Bot::new("acme", BotKind::Growth, 60);
        existing.daily_action_count = 7;
        db.upsert_bot(&existing).unwrap();

        import(&db, &file).unwrap();
        let bot = BotStore::get(&db, "acme/growth").unwrap().unwrap();
        assert_eq!(bot.interval_minutes, 30);
        assert_eq!(bot.daily_action_count, 7);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let path = std::env::temp_dir()
            .join(format!("botclaw-init-{}", std::process::id()))
            .join("config.toml");
        init(&path, false).unwrap();
        let loaded = BotClawConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.sweep_interval_secs, BotClawConfig::default().scheduler.sweep_interval_secs);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_cli_parses_trigger() {
        let cli = Cli::try_parse_from([
            "botclaw", "trigger", "--tenant", "acme", "--kind", "analyst", "--override",
        ])
        .unwrap();
        match cli.command {
            Command::Trigger { kind, operator_override, wait, .. } => {
                assert_eq!(kind, BotKind::Analyst);
                assert!(operator_override);
                assert_eq!(wait, 120);
            }
            _ => panic!("expected trigger"),
        }
    }
}
