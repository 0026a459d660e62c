//! SQLite-backed persistence for bots, campaigns, the decision audit trail
//! and the execution job journal. Survives restarts; every status write is a
//! single-statement update so concurrent writers never interleave a
//! read-modify-write.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use botclaw_core::error::{BotClawError, Result};
use botclaw_core::traits::{AuditStore, BotStore, CampaignStore, JobJournal};
use botclaw_core::types::{
    ApprovalRecord, Bot, BotKind, BotStatus, Campaign, CampaignStatus, DecisionAuditEntry,
    DecisionSource, DecisionStatus, DecisionType, Document, DecisionUpdate, ExecutionJob,
    JobState, QueueName, RunStateUpdate, TriggerSource,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// SQLite-backed store for all pipeline data.
pub struct SchedulerDb {
    conn: Mutex<Connection>,
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn conversion_err(col: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
}

fn doc_from_json(col: usize, raw: &str) -> rusqlite::Result<Document> {
    if raw.is_empty() {
        return Ok(Document::new());
    }
    serde_json::from_str(raw).map_err(|e| conversion_err(col, e))
}

const BOT_COLUMNS: &str = "id, tenant_id, kind, enabled, interval_minutes, last_run_at, status, \
                           config, daily_action_count, daily_action_limit, campaign_id";

fn row_to_bot(row: &rusqlite::Row) -> rusqlite::Result<Bot> {
    let kind: String = row.get(2)?;
    let last_run: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    let config: String = row.get(7)?;
    Ok(Bot {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        kind: kind.parse::<BotKind>().map_err(|e| conversion_err(2, e))?,
        enabled: row.get::<_, i32>(3)? != 0,
        interval_minutes: row.get(4)?,
        last_run_at: last_run.as_deref().and_then(parse_ts),
        status: BotStatus::from_db(&status),
        config: doc_from_json(7, &config)?,
        daily_action_count: row.get(8)?,
        daily_action_limit: row.get(9)?,
        campaign_id: row.get(10)?,
    })
}

const CAMPAIGN_COLUMNS: &str =
    "id, tenant_id, name, objective, status, bot_ids, daily_budget_cap, daily_spend";

fn row_to_campaign(row: &rusqlite::Row) -> rusqlite::Result<Campaign> {
    let status: String = row.get(4)?;
    let bot_ids: String = row.get(5)?;
    Ok(Campaign {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        objective: row.get(3)?,
        status: CampaignStatus::from_db(&status),
        bot_ids: serde_json::from_str(&bot_ids).map_err(|e| conversion_err(5, e))?,
        daily_budget_cap: row.get(6)?,
        daily_spend: row.get(7)?,
    })
}

const DECISION_COLUMNS: &str = "id, timestamp, decision_type, source, description, reasoning, \
                                confidence, status, campaign_id, bot_id, trigger_source, trace_id, \
                                job_id, approval, updated_at";

fn row_to_decision(row: &rusqlite::Row) -> rusqlite::Result<DecisionAuditEntry> {
    let timestamp: String = row.get(1)?;
    let decision_type: String = row.get(2)?;
    let source: String = row.get(3)?;
    let status: String = row.get(7)?;
    let trigger: String = row.get(10)?;
    let approval: Option<String> = row.get(13)?;
    let updated_at: String = row.get(14)?;
    let approval = match approval {
        Some(raw) => Some(
            serde_json::from_str::<ApprovalRecord>(&raw).map_err(|e| conversion_err(13, e))?,
        ),
        None => None,
    };
    Ok(DecisionAuditEntry {
        id: row.get(0)?,
        timestamp: parse_ts(&timestamp).unwrap_or_default(),
        decision_type: DecisionType::from_db(&decision_type),
        source: DecisionSource::from_db(&source),
        description: row.get(4)?,
        reasoning: row.get(5)?,
        confidence: row.get(6)?,
        status: DecisionStatus::from_db(&status),
        campaign_id: row.get(8)?,
        bot_id: row.get(9)?,
        trigger: TriggerSource::from_db(&trigger),
        trace_id: row.get(11)?,
        job_id: row.get(12)?,
        approval,
        updated_at: parse_ts(&updated_at).unwrap_or_default(),
    })
}

const JOB_COLUMNS: &str = "id, idempotency_key, queue, tenant_id, bot_id, decision_id, \
                           trigger_source, trace_id, payload, attempt, max_attempts, \
                           next_retry_at, last_error, enqueued_at";

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ExecutionJob> {
    let queue: String = row.get(2)?;
    let trigger: String = row.get(6)?;
    let payload: String = row.get(8)?;
    let next_retry: Option<String> = row.get(11)?;
    let enqueued_at: String = row.get(13)?;
    Ok(ExecutionJob {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        queue: QueueName::from_db(&queue),
        tenant_id: row.get(3)?,
        bot_id: row.get(4)?,
        decision_id: row.get(5)?,
        trigger: TriggerSource::from_db(&trigger),
        trace_id: row.get(7)?,
        payload: doc_from_json(8, &payload)?,
        attempt: row.get(9)?,
        max_attempts: row.get(10)?,
        next_retry_at: next_retry.as_deref().and_then(parse_ts),
        last_error: row.get(12)?,
        enqueued_at: parse_ts(&enqueued_at).unwrap_or_default(),
    })
}

impl SchedulerDb {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| BotClawError::database(format!("open {}: {e}", path.display())))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
            .map_err(BotClawError::database)?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        tracing::debug!("📂 Scheduler DB opened: {}", path.display());
        Ok(db)
    }

    /// In-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(BotClawError::database)?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BotClawError::database("connection lock poisoned"))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS bots (
                id TEXT PRIMARY KEY,                -- '{tenant}/{kind}'
                tenant_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                interval_minutes INTEGER NOT NULL DEFAULT 60,
                last_run_at TEXT,
                status TEXT NOT NULL DEFAULT 'idle', -- idle, running, error
                config TEXT NOT NULL DEFAULT '{}',   -- JSON document
                daily_action_count INTEGER NOT NULL DEFAULT 0,
                daily_action_limit INTEGER NOT NULL DEFAULT 0,
                campaign_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_bots_tenant ON bots(tenant_id, status);

            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                objective TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'draft', -- active, draft, completed
                bot_ids TEXT NOT NULL DEFAULT '[]',   -- JSON array
                daily_budget_cap REAL,
                daily_spend REAL NOT NULL DEFAULT 0
            );

            -- Decision audit trail (append-only, status moves forward)
            CREATE TABLE IF NOT EXISTS decision_audit (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                decision_type TEXT NOT NULL,
                source TEXT NOT NULL,
                description TEXT NOT NULL,
                reasoning TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                campaign_id TEXT,
                bot_id TEXT,
                trigger_source TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                job_id TEXT,
                approval TEXT,                      -- JSON approval record
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_decision_campaign ON decision_audit(campaign_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_decision_bot ON decision_audit(bot_id, timestamp);

            -- Execution job journal
            CREATE TABLE IF NOT EXISTS execution_jobs (
                id TEXT PRIMARY KEY,
                idempotency_key TEXT NOT NULL,
                queue TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                decision_id TEXT NOT NULL,
                trigger_source TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                attempt INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 1,
                next_retry_at TEXT,
                last_error TEXT,
                enqueued_at TEXT NOT NULL,
                state TEXT NOT NULL,                -- queued, active, retrying, succeeded, failed
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_state ON execution_jobs(state, updated_at);
         ",
            )
            .map_err(|e| BotClawError::database(format!("migration: {e}")))
    }

    // ─── Fleet management ─────────────────────────────────────

    /// Insert or replace a bot definition.
    pub fn upsert_bot(&self, bot: &Bot) -> Result<()> {
        let config = serde_json::to_string(&bot.config)?;
        self.conn()?
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO bots ({BOT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    bot.id,
                    bot.tenant_id,
                    bot.kind.as_str(),
                    bot.enabled as i32,
                    bot.interval_minutes,
                    bot.last_run_at.as_ref().map(ts),
                    bot.status.as_str(),
                    config,
                    bot.daily_action_count,
                    bot.daily_action_limit,
                    bot.campaign_id,
                ],
            )
            .map_err(BotClawError::database)?;
        Ok(())
    }

    /// Insert or replace a campaign.
    pub fn upsert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let bot_ids = serde_json::to_string(&campaign.bot_ids)?;
        self.conn()?
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO campaigns ({CAMPAIGN_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    campaign.id,
                    campaign.tenant_id,
                    campaign.name,
                    campaign.objective,
                    campaign.status.as_str(),
                    bot_ids,
                    campaign.daily_budget_cap,
                    campaign.daily_spend,
                ],
            )
            .map_err(BotClawError::database)?;
        Ok(())
    }

    /// Enable or disable a bot.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let n = self
            .conn()?
            .execute("UPDATE bots SET enabled = ?2 WHERE id = ?1", params![id, enabled as i32])
            .map_err(BotClawError::database)?;
        if n == 0 {
            return Err(BotClawError::not_found(format!("bot {id}")));
        }
        Ok(())
    }

    pub fn list_all_bots(&self) -> Result<Vec<Bot>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {BOT_COLUMNS} FROM bots ORDER BY id"))
            .map_err(BotClawError::database)?;
        let rows = stmt
            .query_map([], row_to_bot)
            .map_err(BotClawError::database)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(BotClawError::database)
    }

    fn query_decisions(
        &self,
        filter: &str,
        arg: &dyn rusqlite::ToSql,
        limit: i64,
    ) -> Result<Vec<DecisionAuditEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {DECISION_COLUMNS} FROM decision_audit WHERE {filter} \
             ORDER BY timestamp DESC, rowid DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(BotClawError::database)?;
        let rows = stmt
            .query_map(params![arg, limit], row_to_decision)
            .map_err(BotClawError::database)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(BotClawError::database)
    }
}

impl BotStore for SchedulerDb {
    fn list(&self, enabled: bool) -> Result<Vec<Bot>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {BOT_COLUMNS} FROM bots WHERE enabled = ?1 ORDER BY id"))
            .map_err(BotClawError::database)?;
        let rows = stmt
            .query_map(params![enabled as i32], row_to_bot)
            .map_err(BotClawError::database)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(BotClawError::database)
    }

    fn get(&self, id: &str) -> Result<Option<Bot>> {
        self.conn()?
            .query_row(
                &format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?1"),
                params![id],
                row_to_bot,
            )
            .optional()
            .map_err(BotClawError::database)
    }

    fn update_run_state(&self, id: &str, update: RunStateUpdate) -> Result<()> {
        let conn = self.conn()?;
        let n = match update.last_run_at {
            Some(at) => conn.execute(
                "UPDATE bots SET status = ?2, last_run_at = ?3 WHERE id = ?1",
                params![id, update.status.as_str(), ts(&at)],
            ),
            None => conn.execute(
                "UPDATE bots SET status = ?2 WHERE id = ?1",
                params![id, update.status.as_str()],
            ),
        }
        .map_err(BotClawError::database)?;
        if n == 0 {
            return Err(BotClawError::not_found(format!("bot {id}")));
        }
        Ok(())
    }

    fn update_daily_stats(&self, id: &str, delta: u32) -> Result<()> {
        let n = self
            .conn()?
            .execute(
                "UPDATE bots SET daily_action_count = daily_action_count + ?2 WHERE id = ?1",
                params![id, delta],
            )
            .map_err(BotClawError::database)?;
        if n == 0 {
            return Err(BotClawError::not_found(format!("bot {id}")));
        }
        Ok(())
    }

    fn claim_running(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE bots SET status = 'running' WHERE id = ?1 AND status != 'running'",
                params![id],
            )
            .map_err(BotClawError::database)?;
        if n == 1 {
            return Ok(true);
        }
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM bots WHERE id = ?1", params![id], |r| r.get(0))
            .optional()
            .map_err(BotClawError::database)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(BotClawError::not_found(format!("bot {id}"))),
        }
    }

    fn count_running(&self, tenant_id: &str) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM bots WHERE tenant_id = ?1 AND status = 'running'",
                params![tenant_id],
                |r| r.get(0),
            )
            .map_err(BotClawError::database)?;
        Ok(n as usize)
    }

    fn reset_daily_stats(&self) -> Result<()> {
        self.conn()?
            .execute("UPDATE bots SET daily_action_count = 0", [])
            .map_err(BotClawError::database)?;
        Ok(())
    }
}

impl CampaignStore for SchedulerDb {
    fn get(&self, id: &str) -> Result<Option<Campaign>> {
        self.conn()?
            .query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                row_to_campaign,
            )
            .optional()
            .map_err(BotClawError::database)
    }

    fn list_active_with_bots(&self) -> Result<Vec<Campaign>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns \
                 WHERE status = 'active' AND bot_ids != '[]' ORDER BY id"
            ))
            .map_err(BotClawError::database)?;
        let rows = stmt
            .query_map([], row_to_campaign)
            .map_err(BotClawError::database)?;
        let campaigns = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(BotClawError::database)?;
        Ok(campaigns.into_iter().filter(|c| !c.bot_ids.is_empty()).collect())
    }

    fn record_spend(&self, id: &str, amount: f64) -> Result<()> {
        let n = self
            .conn()?
            .execute(
                "UPDATE campaigns SET daily_spend = daily_spend + ?2 WHERE id = ?1",
                params![id, amount],
            )
            .map_err(BotClawError::database)?;
        if n == 0 {
            return Err(BotClawError::not_found(format!("campaign {id}")));
        }
        Ok(())
    }

    fn reset_daily_spend(&self) -> Result<()> {
        self.conn()?
            .execute("UPDATE campaigns SET daily_spend = 0", [])
            .map_err(BotClawError::database)?;
        Ok(())
    }
}

impl AuditStore for SchedulerDb {
    fn append(&self, entry: &DecisionAuditEntry) -> Result<String> {
        let approval = entry
            .approval
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO decision_audit ({DECISION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    entry.id,
                    ts(&entry.timestamp),
                    entry.decision_type.as_str(),
                    entry.source.as_str(),
                    entry.description,
                    entry.reasoning,
                    entry.confidence,
                    entry.status.as_str(),
                    entry.campaign_id,
                    entry.bot_id,
                    entry.trigger.as_str(),
                    entry.trace_id,
                    entry.job_id,
                    approval,
                    ts(&entry.updated_at),
                ],
            )
            .map_err(BotClawError::database)?;
        Ok(entry.id.clone())
    }

    fn update_status(&self, id: &str, update: &DecisionUpdate) -> Result<()> {
        let approval = update
            .approval
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn()?;
        let n = conn
            .execute(
                "UPDATE decision_audit SET
                    status = COALESCE(?2, status),
                    source = COALESCE(?3, source),
                    reasoning = CASE
                        WHEN ?4 IS NULL THEN reasoning
                        WHEN reasoning = '' THEN ?4
                        ELSE reasoning || char(10) || ?4
                    END,
                    approval = COALESCE(?5, approval),
                    job_id = COALESCE(?6, job_id),
                    updated_at = ?7
                 WHERE id = ?1 AND (?8 IS NULL OR status = ?8)",
                params![
                    id,
                    update.status.map(|s| s.as_str()),
                    update.source.map(|s| s.as_str()),
                    update.append_reasoning,
                    approval,
                    update.job_id,
                    ts(&Utc::now()),
                    update.expected.map(|s| s.as_str()),
                ],
            )
            .map_err(BotClawError::database)?;
        if n == 1 {
            return Ok(());
        }
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM decision_audit WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()
            .map_err(BotClawError::database)?;
        match current {
            None => Err(BotClawError::not_found(format!("decision {id}"))),
            Some(status) => Err(BotClawError::InvalidTransition(format!(
                "decision {id} is {status}, expected {}",
                update.expected.map(|s| s.as_str()).unwrap_or("any")
            ))),
        }
    }

    fn get_by_id(&self, id: &str) -> Result<Option<DecisionAuditEntry>> {
        self.conn()?
            .query_row(
                &format!("SELECT {DECISION_COLUMNS} FROM decision_audit WHERE id = ?1"),
                params![id],
                row_to_decision,
            )
            .optional()
            .map_err(BotClawError::database)
    }

    fn query_by_campaign(&self, campaign_id: &str) -> Result<Vec<DecisionAuditEntry>> {
        self.query_decisions("campaign_id = ?1", &campaign_id, -1)
    }

    fn query_by_bot(&self, bot_id: &str) -> Result<Vec<DecisionAuditEntry>> {
        self.query_decisions("bot_id = ?1", &bot_id, -1)
    }

    fn query_recent(&self, limit: usize) -> Result<Vec<DecisionAuditEntry>> {
        self.query_decisions("?1 IS NOT NULL", &1i64, limit as i64)
    }
}

impl JobJournal for SchedulerDb {
    fn record(&self, job: &ExecutionJob, state: JobState) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        self.conn()?
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO execution_jobs ({JOB_COLUMNS}, state, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    job.id,
                    job.idempotency_key,
                    job.queue.as_str(),
                    job.tenant_id,
                    job.bot_id,
                    job.decision_id,
                    job.trigger.as_str(),
                    job.trace_id,
                    payload,
                    job.attempt,
                    job.max_attempts,
                    job.next_retry_at.as_ref().map(ts),
                    job.last_error,
                    ts(&job.enqueued_at),
                    state.as_str(),
                    ts(&Utc::now()),
                ],
            )
            .map_err(BotClawError::database)?;
        Ok(())
    }

    fn pending(&self) -> Result<Vec<ExecutionJob>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM execution_jobs \
                 WHERE state NOT IN ('succeeded', 'failed') ORDER BY enqueued_at"
            ))
            .map_err(BotClawError::database)?;
        let rows = stmt
            .query_map([], row_to_job)
            .map_err(BotClawError::database)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(BotClawError::database)
    }

    fn prune(&self, before: DateTime<Utc>) -> Result<usize> {
        self.conn()?
            .execute(
                "DELETE FROM execution_jobs \
                 WHERE state IN ('succeeded', 'failed') AND updated_at < ?1",
                params![ts(&before)],
            )
            .map_err(BotClawError::database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botclaw_core::types::{ApprovalVerdict, Document};
    use serde_json::json;

    fn temp_db(name: &str) -> (std::path::PathBuf, SchedulerDb) {
        let dir = std::env::temp_dir().join(format!("botclaw-db-{name}-{}", uuid::Uuid::new_v4().simple()));
        let db = SchedulerDb::open(&dir.join("botclaw.db")).unwrap();
        (dir, db)
    }

    fn creator() -> Bot {
        let mut bot = Bot::new("t1", BotKind::Creator, 60);
        bot.config.insert("requiresApproval".into(), json!(["post"]));
        bot.campaign_id = Some("c1".into());
        bot
    }

    #[test]
    fn test_open_and_reopen() {
        let (dir, db) = temp_db("reopen");
        db.upsert_bot(&creator()).unwrap();
        drop(db);

        let db = SchedulerDb::open(&dir.join("botclaw.db")).unwrap();
        let bot = BotStore::get(&db, "t1/creator").unwrap().unwrap();
        assert_eq!(bot.kind, BotKind::Creator);
        assert_eq!(bot.config.get("requiresApproval"), Some(&json!(["post"])));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_claim_is_atomic() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.upsert_bot(&creator()).unwrap();
        assert!(db.claim_running("t1/creator").unwrap());
        assert!(!db.claim_running("t1/creator").unwrap());
        assert_eq!(db.count_running("t1").unwrap(), 1);
        assert!(matches!(db.claim_running("t1/ghost"), Err(BotClawError::NotFound(_))));

        let now = Utc::now();
        db.update_run_state("t1/creator", RunStateUpdate::completed(now)).unwrap();
        let bot = BotStore::get(&db, "t1/creator").unwrap().unwrap();
        assert_eq!(bot.status, BotStatus::Idle);
        assert_eq!(bot.last_run_at.map(|t| t.timestamp_micros()), Some(now.timestamp_micros()));
    }

    #[test]
    fn test_campaign_spend() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut campaign = Campaign::new("c1", "t1", "Launch");
        campaign.status = CampaignStatus::Active;
        campaign.bot_ids = vec!["t1/creator".into()];
        campaign.daily_budget_cap = Some(10.0);
        db.upsert_campaign(&campaign).unwrap();
        db.upsert_campaign(&Campaign::new("c2", "t1", "Empty draft")).unwrap();

        db.record_spend("c1", 4.0).unwrap();
        db.record_spend("c1", 6.0).unwrap();
        let stored = CampaignStore::get(&db, "c1").unwrap().unwrap();
        assert!(stored.budget_exhausted());
        assert_eq!(db.list_active_with_bots().unwrap().len(), 1);

        db.reset_daily_spend().unwrap();
        assert_eq!(CampaignStore::get(&db, "c1").unwrap().unwrap().daily_spend, 0.0);
    }

    #[test]
    fn test_audit_cas_and_append_only_reasoning() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut entry = DecisionAuditEntry::proposed(
            DecisionType::BotAction,
            DecisionSource::RuleEngine,
            TriggerSource::Scheduled,
            "post for t1/creator",
        );
        entry.bot_id = Some("t1/creator".into());
        entry.campaign_id = Some("c1".into());
        entry.reasoning = "first".into();
        let id = db.append(&entry).unwrap();

        let approval = ApprovalRecord {
            approver: "ops".into(),
            verdict: ApprovalVerdict::Approved,
            at: Utc::now(),
            notes: None,
        };
        db.update_status(
            &id,
            &DecisionUpdate::transition(DecisionStatus::Proposed, DecisionStatus::Approved, DecisionSource::Operator)
                .with_reasoning("approved by ops")
                .with_approval(approval),
        )
        .unwrap();

        // Stale expectation loses.
        let stale = DecisionUpdate::transition(
            DecisionStatus::Proposed,
            DecisionStatus::Rejected,
            DecisionSource::Operator,
        );
        assert!(matches!(db.update_status(&id, &stale), Err(BotClawError::InvalidTransition(_))));
        assert!(matches!(db.update_status("dec-x", &stale), Err(BotClawError::NotFound(_))));

        db.update_status(&id, &DecisionUpdate::note("queued").with_job("job-1")).unwrap();
        let stored = db.get_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Approved);
        assert_eq!(stored.reasoning, "first\napproved by ops\nqueued");
        assert_eq!(stored.job_id.as_deref(), Some("job-1"));
        assert_eq!(stored.approval.unwrap().approver, "ops");

        assert_eq!(db.query_by_campaign("c1").unwrap().len(), 1);
        assert_eq!(db.query_by_bot("t1/creator").unwrap().len(), 1);
        assert_eq!(db.query_recent(10).unwrap().len(), 1);
    }

    #[test]
    fn test_query_recent_newest_first() {
        let db = SchedulerDb::open_in_memory().unwrap();
        for n in 0..3 {
            let mut entry = DecisionAuditEntry::proposed(
                DecisionType::BotAction,
                DecisionSource::RuleEngine,
                TriggerSource::Manual,
                &format!("decision {n}"),
            );
            entry.timestamp = Utc::now() + chrono::Duration::seconds(n);
            db.append(&entry).unwrap();
        }
        let recent = db.query_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].description, "decision 2");
    }

    #[test]
    fn test_job_journal_roundtrip_and_prune() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut payload = Document::new();
        payload.insert("action".into(), json!("post"));
        let job = ExecutionJob {
            id: "job-1".into(),
            idempotency_key: "t1/creator:42".into(),
            queue: QueueName::MediaContent,
            tenant_id: "t1".into(),
            bot_id: "t1/creator".into(),
            decision_id: "dec-1".into(),
            trigger: TriggerSource::Scheduled,
            trace_id: "trace".into(),
            payload,
            attempt: 1,
            max_attempts: 2,
            next_retry_at: None,
            last_error: None,
            enqueued_at: Utc::now(),
        };
        db.record(&job, JobState::Active).unwrap();
        let pending = db.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].queue, QueueName::MediaContent);
        assert_eq!(pending[0].payload.get("action"), Some(&json!("post")));

        db.record(&job, JobState::Succeeded).unwrap();
        assert!(db.pending().unwrap().is_empty());
        assert_eq!(db.prune(Utc::now() + chrono::Duration::seconds(1)).unwrap(), 1);
    }
}
