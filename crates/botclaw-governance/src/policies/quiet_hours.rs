//! Quiet hours: no scheduled activity during the tenant's night.

use botclaw_core::config::PolicyConfig;
use botclaw_core::error::{BotClawError, Result};
use botclaw_core::types::RunContext;
use chrono::{FixedOffset, NaiveTime};

use crate::policy::{Policy, Verdict};

/// Denies scheduled triggers inside a local time window.
///
/// The window is `[start, end)` and wraps midnight when `start > end`
/// (23:00–06:00). `start == end` means no quiet hours. Bots may override the
/// window with `quietHoursStart` / `quietHoursEnd` config keys.
#[derive(Debug, Clone)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime, utc_offset_minutes: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            BotClawError::Config(format!("utc offset out of range: {utc_offset_minutes} minutes"))
        })?;
        Ok(Self { start, end, offset })
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let start = parse_hhmm(&config.quiet_hours_start).map_err(BotClawError::Config)?;
        let end = parse_hhmm(&config.quiet_hours_end).map_err(BotClawError::Config)?;
        Self::new(start, end, config.utc_offset_minutes)
    }

    /// Whether `t` falls inside `[start, end)`.
    pub fn window_contains(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
        if start == end {
            false
        } else if start < end {
            t >= start && t < end
        } else {
            t >= start || t < end
        }
    }

    fn window_for(&self, ctx: &RunContext) -> std::result::Result<(NaiveTime, NaiveTime), String> {
        let start = match ctx.bot.config.get("quietHoursStart") {
            None | Some(serde_json::Value::Null) => self.start,
            Some(serde_json::Value::String(s)) => parse_hhmm(s)?,
            Some(other) => return Err(format!("quietHoursStart must be \"HH:MM\", got {other}")),
        };
        let end = match ctx.bot.config.get("quietHoursEnd") {
            None | Some(serde_json::Value::Null) => self.end,
            Some(serde_json::Value::String(s)) => parse_hhmm(s)?,
            Some(other) => return Err(format!("quietHoursEnd must be \"HH:MM\", got {other}")),
        };
        Ok((start, end))
    }
}

impl Policy for QuietHours {
    fn name(&self) -> &str {
        "quiet_hours"
    }

    fn evaluate(&self, ctx: &RunContext) -> Verdict {
        if ctx.is_manual() {
            return Verdict::Allow;
        }

        let (start, end) = match self.window_for(ctx) {
            Ok(window) => window,
            Err(e) => return Verdict::Deny(format!("invalid config: {e}")),
        };

        let local = ctx.now.with_timezone(&self.offset).time();
        if Self::window_contains(start, end, local) {
            Verdict::Deny(format!(
                "Quiet Hours: scheduled activity paused between {} and {} (local time {})",
                start.format("%H:%M"),
                end.format("%H:%M"),
                local.format("%H:%M")
            ))
        } else {
            Verdict::Allow
        }
    }
}

fn parse_hhmm(s: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| format!("invalid time '{s}' (expected HH:MM): {e}"))
}
