//! Execution queues: named, at-least-once job queues with per-queue
//! concurrency ceilings, bounded retries with exponential backoff and
//! idempotency-key dedup.
//!
//! ```text
//!   enqueue ──► [ready] ──next()──► active ──complete()──┬─► history (succeeded)
//!                  ▲                                     ├─► [delayed] ─(due)─┘
//!                  └──────────── recover() ◄── journal   └─► history (failed)
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use botclaw_core::config::QueueConfig;
use botclaw_core::error::{BotClawError, Result};
use botclaw_core::traits::JobJournal;
use botclaw_core::types::{Document, ExecutionJob, JobState, QueueName, TriggerSource};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};

/// Work to submit. The queue assigns id, attempt counters and timestamps.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub queue: QueueName,
    pub tenant_id: String,
    pub bot_id: String,
    pub decision_id: String,
    pub trigger: TriggerSource,
    pub trace_id: String,
    pub payload: Document,
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// A second submission with the same key inside the dedup window is
    /// collapsed onto the first job.
    pub idempotency_key: String,
    pub max_attempts: u32,
}

/// Result of [`ExecutionQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub job_id: String,
    /// `true` when the key was already taken and nothing new was queued.
    pub duplicate: bool,
}

/// What happened to a job after an attempt finished.
#[derive(Debug, Clone, PartialEq)]
pub enum JobDisposition {
    Completed,
    RetryScheduled { at: DateTime<Utc> },
    /// Out of attempts, or the error was not retryable.
    Failed { error: String },
}

/// A job that reached a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedJob {
    pub job: ExecutionJob,
    pub state: JobState,
    pub finished_at: DateTime<Utc>,
}

/// Counters for one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue: QueueName,
    pub ready: usize,
    pub delayed: usize,
    pub active: usize,
    pub max_concurrent: usize,
    pub total_processed: u64,
    pub total_failed: u64,
}

/// Per-queue state.
struct QueueState {
    ready: VecDeque<ExecutionJob>,
    delayed: Vec<ExecutionJob>,
    active: usize,
    max_concurrent: usize,
    total_processed: u64,
    total_failed: u64,
}

impl QueueState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            ready: VecDeque::new(),
            delayed: Vec::new(),
            active: 0,
            max_concurrent: max_concurrent.max(1),
            total_processed: 0,
            total_failed: 0,
        }
    }

    /// Move retries whose backoff elapsed back to the ready queue.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        if self.delayed.is_empty() {
            return;
        }
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|job| job.next_retry_at.is_none_or(|at| at <= now));
        self.delayed = waiting;
        self.ready.extend(due);
    }

    fn dequeue(&mut self) -> Option<ExecutionJob> {
        if self.active < self.max_concurrent {
            let mut job = self.ready.pop_front()?;
            job.attempt += 1;
            job.next_retry_at = None;
            self.active += 1;
            Some(job)
        } else {
            None
        }
    }

    fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty() && self.active == 0
    }
}

struct Inner {
    queues: HashMap<QueueName, QueueState>,
    /// idempotency key → (job id, expires at)
    keys: HashMap<String, (String, DateTime<Utc>)>,
    history: VecDeque<FinishedJob>,
}

/// The three named execution queues behind one handle.
pub struct ExecutionQueue {
    inner: Mutex<Inner>,
    config: QueueConfig,
    dedup_window: Duration,
    journal: Option<Arc<dyn JobJournal>>,
    notify: Notify,
}

impl ExecutionQueue {
    /// Create the queues. `dedup_window` is how long an idempotency key
    /// stays claimed (one scheduler tick).
    pub fn new(config: QueueConfig, dedup_window: std::time::Duration) -> Self {
        let queues = QueueName::all()
            .into_iter()
            .map(|name| (name, QueueState::new(1)))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                queues,
                keys: HashMap::new(),
                history: VecDeque::new(),
            }),
            config,
            dedup_window: Duration::from_std(dedup_window).unwrap_or_else(|_| Duration::minutes(1)),
            journal: None,
            notify: Notify::new(),
        }
    }

    /// Persist job state transitions so unfinished work survives a restart.
    pub fn with_journal(mut self, journal: Arc<dyn JobJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Set the number of jobs a queue hands out concurrently.
    pub async fn set_concurrency(&self, queue: QueueName, max_concurrent: usize) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.queues.get_mut(&queue) {
            state.max_concurrent = max_concurrent.max(1);
        }
    }

    /// Submit a job.
    pub async fn enqueue(&self, request: JobRequest, options: SubmitOptions) -> Result<Submission> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner.keys.retain(|_, (_, expires)| *expires > now);

        if let Some((job_id, _)) = inner.keys.get(&options.idempotency_key) {
            tracing::debug!(
                "♻️ Queue[{}] duplicate key {} → job {}",
                request.queue,
                options.idempotency_key,
                job_id
            );
            return Ok(Submission { job_id: job_id.clone(), duplicate: true });
        }

        let job = ExecutionJob {
            id: format!("job-{}", uuid::Uuid::new_v4().simple()),
            idempotency_key: options.idempotency_key.clone(),
            queue: request.queue,
            tenant_id: request.tenant_id,
            bot_id: request.bot_id,
            decision_id: request.decision_id,
            trigger: request.trigger,
            trace_id: request.trace_id,
            payload: request.payload,
            attempt: 0,
            max_attempts: options.max_attempts.max(1),
            next_retry_at: None,
            last_error: None,
            enqueued_at: now,
        };

        // Journal first: a job the journal never saw would be lost on restart.
        if let Some(journal) = &self.journal {
            journal
                .record(&job, JobState::Queued)
                .map_err(|e| BotClawError::Queue(format!("journal write failed: {e}")))?;
        }

        let state = inner
            .queues
            .get_mut(&job.queue)
            .ok_or_else(|| BotClawError::Queue(format!("unknown queue {}", job.queue)))?;
        tracing::debug!(
            "📥 Queue[{}] enqueue: {} for {} (ready: {}, active: {})",
            job.queue,
            job.id,
            job.bot_id,
            state.ready.len(),
            state.active
        );
        let submission = Submission { job_id: job.id.clone(), duplicate: false };
        state.ready.push_back(job);
        inner.keys.insert(
            options.idempotency_key,
            (submission.job_id.clone(), now + self.dedup_window),
        );
        drop(inner);

        self.notify.notify_waiters();
        Ok(submission)
    }

    /// Take the next ready job from `queue`, if the ceiling allows.
    pub async fn next(&self, queue: QueueName) -> Option<ExecutionJob> {
        self.next_ready(queue, Utc::now()).await
    }

    /// [`next`](Self::next) against an explicit clock.
    pub async fn next_ready(&self, queue: QueueName, now: DateTime<Utc>) -> Option<ExecutionJob> {
        let mut inner = self.inner.lock().await;
        let state = inner.queues.get_mut(&queue)?;
        state.promote_due(now);
        let job = state.dequeue()?;
        drop(inner);

        tracing::debug!(
            "▶️ Queue[{}] start: {} attempt {}/{}",
            queue,
            job.id,
            job.attempt,
            job.max_attempts
        );
        self.journal_state(&job, JobState::Active);
        Some(job)
    }

    /// Report how an attempt ended. Retryable errors are re-queued with
    /// backoff until the attempt budget runs out.
    pub async fn complete(&self, mut job: ExecutionJob, error: Option<&BotClawError>) -> JobDisposition {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let disposition = match error {
            None => JobDisposition::Completed,
            Some(e) if e.is_retryable() && !job.is_final_attempt() => {
                let delay = self.retry_delay(job.attempt);
                JobDisposition::RetryScheduled { at: now + delay }
            }
            Some(e) => JobDisposition::Failed { error: e.to_string() },
        };
        if let Some(e) = error {
            job.last_error = Some(e.to_string());
        }

        let Some(state) = inner.queues.get_mut(&job.queue) else {
            return disposition;
        };
        state.active = state.active.saturating_sub(1);

        let finished = match &disposition {
            JobDisposition::Completed => {
                state.total_processed += 1;
                tracing::debug!("✅ Queue[{}] done: {}", job.queue, job.id);
                Some(JobState::Succeeded)
            }
            JobDisposition::RetryScheduled { at } => {
                tracing::info!(
                    "🔁 Queue[{}] retry {} at {} (attempt {}/{})",
                    job.queue,
                    job.id,
                    at.format("%H:%M:%S"),
                    job.attempt,
                    job.max_attempts
                );
                job.next_retry_at = Some(*at);
                self.journal_state(&job, JobState::Retrying);
                state.delayed.push(job.clone());
                None
            }
            JobDisposition::Failed { error } => {
                state.total_processed += 1;
                state.total_failed += 1;
                tracing::warn!(
                    "❌ Queue[{}] job {} failed after {} attempt(s): {}",
                    job.queue,
                    job.id,
                    job.attempt,
                    error
                );
                Some(JobState::Failed)
            }
        };

        if let Some(final_state) = finished {
            self.journal_state(&job, final_state);
            inner.history.push_back(FinishedJob { job, state: final_state, finished_at: now });
            self.trim_history(&mut inner.history, now);
        }
        drop(inner);

        self.notify.notify_waiters();
        disposition
    }

    /// Re-queue unfinished jobs from the journal. Call once at startup,
    /// before workers subscribe.
    pub async fn recover(&self) -> Result<usize> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        let pending = journal.pending()?;
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let mut recovered = 0;
        for mut job in pending {
            // An attempt interrupted mid-flight counts as started; the next
            // dequeue bumps the counter again. Keep the budget honest.
            if job.attempt >= job.max_attempts {
                job.attempt = job.max_attempts.saturating_sub(1);
            }
            job.next_retry_at = None;
            inner
                .keys
                .insert(job.idempotency_key.clone(), (job.id.clone(), now + self.dedup_window));
            if let Some(state) = inner.queues.get_mut(&job.queue) {
                state.ready.push_back(job);
                recovered += 1;
            }
        }
        drop(inner);
        if recovered > 0 {
            tracing::info!("♻️ Recovered {} unfinished job(s) from journal", recovered);
            self.notify.notify_waiters();
        }
        Ok(recovered)
    }

    /// Wait for the next enqueue or completion.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub async fn stats(&self) -> Vec<QueueStats> {
        let inner = self.inner.lock().await;
        QueueName::all()
            .into_iter()
            .filter_map(|name| {
                inner.queues.get(&name).map(|s| QueueStats {
                    queue: name,
                    ready: s.ready.len(),
                    delayed: s.delayed.len(),
                    active: s.active,
                    max_concurrent: s.max_concurrent,
                    total_processed: s.total_processed,
                    total_failed: s.total_failed,
                })
            })
            .collect()
    }

    /// Most recent terminal jobs, newest first.
    pub async fn history(&self, limit: usize) -> Vec<FinishedJob> {
        let inner = self.inner.lock().await;
        inner.history.iter().rev().take(limit).cloned().collect()
    }

    /// Nothing ready, delayed or in flight on any queue.
    pub async fn is_idle(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.queues.values().all(QueueState::is_idle)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff(attempt);
        let jitter_cap = (base.as_millis() as u64) / 10;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };
        Duration::from_std(base).unwrap_or_else(|_| Duration::seconds(5))
            + Duration::milliseconds(jitter as i64)
    }

    fn trim_history(&self, history: &mut VecDeque<FinishedJob>, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(self.config.history_retention_hours as i64);
        while history.len() > self.config.history_limit
            || history.front().is_some_and(|f| f.finished_at < cutoff)
        {
            history.pop_front();
        }
    }

    fn journal_state(&self, job: &ExecutionJob, state: JobState) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(job, state) {
                tracing::warn!("⚠️ Journal write for job {} ({}) failed: {}", job.id, state.as_str(), e);
            }
        }
    }
}
