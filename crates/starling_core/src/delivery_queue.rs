/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Durable at-least-once delivery. Jobs are one row per recipient inbox; the
//! worker drains due jobs with bounded concurrency, requeues transient
//! failures with exponential backoff, and dead-letters permanent ones.
//! Duplicates are fine: inbox processing is idempotent on activity id.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rand::{rngs::OsRng, RngCore};
use rusqlite::{params, Connection};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use crate::delivery::{DeliveryOutcome, DeliverySender};
use crate::store::Store;

#[derive(Clone)]
pub struct DeliveryQueue {
    db_path: PathBuf,
    notify: Arc<Notify>,
}

#[derive(Clone, Copy)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub max_parallel: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff_secs: 5,
            max_backoff_secs: 3600,
            max_parallel: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueStats {
    pub pending: u64,
    pub delivered: u64,
    pub dead: u64,
}

#[derive(Debug, Clone)]
struct Job {
    id: String,
    attempt: u32,
    inbox_url: String,
    actor_id: String,
    body: Vec<u8>,
}

impl DeliveryQueue {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        init_db(&db_path)?;
        Ok(Self {
            db_path,
            notify: Arc::new(Notify::new()),
        })
    }

    /// One job per recipient inbox. Returns the pending-job count.
    pub async fn enqueue(
        &self,
        actor_id: &str,
        activity_id: &str,
        body: Vec<u8>,
        inboxes: Vec<String>,
    ) -> Result<u64> {
        let created_at = now_ms();
        let actor_id = actor_id.to_string();
        let activity_id = activity_id.to_string();
        let count = tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            move || -> Result<u64> {
                let mut conn = Connection::open(db_path)?;
                let tx = conn.transaction()?;
                for inbox in inboxes {
                    let job_id = new_job_id();
                    tx.execute(
                        r#"
                        INSERT INTO delivery_jobs (
                          id, created_at_ms, next_attempt_at_ms, attempt, status, inbox_url, actor_id, activity_id, body, last_error
                        ) VALUES (?1, ?2, ?3, 0, 0, ?4, ?5, ?6, ?7, NULL)
                        "#,
                        params![job_id, created_at, created_at, inbox, actor_id, activity_id, body],
                    )?;
                }
                tx.commit()?;
                let pending: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM delivery_jobs WHERE status = 0",
                    [],
                    |r| r.get(0),
                )?;
                Ok(pending)
            }
        })
        .await??;

        self.notify.notify_one();
        Ok(count)
    }

    pub fn start_worker(
        &self,
        shutdown: watch::Receiver<bool>,
        store: Store,
        sender: DeliverySender,
        settings: QueueSettings,
    ) {
        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.run_loop(shutdown, store, sender, settings).await {
                warn!("delivery worker stopped: {e:#}");
            }
        });
    }

    async fn run_loop(
        &self,
        mut shutdown: watch::Receiver<bool>,
        store: Store,
        sender: DeliverySender,
        settings: QueueSettings,
    ) -> Result<()> {
        info!("delivery queue db: {}", self.db_path.display());

        let tick = Duration::from_secs(2);
        loop {
            if *shutdown.borrow() {
                break;
            }

            let jobs = self.fetch_due_jobs(40).await?;
            if jobs.is_empty() {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(tick) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            futures_util::stream::iter(jobs)
                .for_each_concurrent(settings.max_parallel, |job| {
                    let store = store.clone();
                    let sender = sender.clone();
                    async move {
                        if let Err(e) = self.process_one(&store, &sender, &settings, job).await {
                            warn!("delivery job error: {e:#}");
                        }
                    }
                })
                .await;
        }
        Ok(())
    }

    async fn process_one(
        &self,
        store: &Store,
        sender: &DeliverySender,
        settings: &QueueSettings,
        job: Job,
    ) -> Result<()> {
        let Some(keys) = store.actor_keys(&job.actor_id).await? else {
            self.mark_dead(&job.id, "no signing key for actor").await?;
            return Ok(());
        };
        let key_id = format!("{}#main-key", job.actor_id);
        let attempt_no = job.attempt.saturating_add(1);

        match sender
            .deliver(&keys.private_key_pem, &key_id, &job.inbox_url, &job.body)
            .await
        {
            DeliveryOutcome::Delivered => self.mark_delivered(&job.id).await?,
            DeliveryOutcome::Fatal(e) => {
                warn!("delivery dead-lettered for {}: {e}", job.inbox_url);
                self.mark_dead(&job.id, &e).await?;
            }
            DeliveryOutcome::Retry(e) => {
                if attempt_no >= settings.max_attempts {
                    self.mark_dead(&job.id, &e).await?;
                } else {
                    let delay = next_backoff(
                        attempt_no,
                        settings.base_backoff_secs,
                        settings.max_backoff_secs,
                    );
                    info!(
                        "delivery requeued for {} in {:?} (attempt {attempt_no}): {e}",
                        job.inbox_url, delay
                    );
                    self.requeue(&job.id, attempt_no, delay, &e).await?;
                }
            }
        }
        Ok(())
    }

    async fn fetch_due_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            move || -> Result<Vec<Job>> {
                let conn = Connection::open(db_path)?;
                let now = now_ms();
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, attempt, inbox_url, actor_id, body
                    FROM delivery_jobs
                    WHERE status = 0 AND next_attempt_at_ms <= ?1
                    ORDER BY next_attempt_at_ms ASC
                    LIMIT ?2
                    "#,
                )?;
                let mut rows = stmt.query(params![now, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(Job {
                        id: row.get(0)?,
                        attempt: row.get(1)?,
                        inbox_url: row.get(2)?,
                        actor_id: row.get(3)?,
                        body: row.get(4)?,
                    });
                }
                Ok(out)
            }
        })
        .await?
    }

    async fn mark_delivered(&self, id: &str) -> Result<()> {
        self.set_status(id, 1, None).await
    }

    async fn mark_dead(&self, id: &str, err: &str) -> Result<()> {
        self.set_status(id, 2, Some(err.to_string())).await
    }

    async fn set_status(&self, id: &str, status: i64, err: Option<String>) -> Result<()> {
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            let id = id.to_string();
            move || -> Result<()> {
                let conn = Connection::open(db_path)?;
                conn.execute(
                    "UPDATE delivery_jobs SET status = ?2, last_error = ?3 WHERE id = ?1",
                    params![id, status, err],
                )?;
                Ok(())
            }
        })
        .await??;
        Ok(())
    }

    /// The requeue hook: push the job's next attempt into the future.
    async fn requeue(&self, id: &str, attempt: u32, delay: Duration, err: &str) -> Result<()> {
        let next = now_ms().saturating_add(delay.as_millis() as i64);
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            let id = id.to_string();
            let err = err.to_string();
            move || -> Result<()> {
                let conn = Connection::open(db_path)?;
                conn.execute(
                    "UPDATE delivery_jobs SET attempt = ?2, next_attempt_at_ms = ?3, last_error = ?4 WHERE id = ?1",
                    params![id, attempt, next, err],
                )?;
                Ok(())
            }
        })
        .await??;
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            move || -> Result<QueueStats> {
                let conn = Connection::open(db_path)?;
                let count = |status: i64| -> Result<u64> {
                    conn.query_row(
                        "SELECT COUNT(*) FROM delivery_jobs WHERE status = ?1",
                        params![status],
                        |r| r.get(0),
                    )
                    .context("count jobs")
                };
                Ok(QueueStats {
                    pending: count(0)?,
                    delivered: count(1)?,
                    dead: count(2)?,
                })
            }
        })
        .await?
    }

    /// Inbox URLs of jobs not yet delivered or dead.
    pub async fn pending_targets(&self) -> Result<Vec<String>> {
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            move || -> Result<Vec<String>> {
                let conn = Connection::open(db_path)?;
                let mut stmt =
                    conn.prepare("SELECT inbox_url FROM delivery_jobs WHERE status = 0")?;
                let out = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                Ok(out)
            }
        })
        .await?
    }
}

fn init_db(path: &Path) -> Result<()> {
    let conn = Connection::open(path).with_context(|| format!("open db: {}", path.display()))?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS delivery_jobs (
          id TEXT PRIMARY KEY,
          created_at_ms INTEGER NOT NULL,
          next_attempt_at_ms INTEGER NOT NULL,
          attempt INTEGER NOT NULL,
          status INTEGER NOT NULL,
          inbox_url TEXT NOT NULL,
          actor_id TEXT NOT NULL,
          activity_id TEXT NULL,
          body BLOB NOT NULL,
          last_error TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_delivery_due ON delivery_jobs(status, next_attempt_at_ms);
        "#,
    )?;
    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// 16 random bytes -> 32 hex chars
fn new_job_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

fn next_backoff(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let pow = attempt.saturating_sub(1).min(20);
    let mut secs = base_secs.saturating_mul(1u64 << pow);
    if secs > max_secs {
        secs = max_secs;
    }
    // jitter 0..1000ms
    let mut b = [0u8; 2];
    OsRng.fill_bytes(&mut b);
    let jitter_ms = u16::from_le_bytes(b) as u64 % 1000;
    Duration::from_secs(secs) + Duration::from_millis(jitter_ms)
}
