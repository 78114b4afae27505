//! Cycle run log — a persisted timeline of every action taken during one
//! scan cycle. Each cycle produces a single row in the `scan_runs` table
//! with JSONB columns for stats and events.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::stats::CycleStats;

pub struct RunLog {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u32,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    DedupPurge {
        evicted: u64,
    },
    SourceScan {
        profile_id: Uuid,
        source: String,
        fetched: u32,
        new: u32,
        duplicates: u32,
        parse_skips: u32,
    },
    ScanFailed {
        profile_id: Uuid,
        source: String,
        error: String,
    },
    MatchFound {
        profile_id: Uuid,
        listing_id: String,
        confidence: String,
        score: f64,
    },
    NotificationSent {
        profile_id: Uuid,
        listing_id: String,
        channel: String,
        delivered: bool,
        attempts: u32,
    },
    CursorAdvanced {
        profile_id: Uuid,
        source: String,
    },
    SourceSuspended {
        profile_id: Uuid,
        source: String,
    },
    OperatorAlert {
        profile_id: Uuid,
        source: String,
        delivered: bool,
    },
    CycleTimeout {
        elapsed_secs: u64,
    },
}

impl RunLog {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn extend(&mut self, kinds: Vec<EventKind>) {
        for kind in kinds {
            self.log(kind);
        }
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    /// Serialize the run log and write one row to Postgres.
    pub async fn save_to_db(&self, pool: &PgPool, stats: &CycleStats) -> Result<()> {
        let stats_json = serde_json::to_value(stats)?;
        let events_json = serde_json::to_value(&self.events)?;

        sqlx::query(
            r#"
            INSERT INTO scan_runs (run_id, started_at, finished_at, stats, events)
            VALUES ($1, $2, now(), $3, $4)
            "#,
        )
        .bind(&self.run_id)
        .bind(self.started_at)
        .bind(&stats_json)
        .bind(&events_json)
        .execute(pool)
        .await?;

        info!(run_id = %self.run_id, events = self.events.len(), "Cycle run log saved");
        Ok(())
    }
}
