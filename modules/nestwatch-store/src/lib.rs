//! Persistence boundary for the scan pipeline.
//!
//! Three logical collections — scan cursors, the scanned-listing dedup
//! index, and the sent-notification log — plus the read-only profile
//! source. Everything sits behind object-safe traits so the pipeline can
//! run against Postgres in production and the in-memory store in tests:
//! no network, no Docker, `cargo test` in seconds.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use nestwatch_common::{
    Channel, CursorPosition, ScannedListing, SearchProfile, SentNotification, Source,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Read-only view of the externally-managed profiles. Called once per
/// cycle; the returned Vec is that cycle's snapshot, concurrent edits are
/// picked up on the next cycle.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn list_active_profiles(&self) -> Result<Vec<SearchProfile>, StoreError>;
}

/// Per-(profile, source) scan progress. Written only by the orchestrator,
/// after a pair's scan completes without a fatal error.
#[async_trait]
pub trait ScanStateStore: Send + Sync {
    async fn get_cursor(
        &self,
        profile_id: Uuid,
        source: Source,
    ) -> Result<Option<CursorPosition>, StoreError>;

    async fn advance_cursor(
        &self,
        profile_id: Uuid,
        source: Source,
        position: CursorPosition,
    ) -> Result<(), StoreError>;
}

/// Content-addressed record of every sighting, keyed by native (source,
/// id) and by content hash.
#[async_trait]
pub trait DedupIndex: Send + Sync {
    /// Atomically insert if absent on both keys. Returns true when the
    /// listing is genuinely new. Concurrent scans observing the same
    /// underlying listing get exactly one `true` between them.
    async fn check_and_insert(&self, listing: &ScannedListing) -> Result<bool, StoreError>;

    /// Evict sightings first seen before `cutoff`. Storage hygiene only —
    /// the retention window is sized so nothing active is evicted.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Append-only audit log of delivery outcomes. A unique key on
/// (profile, content hash, channel) backs the notify-once invariant.
#[async_trait]
pub trait NotificationLog: Send + Sync {
    async fn already_sent(
        &self,
        profile_id: Uuid,
        content_hash: &str,
        channel: Channel,
    ) -> Result<bool, StoreError>;

    /// Idempotent: recording the same (profile, hash, channel) twice
    /// keeps the first row.
    async fn record(&self, notification: &SentNotification) -> Result<(), StoreError>;
}
