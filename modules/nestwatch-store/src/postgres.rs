//! Postgres implementation of the store traits.
//!
//! All dedup and notify-once atomicity comes from unique indexes plus
//! `INSERT ... ON CONFLICT DO NOTHING` — the database linearizes
//! concurrent inserts, no application-level locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use nestwatch_common::{
    Channel, CursorPosition, DeliveryStatus, ScannedListing, SearchProfile, SentNotification,
    Source,
};

use crate::{DedupIndex, NotificationLog, ProfileSource, ScanStateStore, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent schema setup, run at startup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        const DDL: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS search_profiles (
                id UUID PRIMARY KEY,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                profile JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS scan_cursors (
                profile_id UUID NOT NULL,
                source TEXT NOT NULL,
                position JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (profile_id, source)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS scanned_listings (
                source TEXT NOT NULL,
                native_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                first_seen TIMESTAMPTZ NOT NULL,
                url TEXT NOT NULL,
                PRIMARY KEY (source, native_id)
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS scanned_listings_content_hash
                ON scanned_listings (content_hash)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS scanned_listings_first_seen
                ON scanned_listings (first_seen)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sent_notifications (
                id UUID PRIMARY KEY,
                profile_id UUID NOT NULL,
                listing_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                channel TEXT NOT NULL,
                recipient TEXT NOT NULL,
                message TEXT NOT NULL,
                sent_at TIMESTAMPTZ NOT NULL,
                delivered BOOLEAN NOT NULL,
                error TEXT,
                attempts INT NOT NULL DEFAULT 1
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS sent_notifications_once
                ON sent_notifications (profile_id, content_hash, channel)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS sent_notifications_sent_at
                ON sent_notifications (sent_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS scan_runs (
                run_id TEXT PRIMARY KEY,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                stats JSONB NOT NULL,
                events JSONB NOT NULL
            )
            "#,
        ];

        for statement in DDL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Store migrations applied");
        Ok(())
    }
}

#[async_trait]
impl ProfileSource for PgStore {
    async fn list_active_profiles(&self) -> Result<Vec<SearchProfile>, StoreError> {
        let rows = sqlx::query("SELECT profile FROM search_profiles WHERE active")
            .fetch_all(&self.pool)
            .await?;

        let mut profiles = Vec::with_capacity(rows.len());
        for row in rows {
            let doc: serde_json::Value = row.get("profile");
            profiles.push(serde_json::from_value(doc)?);
        }
        Ok(profiles)
    }
}

#[async_trait]
impl ScanStateStore for PgStore {
    async fn get_cursor(
        &self,
        profile_id: Uuid,
        source: Source,
    ) -> Result<Option<CursorPosition>, StoreError> {
        let row = sqlx::query(
            "SELECT position FROM scan_cursors WHERE profile_id = $1 AND source = $2",
        )
        .bind(profile_id)
        .bind(source.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let doc: serde_json::Value = row.get("position");
                Ok(Some(serde_json::from_value(doc)?))
            }
            None => Ok(None),
        }
    }

    async fn advance_cursor(
        &self,
        profile_id: Uuid,
        source: Source,
        position: CursorPosition,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scan_cursors (profile_id, source, position, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (profile_id, source)
            DO UPDATE SET position = EXCLUDED.position, updated_at = now()
            "#,
        )
        .bind(profile_id)
        .bind(source.to_string())
        .bind(serde_json::to_value(&position)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DedupIndex for PgStore {
    async fn check_and_insert(&self, listing: &ScannedListing) -> Result<bool, StoreError> {
        // ON CONFLICT DO NOTHING without a target covers every unique
        // constraint: the native (source, id) primary key and the
        // content-hash index both suppress the insert.
        let result = sqlx::query(
            r#"
            INSERT INTO scanned_listings (source, native_id, content_hash, first_seen, url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(listing.source.to_string())
        .bind(&listing.native_id)
        .bind(&listing.content_hash)
        .bind(listing.first_seen)
        .bind(&listing.url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM scanned_listings WHERE first_seen < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationLog for PgStore {
    async fn already_sent(
        &self,
        profile_id: Uuid,
        content_hash: &str,
        channel: Channel,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS one FROM sent_notifications
            WHERE profile_id = $1 AND content_hash = $2 AND channel = $3
            "#,
        )
        .bind(profile_id)
        .bind(content_hash)
        .bind(channel.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn record(&self, notification: &SentNotification) -> Result<(), StoreError> {
        let (delivered, error) = match &notification.status {
            DeliveryStatus::Delivered => (true, None),
            DeliveryStatus::Failed { error } => (false, Some(error.as_str())),
        };

        sqlx::query(
            r#"
            INSERT INTO sent_notifications
                (id, profile_id, listing_id, content_hash, channel, recipient,
                 message, sent_at, delivered, error, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(notification.id)
        .bind(notification.profile_id)
        .bind(&notification.listing_id)
        .bind(&notification.content_hash)
        .bind(notification.channel.to_string())
        .bind(&notification.recipient)
        .bind(&notification.message)
        .bind(notification.sent_at)
        .bind(delivered)
        .bind(error)
        .bind(notification.attempts as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
