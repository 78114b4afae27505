//! In-memory store for tests and dry runs. Same semantics as the
//! Postgres store, including insert-if-absent atomicity (one mutex
//! guards both dedup keys).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use nestwatch_common::{
    Channel, CursorPosition, ScannedListing, SearchProfile, SentNotification, Source,
};

use crate::{DedupIndex, NotificationLog, ProfileSource, ScanStateStore, StoreError};

#[derive(Default)]
struct Inner {
    profiles: Vec<SearchProfile>,
    cursors: HashMap<(Uuid, Source), CursorPosition>,
    seen_native: HashSet<(Source, String)>,
    seen_hashes: HashSet<String>,
    listings: Vec<ScannedListing>,
    sent_keys: HashSet<(Uuid, String, Channel)>,
    notifications: Vec<SentNotification>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_profile(&self, profile: SearchProfile) {
        self.inner.lock().unwrap().profiles.push(profile);
    }

    pub fn notifications(&self) -> Vec<SentNotification> {
        self.inner.lock().unwrap().notifications.clone()
    }

    pub fn scanned_listings(&self) -> Vec<ScannedListing> {
        self.inner.lock().unwrap().listings.clone()
    }

    pub fn cursor(&self, profile_id: Uuid, source: Source) -> Option<CursorPosition> {
        self.inner
            .lock()
            .unwrap()
            .cursors
            .get(&(profile_id, source))
            .cloned()
    }
}

#[async_trait]
impl ProfileSource for MemoryStore {
    async fn list_active_profiles(&self) -> Result<Vec<SearchProfile>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .profiles
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScanStateStore for MemoryStore {
    async fn get_cursor(
        &self,
        profile_id: Uuid,
        source: Source,
    ) -> Result<Option<CursorPosition>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .cursors
            .get(&(profile_id, source))
            .cloned())
    }

    async fn advance_cursor(
        &self,
        profile_id: Uuid,
        source: Source,
        position: CursorPosition,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .cursors
            .insert((profile_id, source), position);
        Ok(())
    }
}

#[async_trait]
impl DedupIndex for MemoryStore {
    async fn check_and_insert(&self, listing: &ScannedListing) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let native_key = (listing.source, listing.native_id.clone());
        if inner.seen_native.contains(&native_key)
            || inner.seen_hashes.contains(&listing.content_hash)
        {
            return Ok(false);
        }
        inner.seen_native.insert(native_key);
        inner.seen_hashes.insert(listing.content_hash.clone());
        inner.listings.push(listing.clone());
        Ok(true)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.listings.len();
        inner.listings.retain(|l| l.first_seen >= cutoff);
        let kept: Vec<ScannedListing> = inner.listings.clone();
        inner.seen_native = kept
            .iter()
            .map(|l| (l.source, l.native_id.clone()))
            .collect();
        inner.seen_hashes = kept.iter().map(|l| l.content_hash.clone()).collect();
        Ok((before - inner.listings.len()) as u64)
    }
}

#[async_trait]
impl NotificationLog for MemoryStore {
    async fn already_sent(
        &self,
        profile_id: Uuid,
        content_hash: &str,
        channel: Channel,
    ) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sent_keys
            .contains(&(profile_id, content_hash.to_string(), channel)))
    }

    async fn record(&self, notification: &SentNotification) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (
            notification.profile_id,
            notification.content_hash.clone(),
            notification.channel,
        );
        if inner.sent_keys.insert(key) {
            inner.notifications.push(notification.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use nestwatch_common::DeliveryStatus;

    fn listing(source: Source, native_id: &str, hash: &str) -> ScannedListing {
        ScannedListing {
            native_id: native_id.to_string(),
            source,
            content_hash: hash.to_string(),
            first_seen: Utc::now(),
            url: format!("https://example.com/{native_id}"),
        }
    }

    #[tokio::test]
    async fn first_sighting_is_new_second_is_not() {
        let store = MemoryStore::new();
        assert!(store
            .check_and_insert(&listing(Source::Yad2, "a", "h1"))
            .await
            .unwrap());
        assert!(!store
            .check_and_insert(&listing(Source::Yad2, "a", "h1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn same_hash_from_other_source_is_duplicate() {
        let store = MemoryStore::new();
        assert!(store
            .check_and_insert(&listing(Source::Yad2, "a", "h1"))
            .await
            .unwrap());
        // Re-posted under a different native id on a different platform.
        assert!(!store
            .check_and_insert(&listing(Source::Facebook, "b", "h1"))
            .await
            .unwrap());
        assert_eq!(store.scanned_listings().len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_old_entries_only() {
        let store = MemoryStore::new();
        let mut old = listing(Source::Yad2, "old", "h_old");
        old.first_seen = Utc::now() - Duration::days(120);
        store.check_and_insert(&old).await.unwrap();
        store
            .check_and_insert(&listing(Source::Yad2, "new", "h_new"))
            .await
            .unwrap();

        let purged = store
            .purge_older_than(Utc::now() - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.scanned_listings().len(), 1);
        // The purged native id is insertable again; the fresh one is not.
        assert!(store.check_and_insert(&old).await.unwrap());
        assert!(!store
            .check_and_insert(&listing(Source::Yad2, "new", "h_new"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn record_is_idempotent_per_profile_hash_channel() {
        let store = MemoryStore::new();
        let profile_id = Uuid::new_v4();
        let notification = SentNotification {
            id: Uuid::new_v4(),
            profile_id,
            listing_id: "a".to_string(),
            content_hash: "h1".to_string(),
            channel: Channel::Telegram,
            recipient: "123".to_string(),
            message: "hello".to_string(),
            sent_at: Utc::now(),
            status: DeliveryStatus::Delivered,
            attempts: 1,
        };
        store.record(&notification).await.unwrap();
        store.record(&notification).await.unwrap();
        assert_eq!(store.notifications().len(), 1);
        assert!(store
            .already_sent(profile_id, "h1", Channel::Telegram)
            .await
            .unwrap());
        assert!(!store
            .already_sent(profile_id, "h1", Channel::Whatsapp)
            .await
            .unwrap());
    }
}
