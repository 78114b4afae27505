//! Test doubles for the pipeline: scripted source adapters and channel
//! senders, plus fixture builders. Compiled for tests only (the
//! `test-support` feature exists so integration tests can use them).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use nestwatch_common::{
    CursorPosition, Listing, LocationCriteria, MatchConfidence, MatchResult,
    NotificationChannels, PriceRange, RawListing, RoomRange, ScanError, ScanTargets,
    SearchProfile, Source,
};

use crate::dispatch::{ChannelMessage, ChannelSender, DeliveryError};
use crate::sources::{ScanBatch, SourceAdapter};

type ScanScript = dyn Fn(&SearchProfile) -> Result<Vec<RawListing>, ScanError> + Send + Sync;

/// Adapter whose scan results are scripted per call. `map_listing` reads
/// the same well-known field keys the real adapters emit.
pub struct MockAdapter {
    source: Source,
    script: Box<ScanScript>,
    calls: AtomicU32,
}

impl MockAdapter {
    pub fn new(
        source: Source,
        script: impl Fn(&SearchProfile) -> Result<Vec<RawListing>, ScanError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source,
            script: Box::new(script),
            calls: AtomicU32::new(0),
        }
    }

    /// Always yields the same listings.
    pub fn yielding(source: Source, listings: Vec<RawListing>) -> Self {
        Self::new(source, move |_| Ok(listings.clone()))
    }

    /// Always fails with the error produced by `make_error`.
    pub fn failing(
        source: Source,
        make_error: impl Fn() -> ScanError + Send + Sync + 'static,
    ) -> Self {
        Self::new(source, move |_| Err(make_error()))
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn source(&self) -> Source {
        self.source
    }

    async fn scan(
        &self,
        profile: &SearchProfile,
        _cursor: Option<&CursorPosition>,
    ) -> Result<ScanBatch, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let listings = (self.script)(profile)?;
        let next_cursor = listings
            .first()
            .map(|l| CursorPosition::NativeId(l.native_id.clone()));
        Ok(ScanBatch {
            listings,
            parse_skips: 0,
            next_cursor,
        })
    }

    fn map_listing(&self, raw: &RawListing) -> Result<Listing, ScanError> {
        let title = raw
            .fields
            .get("title")
            .ok_or_else(|| ScanError::parse(raw.source, "missing field title"))?;
        Ok(Listing {
            source: raw.source,
            native_id: raw.native_id.clone(),
            url: raw.url.clone(),
            title: title.clone(),
            description: raw.fields.get("description").cloned().unwrap_or_default(),
            price_text: raw.fields.get("price").cloned().unwrap_or_default(),
            rooms_text: raw.fields.get("rooms").cloned().unwrap_or_default(),
            location_text: raw.fields.get("location").cloned().unwrap_or_default(),
            image_url: raw.fields.get("image_url").cloned(),
            posted_at: raw.posted_at,
        })
    }
}

/// Channel sender that records deliveries, optionally failing every call
/// with a permanent error.
pub struct MockSender {
    fail_with: Option<String>,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockSender {
    pub fn new() -> Self {
        Self {
            fail_with: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// (recipient, text) pairs delivered so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for MockSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for MockSender {
    async fn send(
        &self,
        recipient: &str,
        message: &ChannelMessage,
    ) -> Result<String, DeliveryError> {
        if let Some(error) = &self.fail_with {
            return Err(DeliveryError::Api {
                status: 400,
                message: error.clone(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.to_string(), message.text.clone()));
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Fails transiently for the first `failures` calls, then succeeds.
pub struct FlakySender {
    failures_remaining: AtomicU32,
}

impl FlakySender {
    pub fn new(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl ChannelSender for FlakySender {
    async fn send(
        &self,
        _recipient: &str,
        _message: &ChannelMessage,
    ) -> Result<String, DeliveryError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(DeliveryError::Network("connection reset".to_string()));
        }
        Ok("msg-ok".to_string())
    }
}

// --- Fixtures ---

pub fn test_profile() -> SearchProfile {
    SearchProfile {
        id: Uuid::new_v4(),
        name: "tel-aviv-2-3-rooms".to_string(),
        active: true,
        location: LocationCriteria {
            city: "תל אביב".to_string(),
            neighborhoods: vec![],
            streets: vec![],
        },
        price: PriceRange {
            min: Some(4000),
            max: Some(7000),
        },
        rooms: RoomRange {
            min: Some(2.0),
            max: Some(3.0),
        },
        property_types: vec![],
        targets: ScanTargets::default(),
        channels: NotificationChannels::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn test_listing() -> Listing {
    Listing {
        source: Source::Yad2,
        native_id: "listing-1".to_string(),
        url: "https://www.yad2.co.il/item/listing-1".to_string(),
        title: "דירת 2.5 חדרים בפלורנטין".to_string(),
        description: "משופצת, מרפסת שמש".to_string(),
        price_text: "6,500 ₪".to_string(),
        rooms_text: "2.5".to_string(),
        location_text: "תל אביב, פלורנטין".to_string(),
        image_url: None,
        posted_at: None,
    }
}

pub fn test_match() -> MatchResult {
    MatchResult {
        score: 90.0,
        confidence: MatchConfidence::High,
        price: 6500,
        rooms: 2.5,
        location_matches: vec!["תל אביב".to_string()],
        reasons: vec![],
    }
}

/// A raw listing with the well-known field keys, matching
/// [`test_profile`]'s criteria by default.
pub fn raw_listing(native_id: &str) -> RawListing {
    let mut fields = HashMap::new();
    fields.insert("title".to_string(), "דירת 2.5 חדרים בפלורנטין".to_string());
    fields.insert("price".to_string(), "6,500 ₪".to_string());
    fields.insert("rooms".to_string(), "2.5".to_string());
    fields.insert("location".to_string(), "תל אביב, פלורנטין".to_string());
    fields.insert("description".to_string(), "משופצת, מרפסת שמש".to_string());
    RawListing {
        source: Source::Yad2,
        native_id: native_id.to_string(),
        url: format!("https://www.yad2.co.il/item/{native_id}"),
        posted_at: None,
        fields,
    }
}
