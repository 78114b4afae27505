use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::listing_fingerprint;
use crate::text::{parse_price, parse_rooms};

// --- Sources & channels ---

/// An external platform scanned for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Yad2,
    Facebook,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Yad2 => write!(f, "yad2"),
            Source::Facebook => write!(f, "facebook"),
        }
    }
}

/// A delivery channel for match notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Telegram,
    Whatsapp,
    Email,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Telegram => write!(f, "telegram"),
            Channel::Whatsapp => write!(f, "whatsapp"),
            Channel::Email => write!(f, "email"),
        }
    }
}

// --- Search profile ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCriteria {
    pub city: String,
    #[serde(default)]
    pub neighborhoods: Vec<String>,
    #[serde(default)]
    pub streets: Vec<String>,
}

/// Inclusive price bounds in ILS. An absent bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl PriceRange {
    pub fn contains(&self, price: i64) -> bool {
        self.min.is_none_or(|min| price >= min) && self.max.is_none_or(|max| price <= max)
    }
}

/// Inclusive room-count bounds. Fractional counts ("2.5 rooms") are common.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RoomRange {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl RoomRange {
    pub fn contains(&self, rooms: f32) -> bool {
        self.min.is_none_or(|min| rooms >= min) && self.max.is_none_or(|max| rooms <= max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Apartment,
    Studio,
    Penthouse,
    Duplex,
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyType::Apartment => write!(f, "apartment"),
            PropertyType::Studio => write!(f, "studio"),
            PropertyType::Penthouse => write!(f, "penthouse"),
            PropertyType::Duplex => write!(f, "duplex"),
        }
    }
}

/// Per-source scan targets for a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanTargets {
    /// Prebuilt classifieds search URL. When absent the adapter constructs
    /// one from the profile criteria.
    pub search_url: Option<String>,
    /// Social group identifiers to scan.
    #[serde(default)]
    pub group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationChannels {
    #[serde(default)]
    pub telegram: ChannelConfig,
    #[serde(default)]
    pub whatsapp: ChannelConfig,
    #[serde(default)]
    pub email: ChannelConfig,
}

impl NotificationChannels {
    /// Channels that are enabled and have a recipient configured.
    pub fn enabled(&self) -> Vec<(Channel, &str)> {
        let mut out = Vec::new();
        for (channel, cfg) in [
            (Channel::Telegram, &self.telegram),
            (Channel::Whatsapp, &self.whatsapp),
            (Channel::Email, &self.email),
        ] {
            if cfg.enabled {
                if let Some(recipient) = cfg.recipient.as_deref() {
                    out.push((channel, recipient));
                }
            }
        }
        out
    }
}

/// A saved search: what to look for, where, and whom to tell.
/// Owned by the profile-editing surface; the pipeline only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProfile {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub location: LocationCriteria,
    pub price: PriceRange,
    pub rooms: RoomRange,
    #[serde(default)]
    pub property_types: Vec<PropertyType>,
    pub targets: ScanTargets,
    pub channels: NotificationChannels,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchProfile {
    /// Sources this profile is configured to scan.
    pub fn sources(&self) -> Vec<Source> {
        let mut out = Vec::new();
        if self.targets.search_url.is_some() || !self.location.city.is_empty() {
            out.push(Source::Yad2);
        }
        if !self.targets.group_ids.is_empty() {
            out.push(Source::Facebook);
        }
        out
    }
}

// --- Scan state ---

/// Scan progress marker for one (profile, source) pair. Sources differ in
/// what they can page on: the classifieds feed orders by timestamp, group
/// feeds only expose post ids reliably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CursorPosition {
    Timestamp(DateTime<Utc>),
    NativeId(String),
}

// --- Listings ---

/// A listing as it comes off an adapter: native field shapes ride in
/// `fields`, keyed per source. Only the adapter that produced it knows the
/// key set; `SourceAdapter::map_listing` converts to the shared [`Listing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawListing {
    pub source: Source,
    pub native_id: String,
    pub url: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub fields: HashMap<String, String>,
}

/// The normalized shape the matching engine sees, regardless of source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub source: Source,
    pub native_id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub price_text: String,
    pub rooms_text: String,
    pub location_text: String,
    pub image_url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Stable content fingerprint for cross-source duplicate detection.
    pub fn fingerprint(&self) -> String {
        listing_fingerprint(
            parse_price(&self.price_text),
            parse_rooms(&self.rooms_text),
            &self.location_text,
            &self.title,
            &self.description,
        )
    }
}

/// A sighting recorded in the dedup index. Insert-only; purged after the
/// retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedListing {
    pub native_id: String,
    pub source: Source,
    pub content_hash: String,
    pub first_seen: DateTime<Utc>,
    pub url: String,
}

impl ScannedListing {
    pub fn from_listing(listing: &Listing, now: DateTime<Utc>) -> Self {
        Self {
            native_id: listing.native_id.clone(),
            source: listing.source,
            content_hash: listing.fingerprint(),
            first_seen: now,
            url: listing.url.clone(),
        }
    }
}

// --- Match results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchConfidence::Low => write!(f, "low"),
            MatchConfidence::Medium => write!(f, "medium"),
            MatchConfidence::High => write!(f, "high"),
        }
    }
}

/// Outcome of evaluating one listing against one profile. Ephemeral —
/// only persisted indirectly through the notification log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub score: f32,
    pub confidence: MatchConfidence,
    pub price: i64,
    pub rooms: f32,
    pub location_matches: Vec<String>,
    pub reasons: Vec<String>,
}

/// Why a listing failed a profile's hard filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    PriceOutOfRange,
    RoomsOutOfRange,
    UnparsableField(String),
    LocationMismatch,
    PropertyTypeMismatch,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::PriceOutOfRange => write!(f, "price_out_of_range"),
            Rejection::RoomsOutOfRange => write!(f, "rooms_out_of_range"),
            Rejection::UnparsableField(field) => write!(f, "unparsable_field:{field}"),
            Rejection::LocationMismatch => write!(f, "location_mismatch"),
            Rejection::PropertyTypeMismatch => write!(f, "property_type_mismatch"),
        }
    }
}

// --- Notifications ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed { error: String },
}

impl DeliveryStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered)
    }
}

/// One row of the append-only notification audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentNotification {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub listing_id: String,
    pub content_hash: String,
    pub channel: Channel,
    pub recipient: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_range_bounds_are_inclusive() {
        let range = PriceRange {
            min: Some(4000),
            max: Some(7000),
        };
        assert!(range.contains(4000));
        assert!(range.contains(7000));
        assert!(!range.contains(3999));
        assert!(!range.contains(7001));
    }

    #[test]
    fn absent_price_bound_is_unbounded() {
        let range = PriceRange {
            min: None,
            max: Some(7000),
        };
        assert!(range.contains(0));
        assert!(!range.contains(7001));

        let range = PriceRange::default();
        assert!(range.contains(i64::MAX));
    }

    #[test]
    fn room_range_accepts_fractional() {
        let range = RoomRange {
            min: Some(2.0),
            max: Some(3.0),
        };
        assert!(range.contains(2.5));
        assert!(range.contains(2.0));
        assert!(range.contains(3.0));
        assert!(!range.contains(3.5));
    }

    #[test]
    fn enabled_channels_require_recipient() {
        let channels = NotificationChannels {
            telegram: ChannelConfig {
                enabled: true,
                recipient: Some("123456".to_string()),
            },
            whatsapp: ChannelConfig {
                enabled: true,
                recipient: None,
            },
            email: ChannelConfig {
                enabled: false,
                recipient: Some("user@example.com".to_string()),
            },
        };
        let enabled = channels.enabled();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0, Channel::Telegram);
    }

    #[test]
    fn profile_sources_follow_targets() {
        let mut profile = test_profile();
        profile.targets.group_ids.clear();
        assert_eq!(profile.sources(), vec![Source::Yad2]);

        profile.targets.group_ids.push("12345".to_string());
        assert_eq!(profile.sources(), vec![Source::Yad2, Source::Facebook]);
    }

    #[test]
    fn identical_content_same_fingerprint_across_sources() {
        let a = test_listing(Source::Yad2, "y1");
        let mut b = test_listing(Source::Facebook, "f9");
        b.url = "https://facebook.com/groups/1/posts/f9".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    fn test_profile() -> SearchProfile {
        SearchProfile {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            active: true,
            location: LocationCriteria {
                city: "תל אביב".to_string(),
                neighborhoods: vec![],
                streets: vec![],
            },
            price: PriceRange::default(),
            rooms: RoomRange::default(),
            property_types: vec![],
            targets: ScanTargets {
                search_url: None,
                group_ids: vec!["999".to_string()],
            },
            channels: NotificationChannels::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_listing(source: Source, id: &str) -> Listing {
        Listing {
            source,
            native_id: id.to_string(),
            url: format!("https://example.com/{id}"),
            title: "דירת 2.5 חדרים בפלורנטין".to_string(),
            description: "משופצת, מרפסת".to_string(),
            price_text: "6,500 ₪".to_string(),
            rooms_text: "2.5".to_string(),
            location_text: "תל אביב, פלורנטין".to_string(),
            image_url: None,
            posted_at: None,
        }
    }
}
