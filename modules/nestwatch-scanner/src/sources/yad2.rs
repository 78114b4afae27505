//! Classifieds adapter for yad2.co.il rental listings.
//!
//! Builds a search URL from the profile criteria (unless the profile
//! carries a prebuilt one), fetches the results feed with browser-like
//! headers, and parses listing cards with CSS selectors. The site's
//! markup shifts between rollouts, so container and field selectors each
//! have fallbacks. Cursor semantics: the feed is newest-first with no
//! reliable timestamps, so the cursor is the native id of the newest
//! previously-seen listing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use nestwatch_common::{
    CursorPosition, Listing, PropertyType, RawListing, ScanError, SearchProfile, Source,
};

use super::{looks_like_challenge, polite_delay, required_field, ScanBatch, SourceAdapter};

const BASE_URL: &str = "https://www.yad2.co.il";
const SEARCH_BASE: &str = "https://www.yad2.co.il/realestate/rent";

/// Listing-card container selectors, in order of preference.
const CONTAINER_SELECTORS: &[&str] = &[
    r#"div[data-testid="feed-item"]"#,
    ".feeditem",
    ".feed_item",
    "[data-item-id]",
    ".feed-list-item",
];

pub struct Yad2Adapter {
    client: reqwest::Client,
}

impl Yad2Adapter {
    pub fn new() -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )
            .build()
            .map_err(|e| ScanError::network(Source::Yad2, e))?;
        Ok(Self { client })
    }

    /// Build a search URL from profile criteria when the profile does not
    /// carry a prebuilt one.
    pub fn search_url(profile: &SearchProfile) -> String {
        if let Some(url) = profile.targets.search_url.as_deref() {
            return url.to_string();
        }

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(min) = profile.price.min {
            params.push(("priceMin", min.to_string()));
        }
        if let Some(max) = profile.price.max {
            params.push(("priceMax", max.to_string()));
        }
        match (profile.rooms.min, profile.rooms.max) {
            (Some(min), Some(max)) => params.push(("rooms", format!("{min}-{max}"))),
            (Some(min), None) => params.push(("rooms", format!("{min}-"))),
            (None, Some(max)) => params.push(("rooms", format!("-{max}"))),
            (None, None) => {}
        }
        if let Some(code) = city_code(&profile.location.city) {
            params.push(("city", code.to_string()));
        }
        let type_codes: Vec<&str> = profile
            .property_types
            .iter()
            .filter_map(|t| property_group(*t))
            .collect();
        if !type_codes.is_empty() {
            params.push(("propertyGroup", type_codes.join(",")));
        }

        if params.is_empty() {
            return SEARCH_BASE.to_string();
        }
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}?{}", SEARCH_BASE, query.join("&"))
    }

    fn parse_feed(&self, html: &str) -> (Vec<RawListing>, u32) {
        let document = Html::parse_document(html);
        let mut listings = Vec::new();
        let mut skips = 0u32;

        let containers = CONTAINER_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .find_map(|selector| {
                let found: Vec<ElementRef> = document.select(&selector).collect();
                if found.is_empty() {
                    None
                } else {
                    Some(found)
                }
            })
            .unwrap_or_default();

        for element in containers {
            match parse_card(&element) {
                Some(raw) => listings.push(raw),
                None => skips += 1,
            }
        }

        (listings, skips)
    }
}

#[async_trait]
impl SourceAdapter for Yad2Adapter {
    fn source(&self) -> Source {
        Source::Yad2
    }

    async fn scan(
        &self,
        profile: &SearchProfile,
        cursor: Option<&CursorPosition>,
    ) -> Result<ScanBatch, ScanError> {
        let url = Self::search_url(profile);
        polite_delay().await;

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScanError::network(Source::Yad2, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScanError::Network {
                source: Source::Yad2,
                message: format!("HTTP {status} from {url}"),
            });
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ScanError::network(Source::Yad2, e))?;

        if looks_like_challenge(&body) {
            return Err(ScanError::ProtectionChallenge { url });
        }

        let (mut listings, parse_skips) = self.parse_feed(&body);
        if listings.is_empty() && parse_skips == 0 {
            // No recognizable cards at all — markup changed under us.
            return Err(ScanError::parse(
                Source::Yad2,
                format!("no listing containers found at {url}"),
            ));
        }

        // Feed is newest-first: truncate at the cursor id when we find it.
        // A cursor that fell off the feed yields the whole page; the dedup
        // index downstream makes the replay a no-op.
        if let Some(CursorPosition::NativeId(last_seen)) = cursor {
            if let Some(pos) = listings.iter().position(|l| &l.native_id == last_seen) {
                listings.truncate(pos);
            }
        }

        let next_cursor = listings
            .first()
            .map(|l| CursorPosition::NativeId(l.native_id.clone()));

        info!(
            url = url.as_str(),
            fetched = listings.len(),
            parse_skips,
            "Classifieds feed scanned"
        );
        Ok(ScanBatch {
            listings,
            parse_skips,
            next_cursor,
        })
    }

    fn map_listing(&self, raw: &RawListing) -> Result<Listing, ScanError> {
        Ok(Listing {
            source: raw.source,
            native_id: raw.native_id.clone(),
            url: raw.url.clone(),
            title: required_field(raw, "title")?.to_string(),
            description: raw.fields.get("description").cloned().unwrap_or_default(),
            price_text: raw.fields.get("price").cloned().unwrap_or_default(),
            rooms_text: raw.fields.get("rooms").cloned().unwrap_or_default(),
            location_text: raw.fields.get("location").cloned().unwrap_or_default(),
            image_url: raw.fields.get("image_url").cloned(),
            posted_at: raw.posted_at,
        })
    }
}

/// Parse one listing card. Returns None when essential fields are
/// missing; the caller counts the skip.
fn parse_card(element: &ElementRef) -> Option<RawListing> {
    let native_id = element
        .value()
        .attr("data-item-id")
        .map(str::to_string)
        .or_else(|| id_from_link(element))?;

    let title = select_text(element, &[r#"[data-testid="title"]"#, ".title", "h2", "h3"])?;
    let price = select_text(element, &[r#"[data-testid="price"]"#, ".price"]);
    let rooms = select_text(
        element,
        &[
            r#"[data-testid="rooms"]"#,
            ".rooms",
            r#"span[title*="חדרים"]"#,
        ],
    );
    let location = select_text(
        element,
        &[r#"[data-testid="subtitle"]"#, ".subtitle", ".location"],
    );
    let description = select_text(element, &[".description", "p"]);

    let image_url = Selector::parse("img")
        .ok()
        .and_then(|s| element.select(&s).next())
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string);

    let url = link_href(element)
        .map(|href| absolute_url(&href))
        .unwrap_or_else(|| format!("{BASE_URL}/item/{native_id}"));

    let mut fields = HashMap::new();
    fields.insert("title".to_string(), title);
    if let Some(price) = price {
        fields.insert("price".to_string(), price);
    }
    if let Some(rooms) = rooms {
        // Rooms sometimes arrive as a labeled blob: "חדרים: 2.5".
        fields.insert("rooms".to_string(), rooms);
    }
    if let Some(location) = location {
        fields.insert("location".to_string(), location);
    }
    if let Some(description) = description {
        fields.insert("description".to_string(), description);
    }
    if let Some(image_url) = image_url {
        fields.insert("image_url".to_string(), image_url);
    }

    Some(RawListing {
        source: Source::Yad2,
        native_id,
        url,
        posted_at: None,
        fields,
    })
}

fn select_text(element: &ElementRef, selectors: &[&str]) -> Option<String> {
    for raw_selector in selectors {
        let Ok(selector) = Selector::parse(raw_selector) else {
            debug!(selector = raw_selector, "Bad selector skipped");
            continue;
        };
        if let Some(found) = element.select(&selector).next() {
            let text: String = found.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn link_href(element: &ElementRef) -> Option<String> {
    let selector = Selector::parse("a[href]").ok()?;
    element
        .select(&selector)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

/// Pull the item token out of a detail link, e.g. `/item/abc123`.
fn id_from_link(element: &ElementRef) -> Option<String> {
    let href = link_href(element)?;
    let token = href
        .split('/')
        .filter(|part| !part.is_empty())
        .next_back()?
        .split('?')
        .next()?;
    if token.is_empty() {
        warn!(href = href.as_str(), "Listing link without an item token");
        return None;
    }
    Some(token.to_string())
}

fn absolute_url(href: &str) -> String {
    url::Url::parse(BASE_URL)
        .and_then(|base| base.join(href))
        .map(|joined| joined.to_string())
        .unwrap_or_else(|_| format!("{BASE_URL}{href}"))
}

fn city_code(city: &str) -> Option<&'static str> {
    match city.trim() {
        "תל אביב" | "תל אביב - יפו" | "Tel Aviv" => Some("5000"),
        "ירושלים" | "Jerusalem" => Some("3000"),
        "חיפה" | "Haifa" => Some("4000"),
        "באר שבע" | "Beer Sheva" => Some("8600"),
        "פתח תקווה" | "Petah Tikva" => Some("7900"),
        "רמת גן" | "Ramat Gan" => Some("8300"),
        _ => None,
    }
}

fn property_group(property_type: PropertyType) -> Option<&'static str> {
    match property_type {
        PropertyType::Apartment => Some("1"),
        PropertyType::Studio => Some("4"),
        PropertyType::Penthouse => Some("6"),
        PropertyType::Duplex => Some("7"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nestwatch_common::{
        LocationCriteria, NotificationChannels, PriceRange, RoomRange, ScanTargets,
    };
    use uuid::Uuid;

    fn profile() -> SearchProfile {
        SearchProfile {
            id: Uuid::new_v4(),
            name: "test".to_string(),
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
            property_types: vec![PropertyType::Apartment],
            targets: ScanTargets::default(),
            channels: NotificationChannels::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn search_url_built_from_criteria() {
        let url = Yad2Adapter::search_url(&profile());
        assert!(url.starts_with(SEARCH_BASE));
        assert!(url.contains("priceMin=4000"));
        assert!(url.contains("priceMax=7000"));
        assert!(url.contains("rooms=2-3"));
        assert!(url.contains("city=5000"));
        assert!(url.contains("propertyGroup=1"));
    }

    #[test]
    fn prebuilt_search_url_wins() {
        let mut p = profile();
        p.targets.search_url = Some("https://www.yad2.co.il/realestate/rent?custom=1".to_string());
        assert_eq!(
            Yad2Adapter::search_url(&p),
            "https://www.yad2.co.il/realestate/rent?custom=1"
        );
    }

    #[test]
    fn open_ended_room_range_renders_half_bounded() {
        let mut p = profile();
        p.rooms = RoomRange {
            min: Some(2.0),
            max: None,
        };
        assert!(Yad2Adapter::search_url(&p).contains("rooms=2-"));
    }

    #[test]
    fn feed_cards_parsed_with_fallback_selectors() {
        let html = r#"
            <html><body>
              <div class="feeditem" data-item-id="abc123">
                <h2>דירת 2.5 חדרים בפלורנטין</h2>
                <span class="price">6,500 ₪</span>
                <span class="rooms">2.5 חדרים</span>
                <span class="subtitle">תל אביב, פלורנטין</span>
                <a href="/item/abc123">פרטים</a>
              </div>
              <div class="feeditem">
                <span class="price">5,000 ₪</span>
              </div>
            </body></html>
        "#;
        let adapter = Yad2Adapter::new().unwrap();
        let (listings, skips) = adapter.parse_feed(html);
        assert_eq!(listings.len(), 1);
        assert_eq!(skips, 1); // second card has no id or title
        let raw = &listings[0];
        assert_eq!(raw.native_id, "abc123");
        assert_eq!(raw.fields.get("price").unwrap(), "6,500 ₪");
        assert_eq!(raw.url, "https://www.yad2.co.il/item/abc123");
    }

    #[test]
    fn map_listing_requires_title() {
        let adapter = Yad2Adapter::new().unwrap();
        let raw = RawListing {
            source: Source::Yad2,
            native_id: "x".to_string(),
            url: "https://www.yad2.co.il/item/x".to_string(),
            posted_at: None,
            fields: HashMap::new(),
        };
        assert!(adapter.map_listing(&raw).is_err());
    }
}
