//! Group adapter for Facebook group feeds.
//!
//! Scans the mobile-basic HTML endpoint with an opaque session cookie
//! owned by external credential storage. The adapter never attempts to
//! log in: a login wall means the session expired and the pair gets
//! suspended upstream until an operator refreshes it.
//!
//! Group posts are free text — price, rooms, and location ride inside
//! the post body — so the field mapping extracts price/room snippets
//! with regexes before the matching engine sees the listing.
//!
//! Cursor semantics: post publish times when the markup exposes them
//! (`publish_time` in the `data-ft` blob). Posts without a readable
//! timestamp pass through; the dedup index suppresses replays.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};

use nestwatch_common::{
    CursorPosition, Listing, RawListing, ScanError, SearchProfile, Source,
};

use super::{looks_like_challenge, polite_delay, required_field, ScanBatch, SourceAdapter};

const BASE_URL: &str = "https://mbasic.facebook.com";

const LOGIN_MARKERS: &[&str] = &["login_form", "name=\"login\"", "log in to facebook"];

fn post_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"top_level_post_id[^0-9]{0,10}(\d+)"#).unwrap())
}

fn publish_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""publish_time":(\d+)"#).unwrap())
}

fn price_snippet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A number with thousands separators or 4-5 plain digits, optionally
    // hugging a currency marker on either side.
    RE.get_or_init(|| {
        Regex::new(r#"(?:₪|ש"ח|שח)\s*(\d{1,3}(?:,\d{3})+|\d{4,5})|(\d{1,3}(?:,\d{3})+|\d{4,5})\s*(?:₪|ש"ח|שח|ils|nis)"#)
            .unwrap()
    })
}

fn rooms_snippet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(\d(?:[.,]\d)?|\d½)\s*(?:חדרים|חד'|rooms?)"#).unwrap()
    })
}

pub struct FacebookGroupAdapter {
    client: reqwest::Client,
    session_cookie: Option<String>,
}

impl FacebookGroupAdapter {
    pub fn new(session_cookie: Option<String>) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(
                "Mozilla/5.0 (Linux; Android 13) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
            )
            .build()
            .map_err(|e| ScanError::network(Source::Facebook, e))?;
        Ok(Self {
            client,
            session_cookie,
        })
    }

    async fn scan_group(
        &self,
        group_id: &str,
        cookie: &str,
    ) -> Result<(Vec<RawListing>, u32), ScanError> {
        let url = format!("{BASE_URL}/groups/{group_id}");
        polite_delay().await;

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::COOKIE, cookie)
            .send()
            .await
            .map_err(|e| ScanError::network(Source::Facebook, e))?;

        let final_url = resp.url().to_string();
        if final_url.contains("/login") {
            return Err(ScanError::AuthExpired {
                source: Source::Facebook,
            });
        }
        if final_url.contains("/checkpoint") {
            return Err(ScanError::ProtectionChallenge { url: final_url });
        }

        let status = resp.status();
        if !status.is_success() {
            return Err(ScanError::Network {
                source: Source::Facebook,
                message: format!("HTTP {status} from {url}"),
            });
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ScanError::network(Source::Facebook, e))?;

        let lowered = body.to_lowercase();
        if LOGIN_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Err(ScanError::AuthExpired {
                source: Source::Facebook,
            });
        }
        if looks_like_challenge(&body) {
            return Err(ScanError::ProtectionChallenge { url });
        }

        Ok(parse_group_feed(&body, group_id))
    }
}

#[async_trait]
impl SourceAdapter for FacebookGroupAdapter {
    fn source(&self) -> Source {
        Source::Facebook
    }

    async fn scan(
        &self,
        profile: &SearchProfile,
        cursor: Option<&CursorPosition>,
    ) -> Result<ScanBatch, ScanError> {
        let cookie = self.session_cookie.as_deref().ok_or(ScanError::AuthExpired {
            source: Source::Facebook,
        })?;

        let mut listings = Vec::new();
        let mut parse_skips = 0u32;
        for group_id in &profile.targets.group_ids {
            let (group_listings, skips) = self.scan_group(group_id, cookie).await?;
            listings.extend(group_listings);
            parse_skips += skips;
        }

        // Keep only posts strictly newer than the cursor. Posts with no
        // readable timestamp stay in; dedup suppresses replays.
        if let Some(CursorPosition::Timestamp(since)) = cursor {
            listings.retain(|l| l.posted_at.is_none_or(|ts| ts > *since));
        }

        let next_cursor = listings
            .iter()
            .filter_map(|l| l.posted_at)
            .max()
            .map(CursorPosition::Timestamp);

        info!(
            groups = profile.targets.group_ids.len(),
            fetched = listings.len(),
            parse_skips,
            "Group feeds scanned"
        );
        Ok(ScanBatch {
            listings,
            parse_skips,
            next_cursor,
        })
    }

    fn map_listing(&self, raw: &RawListing) -> Result<Listing, ScanError> {
        let text = required_field(raw, "text")?;

        let title: String = text.lines().next().unwrap_or(text).chars().take(80).collect();
        let price_text = price_snippet_re()
            .find(text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let rooms_text = rooms_snippet_re()
            .find(text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        Ok(Listing {
            source: raw.source,
            native_id: raw.native_id.clone(),
            url: raw.url.clone(),
            title,
            description: text.to_string(),
            price_text,
            rooms_text,
            // Group posts carry location inline; the matcher scans the
            // description, so no separate location field exists here.
            location_text: String::new(),
            image_url: raw.fields.get("image_url").cloned(),
            posted_at: raw.posted_at,
        })
    }
}

fn parse_group_feed(html: &str, group_id: &str) -> (Vec<RawListing>, u32) {
    let document = Html::parse_document(html);
    let mut listings = Vec::new();
    let mut skips = 0u32;

    let selectors = [r#"div[role="article"]"#, "article", "div[data-ft]"];
    let containers: Vec<ElementRef> = selectors
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
        match parse_post(&element, group_id) {
            Some(raw) => listings.push(raw),
            None => skips += 1,
        }
    }

    if listings.is_empty() && skips == 0 {
        warn!(group_id, "No post containers recognized in group feed");
    }
    (listings, skips)
}

fn parse_post(element: &ElementRef, group_id: &str) -> Option<RawListing> {
    let data_ft = element.value().attr("data-ft").unwrap_or_default();

    let native_id = post_id_re()
        .captures(data_ft)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| permalink_id(element))?;

    let text: String = element.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }

    let posted_at = publish_time_re()
        .captures(data_ft)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    let mut fields = HashMap::new();
    fields.insert("text".to_string(), text);
    if let Some(image) = first_image(element) {
        fields.insert("image_url".to_string(), image);
    }

    Some(RawListing {
        source: Source::Facebook,
        native_id: native_id.clone(),
        url: format!("https://www.facebook.com/groups/{group_id}/posts/{native_id}"),
        posted_at,
        fields,
    })
}

fn permalink_id(element: &ElementRef) -> Option<String> {
    let selector = Selector::parse("a[href]").ok()?;
    for link in element.select(&selector) {
        let href = link.value().attr("href").unwrap_or_default();
        if let Some(rest) = href.split("/permalink/").nth(1) {
            let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !id.is_empty() {
                return Some(id);
            }
        }
        if let Some(rest) = href.split("story_fbid=").nth(1) {
            let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !id.is_empty() {
                return Some(id);
            }
        }
    }
    None
}

fn first_image(element: &ElementRef) -> Option<String> {
    let selector = Selector::parse("img[src]").ok()?;
    element
        .select(&selector)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string)
}
