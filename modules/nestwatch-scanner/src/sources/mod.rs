//! Source adapters: one per external platform.
//!
//! An adapter turns a profile's target configuration plus the current
//! cursor into a finite batch of raw listings strictly newer than the
//! cursor. Adapters never write scan state — cursor advancement belongs
//! to the orchestrator so it stays atomic with successful completion.

pub mod facebook;
pub mod yad2;

pub use facebook::FacebookGroupAdapter;
pub use yad2::Yad2Adapter;

use std::time::Duration;

use async_trait::async_trait;

use nestwatch_common::{CursorPosition, Listing, RawListing, ScanError, SearchProfile, Source};

/// One scan's worth of output from an adapter.
pub struct ScanBatch {
    pub listings: Vec<RawListing>,
    /// Malformed items skipped during parsing. One bad item never aborts
    /// the scan; it is counted here instead.
    pub parse_skips: u32,
    /// Where the next scan of this pair should start. `None` when the
    /// scan saw nothing new.
    pub next_cursor: Option<CursorPosition>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch listings newer than `cursor` for this profile's targets.
    async fn scan(
        &self,
        profile: &SearchProfile,
        cursor: Option<&CursorPosition>,
    ) -> Result<ScanBatch, ScanError>;

    /// Map a raw listing's source-native fields into the shared shape
    /// the matching engine consumes.
    fn map_listing(&self, raw: &RawListing) -> Result<Listing, ScanError>;
}

/// Markers that identify a bot-challenge interstitial instead of content.
const CHALLENGE_MARKERS: &[&str] = &[
    "px-captcha",
    "captcha-delivery",
    "validate.perfdrive",
    "are you a robot",
    "shieldsquare",
    "hcaptcha",
];

pub(crate) fn looks_like_challenge(html: &str) -> bool {
    let lowered = html.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Small randomized pause before hitting a source, so scans don't land in
/// lockstep across profiles sharing a platform.
pub(crate) async fn polite_delay() {
    let millis = {
        use rand::Rng;
        rand::rng().random_range(800..2500)
    };
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// Pull a required field out of a raw listing's field map.
pub(crate) fn required_field<'a>(
    raw: &'a RawListing,
    key: &str,
) -> Result<&'a str, ScanError> {
    raw.fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ScanError::parse(raw.source, format!("missing field {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_markers_detected_case_insensitively() {
        assert!(looks_like_challenge(
            "<html><div id=\"PX-Captcha\"></div></html>"
        ));
        assert!(looks_like_challenge(
            "<script src=\"https://validate.perfdrive.com/x.js\"></script>"
        ));
        assert!(!looks_like_challenge("<html><body>דירות להשכרה</body></html>"));
    }
}
