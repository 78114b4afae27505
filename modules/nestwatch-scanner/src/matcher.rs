//! Content matching engine: decides whether a normalized listing
//! satisfies a profile's criteria.
//!
//! Checks run cheapest-first and short-circuit on the first hard-filter
//! failure. Scoring only shapes notification presentation — it can never
//! rescue a listing that failed a hard filter. The whole engine is
//! deterministic for a given (listing, profile) pair.

use nestwatch_common::{
    normalize_text, parse_price, parse_rooms, Listing, MatchConfidence, MatchResult, PropertyType,
    Rejection, SearchProfile,
};

/// Location aliases: listings freely mix Hebrew and transliterated names.
const LOCATION_ALIASES: &[(&str, &[&str])] = &[
    ("תל אביב", &["תל אביב - יפו", "tel aviv", "tlv"]),
    ("ירושלים", &["jerusalem", "jlem"]),
    ("חיפה", &["haifa"]),
    ("רמת גן", &["ramat gan"]),
    ("דיזנגוף", &["dizengoff"]),
    ("רוטשילד", &["rothschild"]),
    ("אלנבי", &["allenby"]),
    ("שינקין", &["shenkin", "sheinkin"]),
    ("פלורנטין", &["florentin"]),
    ("נווה צדק", &["neve tzedek"]),
    ("יפו העתיקה", &["old jaffa", "jaffa"]),
];

/// Keywords that identify a property type in listing text.
const PROPERTY_KEYWORDS: &[(PropertyType, &[&str])] = &[
    (PropertyType::Studio, &["סטודיו", "studio"]),
    (PropertyType::Penthouse, &["פנטהאוז", "penthouse"]),
    (PropertyType::Duplex, &["דופלקס", "duplex"]),
    (PropertyType::Apartment, &["דירה", "דירת", "apartment", "apt"]),
];

/// Desirable features worth bonus points in scoring.
const FEATURE_KEYWORDS: &[(&str, &[&str])] = &[
    ("מרפסת", &["balcony", "terrace", "מרפסות"]),
    ("חניה", &["parking", "חנייה"]),
    ("מעלית", &["elevator", "lift"]),
    ("מיזוג", &["ac", "air conditioning", "מזגן"]),
    ("משופץ", &["renovated", "refurbished", "משופצת"]),
    ("מרוהט", &["furnished", "מרוהטת"]),
];

pub struct MatchEngine;

impl MatchEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one listing against one profile.
    pub fn evaluate(
        &self,
        listing: &Listing,
        profile: &SearchProfile,
    ) -> Result<MatchResult, Rejection> {
        let mut reasons = Vec::new();

        // 1. Numeric filters — cheapest checks, run before any text work.
        let price = parse_price(&listing.price_text)
            .ok_or_else(|| Rejection::UnparsableField("price".to_string()))?;
        if !profile.price.contains(price) {
            return Err(Rejection::PriceOutOfRange);
        }
        reasons.push(format!(
            "price {} within {:?}-{:?}",
            price, profile.price.min, profile.price.max
        ));

        let rooms = parse_rooms(&listing.rooms_text)
            .ok_or_else(|| Rejection::UnparsableField("rooms".to_string()))?;
        if !profile.rooms.contains(rooms) {
            return Err(Rejection::RoomsOutOfRange);
        }
        reasons.push(format!(
            "rooms {} within {:?}-{:?}",
            rooms, profile.rooms.min, profile.rooms.max
        ));

        // 2. Location. City is a hard requirement when configured;
        // sub-location lists require at least one hit when non-empty.
        let haystack = normalize_text(&format!(
            "{} {} {}",
            listing.title, listing.description, listing.location_text
        ));

        let city = profile.location.city.trim();
        let mut location_matches = Vec::new();
        if !city.is_empty() {
            if !contains_location(&haystack, city) {
                return Err(Rejection::LocationMismatch);
            }
            location_matches.push(city.to_string());
        }

        let sub_locations: Vec<&String> = profile
            .location
            .neighborhoods
            .iter()
            .chain(profile.location.streets.iter())
            .collect();
        if !sub_locations.is_empty() {
            let hits: Vec<String> = sub_locations
                .iter()
                .filter(|token| contains_location(&haystack, token.as_str()))
                .map(|token| token.to_string())
                .collect();
            if hits.is_empty() {
                return Err(Rejection::LocationMismatch);
            }
            location_matches.extend(hits);
        }
        reasons.push(format!("location matches: {}", location_matches.join(", ")));

        // 3. Property type.
        let inferred = infer_property_type(&haystack);
        if !profile.property_types.is_empty() && !profile.property_types.contains(&inferred) {
            return Err(Rejection::PropertyTypeMismatch);
        }

        // 4. Scoring — presentation only from here on.
        let mut score = 55.0_f32; // hard filters passed: price 30 + rooms 25
        if !city.is_empty() {
            score += 20.0;
        }
        // First sub-location hit was required above; extras add depth.
        let sub_hits = location_matches.len().saturating_sub(if city.is_empty() { 0 } else { 1 });
        score += 15.0 * sub_hits as f32;

        if !profile.property_types.is_empty() {
            score += 10.0;
            reasons.push(format!("property type: {inferred}"));
        }

        let features: Vec<&str> = FEATURE_KEYWORDS
            .iter()
            .filter(|(canonical, aliases)| {
                haystack.contains(&normalize_text(canonical))
                    || aliases.iter().any(|a| haystack.contains(a))
            })
            .map(|(canonical, _)| *canonical)
            .collect();
        score += 2.0 * features.len() as f32;
        if !features.is_empty() {
            reasons.push(format!("features: {}", features.join(", ")));
        }

        let confidence = confidence_for(score);

        Ok(MatchResult {
            score,
            confidence,
            price,
            rooms,
            location_matches,
            reasons,
        })
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive substring check tolerant of common alias spellings.
fn contains_location(haystack: &str, token: &str) -> bool {
    let needle = normalize_text(token);
    if !needle.is_empty() && haystack.contains(&needle) {
        return true;
    }
    for (canonical, aliases) in LOCATION_ALIASES {
        let group_matches_token = normalize_text(canonical) == needle
            || aliases.iter().any(|a| normalize_text(a) == needle);
        if group_matches_token {
            if haystack.contains(&normalize_text(canonical)) {
                return true;
            }
            if aliases.iter().any(|a| haystack.contains(&normalize_text(a))) {
                return true;
            }
        }
    }
    false
}

/// Infer the property type from listing text. Classifieds default to
/// plain apartments when nothing more specific is mentioned.
fn infer_property_type(haystack: &str) -> PropertyType {
    for (property_type, keywords) in PROPERTY_KEYWORDS {
        if keywords.iter().any(|k| haystack.contains(&normalize_text(k))) {
            return *property_type;
        }
    }
    PropertyType::Apartment
}

/// Tier thresholds: a profile whose every configured criterion is
/// satisfied (hard filters + city) clears 75; profiles without location
/// criteria top out lower unless bonus signals accumulate.
fn confidence_for(score: f32) -> MatchConfidence {
    if score >= 75.0 {
        MatchConfidence::High
    } else if score >= 60.0 {
        MatchConfidence::Medium
    } else {
        MatchConfidence::Low
    }
}
