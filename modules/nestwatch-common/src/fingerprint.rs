//! Content fingerprints for cross-source duplicate detection.
//!
//! Two posts of the same apartment — re-posted under a fresh native id or
//! mirrored from the classifieds feed into a group — hash to the same
//! value because the hash is built from normalized content, not identity.

use sha2::{Digest, Sha256};

use crate::text::normalize_text;

/// Hex-encoded SHA-256 of arbitrary text.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable fingerprint over the fields that identify a physical listing:
/// price, room count, and normalized location/title/description prefixes.
pub fn listing_fingerprint(
    price: Option<i64>,
    rooms: Option<f32>,
    location: &str,
    title: &str,
    description: &str,
) -> String {
    let rooms_key = rooms.map(|r| format!("{r:.1}")).unwrap_or_else(|| "0".to_string());
    let parts = [
        price.unwrap_or(0).to_string(),
        rooms_key,
        truncate(&normalize_text(location), 50),
        truncate(&normalize_text(title), 100),
        truncate(&normalize_text(description), 100),
    ];
    sha256_hex(&parts.join("|"))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_deterministic() {
        let a = listing_fingerprint(Some(6500), Some(2.5), "תל אביב", "דירה בפלורנטין", "משופצת");
        let b = listing_fingerprint(Some(6500), Some(2.5), "תל אביב", "דירה בפלורנטין", "משופצת");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_ignores_decoration() {
        let plain = listing_fingerprint(Some(6500), Some(2.5), "תל אביב", "דירה בפלורנטין", "");
        let decorated =
            listing_fingerprint(Some(6500), Some(2.5), "תל אביב!", "🔥 דירה בפלורנטין 🔥", "");
        assert_eq!(plain, decorated);
    }

    #[test]
    fn fingerprint_changes_with_price() {
        let a = listing_fingerprint(Some(6500), Some(2.5), "תל אביב", "דירה", "");
        let b = listing_fingerprint(Some(6600), Some(2.5), "תל אביב", "דירה", "");
        assert_ne!(a, b);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // Hebrew is multi-byte; a byte-index truncation would panic.
        let long = "א".repeat(200);
        let fp = listing_fingerprint(None, None, &long, &long, &long);
        assert_eq!(fp.len(), 64);
    }
}
