//! Text normalization shared by the matching engine and the dedup
//! fingerprint. Listings mix Hebrew and English, decorate titles with
//! emoji, and write prices and room counts a dozen different ways.

use std::sync::OnceLock;

use regex::Regex;

fn rooms_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").unwrap())
}

/// Lowercase, strip decoration and emoji, collapse whitespace. Keeps word
/// characters and the Hebrew block so term matching works on mixed text.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars() {
        let keep = ch.is_alphanumeric() || ('\u{0590}'..='\u{05FF}').contains(&ch);
        if keep {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim().to_string()
}

/// Extract a price in whole ILS from free text. Handles the shekel sign,
/// "ILS"/"NIS" suffixes, and thousands separators.
pub fn parse_price(text: &str) -> Option<i64> {
    let cleaned = text
        .replace('₪', "")
        .replace("ILS", "")
        .replace("NIS", "")
        .replace("ש\"ח", "");
    let digits: String = cleaned
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Extract a room count from free text. "2.5", "2½", "2 חדרים", "3 rooms"
/// all normalize to the same number.
pub fn parse_rooms(text: &str) -> Option<f32> {
    let unified = text.replace('½', ".5").replace("1/2", ".5");
    let caps = rooms_re().captures(&unified)?;
    caps.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_emoji_and_punctuation() {
        assert_eq!(
            normalize_text("🔥 דירה מדהימה!!! ברוטשילד 🔥"),
            "דירה מדהימה ברוטשילד"
        );
    }

    #[test]
    fn normalize_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_text("  Tel   AVIV \n apartment "), "tel aviv apartment");
    }

    #[test]
    fn parse_price_handles_shekel_and_separators() {
        assert_eq!(parse_price("6,500 ₪"), Some(6500));
        assert_eq!(parse_price("₪ 4.200"), Some(4200));
        assert_eq!(parse_price("5500 NIS"), Some(5500));
        assert_eq!(parse_price("7000"), Some(7000));
    }

    #[test]
    fn parse_price_rejects_priceless_text() {
        assert_eq!(parse_price("צור קשר"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn parse_rooms_unifies_notation() {
        assert_eq!(parse_rooms("2.5"), Some(2.5));
        assert_eq!(parse_rooms("2½ חדרים"), Some(2.5));
        assert_eq!(parse_rooms("3 rooms"), Some(3.0));
        assert_eq!(parse_rooms("דירת 4 חדרים"), Some(4.0));
    }

    #[test]
    fn parse_rooms_rejects_roomless_text() {
        assert_eq!(parse_rooms("studio no number"), None);
        assert_eq!(parse_rooms(""), None);
    }
}
