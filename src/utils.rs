/// Utility functions
use chrono::NaiveDate;
use serde_json::Value;

/// One lunar distance, in kilometres
pub const LUNAR_DISTANCE_KM: f64 = 384_400.0;

/// Extract number from JSON value
pub fn num(v: &Value) -> Option<f64> {
    if let Some(x) = v.as_f64() {
        return Some(x);
    }
    if let Some(s) = v.as_str() {
        return s.parse::<f64>().ok();
    }
    None
}

/// Pick string value from JSON by trying multiple keys
pub fn s_pick(v: &Value, keys: &[&str]) -> Option<String> {
    for k in keys {
        if let Some(x) = v.get(*k) {
            if let Some(s) = x.as_str() {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
            } else if x.is_number() {
                return Some(x.to_string());
            }
        }
    }
    None
}

/// Convert a miss distance to lunar distances
pub fn km_to_ld(km: f64) -> f64 {
    km / LUNAR_DISTANCE_KM
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Link that reopens the dashboard on a given date
pub fn make_permalink(base_url: &str, date: NaiveDate) -> String {
    format!("{}/?date={}", base_url.trim_end_matches('/'), date.format("%Y-%m-%d"))
}

pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_from_float() {
        let json = serde_json::json!(42.5);
        assert_eq!(num(&json), Some(42.5));
    }

    #[test]
    fn test_num_from_string() {
        let json = serde_json::json!("42.5");
        assert_eq!(num(&json), Some(42.5));
    }

    #[test]
    fn test_num_from_invalid() {
        let json = serde_json::json!("invalid");
        assert_eq!(num(&json), None);
    }

    #[test]
    fn test_s_pick_finds_second() {
        let json = serde_json::json!({"name": "", "designation": "2024 AB"});
        assert_eq!(
            s_pick(&json, &["name", "designation"]),
            Some("2024 AB".to_string())
        );
    }

    #[test]
    fn test_s_pick_not_found() {
        let json = serde_json::json!({"other": "value"});
        assert_eq!(s_pick(&json, &["name", "title"]), None);
    }

    #[test]
    fn test_km_to_ld() {
        assert!((km_to_ld(384_400.0) - 1.0).abs() < f64::EPSILON);
        assert!((km_to_ld(768_800.0) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_truncate_short_text_unmodified() {
        let text = "a".repeat(220);
        assert_eq!(truncate_chars(&text, 220), text);
        assert_eq!(truncate_chars("", 220), "");
    }

    #[test]
    fn test_truncate_long_text_gets_ellipsis() {
        let text = "b".repeat(221);
        let cut = truncate_chars(&text, 220);
        assert_eq!(cut.chars().count(), 221);
        assert!(cut.ends_with('…'));
        assert!(cut.starts_with(&"b".repeat(220)));
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let text = "é".repeat(230);
        let cut = truncate_chars(&text, 220);
        assert_eq!(cut.chars().count(), 221);
    }

    #[test]
    fn test_permalink_encodes_date() {
        let date: NaiveDate = "2024-01-01".parse().unwrap();
        assert_eq!(
            make_permalink("https://apod.example/", date),
            "https://apod.example/?date=2024-01-01"
        );
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("<a & 'b'>"), "&lt;a &amp; &apos;b&apos;&gt;");
    }
}
