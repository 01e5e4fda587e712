//! Data models for crawl snapshots and the merged per-URL record.
//!
//! A [`Snapshot`] is one observed fetch of a URL. It is never stored as-is;
//! snapshots are folded into a single [`CanonicalRecord`] per URL.

use serde::{Deserialize, Serialize};

/// One fetch observation of a URL, as delivered by the inbound stream.
///
/// Upstream producers emit Go-style field names (`Url`, `PubDate`, ...),
/// so those are accepted as aliases when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(alias = "Url")]
    pub url: String,
    /// Publication time as claimed by the source at fetch time.
    #[serde(alias = "PubDate")]
    pub pub_date: i64,
    /// Ordering key for merges; meaningful only within one URL.
    #[serde(alias = "FetchTime")]
    pub fetch_time: i64,
    #[serde(alias = "Text", default)]
    pub text: String,
}

/// The merged, persisted state for a URL.
///
/// `pub_date` travels with `first_fetch_time` (the earliest snapshot) and
/// `text` travels with `fetch_time` (the latest snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub url: String,
    pub pub_date: i64,
    pub first_fetch_time: i64,
    pub fetch_time: i64,
    pub text: String,
}

impl CanonicalRecord {
    /// Build the record for the first snapshot ever seen for a URL.
    pub fn from_first(snapshot: &Snapshot) -> Self {
        Self {
            url: snapshot.url.clone(),
            pub_date: snapshot.pub_date,
            first_fetch_time: snapshot.fetch_time,
            fetch_time: snapshot.fetch_time,
            text: snapshot.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_snake_case_and_go_style_fields() {
        let a: Snapshot = serde_json::from_str(
            r#"{"url":"u1","pub_date":100,"fetch_time":200,"text":"v1"}"#,
        )
        .unwrap();
        let b: Snapshot = serde_json::from_str(
            r#"{"Url":"u1","PubDate":100,"FetchTime":200,"Text":"v1"}"#,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_text_defaults_to_empty() {
        let s: Snapshot =
            serde_json::from_str(r#"{"url":"u1","pub_date":1,"fetch_time":2}"#).unwrap();
        assert_eq!(s.text, "");
    }

    #[test]
    fn first_record_uses_fetch_time_for_both_bounds() {
        let s = Snapshot {
            url: "u1".to_string(),
            pub_date: 100,
            fetch_time: 200,
            text: "v1".to_string(),
        };
        let r = CanonicalRecord::from_first(&s);
        assert_eq!(r.first_fetch_time, 200);
        assert_eq!(r.fetch_time, 200);
        assert_eq!(r.pub_date, 100);
        assert_eq!(r.text, "v1");
    }
}
