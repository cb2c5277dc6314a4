//! Normalized catalog set record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

/// A card set as emitted by every source adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogSet {
    pub source: Source,

    /// Upstream identifier, unique within the source
    pub set_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,

    /// Short printed set code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cards: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printed_total: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,

    pub synced_at: DateTime<Utc>,
}

impl CatalogSet {
    /// Minimal record; adapters fill the optional fields.
    pub fn new(source: Source, set_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source,
            set_id: set_id.into(),
            name: name.into(),
            series: None,
            code: None,
            release_date: None,
            total_cards: None,
            printed_total: None,
            symbol_url: None,
            logo_url: None,
            synced_at: Utc::now(),
        }
    }

    /// Upsert key, stable across syncs.
    pub fn natural_key(&self) -> String {
        format!("{}:{}", self.source, self.set_id.trim())
    }
}

/// Parse the date formats the upstream catalogs use.
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            // Some feeds send full timestamps
            raw.get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_key() {
        let set = CatalogSet::new(Source::Mtg, " neo ", "Kamigawa: Neon Dynasty");
        assert_eq!(set.natural_key(), "mtg:neo");
    }

    #[test]
    fn test_parse_release_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 3, 31);
        assert_eq!(parse_release_date("2023/03/31"), expected);
        assert_eq!(parse_release_date("2023-03-31"), expected);
        assert_eq!(parse_release_date("03/31/2023"), expected);
        assert_eq!(parse_release_date("2023-03-31T00:00:00Z"), expected);
        assert_eq!(parse_release_date(""), None);
        assert_eq!(parse_release_date("soon"), None);
    }
}
