//! YGOPRODeck (Yu-Gi-Oh!) card sets adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{CatalogSource, non_empty, parse_payload};
use crate::error::Result;
use crate::models::{CatalogSet, Source, parse_release_date};
use crate::utils::http::get_text;

#[derive(Debug, Deserialize)]
struct YgoSet {
    set_name: String,
    #[serde(default)]
    set_code: Option<String>,
    #[serde(default)]
    num_of_cards: Option<u32>,
    #[serde(default)]
    tcg_date: Option<String>,
    #[serde(default)]
    set_image: Option<String>,
}

/// Adapter for `https://db.ygoprodeck.com/api/v7/cardsets.php`.
pub struct YgoProDeckSource {
    client: Client,
    endpoint: String,
}

impl YgoProDeckSource {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

/// Sets without a code have no stable key and are skipped.
fn normalize(sets: Vec<YgoSet>) -> Vec<CatalogSet> {
    sets.into_iter()
        .filter_map(|set| {
            let code = non_empty(set.set_code)?;
            let mut record = CatalogSet::new(Source::Yugioh, code.clone(), set.set_name.trim());
            record.code = Some(code);
            record.release_date = set.tcg_date.as_deref().and_then(parse_release_date);
            record.total_cards = set.num_of_cards;
            record.logo_url = non_empty(set.set_image);
            Some(record)
        })
        .collect()
}

#[async_trait]
impl CatalogSource for YgoProDeckSource {
    fn source(&self) -> Source {
        Source::Yugioh
    }

    async fn fetch(&self) -> Result<Vec<CatalogSet>> {
        let body = get_text(&self.client, &self.endpoint, &[]).await?;
        let parsed: Vec<YgoSet> = parse_payload(&self.endpoint, &body)?;
        Ok(normalize(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_skips_sets_without_code() {
        let payload = r#"[
            {"set_name": "Legend of Blue Eyes White Dragon", "set_code": "LOB",
             "num_of_cards": 126, "tcg_date": "2002-03-08",
             "set_image": "https://images.ygoprodeck.com/images/sets/LOB.jpg"},
            {"set_name": "Mystery Promo", "set_code": "", "num_of_cards": 1},
            {"set_name": "Untitled", "num_of_cards": 3}
        ]"#;
        let parsed: Vec<YgoSet> = serde_json::from_str(payload).unwrap();
        let sets = normalize(parsed);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].natural_key(), "yugioh:LOB");
        assert_eq!(sets[0].total_cards, Some(126));
        assert_eq!(sets[0].release_date.unwrap().to_string(), "2002-03-08");
    }
}
