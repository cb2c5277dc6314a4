//! Scryfall (Magic: The Gathering) sets adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{CatalogSource, non_empty, parse_payload};
use crate::error::Result;
use crate::models::{CatalogSet, Source, parse_release_date};
use crate::utils::http::get_text;

const MAX_PAGES: usize = 20;

#[derive(Debug, Deserialize)]
struct SetList {
    data: Vec<ScryfallSet>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScryfallSet {
    code: String,
    name: String,
    #[serde(default)]
    set_type: Option<String>,
    #[serde(default)]
    released_at: Option<String>,
    #[serde(default)]
    card_count: Option<u32>,
    #[serde(default)]
    printed_size: Option<u32>,
    #[serde(default)]
    icon_svg_uri: Option<String>,
}

/// Adapter for `https://api.scryfall.com/sets`.
pub struct ScryfallSource {
    client: Client,
    endpoint: String,
}

impl ScryfallSource {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

fn normalize(sets: Vec<ScryfallSet>) -> Vec<CatalogSet> {
    sets.into_iter()
        .map(|set| {
            let code = set.code.to_lowercase();
            let mut record = CatalogSet::new(Source::Mtg, code.clone(), set.name);
            record.code = Some(code.to_uppercase());
            record.series = non_empty(set.set_type);
            record.release_date = set.released_at.as_deref().and_then(parse_release_date);
            record.total_cards = set.card_count;
            record.printed_total = set.printed_size;
            record.symbol_url = non_empty(set.icon_svg_uri);
            record
        })
        .collect()
}

#[async_trait]
impl CatalogSource for ScryfallSource {
    fn source(&self) -> Source {
        Source::Mtg
    }

    async fn fetch(&self) -> Result<Vec<CatalogSet>> {
        let mut sets = Vec::new();
        let mut next = Some(self.endpoint.clone());
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            let body = get_text(&self.client, &url, &[("Accept", "application/json")]).await?;
            let parsed: SetList = parse_payload(&url, &body)?;
            sets.extend(normalize(parsed.data));

            if parsed.has_more && pages < MAX_PAGES {
                next = parsed.next_page;
            }
        }
        Ok(sets)
    }
}
