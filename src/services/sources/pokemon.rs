//! pokemontcg.io sets adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{CatalogSource, non_empty, parse_payload};
use crate::error::Result;
use crate::models::{CatalogSet, Source, parse_release_date};
use crate::utils::http::get_text;

const PAGE_SIZE: usize = 250;
const MAX_PAGES: usize = 40;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetsPage {
    data: Vec<PokemonSet>,
    #[serde(default)]
    total_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PokemonSet {
    id: String,
    name: String,
    #[serde(default)]
    series: Option<String>,
    #[serde(default)]
    printed_total: Option<u32>,
    #[serde(default)]
    total: Option<u32>,
    #[serde(default)]
    ptcgo_code: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    images: Option<SetImages>,
}

#[derive(Debug, Deserialize)]
struct SetImages {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    logo: Option<String>,
}

/// Adapter for `https://api.pokemontcg.io/v2/sets`.
pub struct PokemonTcgSource {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl PokemonTcgSource {
    pub fn new(client: Client, endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        }
    }

    fn page_url(&self, page: usize) -> Result<String> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("pageSize", &PAGE_SIZE.to_string());
        Ok(url.to_string())
    }
}

fn normalize(sets: Vec<PokemonSet>) -> Vec<CatalogSet> {
    sets.into_iter()
        .map(|set| {
            let mut record = CatalogSet::new(Source::Pokemon, set.id, set.name);
            record.series = non_empty(set.series);
            record.code = non_empty(set.ptcgo_code);
            record.release_date = set.release_date.as_deref().and_then(parse_release_date);
            record.total_cards = set.total;
            record.printed_total = set.printed_total;
            if let Some(images) = set.images {
                record.symbol_url = non_empty(images.symbol);
                record.logo_url = non_empty(images.logo);
            }
            record
        })
        .collect()
}

#[async_trait]
impl CatalogSource for PokemonTcgSource {
    fn source(&self) -> Source {
        Source::Pokemon
    }

    async fn fetch(&self) -> Result<Vec<CatalogSet>> {
        let mut sets = Vec::new();
        let mut headers = Vec::new();
        if let Some(key) = &self.api_key {
            headers.push(("X-Api-Key", key.as_str()));
        }

        for page in 1..=MAX_PAGES {
            let url = self.page_url(page)?;
            let body = get_text(&self.client, &url, &headers).await?;
            let parsed: SetsPage = parse_payload(&url, &body)?;
            let received = parsed.data.len();
            sets.extend(normalize(parsed.data));

            let total = parsed.total_count.unwrap_or(sets.len());
            log::debug!("pokemon: page {} -> {}/{} sets", page, sets.len(), total);
            if received < PAGE_SIZE || sets.len() >= total {
                break;
            }
        }
        Ok(sets)
    }
}
