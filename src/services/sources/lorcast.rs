//! Lorcast (Disney Lorcana) sets adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{CatalogSource, non_empty, parse_payload};
use crate::error::Result;
use crate::models::{CatalogSet, Source, parse_release_date};
use crate::utils::http::get_text;

#[derive(Debug, Deserialize)]
struct SetResults {
    results: Vec<LorcastSet>,
}

#[derive(Debug, Deserialize)]
struct LorcastSet {
    id: String,
    name: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    released_at: Option<String>,
    #[serde(default)]
    prereleased_at: Option<String>,
}

/// Adapter for `https://api.lorcast.com/v0/sets`.
pub struct LorcastSource {
    client: Client,
    endpoint: String,
}

impl LorcastSource {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

fn normalize(sets: Vec<LorcastSet>) -> Vec<CatalogSet> {
    sets.into_iter()
        .map(|set| {
            let mut record = CatalogSet::new(Source::Lorcana, set.id, set.name);
            record.code = non_empty(set.code);
            record.release_date = set
                .released_at
                .or(set.prereleased_at)
                .as_deref()
                .and_then(parse_release_date);
            record
        })
        .collect()
}

#[async_trait]
impl CatalogSource for LorcastSource {
    fn source(&self) -> Source {
        Source::Lorcana
    }

    async fn fetch(&self) -> Result<Vec<CatalogSet>> {
        let body = get_text(&self.client, &self.endpoint, &[]).await?;
        let parsed: SetResults = parse_payload(&self.endpoint, &body)?;
        Ok(normalize(parsed.results))
    }
}
