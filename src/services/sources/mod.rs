//! Catalog source adapters.
//!
//! One adapter per upstream API. Each deserializes its own payload shape
//! into typed structs and normalizes it into [`CatalogSet`] records keyed by
//! a stable natural id.

mod lorcast;
mod pokemon;
mod scryfall;
mod ygoprodeck;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};
use crate::models::{CatalogSet, Config, Source};
use crate::utils::http::create_async_client;

pub use lorcast::LorcastSource;
pub use pokemon::PokemonTcgSource;
pub use scryfall::ScryfallSource;
pub use ygoprodeck::YgoProDeckSource;

/// Capability every catalog adapter provides.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn source(&self) -> Source;

    /// Pull the full set list and normalize it.
    async fn fetch(&self) -> Result<Vec<CatalogSet>>;
}

/// Build the adapters for every known source from configuration.
pub fn build_sources(config: &Config) -> Result<Vec<Arc<dyn CatalogSource>>> {
    let client = create_async_client(&config.http)?;
    let endpoints = &config.sync.endpoints;

    let pokemon: Arc<dyn CatalogSource> = Arc::new(PokemonTcgSource::new(
        client.clone(),
        &endpoints.pokemon,
        config.sync.pokemon_api_key.clone(),
    ));
    let mtg: Arc<dyn CatalogSource> = Arc::new(ScryfallSource::new(client.clone(), &endpoints.mtg));
    let yugioh: Arc<dyn CatalogSource> =
        Arc::new(YgoProDeckSource::new(client.clone(), &endpoints.yugioh));
    let lorcana: Arc<dyn CatalogSource> = Arc::new(LorcastSource::new(client, &endpoints.lorcana));

    Ok(vec![pokemon, mtg, yugioh, lorcana])
}

/// Parse an upstream JSON body, reporting shape mismatches as upstream errors.
fn parse_payload<T: DeserializeOwned>(url: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| AppError::upstream(url, format!("unexpected payload: {e}")))
}

/// Treat blank upstream strings as missing.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
