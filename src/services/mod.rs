//! Service layer.
//!
//! - Stock-status classification (`StockClassifier`)
//! - Page transport for monitor checks (`PageFetcher`)
//! - Catalog source adapters (`CatalogSource`)

pub mod classifier;
pub mod fetcher;
pub mod sources;

pub use classifier::{CartButton, Classification, PageSignals, StockClassifier};
pub use fetcher::{FetchedPage, HttpPageFetcher, PageFetcher};
pub use sources::{CatalogSource, build_sources};
