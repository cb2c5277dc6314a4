// src/lib.rs

//! restock: catalog sync and stock monitor engine

pub mod cache;
pub mod error;
pub mod handler;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
