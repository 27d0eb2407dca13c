//! Yearly per-country metric aggregation and choropleth coloring for the
//! skin-cancer / UV-index map of Europe.

pub mod types;
pub mod error;
pub mod config;
pub mod data;
pub mod color;
pub mod processing;
pub mod spatial;
pub mod meteomatics;
pub mod render;
pub mod server;

#[cfg(test)]
mod fixtures;
