//! Street-level imagery crawler.
//!
//! Sample points are pushed through a fixed pipeline: WGS84 coordinates are
//! converted to the provider's Mercator space ([`coordinate`]), resolved to a
//! panorama and its capture metadata ([`panorama`]), and finally turned into
//! image files on disk ([`acquire`]). [`job`] drives a whole CSV table through
//! that pipeline with checkpointing so an interrupted crawl can be resumed.

pub mod acquire;
pub mod config;
pub mod coordinate;
pub mod http;
pub mod job;
pub mod panorama;
pub mod progress;

#[cfg(test)]
mod tests;
