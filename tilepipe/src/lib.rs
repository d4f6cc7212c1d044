//! TilePipe - raster map tile acquisition and caching.
//!
//! This library fetches rectangular raster map tiles identified by
//! `(zoom, x, y)`, serving each request from the fastest available source
//! and backfilling the faster tiers, while keeping memory and disk usage
//! bounded.
//!
//! # Architecture
//!
//! A [`pipeline::CachePipeline`] wires together the ordered source chain:
//! an in-memory cache of decoded tiles, an on-disk cache with watermark
//! trimming, any number of read-only SQLite tile archives, and an HTTP
//! tile source. Requests that miss the memory tier are deduplicated into
//! a LIFO-biased queue and resolved by a fixed pool of worker threads;
//! consumers are notified through the [`pipeline::TileObserver`] callback
//! contract. [`bulk::CacheManager`] drives the same chain for whole-area
//! download and cleanup.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilepipe::config::PipelineConfig;
//! use tilepipe::pipeline::CachePipeline;
//! use tilepipe::provider::{ProviderDescriptor, ReqwestClient};
//!
//! let config = PipelineConfig::new("/var/cache/tiles".into());
//! let descriptor = ProviderDescriptor::xyz(
//!     "osm",
//!     "https://tile.openstreetmap.org/{zoom}/{x}/{y}.png",
//! );
//! let http = Arc::new(ReqwestClient::new(&config.network).unwrap());
//! let pipeline = CachePipeline::new(config, descriptor, http, &[]).unwrap();
//! ```

pub mod bulk;
pub mod cache;
pub mod config;
pub mod coord;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod source;
pub mod tile;

pub use coord::{BoundingBox, TileKey};
pub use pipeline::{CachePipeline, LoadError, TileObserver};
