//! Tile sources below the cache tiers.
//!
//! [`NetworkSource`] fetches tiles over HTTP from the provider's servers;
//! [`ArchiveSource`] reads pre-packaged offline tile containers. Both are
//! side-effect-free lookups: populating faster tiers is the provider
//! chain's job.

mod archive;
mod network;

pub use archive::{ArchiveError, ArchiveSource};
pub use network::NetworkSource;
