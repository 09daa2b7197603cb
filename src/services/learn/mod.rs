//! Caches in front of the documentation wiki: rendered pages in memory and
//! images on disk, both fetched through the proxy chain.

pub mod images;
pub mod pages;
pub mod sweeper;

pub use images::{ImageProxyCache, SweepError, cache_key};
pub use pages::{LearnPage, LearnPageCache, page_key};
pub use sweeper::CacheSweeper;
