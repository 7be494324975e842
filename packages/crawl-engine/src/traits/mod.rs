//! Seams between the engine and its backends.
//!
//! Brokers implement [`queue::Queue`] and [`syncer::CrawlSyncer`],
//! applications implement [`extractor::Extractor`] and may bring their own
//! [`storage::Storage`].

pub mod extractor;
pub mod queue;
pub mod storage;
pub mod syncer;
