//! Page extraction capability.

use async_trait::async_trait;

/// Fetches and parses one URL through the context it was bound to.
///
/// Implementations call `set_running` on entry and then exactly one of
/// `complete` or `fail`. Discovered links go through `enqueue`.
#[async_trait]
pub trait Extractor: Send {
    async fn crawl(&mut self);
}
