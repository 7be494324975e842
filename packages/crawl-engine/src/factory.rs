//! Registry mapping URL classes to extractor builders.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::{CrawlContext, DefaultCrawlContext};
use crate::error::DecodeError;
use crate::traits::extractor::Extractor;
use crate::traits::storage::Storage;
use crate::traits::syncer::CrawlSyncer;
use crate::types::envelope::{DeliveryPayload, MessageId};
use crate::types::url::{CrawlUrl, UrlClass, UrlPolicy};

/// Builds an extractor around a bound context.
pub type ExtractorBuilder =
    Arc<dyn Fn(Box<dyn CrawlContext>) -> Box<dyn Extractor> + Send + Sync>;

/// Decodes deliveries and binds them to the extractor for their class.
pub struct ExtractorFactory {
    builders: HashMap<UrlClass, ExtractorBuilder>,
    syncer: Arc<dyn CrawlSyncer>,
    storage: Arc<dyn Storage>,
    policy: Arc<UrlPolicy>,
}

impl ExtractorFactory {
    pub fn new(syncer: Arc<dyn CrawlSyncer>, storage: Arc<dyn Storage>, policy: UrlPolicy) -> Self {
        Self {
            builders: HashMap::new(),
            syncer,
            storage,
            policy: Arc::new(policy),
        }
    }

    /// Register the builder for `class`, replacing any previous one.
    pub fn register<F>(&mut self, class: UrlClass, builder: F)
    where
        F: Fn(Box<dyn CrawlContext>) -> Box<dyn Extractor> + Send + Sync + 'static,
    {
        self.builders.insert(class, Arc::new(builder));
    }

    pub fn with_extractor<F>(mut self, class: UrlClass, builder: F) -> Self
    where
        F: Fn(Box<dyn CrawlContext>) -> Box<dyn Extractor> + Send + Sync + 'static,
    {
        self.register(class, builder);
        self
    }

    pub fn is_registered(&self, class: UrlClass) -> bool {
        self.builders.contains_key(&class)
    }

    pub fn policy(&self) -> &UrlPolicy {
        &self.policy
    }

    /// Decode a delivery payload into a validated URL record.
    pub fn decode(&self, payload: &DeliveryPayload) -> Result<CrawlUrl, DecodeError> {
        payload.decode_crawl_url(&self.policy)
    }

    /// Bind `url` to a fresh context and build its extractor.
    /// `None` when no builder is registered for the URL's class.
    pub fn bind(&self, url: CrawlUrl, message_id: MessageId) -> Option<Box<dyn Extractor>> {
        let builder = self.builders.get(&url.class())?;
        let context = DefaultCrawlContext::new(
            url,
            message_id,
            self.syncer.clone(),
            self.storage.clone(),
            self.policy.clone(),
        );
        Some(builder(Box::new(context)))
    }

    /// Decode and bind in one step.
    pub fn new_instance(
        &self,
        message_id: MessageId,
        payload: &DeliveryPayload,
    ) -> Result<Option<Box<dyn Extractor>>, DecodeError> {
        let url = self.decode(payload)?;
        Ok(self.bind(url, message_id))
    }
}
