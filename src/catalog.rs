//! Cache-aside ad catalog
//!
//! The full ad list is cached as one JSON payload in the counter store. The
//! cache is advisory: read errors and malformed payloads fall through to the
//! event store, and failed cache writes are only logged.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::counters::keys::ADS_CACHE_KEY;
use crate::counters::CounterStore;
use crate::models::Ad;
use crate::storage::{EventStore, StorageError};

pub const DEFAULT_ADS_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to load ads: {0}")]
    Store(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingMetadata {
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
pub struct AdListing {
    pub ads: Vec<Ad>,
    pub metadata: ListingMetadata,
}

pub struct AdCatalog {
    store: Arc<dyn EventStore>,
    cache: Arc<dyn CounterStore>,
    ttl: Duration,
}

impl AdCatalog {
    pub fn new(store: Arc<dyn EventStore>, cache: Arc<dyn CounterStore>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// Serve the ad list from cache, falling back to the store on a miss
    pub async fn list_ads(&self) -> Result<AdListing, CatalogError> {
        if let Some(ads) = self.cached_ads().await {
            return Ok(AdListing {
                ads,
                metadata: ListingMetadata { cache_hit: true },
            });
        }

        let ads = self.load_and_cache().await?;
        Ok(AdListing {
            ads,
            metadata: ListingMetadata { cache_hit: false },
        })
    }

    /// Reload from the store and overwrite the cached payload
    pub async fn refresh(&self) -> Result<Vec<Ad>, CatalogError> {
        self.load_and_cache().await
    }

    async fn cached_ads(&self) -> Option<Vec<Ad>> {
        let payload = match self.cache.get_string(ADS_CACHE_KEY).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "Ad cache read failed, loading from store");
                return None;
            }
        };

        match serde_json::from_str::<Vec<Ad>>(&payload) {
            Ok(ads) => {
                debug!(count = ads.len(), "Serving ads from cache");
                Some(ads)
            }
            Err(err) => {
                warn!(error = %err, "Discarding malformed ad cache payload");
                None
            }
        }
    }

    async fn load_and_cache(&self) -> Result<Vec<Ad>, CatalogError> {
        let ads = self.store.list_ads().await?;

        match serde_json::to_string(&ads) {
            Ok(payload) => {
                if let Err(err) = self.cache.set_string(ADS_CACHE_KEY, &payload, self.ttl).await {
                    warn!(error = %err, "Failed to repopulate ad cache");
                }
            }
            Err(err) => warn!(error = %err, "Failed to serialize ads for cache"),
        }

        Ok(ads)
    }
}
