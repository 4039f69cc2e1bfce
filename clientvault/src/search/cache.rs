use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use clientvault_core::ClientRecord;
use time::OffsetDateTime;

use super::snapshot::SnapshotStore;
use crate::resilience::lock;

/// The last successful full listing of one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub records: Vec<ClientRecord>,
    pub total: Option<u64>,
    pub captured_at: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct ListingCache {
    listings: Mutex<HashMap<String, Listing>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps whichever listing was captured later; returns false when the
    /// incoming one is older than what is already held.
    pub fn store(&self, scope: &str, listing: Listing) -> bool {
        let mut listings = lock(&self.listings);
        if let Some(held) = listings.get(scope)
            && held.captured_at > listing.captured_at
        {
            tracing::debug!(
                scope,
                held = %held.captured_at,
                incoming = %listing.captured_at,
                "ignoring listing older than the cached one"
            );
            return false;
        }
        listings.insert(scope.to_string(), listing);
        true
    }

    pub fn get(&self, scope: &str) -> Option<Listing> {
        lock(&self.listings).get(scope).cloned()
    }

    pub fn count(&self, scope: &str) -> Option<usize> {
        lock(&self.listings)
            .get(scope)
            .map(|listing| listing.records.len())
    }
}

/// Memory cache in front of the optional persisted snapshots.
#[derive(Clone)]
pub struct LastKnown {
    cache: Arc<ListingCache>,
    snapshots: Option<Arc<SnapshotStore>>,
}

impl LastKnown {
    pub fn new(cache: Arc<ListingCache>, snapshots: Option<Arc<SnapshotStore>>) -> Self {
        Self { cache, snapshots }
    }

    pub fn memory_only(cache: Arc<ListingCache>) -> Self {
        Self::new(cache, None)
    }

    pub fn cache(&self) -> &ListingCache {
        &self.cache
    }

    /// Records a full listing unless a fresher one is already cached.
    /// Persistence failures are logged only.
    pub async fn remember(&self, scope: &str, listing: &Listing) {
        if !self.cache.store(scope, listing.clone()) {
            return;
        }
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        if let Err(err) = snapshots.save(scope, listing).await {
            tracing::warn!(scope, error = %err, "failed to persist listing snapshot");
        }
    }

    pub async fn load(&self, scope: &str) -> Option<Listing> {
        if let Some(listing) = self.cache.get(scope) {
            return Some(listing);
        }
        let snapshots = self.snapshots.as_ref()?;
        match snapshots.load(scope).await {
            Ok(listing) => listing,
            Err(err) => {
                tracing::warn!(scope, error = %err, "failed to read listing snapshot");
                None
            }
        }
    }
}
