use std::sync::Arc;

use clientvault_core::{ClientRecord, RemoteError};
use thiserror::Error;
use time::OffsetDateTime;

use super::cache::{LastKnown, Listing};
use super::normalize::{filter_records, normalize_search};
use crate::backend::{ClientQuery, RecordBackend, fetch_all_pages};
use crate::clock::Clock;
use crate::resilience::{RetryExecutor, RetryPolicy, RouteHint};

const DEFAULT_PAGE_SIZE: u32 = 500;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("no organization scope selected")]
    MissingScope,
    #[error("remote listing failed: {0}")]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
    /// Server-side filter, re-checked locally.
    Remote,
    /// Server-side filter found nothing; the full listing was scanned locally.
    RemoteFullScan,
    LocalFallback { captured_at: OffsetDateTime },
    Unavailable,
}

impl SearchSource {
    pub fn is_remote(&self) -> bool {
        matches!(self, SearchSource::Remote | SearchSource::RemoteFullScan)
    }

    pub fn label(&self) -> String {
        match self {
            SearchSource::Remote => "remote".to_string(),
            SearchSource::RemoteFullScan => "remote (full scan)".to_string(),
            SearchSource::LocalFallback { captured_at } => {
                format!("last-known data from {captured_at}")
            }
            SearchSource::Unavailable => "not available".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub records: Vec<ClientRecord>,
    pub source: SearchSource,
}

pub(crate) fn require_scope(scope: Option<&str>) -> Option<&str> {
    scope.map(str::trim).filter(|scope| !scope.is_empty())
}

pub struct ResilientSearch {
    backend: Arc<dyn RecordBackend>,
    retry: RetryExecutor,
    policy: RetryPolicy,
    route: Arc<dyn RouteHint>,
    last_known: LastKnown,
    clock: Arc<dyn Clock>,
    page_size: u32,
}

impl ResilientSearch {
    pub fn new(
        backend: Arc<dyn RecordBackend>,
        retry: RetryExecutor,
        policy: RetryPolicy,
        route: Arc<dyn RouteHint>,
        last_known: LastKnown,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            retry,
            policy,
            route,
            last_known,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn search(
        &self,
        term: &str,
        scope: Option<&str>,
    ) -> Result<SearchOutcome, SearchError> {
        let scope = require_scope(scope).ok_or(SearchError::MissingScope)?;
        let needle = normalize_search(term);

        if !self.route.allows_remote() {
            tracing::debug!(scope, "offline, searching last-known listing");
            return Ok(self.fallback(scope, &needle).await);
        }

        if needle.is_empty() {
            return match self.fetch_listing(scope).await {
                Ok(listing) => Ok(SearchOutcome {
                    records: listing.records,
                    source: SearchSource::Remote,
                }),
                Err(err) => {
                    tracing::warn!(scope, error = %err, "remote listing failed, using fallback");
                    Ok(self.fallback(scope, &needle).await)
                }
            };
        }

        let query = ClientQuery::listing(scope, self.page_size).containing(term.trim());
        let filtered = match fetch_all_pages(self.backend.as_ref(), &self.retry, &self.policy, query)
            .await
        {
            Ok(page) => filter_records(page.rows, &needle),
            Err(err) => {
                tracing::warn!(scope, error = %err, "remote search failed, using fallback");
                return Ok(self.fallback(scope, &needle).await);
            }
        };
        if !filtered.is_empty() {
            return Ok(SearchOutcome {
                records: filtered,
                source: SearchSource::Remote,
            });
        }

        // The server matches raw substrings; accents and punctuation need a local pass.
        match self.fetch_listing(scope).await {
            Ok(listing) => Ok(SearchOutcome {
                records: filter_records(listing.records, &needle),
                source: SearchSource::RemoteFullScan,
            }),
            Err(err) => {
                tracing::warn!(scope, error = %err, "full scan failed, using fallback");
                Ok(self.fallback(scope, &needle).await)
            }
        }
    }

    /// Fetches the whole scope and stores it as the last-known listing.
    pub async fn refresh_listing(&self, scope: Option<&str>) -> Result<usize, SearchError> {
        let scope = require_scope(scope).ok_or(SearchError::MissingScope)?;
        let listing = self.fetch_listing(scope).await?;
        Ok(listing.records.len())
    }

    pub fn last_known_count(&self, scope: &str) -> Option<usize> {
        self.last_known.cache().count(scope.trim())
    }

    async fn fetch_listing(&self, scope: &str) -> Result<Listing, RemoteError> {
        // Stamped at request time so a slow fetch cannot pass for a newer one.
        let captured_at = self.clock.now();
        let page = fetch_all_pages(
            self.backend.as_ref(),
            &self.retry,
            &self.policy,
            ClientQuery::listing(scope, self.page_size),
        )
        .await?;
        let listing = Listing {
            records: page.rows,
            total: page.total,
            captured_at,
        };
        self.last_known.remember(scope, &listing).await;
        tracing::debug!(scope, records = listing.records.len(), "listing refreshed");
        Ok(listing)
    }

    async fn fallback(&self, scope: &str, needle: &str) -> SearchOutcome {
        match self.last_known.load(scope).await {
            Some(listing) => SearchOutcome {
                records: filter_records(listing.records, needle),
                source: SearchSource::LocalFallback {
                    captured_at: listing.captured_at,
                },
            },
            None => SearchOutcome {
                records: Vec::new(),
                source: SearchSource::Unavailable,
            },
        }
    }
}
