use std::sync::Arc;

use anyhow::Context;
use clientvault_core::{ClientRecord, RestClient};

use crate::backend::{
    ClientQuery, HealthProbe, OfflineBackend, RecordBackend, RestBackend, fetch_all_pages,
};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::conflict::ConflictDetector;
use crate::identity::IdentityResolver;
use crate::resilience::{ConnectivityMonitor, RetryExecutor, RouteHint};
use crate::search::{LastKnown, ListingCache, ResilientSearch, SnapshotStore};

/// Everything a front end needs, wired once in dependency order.
pub struct AppContext {
    pub config: AppConfig,
    pub backend: Arc<dyn RecordBackend>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryExecutor,
    pub monitor: Arc<ConnectivityMonitor>,
    pub last_known: LastKnown,
    pub search: ResilientSearch,
    pub detector: ConflictDetector,
    pub resolver: IdentityResolver,
}

impl AppContext {
    pub async fn bootstrap(config: AppConfig) -> anyhow::Result<Self> {
        let (backend, probe) = build_backend(&config)?;
        let snapshots = match SnapshotStore::open(&config.snapshot_db).await {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                tracing::warn!(
                    path = %config.snapshot_db.display(),
                    error = %err,
                    "snapshot store unavailable, keeping listings in memory only"
                );
                None
            }
        };
        Ok(Self::assemble(config, backend, probe, snapshots, Arc::new(SystemClock)))
    }

    pub fn assemble(
        config: AppConfig,
        backend: Arc<dyn RecordBackend>,
        probe: Arc<dyn HealthProbe>,
        snapshots: Option<Arc<SnapshotStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let retry = RetryExecutor::new();
        let monitor = Arc::new(ConnectivityMonitor::new(
            probe,
            Arc::clone(&clock),
            config.connectivity,
        ));
        let last_known = LastKnown::new(Arc::new(ListingCache::new()), snapshots);
        let route: Arc<dyn RouteHint> = monitor.clone();
        let search = ResilientSearch::new(
            Arc::clone(&backend),
            retry.clone(),
            config.retry,
            route,
            last_known.clone(),
            Arc::clone(&clock),
        )
        .with_page_size(config.page_size);
        let detector = ConflictDetector::new(
            Arc::clone(&backend),
            retry.clone(),
            config.retry,
            last_known.clone(),
            Arc::clone(&clock),
        )
        .with_page_size(config.page_size);
        let resolver = IdentityResolver::new(&config.storage_dir, &config.trash_dir)
            .with_marker_depth(config.marker_depth);

        Self {
            config,
            backend,
            clock,
            retry,
            monitor,
            last_known,
            search,
            detector,
            resolver,
        }
    }

    /// Every record of the scope, soft-deleted ones included.
    pub async fn all_records(&self, scope: &str) -> anyhow::Result<Vec<ClientRecord>> {
        let query = ClientQuery::listing(scope, self.config.page_size).with_deleted();
        let page = fetch_all_pages(self.backend.as_ref(), &self.retry, &self.config.retry, query)
            .await
            .with_context(|| format!("failed to list clients of {scope}"))?;
        Ok(page.rows)
    }

    /// One record by id, soft-deleted or not.
    pub async fn record(&self, scope: &str, client_id: i64) -> anyhow::Result<Option<ClientRecord>> {
        let query = ClientQuery::listing(scope, 1).with_deleted().by_id(client_id);
        let page = self
            .retry
            .run(&self.config.retry, || self.backend.fetch_clients(&query))
            .await
            .with_context(|| format!("failed to load client {client_id}"))?;
        Ok(page.rows.into_iter().next())
    }
}

type Backends = (Arc<dyn RecordBackend>, Arc<dyn HealthProbe>);

fn build_backend(config: &AppConfig) -> anyhow::Result<Backends> {
    let (Some(url), Some(key)) = (config.api_url.as_deref(), config.api_key.as_deref()) else {
        tracing::warn!("CLIENTVAULT_API_URL is not set, running against last-known data only");
        return Ok((Arc::new(OfflineBackend), Arc::new(OfflineBackend)));
    };
    let client = RestClient::with_base_url(url, key)
        .with_context(|| format!("invalid CLIENTVAULT_API_URL: {url}"))?;
    let backend = Arc::new(RestBackend::new(client, config.connectivity.probe_timeout));
    Ok((backend.clone(), backend))
}
