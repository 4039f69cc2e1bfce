use std::time::Duration;

use async_trait::async_trait;
use clientvault_core::{ClientRecord, Query, RemoteError, RestClient};
use serde::de::IgnoredAny;

use crate::resilience::{RetryExecutor, RetryPolicy};

pub const CLIENTS_TABLE: &str = "clients";
pub const SCOPE_COLUMN: &str = "org_id";

const CLIENT_COLUMNS: [&str; 9] = [
    "id",
    "tax_id",
    "tax_id_norm",
    "name",
    "company_name",
    "contact_number",
    "notes",
    "last_modified",
    "deleted_at",
];
const SEARCH_COLUMNS: [&str; 4] = ["name", "company_name", "tax_id", "contact_number"];

/// Backend-neutral description of a client read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientQuery {
    pub scope: String,
    pub contains: Option<String>,
    pub client_id: Option<i64>,
    pub include_deleted: bool,
    pub limit: u32,
    pub offset: u32,
}

impl ClientQuery {
    pub fn listing(scope: impl Into<String>, limit: u32) -> Self {
        Self {
            scope: scope.into(),
            contains: None,
            client_id: None,
            include_deleted: false,
            limit: limit.max(1),
            offset: 0,
        }
    }

    pub fn containing(mut self, term: impl Into<String>) -> Self {
        self.contains = Some(term.into());
        self
    }

    pub fn by_id(mut self, client_id: i64) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn at_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientPage {
    pub rows: Vec<ClientRecord>,
    pub total: Option<u64>,
}

#[async_trait]
pub trait RecordBackend: Send + Sync {
    async fn fetch_clients(&self, query: &ClientQuery) -> Result<ClientPage, RemoteError>;
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), RemoteError>;
}

/// Reads every page of `query`, each page under `policy`.
pub async fn fetch_all_pages(
    backend: &dyn RecordBackend,
    retry: &RetryExecutor,
    policy: &RetryPolicy,
    query: ClientQuery,
) -> Result<ClientPage, RemoteError> {
    let limit = query.limit.max(1);
    let mut offset = query.offset;
    let mut rows = Vec::new();
    let mut total = None;
    loop {
        let page_query = query.clone().at_offset(offset);
        let page = retry
            .run(policy, || backend.fetch_clients(&page_query))
            .await?;
        if total.is_none() {
            total = page.total;
        }
        let fetched = page.rows.len() as u32;
        rows.extend(page.rows);
        offset = offset.saturating_add(fetched);
        let reached_total = total.is_some_and(|total| u64::from(offset) >= total);
        if fetched < limit || reached_total {
            break;
        }
    }
    Ok(ClientPage { rows, total })
}

pub struct RestBackend {
    client: RestClient,
    probe_timeout: Duration,
}

impl RestBackend {
    pub fn new(client: RestClient, probe_timeout: Duration) -> Self {
        Self {
            client,
            probe_timeout,
        }
    }
}

fn to_remote_query(query: &ClientQuery) -> Query {
    let mut remote = Query::table(CLIENTS_TABLE)
        .select(&CLIENT_COLUMNS)
        .eq(SCOPE_COLUMN, &query.scope);
    if !query.include_deleted {
        remote = remote.is_null("deleted_at");
    }
    if let Some(client_id) = query.client_id {
        remote = remote.eq("id", client_id);
    }
    if let Some(term) = query.contains.as_deref() {
        remote = remote.any_contains(&SEARCH_COLUMNS, term);
    }
    remote = remote
        .order("id", false)
        .limit(query.limit)
        .offset(query.offset);
    if query.offset == 0 {
        remote = remote.exact_count();
    }
    remote
}

#[async_trait]
impl RecordBackend for RestBackend {
    async fn fetch_clients(&self, query: &ClientQuery) -> Result<ClientPage, RemoteError> {
        let response = self
            .client
            .execute::<ClientRecord>(&to_remote_query(query))
            .await?;
        Ok(ClientPage {
            rows: response
                .data
                .into_iter()
                .map(ClientRecord::with_derived_fields)
                .collect(),
            total: response.count,
        })
    }
}

#[async_trait]
impl HealthProbe for RestBackend {
    async fn probe(&self) -> Result<(), RemoteError> {
        let query = Query::table(CLIENTS_TABLE).select(&["id"]).limit(1);
        self.client
            .execute_with_timeout::<IgnoredAny>(&query, Some(self.probe_timeout))
            .await?;
        Ok(())
    }
}

/// Stands in when no remote service is configured; every call fails fatally.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBackend;

#[async_trait]
impl RecordBackend for OfflineBackend {
    async fn fetch_clients(&self, _query: &ClientQuery) -> Result<ClientPage, RemoteError> {
        Err(RemoteError::NotConfigured)
    }
}

#[async_trait]
impl HealthProbe for OfflineBackend {
    async fn probe(&self) -> Result<(), RemoteError> {
        Err(RemoteError::NotConfigured)
    }
}
