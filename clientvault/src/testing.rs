use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clientvault_core::{ClientRecord, RemoteError, StatusCode, normalize_tax_id};

use crate::backend::{ClientPage, ClientQuery, HealthProbe, RecordBackend};
use crate::resilience::{Sleeper, lock};

#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
    }
}

type Responder = Box<dyn Fn(&ClientQuery) -> Result<ClientPage, RemoteError> + Send + Sync>;

/// Answers queued responses first, then the responder, then empty pages.
#[derive(Default)]
pub struct ScriptedBackend {
    queued: Mutex<VecDeque<Result<ClientPage, RemoteError>>>,
    responder: Option<Responder>,
    queries: Mutex<Vec<ClientQuery>>,
}

impl ScriptedBackend {
    pub fn with_responder(
        responder: impl Fn(&ClientQuery) -> Result<ClientPage, RemoteError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    pub fn push_page(&self, rows: Vec<ClientRecord>, total: Option<u64>) {
        lock(&self.queued).push_back(Ok(ClientPage { rows, total }));
    }

    pub fn push_error(&self, err: RemoteError) {
        lock(&self.queued).push_back(Err(err));
    }

    pub fn queries(&self) -> Vec<ClientQuery> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl RecordBackend for ScriptedBackend {
    async fn fetch_clients(&self, query: &ClientQuery) -> Result<ClientPage, RemoteError> {
        lock(&self.queries).push(query.clone());
        if let Some(response) = lock(&self.queued).pop_front() {
            return response;
        }
        match &self.responder {
            Some(responder) => responder(query),
            None => Ok(ClientPage::default()),
        }
    }
}

/// Plays back queued outcomes, then repeats `fallback`.
pub struct ScriptedProbe {
    outcomes: Mutex<VecDeque<bool>>,
    fallback: bool,
    panics: bool,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn always(ok: bool) -> Self {
        Self::sequence(Vec::new(), ok)
    }

    pub fn sequence(outcomes: Vec<bool>, fallback: bool) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback,
            panics: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::always(false)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("probe blew up");
        }
        let ok = lock(&self.outcomes).pop_front().unwrap_or(self.fallback);
        if ok { Ok(()) } else { Err(unavailable()) }
    }
}

pub fn unavailable() -> RemoteError {
    RemoteError::Api {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "service unavailable".into(),
    }
}

pub fn forbidden() -> RemoteError {
    RemoteError::Api {
        status: StatusCode::FORBIDDEN,
        body: "permission denied".into(),
    }
}

pub fn record(id: i64, company_name: &str) -> ClientRecord {
    let mut record = ClientRecord::new(id);
    record.name = format!("Contact {id}");
    record.company_name = company_name.to_string();
    record
}

pub fn record_with_tax_id(id: i64, company_name: &str, tax_id: &str) -> ClientRecord {
    let mut record = record(id, company_name);
    record.tax_id = tax_id.to_string();
    record.tax_id_norm = normalize_tax_id(tax_id);
    record
}
