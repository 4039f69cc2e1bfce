mod client;
mod query;
mod record;

pub use client::{ApiErrorClass, QueryResponse, RemoteError, RestClient};
pub use query::{Filter, Query};
pub use reqwest::StatusCode;
pub use record::{ClientRecord, fold_diacritics, normalize_tax_id};
