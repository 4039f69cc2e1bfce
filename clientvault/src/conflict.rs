use std::sync::Arc;

use clientvault_core::{ClientRecord, normalize_tax_id};
use thiserror::Error;
use time::OffsetDateTime;

use crate::backend::{ClientQuery, RecordBackend, fetch_all_pages};
use crate::clock::Clock;
use crate::resilience::{RetryExecutor, RetryPolicy};
use crate::search::resilient::require_scope;
use crate::search::{LastKnown, Listing, normalize_company_name};

const DEFAULT_PAGE_SIZE: u32 = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("no organization scope selected")]
    MissingScope,
    #[error("client list for {0} is unavailable; cannot check for duplicates")]
    Unavailable(String),
}

/// Field values about to be saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientDraft {
    pub tax_id: String,
    pub name: String,
    pub company_name: String,
    pub contact_number: String,
}

impl ClientDraft {
    pub fn new(company_name: impl Into<String>, tax_id: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            tax_id: tax_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSource {
    Remote,
    LastKnown { captured_at: OffsetDateTime },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictReport {
    pub tax_id_conflict: Option<ClientRecord>,
    pub name_conflicts: Vec<ClientRecord>,
    pub source: ConflictSource,
}

impl ConflictReport {
    pub fn blocks_save(&self) -> bool {
        self.tax_id_conflict.is_some()
    }

    pub fn is_clear(&self) -> bool {
        self.tax_id_conflict.is_none() && self.name_conflicts.is_empty()
    }
}

/// Duplicate checks against a set of records; inactive rows and
/// `exclude_id` never conflict.
pub fn detect_conflicts(
    draft: &ClientDraft,
    records: &[ClientRecord],
    exclude_id: Option<i64>,
    source: ConflictSource,
) -> ConflictReport {
    let draft_tax = normalize_tax_id(&draft.tax_id);
    let draft_company = normalize_company_name(&draft.company_name);
    let candidates = records
        .iter()
        .filter(|record| record.is_active() && Some(record.id) != exclude_id);

    let mut tax_id_conflict = None;
    let mut name_conflicts = Vec::new();
    for record in candidates {
        let record_tax = effective_tax_norm(record);
        if !draft_tax.is_empty() && record_tax == draft_tax {
            if tax_id_conflict.is_none() {
                tax_id_conflict = Some(record.clone());
            }
            continue;
        }
        let same_company =
            !draft_company.is_empty() && normalize_company_name(&record.company_name) == draft_company;
        let both_untaxed = draft_tax.is_empty() && record_tax.is_empty();
        if same_company && !both_untaxed {
            name_conflicts.push(record.clone());
        }
    }

    ConflictReport {
        tax_id_conflict,
        name_conflicts,
        source,
    }
}

fn effective_tax_norm(record: &ClientRecord) -> String {
    if record.tax_id_norm.is_empty() {
        normalize_tax_id(&record.tax_id)
    } else {
        record.tax_id_norm.clone()
    }
}

pub struct ConflictDetector {
    backend: Arc<dyn RecordBackend>,
    retry: RetryExecutor,
    policy: RetryPolicy,
    last_known: LastKnown,
    clock: Arc<dyn Clock>,
    page_size: u32,
}

impl ConflictDetector {
    pub fn new(
        backend: Arc<dyn RecordBackend>,
        retry: RetryExecutor,
        policy: RetryPolicy,
        last_known: LastKnown,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            retry,
            policy,
            last_known,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn check(
        &self,
        scope: Option<&str>,
        draft: &ClientDraft,
        exclude_id: Option<i64>,
    ) -> Result<ConflictReport, ConflictError> {
        let scope = require_scope(scope).ok_or(ConflictError::MissingScope)?;
        let query = ClientQuery::listing(scope, self.page_size);
        let captured_at = self.clock.now();
        match fetch_all_pages(self.backend.as_ref(), &self.retry, &self.policy, query).await {
            Ok(page) => {
                let listing = Listing {
                    records: page.rows,
                    total: page.total,
                    captured_at,
                };
                self.last_known.remember(scope, &listing).await;
                Ok(detect_conflicts(
                    draft,
                    &listing.records,
                    exclude_id,
                    ConflictSource::Remote,
                ))
            }
            Err(err) => {
                tracing::warn!(scope, error = %err, "remote duplicate check failed, using last-known listing");
                let listing = self
                    .last_known
                    .load(scope)
                    .await
                    .ok_or_else(|| ConflictError::Unavailable(scope.to_string()))?;
                Ok(detect_conflicts(
                    draft,
                    &listing.records,
                    exclude_id,
                    ConflictSource::LastKnown {
                        captured_at: listing.captured_at,
                    },
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ClientPage;
    use crate::clock::ManualClock;
    use crate::search::ListingCache;
    use crate::testing::{
        RecordingSleeper, ScriptedBackend, forbidden, record, record_with_tax_id, unavailable,
    };

    fn scan(draft: &ClientDraft, records: &[ClientRecord], exclude_id: Option<i64>) -> ConflictReport {
        detect_conflicts(draft, records, exclude_id, ConflictSource::Remote)
    }

    #[test]
    fn punctuated_tax_id_conflicts_with_stored_digits() {
        let existing = vec![record_with_tax_id(4, "Acme Ltda", "12345678000190")];
        let report = scan(&ClientDraft::new("Other", "12.345.678/0001-90"), &existing, None);

        assert!(report.blocks_save());
        assert_eq!(report.tax_id_conflict.map(|r| r.id), Some(4));
        assert!(report.name_conflicts.is_empty());
    }

    #[test]
    fn editing_a_record_does_not_conflict_with_itself() {
        let existing = vec![record_with_tax_id(4, "Acme", "12345678000190")];
        let report = scan(&ClientDraft::new("Acme", "12.345.678/0001-90"), &existing, Some(4));
        assert!(report.is_clear());
    }

    #[test]
    fn same_company_with_other_tax_id_is_advisory() {
        let existing = vec![
            record_with_tax_id(1, "ACME", "11.111.111/0001-11"),
            record(2, "  acmé "),
            record(3, "Acme Holdings"),
        ];
        let report = scan(&ClientDraft::new("Acme", "22.222.222/0001-22"), &existing, None);

        assert!(!report.blocks_save());
        let ids: Vec<i64> = report.name_conflicts.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn same_company_without_any_tax_ids_is_not_a_conflict() {
        let existing = vec![record(1, "Acme")];
        let report = scan(&ClientDraft::new("Acme", ""), &existing, None);
        assert!(report.is_clear());
    }

    #[test]
    fn deleted_records_never_conflict() {
        let mut gone = record_with_tax_id(1, "Acme", "12345678000190");
        gone.deleted_at = Some("2024-01-01T00:00:00Z".into());
        let report = scan(&ClientDraft::new("Acme", "12345678000190"), &[gone], None);
        assert!(report.is_clear());
    }

    #[test]
    fn missing_stored_norm_is_derived() {
        let mut legacy = record(1, "Acme");
        legacy.tax_id = "12.345.678/0001-90".into();
        let report = scan(&ClientDraft::new("Other", "12345678000190"), &[legacy], None);
        assert!(report.blocks_save());
    }

    fn detector(backend: ScriptedBackend, cache: Arc<ListingCache>) -> ConflictDetector {
        ConflictDetector::new(
            Arc::new(backend),
            RetryExecutor::with_sleeper(Arc::new(RecordingSleeper::default())),
            RetryPolicy::default(),
            LastKnown::memory_only(cache),
            Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH)),
        )
    }

    #[tokio::test]
    async fn check_reads_remote_listing_and_caches_it() {
        let backend = ScriptedBackend::with_responder(|_| {
            Ok(ClientPage {
                rows: vec![record_with_tax_id(4, "Acme", "12345678000190")],
                total: Some(1),
            })
        });
        let cache = Arc::new(ListingCache::new());
        let detector = detector(backend, Arc::clone(&cache));

        let report = detector
            .check(Some("acme"), &ClientDraft::new("Acme", "12.345.678/0001-90"), None)
            .await
            .unwrap();

        assert_eq!(report.source, ConflictSource::Remote);
        assert!(report.blocks_save());
        assert_eq!(cache.count("acme"), Some(1));
    }

    #[tokio::test]
    async fn check_falls_back_to_last_known_listing() {
        let backend = ScriptedBackend::default();
        for _ in 0..3 {
            backend.push_error(unavailable());
        }
        let cache = Arc::new(ListingCache::new());
        cache.store(
            "acme",
            Listing {
                records: vec![record_with_tax_id(4, "Acme", "12345678000190")],
                total: Some(1),
                captured_at: OffsetDateTime::UNIX_EPOCH,
            },
        );
        let detector = detector(backend, cache);

        let report = detector
            .check(Some("acme"), &ClientDraft::new("Acme", "99.999.999/0001-99"), None)
            .await
            .unwrap();

        assert_eq!(
            report.source,
            ConflictSource::LastKnown {
                captured_at: OffsetDateTime::UNIX_EPOCH
            }
        );
        assert_eq!(report.name_conflicts.len(), 1);
    }

    #[tokio::test]
    async fn check_without_remote_or_cache_is_unavailable() {
        let backend = ScriptedBackend::default();
        backend.push_error(forbidden());
        let detector = detector(backend, Arc::new(ListingCache::new()));

        let err = detector
            .check(Some("acme"), &ClientDraft::new("Acme", ""), None)
            .await
            .unwrap_err();

        assert_eq!(err, ConflictError::Unavailable("acme".into()));
        assert_eq!(
            detector
                .check(None, &ClientDraft::new("Acme", ""), None)
                .await
                .unwrap_err(),
            ConflictError::MissingScope
        );
    }
}
