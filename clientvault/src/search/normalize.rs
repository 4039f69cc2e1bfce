use clientvault_core::{ClientRecord, fold_diacritics};

/// Lowercases with the full-fold expansions that `to_lowercase` skips.
fn case_fold(raw: &str) -> String {
    let lowered = fold_diacritics(raw).to_lowercase();
    if !lowered.contains('ß') {
        return lowered;
    }
    lowered.replace('ß', "ss")
}

/// Folds a search term or field: diacritics stripped, lowercased, only
/// letters and digits kept.
pub fn normalize_search(raw: &str) -> String {
    case_fold(raw)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Company names compare with diacritics stripped, case folded and inner
/// whitespace collapsed.
pub fn normalize_company_name(raw: &str) -> String {
    case_fold(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `needle` must already be normalized; an empty needle matches everything.
pub fn record_matches(record: &ClientRecord, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    [
        &record.name,
        &record.company_name,
        &record.tax_id,
        &record.contact_number,
    ]
    .into_iter()
    .any(|field| normalize_search(field).contains(needle))
}

pub fn filter_records(records: Vec<ClientRecord>, needle: &str) -> Vec<ClientRecord> {
    records
        .into_iter()
        .filter(|record| record_matches(record, needle))
        .collect()
}
