use clientvault_core::{ClientRecord, fold_diacritics};

const TAX_ID_DIGITS: usize = 14;
const MIN_CONTACT_DIGITS: usize = 10;
const MAX_COMPANY_SLUG: usize = 60;

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Folder name derived from a record: full tax id digits, then a contact
/// number, then the company name, then the id itself.
pub fn slug_for(record: &ClientRecord) -> String {
    let slug = tax_id_slug(&record.tax_id)
        .or_else(|| contact_slug(&record.contact_number))
        .or_else(|| company_slug(&record.company_name))
        .unwrap_or_else(|| format!("id_{}", record.id));
    if is_reserved(&slug) {
        return format!("id_{}_{slug}", record.id);
    }
    slug
}

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn tax_id_slug(tax_id: &str) -> Option<String> {
    let digits = digits(tax_id);
    (digits.len() == TAX_ID_DIGITS).then_some(digits)
}

fn contact_slug(contact: &str) -> Option<String> {
    let digits = digits(contact);
    (digits.len() >= MIN_CONTACT_DIGITS).then_some(digits)
}

fn company_slug(company: &str) -> Option<String> {
    let mut slug = String::new();
    for c in fold_diacritics(company).chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.truncate(MAX_COMPANY_SLUG);
    let slug = slug.trim_end_matches('_');
    (!slug.is_empty()).then(|| slug.to_string())
}

fn is_reserved(slug: &str) -> bool {
    RESERVED_NAMES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(slug))
}
