use serde::{Deserialize, Deserializer, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "nullable_string")]
    pub tax_id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub tax_id_norm: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub company_name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub contact_number: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub notes: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
}

impl ClientRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            tax_id: String::new(),
            tax_id_norm: String::new(),
            name: String::new(),
            company_name: String::new(),
            contact_number: String::new(),
            notes: String::new(),
            last_modified: None,
            deleted_at: None,
        }
    }

    /// Fills `tax_id_norm` from `tax_id` when the remote row left it empty.
    pub fn with_derived_fields(mut self) -> Self {
        if self.tax_id_norm.is_empty() {
            self.tax_id_norm = normalize_tax_id(&self.tax_id);
        }
        self
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at
            .as_deref()
            .is_none_or(|value| value.trim().is_empty())
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Canonical decomposition, combining marks removed, recomposed.
pub fn fold_diacritics(raw: &str) -> String {
    raw.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

/// Canonical tax id: diacritics stripped, uppercased, only `[A-Z0-9]` kept.
pub fn normalize_tax_id(raw: &str) -> String {
    fold_diacritics(raw)
        .to_uppercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tax_id_norm_strips_punctuation() {
        assert_eq!(normalize_tax_id("12.345.678/0001-90"), "12345678000190");
    }

    #[test]
    fn tax_id_norm_folds_accents_and_case() {
        assert_eq!(normalize_tax_id(" ab-çd 1é "), "ABCD1E");
    }

    #[test]
    fn tax_id_norm_only_keeps_ascii_alphanumerics() {
        let norm = normalize_tax_id("Жx-9_ß…");
        assert!(
            norm.chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
        assert_eq!(norm, "X9SS");
    }

    #[test]
    fn null_text_columns_become_empty() {
        let row: ClientRecord = serde_json::from_str(
            r#"{"id": 3, "tax_id": null, "name": "Ana", "company_name": null, "deleted_at": null}"#,
        )
        .unwrap();
        assert_eq!(row.tax_id, "");
        assert_eq!(row.company_name, "");
        assert_eq!(row.contact_number, "");
        assert!(row.is_active());
    }

    #[test]
    fn derives_missing_tax_id_norm() {
        let mut record = ClientRecord::new(1);
        record.tax_id = "12.345.678/0001-90".into();
        let record = record.with_derived_fields();
        assert_eq!(record.tax_id_norm, "12345678000190");
    }

    #[test]
    fn deleted_at_marks_record_inactive() {
        let mut record = ClientRecord::new(1);
        record.deleted_at = Some("2024-05-01T10:00:00Z".into());
        assert!(!record.is_active());
        record.deleted_at = Some("  ".into());
        assert!(record.is_active());
    }
}
