//! Spreadsheet import surface: alias-table field resolution, value
//! normalization, and the preview-then-commit row mapper.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use spt_core::{Opportunity, Period, PeriodFlags, RawRecord, RawValue};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "spt-import";

/// The single marker character a period cell must equal to count as set.
pub const PERIOD_MARKER: &str = "x";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import document has no row table")]
    MissingTable,
    #[error("unreadable import document: {0}")]
    Document(#[from] serde_json::Error),
    #[error("unknown canonical field in alias override: {0}")]
    UnknownField(String),
    #[error("unreadable alias override: {0}")]
    AliasOverride(#[from] serde_yaml::Error),
}

/// Every source column the mapper can populate. One entry per period
/// marker so each month owns its own alias list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CanonicalField {
    Owner,
    Customer,
    Supplier,
    Description,
    Amount,
    Region,
    Confidence,
    FollowUp,
    PendingClientInfo,
    Contacts,
    PeriodJan,
    PeriodFeb,
    PeriodMar,
    PeriodYear,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 14] = [
        CanonicalField::Owner,
        CanonicalField::Customer,
        CanonicalField::Supplier,
        CanonicalField::Description,
        CanonicalField::Amount,
        CanonicalField::Region,
        CanonicalField::Confidence,
        CanonicalField::FollowUp,
        CanonicalField::PendingClientInfo,
        CanonicalField::Contacts,
        CanonicalField::PeriodJan,
        CanonicalField::PeriodFeb,
        CanonicalField::PeriodMar,
        CanonicalField::PeriodYear,
    ];

    /// Key used in alias-override YAML files.
    pub fn key(self) -> &'static str {
        match self {
            CanonicalField::Owner => "owner",
            CanonicalField::Customer => "customer",
            CanonicalField::Supplier => "supplier",
            CanonicalField::Description => "description",
            CanonicalField::Amount => "amount",
            CanonicalField::Region => "region",
            CanonicalField::Confidence => "confidence",
            CanonicalField::FollowUp => "follow_up",
            CanonicalField::PendingClientInfo => "pending_client_info",
            CanonicalField::Contacts => "contacts",
            CanonicalField::PeriodJan => "jan",
            CanonicalField::PeriodFeb => "feb",
            CanonicalField::PeriodMar => "mar",
            CanonicalField::PeriodYear => "year",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn period(self) -> Option<Period> {
        match self {
            CanonicalField::PeriodJan => Some(Period::Jan),
            CanonicalField::PeriodFeb => Some(Period::Feb),
            CanonicalField::PeriodMar => Some(Period::Mar),
            CanonicalField::PeriodYear => Some(Period::Year),
            _ => None,
        }
    }
}

/// Per-field acceptable source labels, checked in list order. Labels are
/// compared trimmed and lower-cased; no partial or fuzzy matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTables {
    aliases: BTreeMap<CanonicalField, Vec<String>>,
}

impl Default for AliasTables {
    fn default() -> Self {
        let defaults: [(CanonicalField, &[&str]); 14] = [
            (CanonicalField::Owner, &["owner", "responsible", "verantwortlich", "resp"]),
            (CanonicalField::Customer, &["customer", "client", "kunde"]),
            (CanonicalField::Supplier, &["supplier", "vendor", "lieferant"]),
            (CanonicalField::Description, &["description", "subject", "beschreibung"]),
            (CanonicalField::Amount, &["amount", "value", "betrag", "amt"]),
            (CanonicalField::Region, &["region", "county", "land"]),
            (
                CanonicalField::Confidence,
                &["confidence", "probability", "wahrscheinlichkeit", "conf"],
            ),
            (
                CanonicalField::FollowUp,
                &["follow up", "follow-up", "followup", "verlauf"],
            ),
            (
                CanonicalField::PendingClientInfo,
                &["pending info", "info owed", "offene info"],
            ),
            (CanonicalField::Contacts, &["contacts", "contact", "kontakte"]),
            (CanonicalField::PeriodJan, &["jan", "january", "januar"]),
            (CanonicalField::PeriodFeb, &["feb", "february", "februar"]),
            (CanonicalField::PeriodMar, &["mar", "march", "märz", "maerz"]),
            (CanonicalField::PeriodYear, &["year", "full year", "jahr"]),
        ];
        let aliases = defaults
            .into_iter()
            .map(|(field, list)| {
                (
                    field,
                    list.iter().map(|a| normalize_label(a)).collect::<Vec<_>>(),
                )
            })
            .collect();
        Self { aliases }
    }
}

impl AliasTables {
    pub fn aliases_for(&self, field: CanonicalField) -> &[String] {
        self.aliases.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Applies operator overrides from a YAML mapping of field key to
    /// alias list. An override replaces that field's whole list; unknown
    /// field keys are rejected rather than silently ignored.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ImportError> {
        let overrides: BTreeMap<String, Vec<String>> = serde_yaml::from_str(yaml)?;
        let mut tables = Self::default();
        for (key, list) in overrides {
            let field = CanonicalField::from_key(&key)
                .ok_or_else(|| ImportError::UnknownField(key.clone()))?;
            let list = list.iter().map(|a| normalize_label(a)).collect();
            tables.aliases.insert(field, list);
        }
        Ok(tables)
    }
}

/// Loads alias overrides from disk, falling back on default tables when
/// no path is given.
pub fn load_alias_tables(path: Option<&Path>) -> Result<AliasTables> {
    let Some(path) = path else {
        return Ok(AliasTables::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    AliasTables::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Resolves one canonical field against a raw row: the first alias in
/// list order whose trimmed, case-insensitive label appears in the row
/// wins. No match is an absent result, never an error.
pub fn resolve<'a>(
    record: &'a RawRecord,
    field: CanonicalField,
    tables: &AliasTables,
) -> Option<&'a RawValue> {
    for alias in tables.aliases_for(field) {
        for (label, value) in record {
            if normalize_label(label) == *alias {
                return Some(value);
            }
        }
    }
    None
}

/// Lenient locale-aware number parse: keeps digits, comma, period and
/// minus; periods are thousands separators, comma is the decimal
/// separator ("1.234,56" inputs are the expected convention).
fn parse_locale_number(text: &str) -> Option<f64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    let normalized = kept.replace('.', "").replace(',', ".");
    normalized.parse::<f64>().ok()
}

/// Monetary normalization. Already-numeric cells pass through unchanged,
/// sign included; textual cells get the locale parse; anything
/// unparseable is exactly 0, a deliberate lossy fallback.
pub fn normalize_amount(value: &RawValue) -> f64 {
    match value {
        RawValue::Number(n) => *n,
        RawValue::Text(text) => parse_locale_number(text).unwrap_or(0.0),
        RawValue::Absent => 0.0,
    }
}

/// Confidence normalization: fractional-probability cells (value <= 1)
/// are scaled by 100, then rounded to the nearest integer. Rounded
/// values outside the canonical stage set are stored as-is; rejection is
/// not the import's job.
pub fn normalize_confidence(value: &RawValue) -> i32 {
    let numeric = match value {
        RawValue::Number(n) => *n,
        RawValue::Text(text) => parse_locale_number(text).unwrap_or(0.0),
        RawValue::Absent => 0.0,
    };
    let scaled = if numeric <= 1.0 { numeric * 100.0 } else { numeric };
    scaled.round() as i32
}

/// Period-marker normalization: present iff the cell text, trimmed and
/// lower-cased, equals the marker character. Strict equality, not
/// truthiness; numbers never count.
pub fn normalize_flag(value: &RawValue) -> bool {
    match value {
        RawValue::Text(text) => text.trim().to_lowercase() == PERIOD_MARKER,
        _ => false,
    }
}

/// Free-text normalization: trimmed text, losslessly formatted numbers,
/// empty string for absent cells.
pub fn normalize_text(value: &RawValue) -> String {
    match value {
        RawValue::Text(text) => text.trim().to_string(),
        RawValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                n.to_string()
            }
        }
        RawValue::Absent => String::new(),
    }
}

/// Region normalization: trim, uppercase, first two characters.
pub fn normalize_region(value: &RawValue) -> String {
    normalize_text(value)
        .to_uppercase()
        .chars()
        .take(2)
        .collect()
}

fn normalize_contacts(value: &RawValue) -> Vec<String> {
    normalize_text(value)
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// One mapped import, returned for preview. The caller either accepts
/// the whole batch (replacing its working list) or discards it; the
/// mapper itself applies nothing.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub imported_at: DateTime<Utc>,
    pub opportunities: Vec<Opportunity>,
}

/// Maps raw rows into canonical opportunities. Output length always
/// equals input length; every field independently falls back to its
/// type's empty value on a missing or unusable cell. Row ids are v5
/// uuids under a fresh per-batch v4 namespace, so ids stay unique across
/// repeated imports in one process run.
pub fn map_rows(rows: &[RawRecord], tables: &AliasTables) -> ImportBatch {
    let batch_id = Uuid::new_v4();
    let opportunities = rows
        .iter()
        .enumerate()
        .map(|(row_index, row)| map_row(row, row_index, &batch_id, tables))
        .collect();
    ImportBatch {
        batch_id,
        imported_at: Utc::now(),
        opportunities,
    }
}

fn map_row(row: &RawRecord, row_index: usize, batch_id: &Uuid, tables: &AliasTables) -> Opportunity {
    static ABSENT: RawValue = RawValue::Absent;
    let cell = |field: CanonicalField| resolve(row, field, tables).unwrap_or(&ABSENT);

    let mut month_flags = PeriodFlags::default();
    for field in CanonicalField::ALL {
        if let Some(period) = field.period() {
            month_flags.set(period, normalize_flag(cell(field)));
        }
    }

    Opportunity {
        id: Uuid::new_v5(batch_id, &row_index.to_le_bytes()),
        owner: normalize_text(cell(CanonicalField::Owner)),
        customer: normalize_text(cell(CanonicalField::Customer)),
        supplier: normalize_text(cell(CanonicalField::Supplier)),
        description: normalize_text(cell(CanonicalField::Description)),
        amount: normalize_amount(cell(CanonicalField::Amount)),
        region: normalize_region(cell(CanonicalField::Region)),
        confidence: normalize_confidence(cell(CanonicalField::Confidence)),
        month_flags,
        follow_up: normalize_text(cell(CanonicalField::FollowUp)),
        contacts: normalize_contacts(cell(CanonicalField::Contacts)),
        pending_client_info: normalize_flag(cell(CanonicalField::PendingClientInfo)),
    }
}

/// Parses an import document into raw rows. The document is either a
/// top-level array of row objects or an object wrapping one under
/// `rows`. Anything else is the caller-level shape error of the import
/// contract, raised before any mapping happens.
pub fn parse_import_rows(json: &str) -> Result<Vec<RawRecord>, ImportError> {
    let document: JsonValue = serde_json::from_str(json)?;
    let rows = match &document {
        JsonValue::Array(rows) => rows,
        JsonValue::Object(map) => match map.get("rows") {
            Some(JsonValue::Array(rows)) => rows,
            _ => return Err(ImportError::MissingTable),
        },
        _ => return Err(ImportError::MissingTable),
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let JsonValue::Object(cells) = row else {
            return Err(ImportError::MissingTable);
        };
        let record: RawRecord = cells
            .iter()
            .map(|(label, value)| (label.clone(), RawValue::from_json(value)))
            .collect();
        out.push(record);
    }
    Ok(out)
}

pub fn load_import_rows(path: impl AsRef<Path>) -> Result<Vec<RawRecord>> {
    let path = path.as_ref();
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_import_rows(&text).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn text(value: &str) -> RawValue {
        RawValue::Text(value.to_string())
    }

    fn row(cells: &[(&str, RawValue)]) -> RawRecord {
        cells
            .iter()
            .map(|(label, value)| (label.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn monetary_normalization_handles_locale_and_garbage() {
        assert_eq!(normalize_amount(&text("1.234,56")), 1234.56);
        assert_eq!(normalize_amount(&text("EUR 10.000,00")), 10000.0);
        assert_eq!(normalize_amount(&text("abc")), 0.0);
        assert_eq!(normalize_amount(&RawValue::Number(100.0)), 100.0);
        assert_eq!(normalize_amount(&RawValue::Number(-250.0)), -250.0);
        assert_eq!(normalize_amount(&RawValue::Absent), 0.0);
    }

    #[test]
    fn confidence_normalization_scales_fractions_and_keeps_outliers() {
        assert_eq!(normalize_confidence(&RawValue::Number(0.9)), 90);
        assert_eq!(normalize_confidence(&RawValue::Number(45.0)), 45);
        assert_eq!(normalize_confidence(&RawValue::Number(91.4)), 91);
        assert_eq!(normalize_confidence(&RawValue::Number(1.0)), 100);
        assert_eq!(normalize_confidence(&text("0,8")), 80);
        assert_eq!(normalize_confidence(&RawValue::Absent), 0);
    }

    #[test]
    fn flag_normalization_is_strict_marker_equality() {
        assert!(normalize_flag(&text("x")));
        assert!(normalize_flag(&text(" X ")));
        assert!(!normalize_flag(&text("yes")));
        assert!(!normalize_flag(&text("")));
        assert!(!normalize_flag(&RawValue::Number(1.0)));
        assert!(!normalize_flag(&RawValue::Absent));
    }

    #[test]
    fn region_normalization_uppercases_and_truncates() {
        assert_eq!(normalize_region(&text(" gb ")), "GB");
        assert_eq!(normalize_region(&text("northwest")), "NO");
        assert_eq!(normalize_region(&RawValue::Absent), "");
    }

    #[test]
    fn resolver_matches_trimmed_case_insensitive_labels() {
        let tables = AliasTables::default();
        let record = row(&[("  Verantwortlich ", text("Kovacs"))]);
        let resolved = resolve(&record, CanonicalField::Owner, &tables);
        assert_eq!(resolved, Some(&text("Kovacs")));
        assert_eq!(resolve(&record, CanonicalField::Customer, &tables), None);
    }

    #[test]
    fn resolver_prefers_earlier_alias_when_several_labels_match() {
        let tables = AliasTables::default();
        let record = row(&[
            ("responsible", text("from-responsible")),
            ("owner", text("from-owner")),
        ]);
        for _ in 0..10 {
            let resolved = resolve(&record, CanonicalField::Owner, &tables);
            assert_eq!(resolved, Some(&text("from-owner")));
        }
    }

    #[test]
    fn resolver_rejects_partial_label_matches() {
        let tables = AliasTables::default();
        let record = row(&[("owner name", text("nope"))]);
        assert_eq!(resolve(&record, CanonicalField::Owner, &tables), None);
    }

    #[test]
    fn alias_override_replaces_one_list_and_rejects_unknown_fields() {
        let tables = AliasTables::from_yaml_str("owner:\n  - Felelos\n").unwrap();
        let record = row(&[("felelos", text("Kiss"))]);
        assert_eq!(resolve(&record, CanonicalField::Owner, &tables), Some(&text("Kiss")));
        // default owner aliases are gone after an override
        let record = row(&[("owner", text("Kiss"))]);
        assert_eq!(resolve(&record, CanonicalField::Owner, &tables), None);

        let err = AliasTables::from_yaml_str("turnover:\n  - t\n").unwrap_err();
        assert!(matches!(err, ImportError::UnknownField(ref f) if f == "turnover"));
    }

    #[test]
    fn mapper_preserves_length_and_assigns_unique_ids_across_batches() {
        let tables = AliasTables::default();
        let rows: Vec<RawRecord> = (0..5)
            .map(|i| row(&[("customer", text(&format!("C{i}")))]))
            .collect();

        let first = map_rows(&rows, &tables);
        let second = map_rows(&rows, &tables);
        assert_eq!(first.opportunities.len(), rows.len());
        assert_eq!(second.opportunities.len(), rows.len());

        let ids: HashSet<_> = first
            .opportunities
            .iter()
            .chain(second.opportunities.iter())
            .map(|o| o.id)
            .collect();
        assert_eq!(ids.len(), rows.len() * 2);
    }

    #[test]
    fn mapper_fills_sparse_rows_with_typed_defaults() {
        let tables = AliasTables::default();
        let batch = map_rows(&[RawRecord::new()], &tables);
        let opp = &batch.opportunities[0];
        assert_eq!(opp.owner, "");
        assert_eq!(opp.customer, "");
        assert_eq!(opp.amount, 0.0);
        assert_eq!(opp.confidence, 0);
        assert_eq!(opp.region, "");
        assert!(opp.month_flags.is_empty());
        assert!(opp.contacts.is_empty());
        assert!(!opp.pending_client_info);
    }

    #[test]
    fn mapper_populates_every_field_from_aliased_labels() {
        let tables = AliasTables::default();
        let record = row(&[
            ("Responsible", text("Anna Smith")),
            ("Kunde", text(" ACME ")),
            ("Vendor", text("Supplies AG")),
            ("Subject", text("Q1 expansion")),
            ("Betrag", text("1.234,56")),
            ("Region", text("de-south")),
            ("Probability", RawValue::Number(0.8)),
            ("Jan", text("x")),
            ("Year", text("X")),
            ("Follow up", text("called twice")),
            ("Contacts", text("Jo Birch; Max Muster")),
            ("Pending info", text("x")),
        ]);
        let batch = map_rows(std::slice::from_ref(&record), &tables);
        let opp = &batch.opportunities[0];
        assert_eq!(opp.owner, "Anna Smith");
        assert_eq!(opp.customer, "ACME");
        assert_eq!(opp.supplier, "Supplies AG");
        assert_eq!(opp.description, "Q1 expansion");
        assert_eq!(opp.amount, 1234.56);
        assert_eq!(opp.region, "DE");
        assert_eq!(opp.confidence, 80);
        assert!(opp.month_flags.jan);
        assert!(!opp.month_flags.feb);
        assert!(opp.month_flags.year);
        assert_eq!(opp.follow_up, "called twice");
        assert_eq!(opp.contacts, vec!["Jo Birch".to_string(), "Max Muster".to_string()]);
        assert!(opp.pending_client_info);
    }

    #[test]
    fn parse_import_rows_accepts_arrays_and_rows_wrappers_only() {
        let rows = parse_import_rows(r#"[{"customer": "ACME"}]"#).unwrap();
        assert_eq!(rows.len(), 1);

        let rows = parse_import_rows(r#"{"rows": [{"customer": "ACME"}, {}]}"#).unwrap();
        assert_eq!(rows.len(), 2);

        let err = parse_import_rows(r#"{"sheet": 1}"#).unwrap_err();
        assert!(matches!(err, ImportError::MissingTable));
        let err = parse_import_rows(r#""just text""#).unwrap_err();
        assert!(matches!(err, ImportError::MissingTable));
    }
}
