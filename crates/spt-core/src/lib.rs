//! Core domain model for SPT: canonical pipeline records and raw import cells.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "spt-core";

/// The fixed confidence ladder; each value maps to a named stage.
pub const CONFIDENCE_LEVELS: [i32; 7] = [0, 10, 30, 50, 80, 90, 100];

/// Named pipeline stage for a canonical confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Lost,
    Lead,
    Qualified,
    Proposal,
    Negotiation,
    Closing,
    Won,
}

impl Stage {
    /// Maps a stored confidence back to its stage. Values outside the
    /// canonical set (possible after import-time rounding) map to `None`;
    /// display code must tolerate them.
    pub fn from_confidence(confidence: i32) -> Option<Self> {
        match confidence {
            0 => Some(Stage::Lost),
            10 => Some(Stage::Lead),
            30 => Some(Stage::Qualified),
            50 => Some(Stage::Proposal),
            80 => Some(Stage::Negotiation),
            90 => Some(Stage::Closing),
            100 => Some(Stage::Won),
            _ => None,
        }
    }

    pub fn confidence(self) -> i32 {
        match self {
            Stage::Lost => 0,
            Stage::Lead => 10,
            Stage::Qualified => 30,
            Stage::Proposal => 50,
            Stage::Negotiation => 80,
            Stage::Closing => 90,
            Stage::Won => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Lost => "lost",
            Stage::Lead => "lead",
            Stage::Qualified => "qualified",
            Stage::Proposal => "proposal",
            Stage::Negotiation => "negotiation",
            Stage::Closing => "closing",
            Stage::Won => "won",
        }
    }
}

/// Confidence value of the fully-closed stage.
pub const CONFIDENCE_WON: i32 = 100;

/// A forecast-period marker column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Jan,
    Feb,
    Mar,
    Year,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Jan, Period::Feb, Period::Mar, Period::Year];

    pub fn label(self) -> &'static str {
        match self {
            Period::Jan => "jan",
            Period::Feb => "feb",
            Period::Mar => "mar",
            Period::Year => "year",
        }
    }
}

/// Fixed bitset of period markers: three forecast months plus the year
/// marker. Replaces the source data's free-string "x" cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodFlags {
    pub jan: bool,
    pub feb: bool,
    pub mar: bool,
    pub year: bool,
}

impl PeriodFlags {
    pub fn is_empty(&self) -> bool {
        !(self.jan || self.feb || self.mar || self.year)
    }

    /// True if any of the three forecast months is marked (the year
    /// marker does not count).
    pub fn any_forecast_month(&self) -> bool {
        self.jan || self.feb || self.mar
    }

    pub fn contains(&self, period: Period) -> bool {
        match period {
            Period::Jan => self.jan,
            Period::Feb => self.feb,
            Period::Mar => self.mar,
            Period::Year => self.year,
        }
    }

    pub fn set(&mut self, period: Period, present: bool) {
        match period {
            Period::Jan => self.jan = present,
            Period::Feb => self.feb = present,
            Period::Mar => self.mar = present,
            Period::Year => self.year = present,
        }
    }
}

/// One loosely-typed spreadsheet cell. The closed scalar set keeps the
/// import surface honest: anything richer than text-or-number is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawValue {
    Text(String),
    Number(f64),
    Absent,
}

impl RawValue {
    /// Bridges a JSON cell into the scalar set. Booleans come from
    /// spreadsheet exports that pre-parse marker columns, so `true`
    /// bridges to the marker text and `false` to absent; arrays, objects
    /// and null are absent.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::String(s) => RawValue::Text(s.clone()),
            JsonValue::Number(n) => n.as_f64().map(RawValue::Number).unwrap_or(RawValue::Absent),
            JsonValue::Bool(true) => RawValue::Text("x".to_string()),
            _ => RawValue::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RawValue::Absent)
    }
}

/// One spreadsheet row: arbitrary labels mapped to scalar cells. BTreeMap
/// keeps iteration deterministic across runs.
pub type RawRecord = BTreeMap<String, RawValue>;

/// Canonical pipeline entry. Plain serializable record; all invariants
/// are enforced by the import mapper, not the struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub owner: String,
    pub customer: String,
    pub supplier: String,
    pub description: String,
    pub amount: f64,
    pub region: String,
    pub confidence: i32,
    pub month_flags: PeriodFlags,
    pub follow_up: String,
    pub contacts: Vec<String>,
    pub pending_client_info: bool,
}

impl Opportunity {
    pub fn stage(&self) -> Option<Stage> {
        Stage::from_confidence(self.confidence)
    }

    pub fn is_won(&self) -> bool {
        self.confidence == CONFIDENCE_WON
    }
}

/// A target tied to an optional customer and/or supplier. An unset key
/// means the goal spans every value of that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub customer: Option<String>,
    pub supplier: Option<String>,
    pub target: f64,
}

impl Goal {
    pub fn new(customer: Option<String>, supplier: Option<String>, target: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer,
            supplier,
            target,
        }
    }
}

/// A person at a customer; looked up by exact customer name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub role: String,
    pub phone: String,
    pub email: String,
    pub customer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationRule {
    HighValueStale,
    ClosingTrigger,
    PendingClientInfo,
}

impl NotificationRule {
    pub fn name(self) -> &'static str {
        match self {
            NotificationRule::HighValueStale => "high-value-stale",
            NotificationRule::ClosingTrigger => "closing-trigger",
            NotificationRule::PendingClientInfo => "pending-client-info",
        }
    }
}

/// Derived alert. Never persisted; recomputed from the current list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub rule: NotificationRule,
    pub severity: Severity,
    pub opportunity_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewerRole {
    Elevated,
    Standard,
}

/// Per-call viewing context supplied by the hosting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerContext {
    pub role: ViewerRole,
    pub display_name: String,
}

impl ViewerContext {
    pub fn new(role: ViewerRole, display_name: impl Into<String>) -> Self {
        Self {
            role,
            display_name: display_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_mapping_round_trips_canonical_levels() {
        for level in CONFIDENCE_LEVELS {
            let stage = Stage::from_confidence(level).expect("canonical level");
            assert_eq!(stage.confidence(), level);
        }
        assert_eq!(Stage::from_confidence(91), None);
        assert_eq!(Stage::from_confidence(-10), None);
    }

    #[test]
    fn period_flags_distinguish_forecast_months_from_year() {
        let mut flags = PeriodFlags::default();
        assert!(flags.is_empty());
        flags.set(Period::Year, true);
        assert!(!flags.is_empty());
        assert!(!flags.any_forecast_month());
        flags.set(Period::Feb, true);
        assert!(flags.any_forecast_month());
        assert!(flags.contains(Period::Feb));
    }

    #[test]
    fn raw_value_bridges_json_scalars_only() {
        assert_eq!(
            RawValue::from_json(&serde_json::json!("ACME")),
            RawValue::Text("ACME".to_string())
        );
        assert_eq!(RawValue::from_json(&serde_json::json!(12.5)), RawValue::Number(12.5));
        assert_eq!(
            RawValue::from_json(&serde_json::json!(true)),
            RawValue::Text("x".to_string())
        );
        assert_eq!(RawValue::from_json(&serde_json::json!(false)), RawValue::Absent);
        assert_eq!(RawValue::from_json(&serde_json::json!(null)), RawValue::Absent);
        assert_eq!(RawValue::from_json(&serde_json::json!([1, 2])), RawValue::Absent);
    }
}
