//! Derived-view computation over immutable pipeline snapshots: visibility,
//! company and goal aggregation, and the notification rule pass.
//!
//! Every function here takes a slice and returns fresh values; callers own
//! the single canonical list and replace it wholesale after edits. Full
//! recomputation on every change is the contract, since list sizes are
//! bounded by manual spreadsheet import.

use serde::{Deserialize, Serialize};
use spt_core::{
    Contact, Goal, Notification, NotificationRule, Opportunity, Severity, ViewerContext,
    ViewerRole, CONFIDENCE_WON,
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "spt-engine";

/// Amount above which a deal without follow-up notes is flagged.
pub const HIGH_VALUE_THRESHOLD: f64 = 500_000.0;

/// Minimum follow-up journal length for a high-value deal to count as
/// worked.
pub const MIN_FOLLOW_UP_LEN: usize = 10;

/// One immutable dataset snapshot. The hosting application holds a single
/// mutable reference to the current snapshot and swaps it after every
/// engine call; nothing in this crate mutates a snapshot in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub opportunities: Vec<Opportunity>,
    pub goals: Vec<Goal>,
    pub contacts: Vec<Contact>,
}

impl PipelineSnapshot {
    pub fn with_opportunities(mut self, opportunities: Vec<Opportunity>) -> Self {
        self.opportunities = opportunities;
        self
    }

    pub fn with_goals(mut self, goals: Vec<Goal>) -> Self {
        self.goals = goals;
        self
    }

    pub fn with_contacts(mut self, contacts: Vec<Contact>) -> Self {
        self.contacts = contacts;
        self
    }

    /// Contacts attached to a customer, by exact name match.
    pub fn contacts_for_customer(&self, customer: &str) -> Vec<&Contact> {
        self.contacts
            .iter()
            .filter(|c| c.customer == customer)
            .collect()
    }
}

fn match_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Restricts a list to what the viewer may see.
///
/// An unset display name yields nothing for any role: a profile must be
/// configured before data becomes visible. The elevated role sees the full
/// list. Everyone else gets the bidirectional substring match between
/// `owner` and their display name: deliberately permissive to tolerate
/// partial-name data entry, and a known weak point on short or common
/// names (false-positive visibility is possible; kept as the source system
/// behaves).
pub fn visible_to(opportunities: &[Opportunity], viewer: &ViewerContext) -> Vec<Opportunity> {
    let viewer_name = match_key(&viewer.display_name);
    if viewer_name.is_empty() {
        debug!("viewer profile unset, hiding all opportunities");
        return Vec::new();
    }
    if viewer.role == ViewerRole::Elevated {
        return opportunities.to_vec();
    }
    opportunities
        .iter()
        .filter(|opp| {
            let owner = match_key(&opp.owner);
            owner.contains(&viewer_name) || viewer_name.contains(&owner)
        })
        .cloned()
        .collect()
}

/// Per-customer rollup with the member list retained for drill-down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRollup {
    pub customer: String,
    pub count: usize,
    pub total_amount: f64,
    pub opportunities: Vec<Opportunity>,
}

/// Groups opportunities by exact customer value, ordered by descending
/// total amount. The sort is stable, so equal totals keep first-seen
/// order.
pub fn company_rollups(opportunities: &[Opportunity]) -> Vec<CompanyRollup> {
    let mut rollups: Vec<CompanyRollup> = Vec::new();
    for opp in opportunities {
        match rollups.iter_mut().find(|r| r.customer == opp.customer) {
            Some(rollup) => {
                rollup.count += 1;
                rollup.total_amount += opp.amount;
                rollup.opportunities.push(opp.clone());
            }
            None => rollups.push(CompanyRollup {
                customer: opp.customer.clone(),
                count: 1,
                total_amount: opp.amount,
                opportunities: vec![opp.clone()],
            }),
        }
    }
    rollups.sort_by(|a, b| b.total_amount.total_cmp(&a.total_amount));
    rollups
}

/// Named reasons a goal is refused. Rejection makes no state change; the
/// caller displays the reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GoalRejection {
    #[error("a goal with the same customer/supplier scope already exists")]
    DuplicateScope,
    #[error("goal target must be positive")]
    NonPositiveTarget,
}

/// The validated goal collection. Scope pairs are unique
/// case-insensitively, matching how goals are matched against
/// opportunities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalBook {
    goals: Vec<Goal>,
}

impl GoalBook {
    pub fn new(goals: Vec<Goal>) -> Self {
        Self { goals }
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn into_goals(self) -> Vec<Goal> {
        self.goals
    }

    fn scope_key(customer: Option<&str>, supplier: Option<&str>) -> (Option<String>, Option<String>) {
        (customer.map(match_key), supplier.map(match_key))
    }

    pub fn add(&mut self, goal: Goal) -> Result<(), GoalRejection> {
        if goal.target <= 0.0 {
            return Err(GoalRejection::NonPositiveTarget);
        }
        let key = Self::scope_key(goal.customer.as_deref(), goal.supplier.as_deref());
        let duplicate = self
            .goals
            .iter()
            .any(|g| Self::scope_key(g.customer.as_deref(), g.supplier.as_deref()) == key);
        if duplicate {
            return Err(GoalRejection::DuplicateScope);
        }
        self.goals.push(goal);
        Ok(())
    }
}

/// Realized-vs-target view for one goal. `realized` is always computed,
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub goal: Goal,
    pub realized: f64,
    pub percent: f64,
}

fn goal_matches(goal: &Goal, opp: &Opportunity) -> bool {
    let customer_ok = goal
        .customer
        .as_deref()
        .map(|c| match_key(c) == match_key(&opp.customer))
        .unwrap_or(true);
    let supplier_ok = goal
        .supplier
        .as_deref()
        .map(|s| match_key(s) == match_key(&opp.supplier))
        .unwrap_or(true);
    customer_ok && supplier_ok
}

/// Computes realized amounts (fully-closed opportunities matching each
/// goal's scope, unset keys spanning the whole dimension) and the
/// realized/target percentage. A non-positive target clamps the
/// percentage to 0 rather than letting NaN or infinity escape.
pub fn goal_progress(goals: &[Goal], opportunities: &[Opportunity]) -> Vec<GoalProgress> {
    goals
        .iter()
        .map(|goal| {
            let realized: f64 = opportunities
                .iter()
                .filter(|opp| opp.confidence == CONFIDENCE_WON && goal_matches(goal, opp))
                .map(|opp| opp.amount)
                .sum();
            let percent = if goal.target > 0.0 {
                realized / goal.target * 100.0
            } else {
                0.0
            };
            GoalProgress {
                goal: goal.clone(),
                realized,
                percent,
            }
        })
        .collect()
}

type RuleFn = fn(&Opportunity) -> Option<Notification>;

/// Fixed rule table. Rules are independent; one opportunity can trigger
/// several. Table order fixes the output order.
const RULES: [RuleFn; 3] = [high_value_stale, closing_trigger, pending_client_info];

fn alert_id(rule: NotificationRule, opportunity_id: &Uuid) -> Uuid {
    // Deterministic so re-running over an unchanged list reproduces the
    // exact alert set.
    Uuid::new_v5(opportunity_id, rule.name().as_bytes())
}

fn high_value_stale(opp: &Opportunity) -> Option<Notification> {
    let stale = opp.follow_up.is_empty() || opp.follow_up.chars().count() < MIN_FOLLOW_UP_LEN;
    if opp.amount > HIGH_VALUE_THRESHOLD && stale {
        return Some(Notification {
            id: alert_id(NotificationRule::HighValueStale, &opp.id),
            rule: NotificationRule::HighValueStale,
            severity: Severity::Warning,
            opportunity_id: opp.id,
            message: format!(
                "high-value deal for {} has no substantial follow-up",
                display_customer(opp)
            ),
        });
    }
    None
}

fn closing_trigger(opp: &Opportunity) -> Option<Notification> {
    if opp.confidence == 90 && !opp.month_flags.any_forecast_month() {
        return Some(Notification {
            id: alert_id(NotificationRule::ClosingTrigger, &opp.id),
            rule: NotificationRule::ClosingTrigger,
            severity: Severity::Info,
            opportunity_id: opp.id,
            message: format!(
                "deal for {} is near closing but not placed in a forecast month",
                display_customer(opp)
            ),
        });
    }
    None
}

fn pending_client_info(opp: &Opportunity) -> Option<Notification> {
    if opp.pending_client_info {
        return Some(Notification {
            id: alert_id(NotificationRule::PendingClientInfo, &opp.id),
            rule: NotificationRule::PendingClientInfo,
            severity: Severity::Warning,
            opportunity_id: opp.id,
            message: format!("{} is still owed information", display_customer(opp)),
        });
    }
    None
}

fn display_customer(opp: &Opportunity) -> &str {
    if opp.customer.is_empty() {
        "an unnamed customer"
    } else {
        &opp.customer
    }
}

/// Stateless notification pass: every rule evaluated against every
/// opportunity in list order. Idempotent by construction: ids derive
/// from rule name and opportunity id, and ordering follows the input.
pub fn notifications(opportunities: &[Opportunity]) -> Vec<Notification> {
    let alerts: Vec<Notification> = opportunities
        .iter()
        .flat_map(|opp| RULES.iter().filter_map(|rule| rule(opp)))
        .collect();
    debug!(count = alerts.len(), "notification pass complete");
    alerts
}
