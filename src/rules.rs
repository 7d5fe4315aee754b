// 🏷️ Threshold Rules - Rules as Data
// Per-state economic nexus thresholds, tax rates and accrual terms,
// versioned by the date the law took effect.

use anyhow::{Context as AnyhowContext, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// How the revenue and transaction tests combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThresholdOperator {
    #[default]
    #[serde(alias = "or")]
    Or,
    #[serde(alias = "and")]
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestMethod {
    #[default]
    Simple,
    Compound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateThresholdRule {
    /// Two-letter state code
    pub state: String,

    /// First day this version of the law applies
    pub effective_from: NaiveDate,

    /// Gross sales that trigger nexus (None = no revenue test)
    pub revenue_threshold: Option<Decimal>,

    /// Transaction count that triggers nexus (None = no count test)
    pub transaction_threshold: Option<u64>,

    #[serde(default)]
    pub threshold_operator: ThresholdOperator,

    /// State + average local rate, as a fraction (0.0825 = 8.25%)
    pub combined_tax_rate: Decimal,

    /// Annual interest rate on unpaid tax, as a fraction
    #[serde(default)]
    pub interest_rate: Decimal,

    #[serde(default)]
    pub interest_method: InterestMethod,

    /// Failure-to-file/pay penalty, as a fraction of tax
    #[serde(default)]
    pub penalty_rate: Decimal,

    /// Whether marketplace-facilitated sales count toward the threshold test
    #[serde(default = "default_true")]
    pub marketplace_sales_count_toward_threshold: bool,

    /// Threshold figures are an estimate rather than statute text
    #[serde(default)]
    pub estimated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl StateThresholdRule {
    /// States without a sales tax publish no thresholds
    pub fn has_sales_tax(&self) -> bool {
        self.revenue_threshold.is_some() || self.transaction_threshold.is_some()
    }
}

// ============================================================================
// RULE PROVIDER
// ============================================================================

/// Read-only lookup of threshold rules, passed into the engine
pub trait RuleProvider: Send + Sync {
    /// Rule in force on `date` for `state`
    fn rule_on(&self, state: &str, date: NaiveDate) -> Option<&StateThresholdRule>;

    /// Rule governing calendar year `year`: the version in force on December 31
    fn rule_for_year(&self, state: &str, year: i32) -> Option<&StateThresholdRule> {
        NaiveDate::from_ymd_opt(year, 12, 31).and_then(|d| self.rule_on(state, d))
    }
}

// ============================================================================
// RULE TABLE
// ============================================================================

/// In-memory rule table keyed by state, each state's versions sorted by effective date
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: BTreeMap<String, Vec<StateThresholdRule>>,
}

impl RuleTable {
    pub fn new() -> Self {
        RuleTable {
            rules: BTreeMap::new(),
        }
    }

    /// Load rules from a JSON array
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: Vec<StateThresholdRule> =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        let table = RuleTable::from_rules(rules);
        debug!(rules = table.rule_count(), "Loaded threshold rules");
        Ok(table)
    }

    pub fn from_rules(rules: Vec<StateThresholdRule>) -> Self {
        let mut table = RuleTable::new();
        for rule in rules {
            table.add_rule(rule);
        }
        table
    }

    /// Add a rule version. A version with the same state and effective date replaces the old one.
    pub fn add_rule(&mut self, mut rule: StateThresholdRule) {
        rule.state = rule.state.to_uppercase();
        let versions = self.rules.entry(rule.state.clone()).or_default();
        versions.retain(|r| r.effective_from != rule.effective_from);
        versions.push(rule);
        versions.sort_by_key(|r| r.effective_from);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }
}

impl RuleProvider for RuleTable {
    fn rule_on(&self, state: &str, date: NaiveDate) -> Option<&StateThresholdRule> {
        self.rules
            .get(state)?
            .iter()
            .rev()
            .find(|r| r.effective_from <= date)
    }
}

// ============================================================================
// TESTS
// ============================================================================
