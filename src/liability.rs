// 🧮 Liability Calculator
// Base tax, interest, penalties and VDA savings for a state-year with nexus.
//
//   estimated_liability = base_tax + interest + penalties
//   vda_savings         = penalties
//
// All figures are fixed-point decimals rounded to the currency scale before
// they are summed, so the identity above holds exactly.

use crate::aggregator::StateYearAggregate;
use crate::config::EngineConfig;
use crate::error::{NexusError, NexusResult};
use crate::rules::{InterestMethod, StateThresholdRule};
use chrono::NaiveDate;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use serde::{Deserialize, Serialize};

// ============================================================================
// ACCRUAL TERMS
// ============================================================================

/// Interest and penalty terms of the law currently in force
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccrualTerms {
    pub interest_rate: Decimal,
    pub interest_method: InterestMethod,
    pub penalty_rate: Decimal,
}

impl From<&StateThresholdRule> for AccrualTerms {
    fn from(rule: &StateThresholdRule) -> Self {
        AccrualTerms {
            interest_rate: rule.interest_rate,
            interest_method: rule.interest_method,
            penalty_rate: rule.penalty_rate,
        }
    }
}

// ============================================================================
// LIABILITY RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiabilityResult {
    pub exposure_sales: Decimal,
    pub tax_rate: Decimal,
    pub base_tax: Decimal,
    pub interest: Decimal,
    pub penalties: Decimal,
    pub estimated_liability: Decimal,
    pub days_outstanding: i64,
    pub anchor_date: NaiveDate,
    /// Penalties a voluntary disclosure would waive
    pub vda_savings: Decimal,
    pub terms: AccrualTerms,
}

impl LiabilityResult {
    pub fn is_balanced(&self) -> bool {
        self.estimated_liability == self.base_tax + self.interest + self.penalties
    }

    /// Liability left after a voluntary disclosure
    pub fn vda_liability(&self) -> Decimal {
        self.estimated_liability - self.vda_savings
    }
}

// ============================================================================
// CALCULATOR
// ============================================================================

pub struct LiabilityCalculator {
    pub days_in_year: u32,
    pub currency_scale: u32,
}

impl LiabilityCalculator {
    pub fn new() -> Self {
        LiabilityCalculator {
            days_in_year: 365,
            currency_scale: 2,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        LiabilityCalculator {
            days_in_year: config.days_in_year,
            currency_scale: config.currency_scale,
        }
    }

    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.currency_scale, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Liability for one state-year.
    ///
    /// `year_rule` supplies the tax rate for that year's sales; `terms` come from
    /// the prevailing rule; `anchor_date` is the first exposure date of the
    /// first nexus year.
    pub fn calculate(
        &self,
        agg: &StateYearAggregate,
        year_rule: &StateThresholdRule,
        terms: &AccrualTerms,
        anchor_date: NaiveDate,
        valuation_date: NaiveDate,
    ) -> NexusResult<LiabilityResult> {
        let exposure_sales = self.round(agg.exposure_sales());
        if exposure_sales.is_sign_negative() && !exposure_sales.is_zero() {
            return Err(NexusError::NegativeExposure {
                state: agg.state.clone(),
                year: agg.year,
                exposure: exposure_sales,
            });
        }

        let base_tax = self.round(exposure_sales * year_rule.combined_tax_rate);
        let days_outstanding = (valuation_date - anchor_date).num_days().max(0);

        let interest = self.round(self.interest(base_tax, terms, days_outstanding).ok_or_else(
            || NexusError::InterestOverflow {
                state: agg.state.clone(),
                year: agg.year,
            },
        )?);
        let penalties = self.round(base_tax * terms.penalty_rate);

        Ok(LiabilityResult {
            exposure_sales,
            tax_rate: year_rule.combined_tax_rate,
            base_tax,
            interest,
            penalties,
            estimated_liability: base_tax + interest + penalties,
            days_outstanding,
            anchor_date,
            vda_savings: penalties,
            terms: *terms,
        })
    }

    /// Interest on `base_tax` over `days`. None on overflow.
    pub fn interest(&self, base_tax: Decimal, terms: &AccrualTerms, days: i64) -> Option<Decimal> {
        let days_in_year = Decimal::from(self.days_in_year);
        let days = days.max(0);

        match terms.interest_method {
            InterestMethod::Simple => base_tax
                .checked_mul(terms.interest_rate)?
                .checked_mul(Decimal::from(days))?
                .checked_div(days_in_year),
            InterestMethod::Compound => {
                let daily = Decimal::ONE.checked_add(terms.interest_rate.checked_div(days_in_year)?)?;
                let growth = daily.checked_powi(days)?;
                base_tax.checked_mul(growth.checked_sub(Decimal::ONE)?)
            }
        }
    }
}

impl Default for LiabilityCalculator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
