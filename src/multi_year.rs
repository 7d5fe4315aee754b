// 📚 Multi-Year Aggregator
// Rolls one state's per-year results into an "all years" view. Flow figures
// are summed; point-in-time figures are picked from the right year.

use crate::confidence::ConfidenceLevel;
use crate::liability::LiabilityResult;
use crate::propagator::{NexusStatus, NexusType};
use crate::rules::InterestMethod;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Everything reported for one state in one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearResult {
    pub year: i32,
    pub nexus_status: NexusStatus,
    pub nexus_type: NexusType,
    pub economic_nexus: bool,
    pub physical_nexus: bool,
    pub total_sales: Decimal,
    pub direct_sales: Decimal,
    pub marketplace_sales: Decimal,
    pub transaction_count: u64,
    pub threshold_percentage: Decimal,
    pub revenue_threshold: Option<Decimal>,
    pub transaction_threshold: Option<u64>,
    pub confidence_level: ConfidenceLevel,
    pub first_nexus_year: Option<i32>,
    pub sticky: bool,
    pub registered: bool,
    pub liability: Option<LiabilityResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiYearAggregate {
    pub first_year: i32,
    pub last_year: i32,

    pub total_sales: Decimal,
    pub direct_sales: Decimal,
    pub marketplace_sales: Decimal,
    pub transaction_count: u64,

    pub exposure_sales: Decimal,
    pub base_tax: Decimal,
    pub interest: Decimal,
    pub penalties: Decimal,
    /// Re-derived from the summed components, never summed directly
    pub estimated_liability: Decimal,
    pub vda_savings: Decimal,

    /// Current law: taken from the most recent year with a liability
    pub interest_rate: Option<Decimal>,
    pub interest_method: Option<InterestMethod>,
    pub penalty_rate: Option<Decimal>,

    /// True accrual start: taken from the earliest year with a liability
    pub days_outstanding: Option<i64>,
    pub anchor_date: Option<NaiveDate>,

    pub first_nexus_year: Option<i32>,

    /// Union of every year's own triggers
    pub nexus_type: NexusType,

    /// Status of the most recent year
    pub nexus_status: NexusStatus,

    pub confidence_level: ConfidenceLevel,
}

impl MultiYearAggregate {
    pub fn has_nexus(&self) -> bool {
        self.nexus_status == NexusStatus::HasNexus
    }
}

/// Roll up one state's years. Returns None for an empty slice.
pub fn aggregate_years(years: &[YearResult]) -> Option<MultiYearAggregate> {
    let mut ordered: Vec<&YearResult> = years.iter().collect();
    ordered.sort_by_key(|y| y.year);

    let first = *ordered.first()?;
    let last = *ordered.last()?;

    let mut agg = MultiYearAggregate {
        first_year: first.year,
        last_year: last.year,
        total_sales: Decimal::ZERO,
        direct_sales: Decimal::ZERO,
        marketplace_sales: Decimal::ZERO,
        transaction_count: 0,
        exposure_sales: Decimal::ZERO,
        base_tax: Decimal::ZERO,
        interest: Decimal::ZERO,
        penalties: Decimal::ZERO,
        estimated_liability: Decimal::ZERO,
        vda_savings: Decimal::ZERO,
        interest_rate: None,
        interest_method: None,
        penalty_rate: None,
        days_outstanding: None,
        anchor_date: None,
        first_nexus_year: None,
        nexus_type: NexusType::None,
        nexus_status: last.nexus_status,
        confidence_level: ConfidenceLevel::High,
    };

    let mut any_economic = false;
    let mut any_physical = false;

    for y in &ordered {
        agg.total_sales += y.total_sales;
        agg.direct_sales += y.direct_sales;
        agg.marketplace_sales += y.marketplace_sales;
        agg.transaction_count += y.transaction_count;

        any_economic |= y.economic_nexus;
        any_physical |= y.physical_nexus;
        agg.confidence_level = agg.confidence_level.min(y.confidence_level);

        if agg.first_nexus_year.is_none() {
            agg.first_nexus_year = y.first_nexus_year;
        }

        if let Some(liability) = &y.liability {
            agg.exposure_sales += liability.exposure_sales;
            agg.base_tax += liability.base_tax;
            agg.interest += liability.interest;
            agg.penalties += liability.penalties;

            // Earliest year wins for the accrual start
            if agg.days_outstanding.is_none() {
                agg.days_outstanding = Some(liability.days_outstanding);
                agg.anchor_date = Some(liability.anchor_date);
            }

            // Latest year wins for the rates
            agg.interest_rate = Some(liability.terms.interest_rate);
            agg.interest_method = Some(liability.terms.interest_method);
            agg.penalty_rate = Some(liability.terms.penalty_rate);
        }
    }

    agg.estimated_liability = agg.base_tax + agg.interest + agg.penalties;
    agg.vda_savings = agg.penalties;
    agg.nexus_type = NexusType::from_triggers(any_economic, any_physical);

    Some(agg)
}

// ============================================================================
// TESTS
// ============================================================================
