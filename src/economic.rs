// 💰 Economic Nexus Classifier
// Tests a state-year's sales against that state's revenue / transaction thresholds.

use crate::aggregator::StateYearAggregate;
use crate::rules::{StateThresholdRule, ThresholdOperator};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicVerdict {
    pub meets_revenue: bool,
    pub meets_transactions: bool,
    pub economic_nexus: bool,

    /// Highest of sales/revenue_threshold and count/transaction_threshold, in percent.
    /// Not capped at 100 and not rounded; see `round_percentage` for display.
    pub threshold_percentage: Decimal,

    /// Sales figure actually tested (marketplace removed when the state says so)
    pub threshold_sales: Decimal,
    pub threshold_transactions: u64,

    /// Month (1-12) in which cumulative activity first met the rule
    pub crossed_month: Option<u32>,
}

impl EconomicVerdict {
    /// First day of the month nexus was crossed
    pub fn exposure_start(&self, year: i32) -> Option<NaiveDate> {
        self.crossed_month
            .and_then(|m| NaiveDate::from_ymd_opt(year, m, 1))
    }
}

/// Combine per-test flags. Tests with a null threshold take no part.
fn meets_rule(rule: &StateThresholdRule, meets_revenue: bool, meets_transactions: bool) -> bool {
    let mut flags = Vec::with_capacity(2);
    if rule.revenue_threshold.is_some() {
        flags.push(meets_revenue);
    }
    if rule.transaction_threshold.is_some() {
        flags.push(meets_transactions);
    }
    if flags.is_empty() {
        return false;
    }

    match rule.threshold_operator {
        ThresholdOperator::Or => flags.iter().any(|f| *f),
        ThresholdOperator::And => flags.iter().all(|f| *f),
    }
}

fn test_revenue(rule: &StateThresholdRule, sales: Decimal) -> bool {
    rule.revenue_threshold.map_or(false, |t| sales >= t)
}

fn test_transactions(rule: &StateThresholdRule, count: u64) -> bool {
    rule.transaction_threshold.map_or(false, |t| count >= t)
}

/// Unrounded, so comparisons against a cut-off see the exact figure
pub fn threshold_percentage(rule: &StateThresholdRule, sales: Decimal, count: u64) -> Decimal {
    let revenue_pct = rule
        .revenue_threshold
        .filter(|t| !t.is_zero())
        .map(|t| sales / t * HUNDRED);
    let count_pct = rule
        .transaction_threshold
        .filter(|t| *t > 0)
        .map(|t| Decimal::from(count) / Decimal::from(t) * HUNDRED);

    let pct = match (revenue_pct, count_pct) {
        (Some(r), Some(c)) => r.max(c),
        (Some(r), None) => r,
        (None, Some(c)) => c,
        (None, None) => Decimal::ZERO,
    };

    pct.max(Decimal::ZERO)
}

/// Two-decimal percentage for reports
pub fn round_percentage(pct: Decimal) -> Decimal {
    pct.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn classify_economic(agg: &StateYearAggregate, rule: &StateThresholdRule) -> EconomicVerdict {
    let include_marketplace = rule.marketplace_sales_count_toward_threshold;
    let sales = agg.threshold_sales(include_marketplace);
    let count = agg.threshold_transactions(include_marketplace);

    let meets_revenue = test_revenue(rule, sales);
    let meets_transactions = test_transactions(rule, count);
    let economic_nexus = meets_rule(rule, meets_revenue, meets_transactions);

    let crossed_month = if economic_nexus {
        let mut cum_sales = Decimal::ZERO;
        let mut cum_count = 0u64;
        agg.monthly_breakdown
            .iter()
            .position(|month| {
                cum_sales += month.threshold_sales(include_marketplace);
                cum_count += month.threshold_transactions(include_marketplace);
                meets_rule(
                    rule,
                    test_revenue(rule, cum_sales),
                    test_transactions(rule, cum_count),
                )
            })
            .map(|idx| idx as u32 + 1)
    } else {
        None
    };

    EconomicVerdict {
        meets_revenue,
        meets_transactions,
        economic_nexus,
        threshold_percentage: threshold_percentage(rule, sales, count),
        threshold_sales: sales,
        threshold_transactions: count,
        crossed_month,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate_state;
    use crate::rules::InterestMethod;
    use crate::transaction::{Channel, Transaction};
    use rust_decimal_macros::dec;

    fn rule(revenue: Option<Decimal>, count: Option<u64>, op: ThresholdOperator) -> StateThresholdRule {
        StateThresholdRule {
            state: "CA".to_string(),
            effective_from: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            revenue_threshold: revenue,
            transaction_threshold: count,
            threshold_operator: op,
            combined_tax_rate: dec!(0.0725),
            interest_rate: dec!(0.10),
            interest_method: InterestMethod::Simple,
            penalty_rate: dec!(0.10),
            marketplace_sales_count_toward_threshold: true,
            estimated: false,
            description: None,
        }
    }

    /// `count` transactions spread over the year totalling `sales`
    fn year_of(state: &str, sales: Decimal, count: u32, channel: Channel) -> StateYearAggregate {
        let each = sales / Decimal::from(count);
        let txs: Vec<Transaction> = (0..count)
            .map(|i| {
                let date = NaiveDate::from_ymd_opt(2023, i % 12 + 1, 15).unwrap();
                Transaction::new(state, date, each, channel)
            })
            .collect();
        aggregate_state(state, &txs).unwrap().remove(&2023).unwrap()
    }

    #[test]
    fn test_or_operator_either_test_triggers() {
        let agg = year_of("CA", dec!(150000), 50, Channel::Direct);
        let verdict = classify_economic(&agg, &rule(Some(dec!(100000)), Some(200), ThresholdOperator::Or));

        assert!(verdict.meets_revenue);
        assert!(!verdict.meets_transactions);
        assert!(verdict.economic_nexus);
        assert_eq!(verdict.threshold_percentage, dec!(150));
    }

    #[test]
    fn test_and_operator_requires_both() {
        let agg = year_of("CA", dec!(150000), 50, Channel::Direct);
        let verdict = classify_economic(&agg, &rule(Some(dec!(100000)), Some(200), ThresholdOperator::And));

        assert!(verdict.meets_revenue);
        assert!(!verdict.economic_nexus);
        assert_eq!(verdict.crossed_month, None);
    }

    #[test]
    fn test_null_threshold_excluded_from_and() {
        let agg = year_of("CA", dec!(150000), 50, Channel::Direct);
        let verdict = classify_economic(&agg, &rule(Some(dec!(100000)), None, ThresholdOperator::And));
        assert!(verdict.economic_nexus);
        assert!(!verdict.meets_transactions);
    }

    #[test]
    fn test_transaction_only_threshold_percentage() {
        let agg = year_of("CA", dec!(1000), 150, Channel::Direct);
        let verdict = classify_economic(&agg, &rule(None, Some(200), ThresholdOperator::Or));

        assert!(!verdict.economic_nexus);
        assert_eq!(verdict.threshold_percentage, dec!(75));
    }

    #[test]
    fn test_higher_percentage_reported() {
        let agg = year_of("CA", dec!(80000), 190, Channel::Direct);
        let verdict = classify_economic(&agg, &rule(Some(dec!(100000)), Some(200), ThresholdOperator::Or));
        assert_eq!(verdict.threshold_percentage, dec!(95));
    }

    #[test]
    fn test_marketplace_excluded_from_test_only() {
        let txs = vec![
            Transaction::new("GA", NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(), dec!(20000), Channel::Direct),
            Transaction::new("GA", NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(), dec!(100000), Channel::Marketplace),
        ];
        let agg = aggregate_state("GA", &txs).unwrap().remove(&2023).unwrap();

        let mut ga = rule(Some(dec!(100000)), None, ThresholdOperator::Or);
        ga.marketplace_sales_count_toward_threshold = false;

        let verdict = classify_economic(&agg, &ga);
        assert!(!verdict.economic_nexus);
        assert_eq!(verdict.threshold_sales, dec!(20000));
        assert_eq!(verdict.threshold_percentage, dec!(20));
        assert_eq!(agg.total_sales, dec!(120000));
    }

    #[test]
    fn test_crossed_month_from_cumulative_sales() {
        let txs: Vec<Transaction> = (1..=12)
            .map(|m| {
                Transaction::new("CA", NaiveDate::from_ymd_opt(2023, m, 5).unwrap(), dec!(10000), Channel::Direct)
            })
            .collect();
        let agg = aggregate_state("CA", &txs).unwrap().remove(&2023).unwrap();
        let verdict = classify_economic(&agg, &rule(Some(dec!(100000)), None, ThresholdOperator::Or));

        assert!(verdict.economic_nexus);
        assert_eq!(verdict.crossed_month, Some(10));
        assert_eq!(
            verdict.exposure_start(2023),
            NaiveDate::from_ymd_opt(2023, 10, 1)
        );
    }

    #[test]
    fn test_percentage_kept_exact_until_reported() {
        let r = rule(Some(dec!(100000)), None, ThresholdOperator::Or);
        let pct = threshold_percentage(&r, dec!(89995), 1);

        assert_eq!(pct, dec!(89.995));
        assert!(pct < dec!(90));
        assert_eq!(round_percentage(pct), dec!(90.00));
    }

    #[test]
    fn test_no_thresholds_never_triggers() {
        let agg = year_of("OR", dec!(5000000), 5000, Channel::Direct);
        let verdict = classify_economic(&agg, &rule(None, None, ThresholdOperator::Or));
        assert!(!verdict.economic_nexus);
        assert_eq!(verdict.threshold_percentage, Decimal::ZERO);
    }
}
