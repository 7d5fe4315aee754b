// 📊 Transaction Aggregator
// Groups sales by state and calendar year, with a 12-slot monthly breakdown
// used downstream to find the month a threshold was crossed.

use crate::error::{NexusError, NexusResult};
use crate::transaction::{Channel, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// MONTHLY TOTAL
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTotal {
    pub sales: Decimal,
    pub marketplace_sales: Decimal,
    pub transaction_count: u64,
    pub marketplace_transaction_count: u64,
}

impl MonthlyTotal {
    /// Sales figure for the threshold test
    pub fn threshold_sales(&self, include_marketplace: bool) -> Decimal {
        if include_marketplace {
            self.sales
        } else {
            self.sales - self.marketplace_sales
        }
    }

    pub fn threshold_transactions(&self, include_marketplace: bool) -> u64 {
        if include_marketplace {
            self.transaction_count
        } else {
            self.transaction_count - self.marketplace_transaction_count
        }
    }
}

// ============================================================================
// STATE-YEAR AGGREGATE
// ============================================================================

/// Sales for one state in one calendar year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateYearAggregate {
    pub state: String,
    pub year: i32,

    /// Gross sales, all channels
    pub total_sales: Decimal,

    /// Direct and unclassified channel sales
    pub direct_sales: Decimal,

    /// Marketplace-facilitated sales
    pub marketplace_sales: Decimal,

    pub transaction_count: u64,
    pub marketplace_transaction_count: u64,

    /// Sales removed from the tax base (never from the nexus test)
    pub exempt_amount: Decimal,

    /// Rows whose channel could not be classified
    pub ambiguous_channel_count: u64,

    /// Rows without a transaction id
    pub missing_id_count: u64,

    /// Rows without an id that repeat an earlier row field for field
    pub repeated_row_count: u64,

    /// January..December
    pub monthly_breakdown: [MonthlyTotal; 12],
}

impl StateYearAggregate {
    pub fn empty(state: &str, year: i32) -> Self {
        StateYearAggregate {
            state: state.to_string(),
            year,
            total_sales: Decimal::ZERO,
            direct_sales: Decimal::ZERO,
            marketplace_sales: Decimal::ZERO,
            transaction_count: 0,
            marketplace_transaction_count: 0,
            exempt_amount: Decimal::ZERO,
            ambiguous_channel_count: 0,
            missing_id_count: 0,
            repeated_row_count: 0,
            monthly_breakdown: [MonthlyTotal::default(); 12],
        }
    }

    fn add(&mut self, tx: &Transaction, repeated: bool) {
        let month = &mut self.monthly_breakdown[tx.month_index()];
        month.sales += tx.amount;
        month.transaction_count += 1;

        self.total_sales += tx.amount;
        self.transaction_count += 1;
        self.exempt_amount += tx.effective_exempt();

        if tx.channel.is_marketplace() {
            self.marketplace_sales += tx.amount;
            self.marketplace_transaction_count += 1;
            month.marketplace_sales += tx.amount;
            month.marketplace_transaction_count += 1;
        } else {
            self.direct_sales += tx.amount;
            if tx.channel == Channel::Other {
                self.ambiguous_channel_count += 1;
            }
        }

        if tx.transaction_id.is_none() {
            self.missing_id_count += 1;
        }
        if repeated {
            self.repeated_row_count += 1;
        }
    }

    /// Taxable base: gross sales less exemptions, floored at zero
    pub fn exposure_sales(&self) -> Decimal {
        (self.total_sales - self.exempt_amount).max(Decimal::ZERO)
    }

    pub fn threshold_sales(&self, include_marketplace: bool) -> Decimal {
        if include_marketplace {
            self.total_sales
        } else {
            self.total_sales - self.marketplace_sales
        }
    }

    pub fn threshold_transactions(&self, include_marketplace: bool) -> u64 {
        if include_marketplace {
            self.transaction_count
        } else {
            self.transaction_count - self.marketplace_transaction_count
        }
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// True when `tx` has no id and hashes the same as an earlier id-less row
fn is_repeat(seen: &mut HashSet<String>, tx: &Transaction) -> bool {
    tx.transaction_id.is_none() && !seen.insert(tx.idempotency_hash())
}

/// Aggregate one state's transactions by calendar year.
/// Every transaction must belong to `state`; anything else is a malformed input.
pub fn aggregate_state(
    state: &str,
    transactions: &[Transaction],
) -> NexusResult<BTreeMap<i32, StateYearAggregate>> {
    let mut by_year: BTreeMap<i32, StateYearAggregate> = BTreeMap::new();
    let mut seen = HashSet::new();

    for (idx, tx) in transactions.iter().enumerate() {
        let line = idx + 1;
        tx.validate(line)?;
        if tx.state != state {
            return Err(NexusError::malformed(
                line,
                format!("transaction for {} passed to {} aggregation", tx.state, state),
            ));
        }

        let repeated = is_repeat(&mut seen, tx);
        by_year
            .entry(tx.year())
            .or_insert_with(|| StateYearAggregate::empty(state, tx.year()))
            .add(tx, repeated);
    }

    Ok(by_year)
}

/// Aggregate a whole company's transactions, state → year → aggregate
pub fn aggregate_all(
    transactions: &[Transaction],
) -> NexusResult<BTreeMap<String, BTreeMap<i32, StateYearAggregate>>> {
    let mut result: BTreeMap<String, BTreeMap<i32, StateYearAggregate>> = BTreeMap::new();
    let mut seen = HashSet::new();

    for (idx, tx) in transactions.iter().enumerate() {
        tx.validate(idx + 1)?;
        let repeated = is_repeat(&mut seen, tx);
        result
            .entry(tx.state.clone())
            .or_default()
            .entry(tx.year())
            .or_insert_with(|| StateYearAggregate::empty(&tx.state, tx.year()))
            .add(tx, repeated);
    }

    Ok(result)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn tx(state: &str, y: i32, m: u32, amount: Decimal, channel: Channel) -> Transaction {
        Transaction::new(state, NaiveDate::from_ymd_opt(y, m, 10).unwrap(), amount, channel)
    }

    #[test]
    fn test_partitions_by_calendar_year() {
        let txs = vec![
            tx("CA", 2022, 12, dec!(100), Channel::Direct),
            tx("CA", 2023, 1, dec!(200), Channel::Direct),
            tx("CA", 2023, 6, dec!(300), Channel::Marketplace),
        ];
        let by_year = aggregate_state("CA", &txs).unwrap();

        assert_eq!(by_year.len(), 2);
        assert_eq!(by_year[&2022].total_sales, dec!(100));
        assert_eq!(by_year[&2022].monthly_breakdown[11].sales, dec!(100));

        let y2023 = &by_year[&2023];
        assert_eq!(y2023.total_sales, dec!(500));
        assert_eq!(y2023.direct_sales, dec!(200));
        assert_eq!(y2023.marketplace_sales, dec!(300));
        assert_eq!(y2023.transaction_count, 2);
        assert_eq!(y2023.monthly_breakdown[0].sales, dec!(200));
        assert_eq!(y2023.monthly_breakdown[5].marketplace_sales, dec!(300));
    }

    #[test]
    fn test_other_channel_counts_as_direct() {
        let txs = vec![tx("NY", 2023, 3, dec!(50), Channel::Other)];
        let agg = &aggregate_state("NY", &txs).unwrap()[&2023];

        assert_eq!(agg.direct_sales, dec!(50));
        assert_eq!(agg.marketplace_sales, dec!(0));
        assert_eq!(agg.ambiguous_channel_count, 1);
        assert_eq!(agg.missing_id_count, 1);
    }

    #[test]
    fn test_exemptions_reduce_exposure_not_gross() {
        let txs = vec![
            tx("TX", 2023, 2, dec!(1000), Channel::Direct).with_exempt(dec!(250)),
            tx("TX", 2023, 2, dec!(400), Channel::Direct).non_taxable(),
        ];
        let agg = &aggregate_state("TX", &txs).unwrap()[&2023];

        assert_eq!(agg.total_sales, dec!(1400));
        assert_eq!(agg.exempt_amount, dec!(650));
        assert_eq!(agg.exposure_sales(), dec!(750));
        assert_eq!(agg.threshold_sales(true), dec!(1400));
    }

    #[test]
    fn test_exposure_clamped_at_zero() {
        let txs = vec![tx("TX", 2023, 2, dec!(100), Channel::Direct).with_exempt(dec!(150))];
        let agg = &aggregate_state("TX", &txs).unwrap()[&2023];
        assert_eq!(agg.exposure_sales(), Decimal::ZERO);
    }

    #[test]
    fn test_threshold_figures_without_marketplace() {
        let txs = vec![
            tx("GA", 2023, 1, dec!(20000), Channel::Direct),
            tx("GA", 2023, 1, dec!(100000), Channel::Marketplace),
        ];
        let agg = &aggregate_state("GA", &txs).unwrap()[&2023];

        assert_eq!(agg.threshold_sales(false), dec!(20000));
        assert_eq!(agg.threshold_transactions(false), 1);
        assert_eq!(agg.monthly_breakdown[0].threshold_sales(false), dec!(20000));
        assert_eq!(agg.total_sales, dec!(120000));
    }

    #[test]
    fn test_wrong_state_fails_fast() {
        let txs = vec![tx("WA", 2023, 1, dec!(1), Channel::Direct)];
        assert!(matches!(
            aggregate_state("OR", &txs),
            Err(NexusError::MalformedRecord { line: 1, .. })
        ));
    }

    #[test]
    fn test_aggregate_all_groups_states() {
        let txs = vec![
            tx("WA", 2023, 1, dec!(1), Channel::Direct),
            tx("CA", 2023, 1, dec!(2), Channel::Direct),
            tx("WA", 2024, 1, dec!(3), Channel::Direct),
        ];
        let all = aggregate_all(&txs).unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["CA", "WA"]);
        assert_eq!(all["WA"].len(), 2);
    }

    #[test]
    fn test_identical_rows_without_id_are_counted() {
        let txs = vec![
            tx("WA", 2023, 4, dec!(50), Channel::Direct),
            tx("WA", 2023, 4, dec!(50), Channel::Direct),
            tx("WA", 2023, 4, dec!(50), Channel::Direct).with_id("A-1"),
            tx("WA", 2023, 5, dec!(50), Channel::Direct),
        ];
        let all = aggregate_all(&txs).unwrap();
        let wa = &all["WA"][&2023];
        assert_eq!(wa.transaction_count, 4);
        assert_eq!(wa.missing_id_count, 3);
        assert_eq!(wa.repeated_row_count, 1);
    }
}
