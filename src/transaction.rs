// 🧾 Transactions - Immutable sales facts
// Raw CSV rows are parsed into typed transactions; anything that does not
// parse fails the run instead of being dropped.

use crate::error::{NexusError, NexusResult};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Two-letter codes for the 50 states plus DC
pub const US_STATE_CODES: [&str; 51] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ", "NM",
    "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT", "VA", "WA",
    "WV", "WI", "WY",
];

pub fn is_valid_state_code(code: &str) -> bool {
    US_STATE_CODES.contains(&code)
}

// ============================================================================
// CHANNEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Sold by the company itself
    Direct,

    /// Sold through a marketplace facilitator (Amazon, Etsy, ...)
    Marketplace,

    /// Anything the upload could not place; counted as direct
    Other,
}

impl Channel {
    /// Parse a free-form channel label. Unrecognised labels become `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "direct" | "website" | "wholesale" | "retail" => Channel::Direct,
            "marketplace" | "mpf" | "marketplace_facilitator" => Channel::Marketplace,
            _ => Channel::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Direct => "direct",
            Channel::Marketplace => "marketplace",
            Channel::Other => "other",
        }
    }

    pub fn is_marketplace(&self) -> bool {
        matches!(self, Channel::Marketplace)
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// A single sale, already attributed to a destination state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    /// Upper-case two-letter state code
    pub state: String,

    pub date: NaiveDate,

    /// Gross sale amount
    pub amount: Decimal,

    pub channel: Channel,

    #[serde(default = "default_taxable")]
    pub is_taxable: bool,

    /// Portion of `amount` exempt from tax (resale certificates, exempt goods)
    #[serde(default)]
    pub exempt_amount: Decimal,
}

fn default_taxable() -> bool {
    true
}

impl Transaction {
    pub fn new(state: &str, date: NaiveDate, amount: Decimal, channel: Channel) -> Self {
        Transaction {
            transaction_id: None,
            state: state.to_uppercase(),
            date,
            amount,
            channel,
            is_taxable: true,
            exempt_amount: Decimal::ZERO,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.transaction_id = Some(id.to_string());
        self
    }

    pub fn with_exempt(mut self, exempt_amount: Decimal) -> Self {
        self.exempt_amount = exempt_amount;
        self
    }

    pub fn non_taxable(mut self) -> Self {
        self.is_taxable = false;
        self
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// Month index 0..=11
    pub fn month_index(&self) -> usize {
        self.date.month0() as usize
    }

    /// Amount that reduces the tax base. Non-taxable sales are exempt in full.
    pub fn effective_exempt(&self) -> Decimal {
        if self.is_taxable {
            self.exempt_amount
        } else {
            self.amount
        }
    }

    /// SHA-256 over the fields that identify a sale
    pub fn idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}",
            self.state,
            self.date,
            self.amount.normalize(),
            self.channel.as_str(),
            self.transaction_id.as_deref().unwrap_or("")
        ));
        format!("{:x}", hasher.finalize())
    }

    /// Reject records the aggregator cannot trust
    pub fn validate(&self, line: usize) -> NexusResult<()> {
        if !is_valid_state_code(&self.state) {
            return Err(NexusError::malformed(
                line,
                format!("unknown state code: {:?}", self.state),
            ));
        }
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(NexusError::malformed(
                line,
                format!("negative amount: {}", self.amount),
            ));
        }
        if self.exempt_amount.is_sign_negative() && !self.exempt_amount.is_zero() {
            return Err(NexusError::malformed(
                line,
                format!("negative exempt amount: {}", self.exempt_amount),
            ));
        }
        Ok(())
    }
}

/// Validate every record and reject duplicate transaction ids.
/// Line numbers are 1-based positions in `transactions`.
pub fn validate_batch(transactions: &[Transaction]) -> NexusResult<()> {
    for (idx, tx) in transactions.iter().enumerate() {
        tx.validate(idx + 1)?;
    }
    reject_duplicate_ids(transactions, 1)
}

/// Error on the first non-empty id seen twice. `first_line` is the line of `transactions[0]`.
fn reject_duplicate_ids(transactions: &[Transaction], first_line: usize) -> NexusResult<()> {
    let mut seen_ids = HashSet::new();

    for (idx, tx) in transactions.iter().enumerate() {
        if let Some(id) = tx.transaction_id.as_deref().filter(|id| !id.is_empty()) {
            if !seen_ids.insert(id) {
                return Err(NexusError::malformed(
                    idx + first_line,
                    format!("duplicate transaction id: {}", id),
                ));
            }
        }
    }

    Ok(())
}

// ============================================================================
// CSV INGESTION
// ============================================================================

/// One CSV row before parsing
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRecord {
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub is_taxable: String,
    #[serde(default)]
    pub exempt_amount: String,
}

impl TransactionRecord {
    pub fn into_transaction(self, line: usize) -> NexusResult<Transaction> {
        let state = self.state.trim().to_uppercase();
        if state.is_empty() {
            return Err(NexusError::malformed(line, "missing state code"));
        }

        let date = parse_date(&self.date)
            .ok_or_else(|| NexusError::malformed(line, format!("unparseable date: {:?}", self.date)))?;

        let amount = parse_amount(&self.amount)
            .ok_or_else(|| NexusError::malformed(line, format!("unparseable amount: {:?}", self.amount)))?;

        let exempt_amount = if self.exempt_amount.trim().is_empty() {
            Decimal::ZERO
        } else {
            parse_amount(&self.exempt_amount).ok_or_else(|| {
                NexusError::malformed(
                    line,
                    format!("unparseable exempt amount: {:?}", self.exempt_amount),
                )
            })?
        };

        let is_taxable = match self.is_taxable.trim().to_lowercase().as_str() {
            "" | "true" | "yes" | "y" | "1" => true,
            "false" | "no" | "n" | "0" => false,
            other => {
                return Err(NexusError::malformed(
                    line,
                    format!("unparseable taxability flag: {:?}", other),
                ))
            }
        };

        let transaction_id = Some(self.transaction_id.trim().to_string()).filter(|id| !id.is_empty());

        let tx = Transaction {
            transaction_id,
            state,
            date,
            amount,
            channel: Channel::from_label(&self.channel),
            is_taxable,
            exempt_amount,
        };
        tx.validate(line)?;
        Ok(tx)
    }
}

/// Accepts YYYY-MM-DD and MM/DD/YYYY
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

/// Accepts plain decimals with an optional `$` and thousands separators
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// Read transactions from any CSV source. Line numbers in errors count the header as line 1.
pub fn read_transactions<R: Read>(reader: R) -> NexusResult<Vec<Transaction>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut transactions = Vec::new();

    for (idx, result) in rdr.deserialize::<TransactionRecord>().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| NexusError::malformed(line, e.to_string()))?;
        transactions.push(record.into_transaction(line)?);
    }

    reject_duplicate_ids(&transactions, 2)?;
    Ok(transactions)
}

pub fn load_transactions_csv(csv_path: &Path) -> NexusResult<Vec<Transaction>> {
    let file = std::fs::File::open(csv_path)?;
    let transactions = read_transactions(file)?;
    debug!(path = ?csv_path, count = transactions.len(), "Loaded transactions");
    Ok(transactions)
}

// ============================================================================
// TESTS
// ============================================================================
