use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Amount, ApplicantStatus};
use crate::storage::LedgerAggregate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReport {
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub total_income: Amount,
    pub total_outflow: Amount,
    pub net: Amount,
    pub by_kind: Vec<KindSummary>,
    pub by_location: Vec<LocationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindSummary {
    pub kind: String,
    pub count: i64,
    pub total: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSummary {
    pub location: String,
    pub count: i64,
    pub inflow: Amount,
    pub outflow: Amount,
    pub net: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutstandingReport {
    pub as_of: DateTime<Utc>,
    pub total_outstanding: Amount,
    pub entries: Vec<OutstandingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutstandingEntry {
    pub code: String,
    pub full_name: String,
    pub remaining_balance: Amount,
    pub status: ApplicantStatus,
}

/// Fold repository aggregates into the accounting report.
pub fn build_ledger_report(
    from_date: DateTime<Utc>,
    to_date: DateTime<Utc>,
    by_kind: &[LedgerAggregate],
    by_location: &[LedgerAggregate],
) -> LedgerReport {
    let total_income: Amount = by_kind.iter().map(|a| a.inflow).sum();
    let total_outflow: Amount = by_kind.iter().map(|a| a.outflow).sum();

    LedgerReport {
        from_date,
        to_date,
        total_income,
        total_outflow,
        net: total_income - total_outflow,
        by_kind: by_kind
            .iter()
            .map(|a| KindSummary {
                kind: a.group.clone(),
                count: a.count,
                total: a.inflow + a.outflow,
            })
            .collect(),
        by_location: by_location
            .iter()
            .map(|a| LocationSummary {
                location: a.group.clone(),
                count: a.count,
                inflow: a.inflow,
                outflow: a.outflow,
                net: a.inflow - a.outflow,
            })
            .collect(),
    }
}
