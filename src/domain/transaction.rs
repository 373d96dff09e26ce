use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, ApplicantId};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money received from an applicant
    Payment,
    /// Operating cost paid out by the agency
    Expense,
    /// Cash taken out of the till
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Payment => "payment",
            TransactionKind::Expense => "expense",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "payment" => Some(TransactionKind::Payment),
            "expense" => Some(TransactionKind::Expense),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            _ => None,
        }
    }

    /// Payments flow into the till; expenses and withdrawals flow out.
    pub fn is_inflow(&self) -> bool {
        matches!(self, TransactionKind::Payment)
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable financial ledger entry. Transactions are the append-only
/// audit trail for all money movement; corrections are recorded as new
/// entries, never by mutating existing ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Monotonically increasing sequence number for ordering
    pub sequence: i64,
    pub kind: TransactionKind,
    /// Amount moved (always positive; direction comes from `kind`)
    pub amount: Amount,
    pub applicant_id: Option<ApplicantId>,
    /// Branch/office the money moved through
    pub location: Option<String>,
    /// When the money actually moved
    pub occurred_at: DateTime<Utc>,
    /// When we recorded this entry
    pub recorded_at: DateTime<Utc>,
    pub description: Option<String>,
}

impl Transaction {
    /// Create a new ledger entry. Sequence is assigned by the repository.
    pub fn new(kind: TransactionKind, amount: Amount, occurred_at: DateTime<Utc>) -> Self {
        assert!(amount > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by repository
            kind,
            amount,
            applicant_id: None,
            location: None,
            occurred_at,
            recorded_at: Utc::now(),
            description: None,
        }
    }

    pub fn with_applicant(mut self, applicant_id: ApplicantId) -> Self {
        self.applicant_id = Some(applicant_id);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Signed contribution of this entry to the till balance.
    pub fn signed_amount(&self) -> Amount {
        if self.kind.is_inflow() {
            self.amount
        } else {
            -self.amount
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            TransactionKind::Payment,
            TransactionKind::Expense,
            TransactionKind::Withdrawal,
        ] {
            assert_eq!(TransactionKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_create_transaction() {
        let applicant = Uuid::new_v4();
        let entry = Transaction::new(TransactionKind::Payment, 16000, Utc::now())
            .with_applicant(applicant)
            .with_location("Algiers")
            .with_description("registration deposit");

        assert_eq!(entry.amount, 16000);
        assert_eq!(entry.applicant_id, Some(applicant));
        assert_eq!(entry.location.as_deref(), Some("Algiers"));
        assert_eq!(entry.signed_amount(), 16000);
    }

    #[test]
    fn test_outflows_are_negative() {
        let expense = Transaction::new(TransactionKind::Expense, 4000, Utc::now());
        let withdrawal = Transaction::new(TransactionKind::Withdrawal, 2500, Utc::now());

        assert_eq!(expense.signed_amount(), -4000);
        assert_eq!(withdrawal.signed_amount(), -2500);
    }

    #[test]
    #[should_panic(expected = "Transaction amount must be positive")]
    fn test_transaction_requires_positive_amount() {
        Transaction::new(TransactionKind::Payment, 0, Utc::now());
    }
}
