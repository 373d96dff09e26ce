use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, ApplicantId};

pub type VoucherId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherCategory {
    /// Shared promo code redeemable by anyone up to its usage cap
    Public,
    /// Granted to one applicant by an admin
    Personal,
    /// Auto-issued on ticket cancellation (fare minus fee)
    Compensation,
}

impl VoucherCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoucherCategory::Public => "public",
            VoucherCategory::Personal => "personal",
            VoucherCategory::Compensation => "compensation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "public" => Some(VoucherCategory::Public),
            "personal" => Some(VoucherCategory::Personal),
            "compensation" => Some(VoucherCategory::Compensation),
            _ => None,
        }
    }
}

impl std::fmt::Display for VoucherCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which service a voucher can be redeemed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherScope {
    Exam,
    ExamRetake,
    FullProgram,
    Transport,
}

impl VoucherScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoucherScope::Exam => "exam",
            VoucherScope::ExamRetake => "exam_retake",
            VoucherScope::FullProgram => "full_program",
            VoucherScope::Transport => "transport",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exam" => Some(VoucherScope::Exam),
            "exam_retake" => Some(VoucherScope::ExamRetake),
            "full_program" => Some(VoucherScope::FullProgram),
            "transport" => Some(VoucherScope::Transport),
            _ => None,
        }
    }

    /// Scopes that waive exam fees (registration and retake pricing).
    pub fn covers_exam(&self) -> bool {
        matches!(
            self,
            VoucherScope::Exam | VoucherScope::ExamRetake | VoucherScope::FullProgram
        )
    }
}

impl std::fmt::Display for VoucherScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two voucher value semantics, kept apart at the type level.
/// Percent vouchers discount exam pricing (registration, retake); credit
/// vouchers hold a fixed balance spent on ticket fares. The two are not
/// interchangeable between redemption paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum VoucherValue {
    /// Percentage off, 0-100
    Percent(i64),
    /// Fixed balance in currency units
    Credit(Amount),
}

impl VoucherValue {
    pub fn percent(&self) -> Option<i64> {
        match self {
            VoucherValue::Percent(p) => Some(*p),
            VoucherValue::Credit(_) => None,
        }
    }

    pub fn credit(&self) -> Option<Amount> {
        match self {
            VoucherValue::Percent(_) => None,
            VoucherValue::Credit(balance) => Some(*balance),
        }
    }
}

/// A discount or compensation credit. First-class structured record; all
/// redemption bookkeeping lives in real columns.
///
/// Invariants: `usage_count <= max_uses` always; once `is_used` is set
/// the voucher can never be redeemed again. Consumption happens inside
/// the same atomic commit that applies the discount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: VoucherId,
    /// Redemption code; required for Public vouchers, matched case-sensitively
    pub code: Option<String>,
    pub category: VoucherCategory,
    pub value: VoucherValue,
    pub scope: VoucherScope,
    pub max_uses: i64,
    pub usage_count: i64,
    pub is_used: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set for Personal/Compensation grants tied to one applicant
    pub applicant_id: Option<ApplicantId>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Voucher {
    /// A shared promo code with a percentage discount and usage cap.
    pub fn new_public(code: impl Into<String>, percent: i64, max_uses: i64) -> Self {
        assert!((0..=100).contains(&percent), "percent must be 0-100");
        assert!(max_uses > 0, "max_uses must be positive");
        Self {
            id: Uuid::new_v4(),
            code: Some(code.into()),
            category: VoucherCategory::Public,
            value: VoucherValue::Percent(percent),
            scope: VoucherScope::Exam,
            max_uses,
            usage_count: 0,
            is_used: false,
            expires_at: None,
            applicant_id: None,
            location: None,
            created_at: Utc::now(),
        }
    }

    /// A single-use grant for one applicant. Percent defaults to a full
    /// waiver at the call sites that issue these.
    pub fn new_personal(applicant_id: ApplicantId, scope: VoucherScope, value: VoucherValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: None,
            category: VoucherCategory::Personal,
            value,
            scope,
            max_uses: 1,
            usage_count: 0,
            is_used: false,
            expires_at: None,
            applicant_id: Some(applicant_id),
            location: None,
            created_at: Utc::now(),
        }
    }

    /// Auto-issued on ticket cancellation: a single-use credit worth the
    /// fare minus the cancellation fee.
    pub fn new_compensation(applicant_id: ApplicantId, balance: Amount) -> Self {
        assert!(balance >= 0, "compensation balance cannot be negative");
        Self {
            id: Uuid::new_v4(),
            code: None,
            category: VoucherCategory::Compensation,
            value: VoucherValue::Credit(balance),
            scope: VoucherScope::Transport,
            max_uses: 1,
            usage_count: 0,
            is_used: false,
            expires_at: None,
            applicant_id: Some(applicant_id),
            location: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_scope(mut self, scope: VoucherScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_count >= self.max_uses
    }

    /// Redeemable right now: not used up, not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && !self.is_exhausted() && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_category_roundtrip() {
        for cat in [
            VoucherCategory::Public,
            VoucherCategory::Personal,
            VoucherCategory::Compensation,
        ] {
            assert_eq!(VoucherCategory::from_str(cat.as_str()), Some(cat));
        }
    }

    #[test]
    fn test_scope_roundtrip() {
        for scope in [
            VoucherScope::Exam,
            VoucherScope::ExamRetake,
            VoucherScope::FullProgram,
            VoucherScope::Transport,
        ] {
            assert_eq!(VoucherScope::from_str(scope.as_str()), Some(scope));
        }
    }

    #[test]
    fn test_exam_scopes() {
        assert!(VoucherScope::Exam.covers_exam());
        assert!(VoucherScope::ExamRetake.covers_exam());
        assert!(VoucherScope::FullProgram.covers_exam());
        assert!(!VoucherScope::Transport.covers_exam());
    }

    #[test]
    fn test_value_variants_do_not_cross() {
        let percent = VoucherValue::Percent(20);
        let credit = VoucherValue::Credit(25000);

        assert_eq!(percent.percent(), Some(20));
        assert_eq!(percent.credit(), None);
        assert_eq!(credit.credit(), Some(25000));
        assert_eq!(credit.percent(), None);
    }

    #[test]
    fn test_public_voucher_activity() {
        let now = Utc::now();
        let mut voucher = Voucher::new_public("SUMMER25", 25, 3);
        assert!(voucher.is_active(now));

        voucher.usage_count = 3;
        assert!(voucher.is_exhausted());
        assert!(!voucher.is_active(now));
    }

    #[test]
    fn test_expired_voucher_is_inactive() {
        let now = Utc::now();
        let voucher = Voucher::new_public("OLD10", 10, 100).with_expiry(now - Duration::days(1));
        assert!(voucher.is_expired(now));
        assert!(!voucher.is_active(now));
    }

    #[test]
    fn test_compensation_is_single_use_credit() {
        let applicant = Uuid::new_v4();
        let voucher = Voucher::new_compensation(applicant, 25000);

        assert_eq!(voucher.category, VoucherCategory::Compensation);
        assert_eq!(voucher.value.credit(), Some(25000));
        assert_eq!(voucher.max_uses, 1);
        assert!(!voucher.is_used);
        assert_eq!(voucher.applicant_id, Some(applicant));
    }
}
