use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Amount;

pub type ApplicantId = Uuid;

/// Characters used for public applicant codes. Uppercase alphanumeric,
/// matching the 6-character codes printed on receipts.
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LENGTH: usize = 6;

/// Generate a candidate applicant code. Uniqueness is enforced by the
/// caller against the store, regenerating on collision.
pub fn generate_code<R: Rng>(rng: &mut R) -> String {
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicantStatus {
    /// Just registered, no services configured yet
    NewRegistration,
    /// Transport/exam services chosen and priced
    ServicesConfigured,
    /// Exam slot booked
    ExamScheduled,
    /// Showed up for the exam, result pending
    AttendedExam,
    Passed,
    Failed,
    /// Did not show up for a scheduled exam
    Absent,
}

impl ApplicantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicantStatus::NewRegistration => "new_registration",
            ApplicantStatus::ServicesConfigured => "services_configured",
            ApplicantStatus::ExamScheduled => "exam_scheduled",
            ApplicantStatus::AttendedExam => "attended_exam",
            ApplicantStatus::Passed => "passed",
            ApplicantStatus::Failed => "failed",
            ApplicantStatus::Absent => "absent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "new_registration" => Some(ApplicantStatus::NewRegistration),
            "services_configured" => Some(ApplicantStatus::ServicesConfigured),
            "exam_scheduled" => Some(ApplicantStatus::ExamScheduled),
            "attended_exam" => Some(ApplicantStatus::AttendedExam),
            "passed" => Some(ApplicantStatus::Passed),
            "failed" => Some(ApplicantStatus::Failed),
            "absent" => Some(ApplicantStatus::Absent),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// Failed and Absent are not terminal: a retake reopens scheduling.
    /// Passed and Failed can be stepped back to AttendedExam by an admin
    /// undoing a recorded result.
    pub fn can_transition_to(&self, next: ApplicantStatus) -> bool {
        use ApplicantStatus::*;
        matches!(
            (self, next),
            (NewRegistration, ServicesConfigured)
                | (ServicesConfigured, ExamScheduled)
                | (ExamScheduled, AttendedExam)
                | (ExamScheduled, Absent)
                | (AttendedExam, Passed)
                | (AttendedExam, Failed)
                | (Failed, ExamScheduled)
                | (Absent, ExamScheduled)
                | (Passed, AttendedExam)
                | (Failed, AttendedExam)
        )
    }

    /// Retake scheduling only applies to applicants who failed or missed
    /// their exam.
    pub fn is_retake_eligible(&self) -> bool {
        matches!(self, ApplicantStatus::Failed | ApplicantStatus::Absent)
    }
}

impl std::fmt::Display for ApplicantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport service chosen at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportSelection {
    None,
    OneWay,
    RoundTrip,
}

impl TransportSelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportSelection::None => "none",
            TransportSelection::OneWay => "one_way",
            TransportSelection::RoundTrip => "round_trip",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(TransportSelection::None),
            "one_way" => Some(TransportSelection::OneWay),
            "round_trip" => Some(TransportSelection::RoundTrip),
            _ => None,
        }
    }

    pub fn trip_type(&self) -> Option<super::TripType> {
        match self {
            TransportSelection::None => None,
            TransportSelection::OneWay => Some(super::TripType::OneWay),
            TransportSelection::RoundTrip => Some(super::TripType::RoundTrip),
        }
    }
}

impl std::fmt::Display for TransportSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An applicant and their financial snapshot. Applicants are never hard
/// deleted; the lifecycle lives entirely in `status`.
///
/// Invariant: `remaining_balance == total_amount - amount_paid` after
/// every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Applicant {
    pub id: ApplicantId,
    /// 6-char uppercase alphanumeric, unique, collision-checked at creation
    pub code: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub total_amount: Amount,
    pub amount_paid: Amount,
    pub discount_applied: Amount,
    pub remaining_balance: Amount,
    pub transport: TransportSelection,
    pub origin_location: Option<String>,
    pub exam_at: Option<DateTime<Utc>>,
    pub exam_location: Option<String>,
    pub status: ApplicantStatus,
    pub created_at: DateTime<Utc>,
}

impl Applicant {
    pub fn new(code: String, full_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            full_name,
            phone: None,
            total_amount: 0,
            amount_paid: 0,
            discount_applied: 0,
            remaining_balance: 0,
            transport: TransportSelection::None,
            origin_location: None,
            exam_at: None,
            exam_location: None,
            status: ApplicantStatus::NewRegistration,
            created_at: Utc::now(),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_transport(
        mut self,
        transport: TransportSelection,
        origin_location: Option<String>,
    ) -> Self {
        self.transport = transport;
        self.origin_location = origin_location;
        self
    }

    /// Add a charge to the running balance. Total and remaining move
    /// together so the balance invariant is preserved by construction.
    pub fn apply_charge(&mut self, amount: Amount) {
        self.total_amount += amount;
        self.remaining_balance += amount;
    }

    /// Record a payment against the running balance.
    pub fn apply_payment(&mut self, amount: Amount) {
        self.amount_paid += amount;
        self.remaining_balance -= amount;
    }

    pub fn balance_invariant_holds(&self) -> bool {
        self.remaining_balance == self.total_amount - self.amount_paid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ApplicantStatus::NewRegistration,
            ApplicantStatus::ServicesConfigured,
            ApplicantStatus::ExamScheduled,
            ApplicantStatus::AttendedExam,
            ApplicantStatus::Passed,
            ApplicantStatus::Failed,
            ApplicantStatus::Absent,
        ] {
            assert_eq!(ApplicantStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_normal_flow_transitions() {
        use ApplicantStatus::*;
        assert!(NewRegistration.can_transition_to(ServicesConfigured));
        assert!(ServicesConfigured.can_transition_to(ExamScheduled));
        assert!(ExamScheduled.can_transition_to(AttendedExam));
        assert!(AttendedExam.can_transition_to(Passed));
        assert!(AttendedExam.can_transition_to(Failed));
    }

    #[test]
    fn test_retake_reopens_scheduling() {
        use ApplicantStatus::*;
        assert!(Failed.can_transition_to(ExamScheduled));
        assert!(Absent.can_transition_to(ExamScheduled));
        assert!(Failed.is_retake_eligible());
        assert!(Absent.is_retake_eligible());
        assert!(!Passed.is_retake_eligible());
    }

    #[test]
    fn test_undo_result_steps_back() {
        use ApplicantStatus::*;
        assert!(Passed.can_transition_to(AttendedExam));
        assert!(Failed.can_transition_to(AttendedExam));
        assert!(!Absent.can_transition_to(AttendedExam));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        use ApplicantStatus::*;
        assert!(!NewRegistration.can_transition_to(ExamScheduled));
        assert!(!Passed.can_transition_to(ExamScheduled));
        assert!(!ExamScheduled.can_transition_to(Passed));
        assert!(!Absent.can_transition_to(Passed));
    }

    #[test]
    fn test_generated_code_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_charge_and_payment_preserve_invariant() {
        let mut applicant = Applicant::new("AB12CD".into(), "Test Person".into());
        applicant.apply_charge(16000);
        applicant.apply_payment(6000);
        applicant.apply_charge(30000);

        assert_eq!(applicant.total_amount, 46000);
        assert_eq!(applicant.amount_paid, 6000);
        assert_eq!(applicant.remaining_balance, 40000);
        assert!(applicant.balance_invariant_holds());
    }
}
