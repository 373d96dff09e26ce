use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, ApplicantId, TripType};

pub type TicketId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Booked and valid for travel
    Issued,
    Used,
    NoShow,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Issued => "issued",
            TicketStatus::Used => "used",
            TicketStatus::NoShow => "no_show",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "issued" => Some(TicketStatus::Issued),
            "used" => Some(TicketStatus::Used),
            "no_show" => Some(TicketStatus::NoShow),
            "cancelled" => Some(TicketStatus::Cancelled),
            _ => None,
        }
    }

    /// Status transitions are one-directional: an issued ticket can end
    /// up used, missed, or cancelled, and none of those revert. A
    /// cancelled ticket permits issuing a brand-new ticket, never
    /// resurrecting this one.
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Issued, TicketStatus::Used)
                | (TicketStatus::Issued, TicketStatus::NoShow)
                | (TicketStatus::Issued, TicketStatus::Cancelled)
        )
    }

    /// Only issued tickets can still be modified or cancelled.
    pub fn is_open(&self) -> bool {
        matches!(self, TicketStatus::Issued)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single travel booking tied to an applicant.
///
/// `fare` is the fare actually charged at issuance. Modification diffs
/// and cancellation compensation are computed against this stored value,
/// so later route-price edits cannot shift them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub applicant_id: ApplicantId,
    pub from_location: String,
    pub to_location: String,
    pub trip_type: TripType,
    pub departure_at: DateTime<Utc>,
    pub fare: Amount,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(
        applicant_id: ApplicantId,
        from_location: impl Into<String>,
        to_location: impl Into<String>,
        trip_type: TripType,
        departure_at: DateTime<Utc>,
        fare: Amount,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            applicant_id,
            from_location: from_location.into(),
            to_location: to_location.into(),
            trip_type,
            departure_at,
            fare,
            status: TicketStatus::Issued,
            created_at: Utc::now(),
        }
    }

    /// Hours between `now` and departure. Negative once departure has
    /// passed; feeds the cancellation/modification policy resolver.
    pub fn hours_until_departure(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (self.departure_at - now).num_seconds();
        seconds as f64 / 3600.0
    }
}
