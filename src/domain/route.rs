use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Amount;

pub type RouteId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::OneWay => "one_way",
            TripType::RoundTrip => "round_trip",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "one_way" => Some(TripType::OneWay),
            "round_trip" => Some(TripType::RoundTrip),
            _ => None,
        }
    }
}

impl std::fmt::Display for TripType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A priced edge between two locations. Static reference data, looked up
/// by the (from, to) pair; the pricing engine only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportRoute {
    pub id: RouteId,
    pub from_location: String,
    pub to_location: String,
    pub one_way_price: Amount,
    pub round_trip_price: Amount,
    pub departure_time: Option<NaiveTime>,
    pub arrival_time: Option<NaiveTime>,
}

impl TransportRoute {
    pub fn new(
        from_location: impl Into<String>,
        to_location: impl Into<String>,
        one_way_price: Amount,
        round_trip_price: Amount,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_location: from_location.into(),
            to_location: to_location.into(),
            one_way_price,
            round_trip_price,
            departure_time: None,
            arrival_time: None,
        }
    }

    pub fn with_times(mut self, departure: NaiveTime, arrival: NaiveTime) -> Self {
        self.departure_time = Some(departure);
        self.arrival_time = Some(arrival);
        self
    }

    pub fn price(&self, trip_type: TripType) -> Amount {
        match trip_type {
            TripType::OneWay => self.one_way_price,
            TripType::RoundTrip => self.round_trip_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_type_roundtrip() {
        for tt in [TripType::OneWay, TripType::RoundTrip] {
            assert_eq!(TripType::from_str(tt.as_str()), Some(tt));
        }
    }

    #[test]
    fn test_price_by_trip_type() {
        let route = TransportRoute::new("Oran", "Algiers", 18000, 30000);
        assert_eq!(route.price(TripType::OneWay), 18000);
        assert_eq!(route.price(TripType::RoundTrip), 30000);
    }
}
