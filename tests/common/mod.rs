// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use itinera::application::{AgencyService, RegisterApplicant, ServiceConfig};
use itinera::domain::{Applicant, CancellationPolicy, PolicyCategory, TransportRoute, TriggerCondition};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(AgencyService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service =
        AgencyService::init(db_path.to_str().unwrap(), ServiceConfig::default()).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Test fixture: reference data shared across scenarios
pub struct StandardSetup;

impl StandardSetup {
    /// Routes between the three locations the scenarios use
    pub async fn create_routes(service: &AgencyService) -> Result<()> {
        service
            .add_route(&TransportRoute::new("Oran", "Algiers", 18000, 30000))
            .await?;
        service
            .add_route(&TransportRoute::new("Constantine", "Algiers", 20000, 34000))
            .await?;
        Ok(())
    }

    /// The fee policy set from the agency's price list: a tight late
    /// window plus two advance-notice discounts, and a modification fee.
    pub async fn create_policies(service: &AgencyService) -> Result<()> {
        service
            .add_policy(&CancellationPolicy::new(
                "cancel-late",
                PolicyCategory::Cancellation,
                Some(6.0),
                Some(TriggerCondition::LessThan),
                5000,
            ))
            .await?;
        service
            .add_policy(&CancellationPolicy::new(
                "cancel-24h",
                PolicyCategory::Cancellation,
                Some(24.0),
                Some(TriggerCondition::GreaterThan),
                1000,
            ))
            .await?;
        service
            .add_policy(&CancellationPolicy::new(
                "cancel-48h",
                PolicyCategory::Cancellation,
                Some(48.0),
                Some(TriggerCondition::GreaterThan),
                500,
            ))
            .await?;
        service
            .add_policy(&CancellationPolicy::new(
                "modify-24h",
                PolicyCategory::Modification,
                Some(24.0),
                Some(TriggerCondition::LessThan),
                2000,
            ))
            .await?;
        Ok(())
    }

    /// Register a plain applicant (no transport, no discount)
    pub async fn register_simple(service: &AgencyService, name: &str) -> Result<Applicant> {
        let result = service
            .register_applicant(RegisterApplicant {
                full_name: name.to_string(),
                ..Default::default()
            })
            .await?;
        Ok(result.applicant)
    }

    /// Drive an applicant from registration to a failed exam result
    pub async fn fail_exam(service: &AgencyService, applicant: &Applicant) -> Result<()> {
        service
            .schedule_exam(applicant.id, parse_date("2026-09-01"), "Algiers")
            .await?;
        service.mark_attended(applicant.id).await?;
        service.record_exam_result(applicant.id, false).await?;
        Ok(())
    }
}
