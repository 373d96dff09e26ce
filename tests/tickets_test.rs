mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::{StandardSetup, test_service};
use itinera::application::AppError;
use itinera::domain::{TicketStatus, TripType};

#[tokio::test]
async fn test_issue_ticket_charges_fare_to_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Traveller").await?;

    let result = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::days(7),
            &[],
        )
        .await?;

    assert_eq!(result.ticket.fare, 30000);
    assert_eq!(result.ticket.status, TicketStatus::Issued);
    assert_eq!(result.quote.total, 30000);

    let updated = service.get_applicant(applicant.id).await?;
    assert_eq!(updated.total_amount, 16000 + 30000);
    assert!(updated.balance_invariant_holds());
    Ok(())
}

#[tokio::test]
async fn test_issue_ticket_with_partial_credit_consumes_voucher_fully() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Credit Holder").await?;

    let voucher = service
        .grant_voucher(
            applicant.id,
            itinera::domain::VoucherScope::Transport,
            itinera::domain::VoucherValue::Credit(10000),
        )
        .await?;

    let result = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::days(7),
            &[voucher.id],
        )
        .await?;

    // 30000 fare minus 10000 credit: payable 20000, and the voucher is
    // fully consumed with no carryover.
    assert_eq!(result.quote.total, 20000);
    let voucher = service.get_voucher(voucher.id).await?;
    assert!(voucher.is_used);

    let updated = service.get_applicant(applicant.id).await?;
    assert_eq!(updated.total_amount, 16000 + 20000);
    Ok(())
}

#[tokio::test]
async fn test_issue_ticket_rejects_foreign_voucher() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    let owner = StandardSetup::register_simple(&service, "Owner").await?;
    let thief = StandardSetup::register_simple(&service, "Thief").await?;

    let voucher = service
        .grant_voucher(
            owner.id,
            itinera::domain::VoucherScope::Transport,
            itinera::domain::VoucherValue::Credit(10000),
        )
        .await?;

    let err = service
        .issue_ticket(
            thief.id,
            "Oran",
            "Algiers",
            TripType::OneWay,
            Utc::now() + Duration::days(7),
            &[voucher.id],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::VoucherNotRedeemable));
    Ok(())
}

#[tokio::test]
async fn test_modification_uses_stored_fare_and_policy_fee() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Changer").await?;

    let issued = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::hours(6),
            &[],
        )
        .await?;

    // Downgrade to one-way 6h before departure: fee 2000 (within the
    // 24h modification window) plus diff 18000 - 30000.
    let result = service
        .modify_ticket(issued.ticket.id, "Oran", "Algiers", TripType::OneWay, None)
        .await?;

    assert_eq!(result.quote.fee, 2000);
    assert_eq!(result.quote.price_diff, -12000);
    assert_eq!(result.quote.total, -10000);
    assert_eq!(result.ticket.fare, 18000);

    let updated = service.get_applicant(applicant.id).await?;
    assert_eq!(updated.total_amount, 16000 + 30000 - 10000);
    assert!(updated.balance_invariant_holds());
    Ok(())
}

#[tokio::test]
async fn test_modification_well_in_advance_is_free_of_fee() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Early Bird").await?;

    let issued = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::OneWay,
            Utc::now() + Duration::days(10),
            &[],
        )
        .await?;

    let result = service
        .modify_ticket(
            issued.ticket.id,
            "Constantine",
            "Algiers",
            TripType::OneWay,
            None,
        )
        .await?;

    assert_eq!(result.quote.fee, 0);
    assert_eq!(result.quote.price_diff, 2000);
    assert_eq!(result.quote.total, 2000);
    assert_eq!(result.ticket.from_location, "Constantine");
    Ok(())
}

#[tokio::test]
async fn test_cancellation_creates_compensation_voucher() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Canceller").await?;

    let issued = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::hours(4),
            &[],
        )
        .await?;

    // 4h before departure: the tight 6h window applies, fee 5000.
    let result = service.cancel_ticket(issued.ticket.id).await?;
    assert_eq!(result.quote.fee, 5000);
    assert_eq!(result.quote.compensation, 25000);
    assert_eq!(result.ticket.status, TicketStatus::Cancelled);

    let compensation = result.compensation.expect("compensation voucher");
    let stored = service.get_voucher(compensation.id).await?;
    assert!(!stored.is_used);
    assert_eq!(stored.value.credit(), Some(25000));
    Ok(())
}

#[tokio::test]
async fn test_cancellation_with_advance_notice_uses_generous_policy() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Planner").await?;

    let issued = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::hours(60),
            &[],
        )
        .await?;

    // 60h out: both GreaterThan policies match and the 48h one wins.
    let result = service.cancel_ticket(issued.ticket.id).await?;
    assert_eq!(result.quote.fee, 500);
    assert_eq!(result.quote.compensation, 29500);
    Ok(())
}

#[tokio::test]
async fn test_compensation_voucher_funds_a_replacement_ticket() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Rebooker").await?;

    let issued = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::hours(4),
            &[],
        )
        .await?;
    let cancelled = service.cancel_ticket(issued.ticket.id).await?;
    let compensation = cancelled.compensation.expect("compensation voucher");

    // A cancelled ticket permits a brand-new booking, and the 25000
    // credit covers most of the new 30000 fare.
    let replacement = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::days(3),
            &[compensation.id],
        )
        .await?;

    assert_eq!(replacement.quote.total, 5000);
    let spent = service.get_voucher(compensation.id).await?;
    assert!(spent.is_used);
    Ok(())
}

#[tokio::test]
async fn test_closed_tickets_cannot_be_modified_or_cancelled() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Finisher").await?;

    let issued = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::OneWay,
            Utc::now() + Duration::days(1),
            &[],
        )
        .await?;

    service.mark_ticket_used(issued.ticket.id).await?;

    let err = service.cancel_ticket(issued.ticket.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTicketTransition { .. }));

    let err = service
        .modify_ticket(issued.ticket.id, "Oran", "Algiers", TripType::RoundTrip, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTicketTransition { .. }));
    Ok(())
}

#[tokio::test]
async fn test_cancelling_twice_fails_without_side_effects() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Double Dipper").await?;

    let issued = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::hours(4),
            &[],
        )
        .await?;

    service.cancel_ticket(issued.ticket.id).await?;
    let err = service.cancel_ticket(issued.ticket.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTicketTransition { .. }));

    // Only one compensation voucher exists
    let vouchers = service.list_vouchers_for_applicant(applicant.id).await?;
    assert_eq!(vouchers.len(), 1);
    Ok(())
}
