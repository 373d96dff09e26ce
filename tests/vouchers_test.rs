mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::{StandardSetup, test_service};
use itinera::application::{AppError, RegisterApplicant};
use itinera::domain::{TripType, VoucherScope, VoucherValue};

#[tokio::test]
async fn test_concurrent_promo_redemption_respects_usage_cap() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service.create_promo_code("LIMITED", 10, 3, None).await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .register_applicant(RegisterApplicant {
                    full_name: format!("Racer {}", i),
                    promo_code: Some("LIMITED".to_string()),
                    ..Default::default()
                })
                .await
        }));
    }

    let mut successes = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => successes += 1,
            Err(AppError::ConcurrentVoucherRedemption) | Err(AppError::PromoUsageExceeded(_)) => {
                rejected += 1
            }
            Err(other) => return Err(other.into()),
        }
    }

    // Exactly max_uses registrations won; the rest were turned away and
    // left no partial state behind.
    assert_eq!(successes, 3);
    assert_eq!(rejected, 5);
    assert_eq!(service.list_applicants().await?.len(), 3);

    let voucher = service
        .list_vouchers()
        .await?
        .into_iter()
        .find(|v| v.code.as_deref() == Some("LIMITED"))
        .unwrap();
    assert_eq!(voucher.usage_count, 3);
    assert!(voucher.usage_count <= voucher.max_uses);
    assert!(voucher.is_used);
    Ok(())
}

#[tokio::test]
async fn test_single_use_voucher_cannot_be_redeemed_twice() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Repeat Customer").await?;

    let voucher = service
        .grant_voucher(
            applicant.id,
            VoucherScope::Transport,
            VoucherValue::Credit(10000),
        )
        .await?;

    let first = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::OneWay,
            Utc::now() + Duration::days(3),
            &[voucher.id],
        )
        .await?;
    assert_eq!(first.quote.total, 8000);

    let balance_after_first = service.get_applicant(applicant.id).await?.remaining_balance;

    let err = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::OneWay,
            Utc::now() + Duration::days(4),
            &[voucher.id],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::VoucherNotRedeemable));

    // The failed second attempt changed nothing
    let balance = service.get_applicant(applicant.id).await?.remaining_balance;
    assert_eq!(balance, balance_after_first);
    assert_eq!(service.list_tickets_for_applicant(applicant.id).await?.len(), 1);
    let stored = service.get_voucher(voucher.id).await?;
    assert_eq!(stored.usage_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_expired_promo_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service
        .create_promo_code("BYGONE", 30, 10, Some(Utc::now() - Duration::days(1)))
        .await?;

    let err = service
        .register_applicant(RegisterApplicant {
            full_name: "Latecomer".to_string(),
            promo_code: Some("BYGONE".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExpiredPromoCode(_)));
    Ok(())
}

#[tokio::test]
async fn test_stacked_credit_vouchers_on_one_ticket() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Stacker").await?;

    let personal = service
        .grant_voucher(
            applicant.id,
            VoucherScope::Transport,
            VoucherValue::Credit(12000),
        )
        .await?;
    let second = service
        .grant_voucher(
            applicant.id,
            VoucherScope::Transport,
            VoucherValue::Credit(8000),
        )
        .await?;

    let result = service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::RoundTrip,
            Utc::now() + Duration::days(5),
            &[personal.id, second.id],
        )
        .await?;

    // 30000 fare against 20000 of stacked credit
    assert_eq!(result.quote.total, 10000);
    assert!(service.get_voucher(personal.id).await?.is_used);
    assert!(service.get_voucher(second.id).await?.is_used);
    Ok(())
}

#[tokio::test]
async fn test_usable_credit_voucher_listing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Collector").await?;

    let credit = service
        .grant_voucher(
            applicant.id,
            VoucherScope::Transport,
            VoucherValue::Credit(5000),
        )
        .await?;
    // Percent grants don't apply to tickets and must not be listed
    service
        .grant_voucher(
            applicant.id,
            VoucherScope::ExamRetake,
            VoucherValue::Percent(100),
        )
        .await?;

    let usable = service.list_usable_credit_vouchers(applicant.id).await?;
    assert_eq!(usable.len(), 1);
    assert_eq!(usable[0].id, credit.id);

    // Spend it; the listing empties
    service
        .issue_ticket(
            applicant.id,
            "Oran",
            "Algiers",
            TripType::OneWay,
            Utc::now() + Duration::days(2),
            &[credit.id],
        )
        .await?;
    assert!(service.list_usable_credit_vouchers(applicant.id).await?.is_empty());
    Ok(())
}
