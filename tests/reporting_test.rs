mod common;

use anyhow::Result;
use chrono::{Duration, Utc};
use common::{StandardSetup, test_service};
use itinera::domain::TripType;
use itinera::io::Exporter;

#[tokio::test]
async fn test_ledger_report_totals() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let applicant = StandardSetup::register_simple(&service, "Customer").await?;

    service
        .record_payment(applicant.id, 10000, Some("Oran".to_string()), None)
        .await?;
    service
        .record_expense(3000, Some("Oran".to_string()), Some("fuel".to_string()))
        .await?;
    service.record_withdrawal(2000, None, None).await?;

    let report = service
        .ledger_report(Utc::now() - Duration::days(1), Utc::now() + Duration::days(1))
        .await?;

    assert_eq!(report.total_income, 10000);
    assert_eq!(report.total_outflow, 5000);
    assert_eq!(report.net, 5000);

    let oran = report
        .by_location
        .iter()
        .find(|l| l.location == "Oran")
        .unwrap();
    assert_eq!(oran.inflow, 10000);
    assert_eq!(oran.outflow, 3000);
    assert_eq!(oran.net, 7000);
    Ok(())
}

#[tokio::test]
async fn test_outstanding_report_orders_by_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let first = StandardSetup::register_simple(&service, "Small Debtor").await?;
    let second = StandardSetup::register_simple(&service, "Big Debtor").await?;

    service.record_payment(first.id, 12000, None, None).await?;
    // second still owes the full 16000, first owes 4000

    let report = service.outstanding_report().await?;
    assert_eq!(report.total_outstanding, 20000);
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.entries[0].code, second.code);
    assert_eq!(report.entries[0].remaining_balance, 16000);
    assert_eq!(report.entries[1].remaining_balance, 4000);
    Ok(())
}

#[tokio::test]
async fn test_transactions_csv_export() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let applicant = StandardSetup::register_simple(&service, "Exported").await?;
    service.record_payment(applicant.id, 5000, None, None).await?;
    service.record_expense(1000, None, None).await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_transactions_csv(&mut buffer).await?;
    assert_eq!(count, 2);

    let output = String::from_utf8(buffer)?;
    let mut lines = output.lines();
    assert!(lines.next().unwrap().starts_with("id,sequence,kind,amount"));
    assert!(output.contains(&applicant.code));
    assert!(output.contains("payment"));
    assert!(output.contains("expense"));
    Ok(())
}

#[tokio::test]
async fn test_applicants_csv_export() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::register_simple(&service, "Row One").await?;
    StandardSetup::register_simple(&service, "Row Two").await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_applicants_csv(&mut buffer).await?;
    assert_eq!(count, 2);

    let output = String::from_utf8(buffer)?;
    assert!(output.contains("Row One"));
    assert!(output.contains("16000"));
    Ok(())
}

#[tokio::test]
async fn test_manifest_lists_only_issued_tickets_in_window() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;

    let rider = StandardSetup::register_simple(&service, "Rider").await?;
    let dropout = StandardSetup::register_simple(&service, "Dropout").await?;

    let departure = Utc::now() + Duration::days(2);
    service
        .issue_ticket(rider.id, "Oran", "Algiers", TripType::OneWay, departure, &[])
        .await?;
    let cancelled = service
        .issue_ticket(dropout.id, "Oran", "Algiers", TripType::OneWay, departure, &[])
        .await?;
    service.cancel_ticket(cancelled.ticket.id).await?;

    // A ticket on another day stays out of the window
    service
        .issue_ticket(
            rider.id,
            "Oran",
            "Algiers",
            TripType::OneWay,
            Utc::now() + Duration::days(9),
            &[],
        )
        .await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter
        .export_manifest_csv(
            &mut buffer,
            "Oran",
            "Algiers",
            departure - Duration::hours(1),
            departure + Duration::hours(1),
        )
        .await?;

    assert_eq!(count, 1);
    let output = String::from_utf8(buffer)?;
    assert!(output.contains(&rider.code));
    assert!(!output.contains(&dropout.code));
    Ok(())
}

#[tokio::test]
async fn test_full_json_snapshot() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    let applicant = StandardSetup::register_simple(&service, "Snapshot Subject").await?;
    service.record_payment(applicant.id, 4000, None, None).await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let snapshot = exporter.export_full_json(&mut buffer).await?;

    assert_eq!(snapshot.applicants.len(), 1);
    assert_eq!(snapshot.transactions.len(), 1);
    assert_eq!(snapshot.routes.len(), 2);

    let parsed: serde_json::Value = serde_json::from_slice(&buffer)?;
    assert_eq!(parsed["applicants"][0]["full_name"], "Snapshot Subject");
    Ok(())
}

#[tokio::test]
async fn test_integrity_check_on_healthy_ledger() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardSetup::create_routes(&service).await?;
    StandardSetup::create_policies(&service).await?;

    let applicant = StandardSetup::register_simple(&service, "Healthy").await?;
    service.record_payment(applicant.id, 8000, None, None).await?;
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

    let stats = service.check_integrity().await?;
    assert_eq!(stats.applicant_count, 1);
    assert_eq!(stats.transaction_count, 1);
    assert!(!stats.has_sequence_gaps);
    assert_eq!(stats.balance_drift_count, 0);
    assert_eq!(stats.voucher_overuse_count, 0);
    assert_eq!(stats.orphan_ticket_count, 0);
    Ok(())
}
