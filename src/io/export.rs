use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::AgencyService;
use crate::domain::{Applicant, Transaction, TransportRoute, Voucher};

/// Database snapshot for full export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub applicants: Vec<Applicant>,
    pub transactions: Vec<Transaction>,
    pub vouchers: Vec<Voucher>,
    pub routes: Vec<TransportRoute>,
}

/// Exporter for converting agency data to various formats
pub struct Exporter<'a> {
    service: &'a AgencyService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a AgencyService) -> Self {
        Self { service }
    }

    /// Export the transaction ledger to CSV format
    pub async fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let transactions = self.service.list_transactions().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "kind",
            "amount",
            "applicant_code",
            "location",
            "occurred_at",
            "description",
        ])?;

        let mut count = 0;
        for entry in &transactions {
            let applicant_code = match entry.applicant_id {
                Some(id) => self.service.get_applicant(id).await?.code,
                None => String::new(),
            };

            csv_writer.write_record([
                entry.id.to_string(),
                entry.sequence.to_string(),
                entry.kind.to_string(),
                entry.amount.to_string(),
                applicant_code,
                entry.location.clone().unwrap_or_default(),
                entry.occurred_at.to_rfc3339(),
                entry.description.clone().unwrap_or_default(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export applicant financial snapshots to CSV format
    pub async fn export_applicants_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let applicants = self.service.list_applicants().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "code",
            "full_name",
            "status",
            "total_amount",
            "amount_paid",
            "discount_applied",
            "remaining_balance",
            "transport",
            "exam_location",
            "exam_at",
        ])?;

        let mut count = 0;
        for applicant in &applicants {
            csv_writer.write_record([
                applicant.code.clone(),
                applicant.full_name.clone(),
                applicant.status.to_string(),
                applicant.total_amount.to_string(),
                applicant.amount_paid.to_string(),
                applicant.discount_applied.to_string(),
                applicant.remaining_balance.to_string(),
                applicant.transport.to_string(),
                applicant.exam_location.clone().unwrap_or_default(),
                applicant
                    .exam_at
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the passenger manifest for one route and departure window
    pub async fn export_manifest_csv<W: Write>(
        &self,
        writer: W,
        from: &str,
        to: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<usize> {
        let entries = self
            .service
            .manifest(from, to, window_start, window_end)
            .await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "departure_at",
            "applicant_code",
            "full_name",
            "phone",
            "trip_type",
            "fare",
        ])?;

        let mut count = 0;
        for (ticket, applicant) in &entries {
            csv_writer.write_record([
                ticket.departure_at.to_rfc3339(),
                applicant.code.clone(),
                applicant.full_name.clone(),
                applicant.phone.clone().unwrap_or_default(),
                ticket.trip_type.to_string(),
                ticket.fare.to_string(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export full database as JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<DatabaseSnapshot> {
        let applicants = self.service.list_applicants().await?;
        let transactions = self.service.list_transactions().await?;
        let vouchers = self.service.list_vouchers().await?;
        let routes = self.service.list_routes().await?;

        let snapshot = DatabaseSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            applicants,
            transactions,
            vouchers,
            routes,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
