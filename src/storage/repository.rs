use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction as SqlTx};
use uuid::Uuid;

use crate::domain::{
    Amount, Applicant, ApplicantId, ApplicantStatus, CancellationPolicy, PolicyCategory, Ticket,
    TicketId, TicketStatus, Transaction, TransactionKind, TransportRoute, TransportSelection,
    TriggerCondition, TripType, Voucher, VoucherCategory, VoucherId, VoucherScope, VoucherValue,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_TRANSPORT};

/// Marker error: a voucher's conditional consume matched no row, meaning
/// a concurrent redemption won the race (or the voucher was already
/// spent). Commits carrying it have been rolled back.
#[derive(Debug)]
pub struct VoucherConflict;

impl std::fmt::Display for VoucherConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "voucher was consumed concurrently")
    }
}

impl std::error::Error for VoucherConflict {}

/// Marker error: an applicant's balance columns no longer satisfy
/// `remaining == total - paid` inside the commit transaction.
#[derive(Debug)]
pub struct BalanceDrift;

impl std::fmt::Display for BalanceDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "applicant balance drifted from total minus paid")
    }
}

impl std::error::Error for BalanceDrift {}

/// Marker error: a guarded ticket update found the ticket no longer open.
#[derive(Debug)]
pub struct TicketConflict;

impl std::fmt::Display for TicketConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ticket is no longer open")
    }
}

impl std::error::Error for TicketConflict {}

/// Statistics for ledger integrity verification.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub applicant_count: i64,
    pub transaction_count: i64,
    pub has_sequence_gaps: bool,
    pub balance_drift_count: i64,
    pub voucher_overuse_count: i64,
    pub orphan_ticket_count: i64,
}

/// Aggregate row for accounting reports.
#[derive(Debug, Clone)]
pub struct LedgerAggregate {
    pub group: String,
    pub count: i64,
    pub inflow: Amount,
    pub outflow: Amount,
}

/// Repository for persisting applicants, vouchers, tickets, routes,
/// policies and the transaction ledger.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::raw_sql(MIGRATION_002_TRANSPORT)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Config
    // ========================

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch config")?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("Failed to set config")?;
        Ok(())
    }

    // ========================
    // Applicants
    // ========================

    pub async fn applicant_code_exists(&self, code: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM applicants WHERE code = ?")
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check applicant code")?;
        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    pub async fn get_applicant(&self, id: ApplicantId) -> Result<Option<Applicant>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, full_name, phone, total_amount, amount_paid, discount_applied,
                   remaining_balance, transport, origin_location, exam_at, exam_location,
                   status, created_at
            FROM applicants
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch applicant")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_applicant(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_applicant_by_code(&self, code: &str) -> Result<Option<Applicant>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, full_name, phone, total_amount, amount_paid, discount_applied,
                   remaining_balance, transport, origin_location, exam_at, exam_location,
                   status, created_at
            FROM applicants
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch applicant by code")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_applicant(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_applicants(&self) -> Result<Vec<Applicant>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, full_name, phone, total_amount, amount_paid, discount_applied,
                   remaining_balance, transport, origin_location, exam_at, exam_location,
                   status, created_at
            FROM applicants
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list applicants")?;

        rows.iter().map(Self::row_to_applicant).collect()
    }

    /// Applicants still owing money, largest balance first.
    pub async fn list_outstanding_applicants(&self) -> Result<Vec<Applicant>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, full_name, phone, total_amount, amount_paid, discount_applied,
                   remaining_balance, transport, origin_location, exam_at, exam_location,
                   status, created_at
            FROM applicants
            WHERE remaining_balance > 0
            ORDER BY remaining_balance DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list outstanding applicants")?;

        rows.iter().map(Self::row_to_applicant).collect()
    }

    pub async fn update_applicant_status(
        &self,
        id: ApplicantId,
        status: ApplicantStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE applicants SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update applicant status")?;
        Ok(())
    }

    pub async fn schedule_exam(
        &self,
        id: ApplicantId,
        exam_at: DateTime<Utc>,
        exam_location: &str,
        status: ApplicantStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE applicants SET exam_at = ?, exam_location = ?, status = ? WHERE id = ?",
        )
        .bind(exam_at.to_rfc3339())
        .bind(exam_location)
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to schedule exam")?;
        Ok(())
    }

    // ========================
    // Atomic commits
    // ========================

    /// Commit a registration quote: the new applicant row, the promo
    /// voucher consume (if any) and the deposit ledger entry land
    /// together or not at all.
    pub async fn commit_registration(
        &self,
        applicant: &Applicant,
        consumed_voucher: Option<VoucherId>,
        deposit: Option<&mut Transaction>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin commit")?;

        Self::insert_applicant_in_tx(&mut tx, applicant).await?;

        if let Some(voucher_id) = consumed_voucher {
            Self::consume_voucher_in_tx(&mut tx, voucher_id).await?;
        }

        if let Some(entry) = deposit {
            Self::insert_transaction_in_tx(&mut tx, entry).await?;
        }

        Self::verify_balance_in_tx(&mut tx, applicant.id).await?;
        tx.commit().await.context("Failed to commit registration")?;
        Ok(())
    }

    /// Commit a payment: balance move plus ledger entry.
    pub async fn commit_payment(
        &self,
        applicant_id: ApplicantId,
        entry: &mut Transaction,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin commit")?;

        sqlx::query(
            r#"
            UPDATE applicants
            SET amount_paid = amount_paid + ?, remaining_balance = remaining_balance - ?
            WHERE id = ?
            "#,
        )
        .bind(entry.amount)
        .bind(entry.amount)
        .bind(applicant_id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to apply payment")?;

        Self::insert_transaction_in_tx(&mut tx, entry).await?;
        Self::verify_balance_in_tx(&mut tx, applicant_id).await?;
        tx.commit().await.context("Failed to commit payment")?;
        Ok(())
    }

    /// Commit a retake: fee onto the running balance, voucher consume,
    /// new exam slot, status back to scheduled.
    #[allow(clippy::too_many_arguments)]
    pub async fn commit_retake(
        &self,
        applicant_id: ApplicantId,
        fee: Amount,
        discount: Amount,
        consumed_voucher: Option<VoucherId>,
        exam_at: DateTime<Utc>,
        exam_location: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin commit")?;

        sqlx::query(
            r#"
            UPDATE applicants
            SET total_amount = total_amount + ?,
                remaining_balance = remaining_balance + ?,
                discount_applied = discount_applied + ?,
                exam_at = ?, exam_location = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(fee)
        .bind(fee)
        .bind(discount)
        .bind(exam_at.to_rfc3339())
        .bind(exam_location)
        .bind(ApplicantStatus::ExamScheduled.as_str())
        .bind(applicant_id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to apply retake fee")?;

        if let Some(voucher_id) = consumed_voucher {
            Self::consume_voucher_in_tx(&mut tx, voucher_id).await?;
        }

        Self::verify_balance_in_tx(&mut tx, applicant_id).await?;
        tx.commit().await.context("Failed to commit retake")?;
        Ok(())
    }

    /// Commit a ticket issuance: the ticket row, every consumed credit
    /// voucher, and the payable charge on the applicant's balance.
    pub async fn commit_ticket_issuance(
        &self,
        ticket: &Ticket,
        consumed_vouchers: &[VoucherId],
        charge: Amount,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin commit")?;

        sqlx::query(
            r#"
            INSERT INTO tickets (id, applicant_id, from_location, to_location, trip_type,
                                 departure_at, fare, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ticket.id.to_string())
        .bind(ticket.applicant_id.to_string())
        .bind(&ticket.from_location)
        .bind(&ticket.to_location)
        .bind(ticket.trip_type.as_str())
        .bind(ticket.departure_at.to_rfc3339())
        .bind(ticket.fare)
        .bind(ticket.status.as_str())
        .bind(ticket.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to insert ticket")?;

        for voucher_id in consumed_vouchers {
            Self::consume_voucher_in_tx(&mut tx, *voucher_id).await?;
        }

        if charge > 0 {
            sqlx::query(
                r#"
                UPDATE applicants
                SET total_amount = total_amount + ?, remaining_balance = remaining_balance + ?
                WHERE id = ?
                "#,
            )
            .bind(charge)
            .bind(charge)
            .bind(ticket.applicant_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to charge ticket payable")?;
        }

        Self::verify_balance_in_tx(&mut tx, ticket.applicant_id).await?;
        tx.commit().await.context("Failed to commit ticket issuance")?;
        Ok(())
    }

    /// Commit a ticket modification: rewrite the booking in place (only
    /// while still open) and move the fee-plus-diff onto the balance.
    pub async fn commit_ticket_change(&self, ticket: &Ticket, balance_delta: Amount) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin commit")?;

        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET from_location = ?, to_location = ?, trip_type = ?, departure_at = ?, fare = ?
            WHERE id = ? AND status = 'issued'
            "#,
        )
        .bind(&ticket.from_location)
        .bind(&ticket.to_location)
        .bind(ticket.trip_type.as_str())
        .bind(ticket.departure_at.to_rfc3339())
        .bind(ticket.fare)
        .bind(ticket.id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to update ticket")?;

        if result.rows_affected() == 0 {
            bail!(TicketConflict);
        }

        if balance_delta != 0 {
            sqlx::query(
                r#"
                UPDATE applicants
                SET total_amount = total_amount + ?, remaining_balance = remaining_balance + ?
                WHERE id = ?
                "#,
            )
            .bind(balance_delta)
            .bind(balance_delta)
            .bind(ticket.applicant_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to apply modification delta")?;
        }

        Self::verify_balance_in_tx(&mut tx, ticket.applicant_id).await?;
        tx.commit().await.context("Failed to commit ticket change")?;
        Ok(())
    }

    /// Commit a ticket cancellation: flip the ticket (only while open)
    /// and create the compensation voucher in the same transaction.
    pub async fn commit_ticket_cancellation(
        &self,
        ticket_id: TicketId,
        compensation: Option<&Voucher>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin commit")?;

        let result = sqlx::query(
            "UPDATE tickets SET status = 'cancelled' WHERE id = ? AND status = 'issued'",
        )
        .bind(ticket_id.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to cancel ticket")?;

        if result.rows_affected() == 0 {
            bail!(TicketConflict);
        }

        if let Some(voucher) = compensation {
            Self::insert_voucher_in_tx(&mut tx, voucher).await?;
        }

        tx.commit().await.context("Failed to commit cancellation")?;
        Ok(())
    }

    /// Guarded terminal transition for a travelled or missed ticket.
    pub async fn close_ticket(&self, ticket_id: TicketId, status: TicketStatus) -> Result<()> {
        let result = sqlx::query("UPDATE tickets SET status = ? WHERE id = ? AND status = 'issued'")
            .bind(status.as_str())
            .bind(ticket_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to close ticket")?;

        if result.rows_affected() == 0 {
            bail!(TicketConflict);
        }
        Ok(())
    }

    async fn insert_applicant_in_tx(
        tx: &mut SqlTx<'_, Sqlite>,
        applicant: &Applicant,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO applicants (id, code, full_name, phone, total_amount, amount_paid,
                                    discount_applied, remaining_balance, transport,
                                    origin_location, exam_at, exam_location, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(applicant.id.to_string())
        .bind(&applicant.code)
        .bind(&applicant.full_name)
        .bind(&applicant.phone)
        .bind(applicant.total_amount)
        .bind(applicant.amount_paid)
        .bind(applicant.discount_applied)
        .bind(applicant.remaining_balance)
        .bind(applicant.transport.as_str())
        .bind(&applicant.origin_location)
        .bind(applicant.exam_at.map(|dt| dt.to_rfc3339()))
        .bind(&applicant.exam_location)
        .bind(applicant.status.as_str())
        .bind(applicant.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .context("Failed to insert applicant")?;
        Ok(())
    }

    /// Re-validate and consume one voucher use. The WHERE clause is the
    /// concurrency guard: whichever concurrent commit runs second matches
    /// zero rows and the whole transaction rolls back.
    async fn consume_voucher_in_tx(tx: &mut SqlTx<'_, Sqlite>, voucher_id: VoucherId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE vouchers
            SET usage_count = usage_count + 1,
                is_used = CASE WHEN usage_count + 1 >= max_uses THEN 1 ELSE 0 END
            WHERE id = ? AND is_used = 0 AND usage_count < max_uses
            "#,
        )
        .bind(voucher_id.to_string())
        .execute(&mut **tx)
        .await
        .context("Failed to consume voucher")?;

        if result.rows_affected() == 0 {
            bail!(VoucherConflict);
        }
        Ok(())
    }

    /// Assign the next ledger sequence and insert the entry.
    async fn insert_transaction_in_tx(
        tx: &mut SqlTx<'_, Sqlite>,
        entry: &mut Transaction,
    ) -> Result<()> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut **tx)
        .await
        .context("Failed to get next sequence number")?;
        entry.sequence = row.get("value");

        sqlx::query(
            r#"
            INSERT INTO transactions (id, sequence, kind, amount, applicant_id, location,
                                      occurred_at, recorded_at, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.sequence)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(entry.applicant_id.map(|id| id.to_string()))
        .bind(&entry.location)
        .bind(entry.occurred_at.to_rfc3339())
        .bind(entry.recorded_at.to_rfc3339())
        .bind(&entry.description)
        .execute(&mut **tx)
        .await
        .context("Failed to insert transaction")?;
        Ok(())
    }

    async fn insert_voucher_in_tx(tx: &mut SqlTx<'_, Sqlite>, voucher: &Voucher) -> Result<()> {
        let (value_type, value_amount) = match voucher.value {
            VoucherValue::Percent(p) => ("percent", p),
            VoucherValue::Credit(balance) => ("credit", balance),
        };

        sqlx::query(
            r#"
            INSERT INTO vouchers (id, code, category, value_type, value_amount, scope, max_uses,
                                  usage_count, is_used, expires_at, applicant_id, location, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(voucher.id.to_string())
        .bind(&voucher.code)
        .bind(voucher.category.as_str())
        .bind(value_type)
        .bind(value_amount)
        .bind(voucher.scope.as_str())
        .bind(voucher.max_uses)
        .bind(voucher.usage_count)
        .bind(voucher.is_used)
        .bind(voucher.expires_at.map(|dt| dt.to_rfc3339()))
        .bind(voucher.applicant_id.map(|id| id.to_string()))
        .bind(&voucher.location)
        .bind(voucher.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .context("Failed to insert voucher")?;
        Ok(())
    }

    /// The balance invariant gate: runs after every balance write, while
    /// the transaction still holds the write lock. Failing it rolls the
    /// whole commit back.
    async fn verify_balance_in_tx(tx: &mut SqlTx<'_, Sqlite>, id: ApplicantId) -> Result<()> {
        let row = sqlx::query(
            r#"
            SELECT total_amount - amount_paid - remaining_balance as drift
            FROM applicants
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_one(&mut **tx)
        .await
        .context("Failed to verify applicant balance")?;

        let drift: i64 = row.get("drift");
        if drift != 0 {
            bail!(BalanceDrift);
        }
        Ok(())
    }

    fn row_to_applicant(row: &sqlx::sqlite::SqliteRow) -> Result<Applicant> {
        let id_str: String = row.get("id");
        let transport_str: String = row.get("transport");
        let status_str: String = row.get("status");
        let exam_at_str: Option<String> = row.get("exam_at");
        let created_at_str: String = row.get("created_at");

        Ok(Applicant {
            id: Uuid::parse_str(&id_str).context("Invalid applicant ID")?,
            code: row.get("code"),
            full_name: row.get("full_name"),
            phone: row.get("phone"),
            total_amount: row.get("total_amount"),
            amount_paid: row.get("amount_paid"),
            discount_applied: row.get("discount_applied"),
            remaining_balance: row.get("remaining_balance"),
            transport: TransportSelection::from_str(&transport_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transport selection: {}", transport_str))?,
            origin_location: row.get("origin_location"),
            exam_at: parse_optional_datetime(exam_at_str)?,
            exam_location: row.get("exam_location"),
            status: ApplicantStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid applicant status: {}", status_str))?,
            created_at: parse_datetime(&created_at_str)?,
        })
    }

    // ========================
    // Vouchers
    // ========================

    pub async fn save_voucher(&self, voucher: &Voucher) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_voucher_in_tx(&mut tx, voucher).await?;
        tx.commit().await.context("Failed to save voucher")?;
        Ok(())
    }

    pub async fn get_voucher(&self, id: VoucherId) -> Result<Option<Voucher>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, category, value_type, value_amount, scope, max_uses, usage_count,
                   is_used, expires_at, applicant_id, location, created_at
            FROM vouchers
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch voucher")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_voucher(&row)?)),
            None => Ok(None),
        }
    }

    /// Promo lookup is case-sensitive by design; SQLite's `=` on TEXT
    /// already compares byte-wise.
    pub async fn get_voucher_by_code(&self, code: &str) -> Result<Option<Voucher>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, category, value_type, value_amount, scope, max_uses, usage_count,
                   is_used, expires_at, applicant_id, location, created_at
            FROM vouchers
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch voucher by code")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_voucher(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_vouchers(&self) -> Result<Vec<Voucher>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, category, value_type, value_amount, scope, max_uses, usage_count,
                   is_used, expires_at, applicant_id, location, created_at
            FROM vouchers
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list vouchers")?;

        rows.iter().map(Self::row_to_voucher).collect()
    }

    pub async fn list_vouchers_for_applicant(&self, id: ApplicantId) -> Result<Vec<Voucher>> {
        let rows = sqlx::query(
            r#"
            SELECT id, code, category, value_type, value_amount, scope, max_uses, usage_count,
                   is_used, expires_at, applicant_id, location, created_at
            FROM vouchers
            WHERE applicant_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list vouchers for applicant")?;

        rows.iter().map(Self::row_to_voucher).collect()
    }

    fn row_to_voucher(row: &sqlx::sqlite::SqliteRow) -> Result<Voucher> {
        let id_str: String = row.get("id");
        let category_str: String = row.get("category");
        let value_type: String = row.get("value_type");
        let value_amount: i64 = row.get("value_amount");
        let scope_str: String = row.get("scope");
        let expires_at_str: Option<String> = row.get("expires_at");
        let applicant_id_str: Option<String> = row.get("applicant_id");
        let created_at_str: String = row.get("created_at");

        let value = match value_type.as_str() {
            "percent" => VoucherValue::Percent(value_amount),
            "credit" => VoucherValue::Credit(value_amount),
            other => bail!("Invalid voucher value type: {}", other),
        };

        Ok(Voucher {
            id: Uuid::parse_str(&id_str).context("Invalid voucher ID")?,
            code: row.get("code"),
            category: VoucherCategory::from_str(&category_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid voucher category: {}", category_str))?,
            value,
            scope: VoucherScope::from_str(&scope_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid voucher scope: {}", scope_str))?,
            max_uses: row.get("max_uses"),
            usage_count: row.get("usage_count"),
            is_used: row.get::<i32, _>("is_used") != 0,
            expires_at: parse_optional_datetime(expires_at_str)?,
            applicant_id: applicant_id_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid voucher applicant ID")?,
            location: row.get("location"),
            created_at: parse_datetime(&created_at_str)?,
        })
    }

    // ========================
    // Routes
    // ========================

    pub async fn save_route(&self, route: &TransportRoute) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO routes (id, from_location, to_location, one_way_price, round_trip_price,
                                departure_time, arrival_time)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(route.id.to_string())
        .bind(&route.from_location)
        .bind(&route.to_location)
        .bind(route.one_way_price)
        .bind(route.round_trip_price)
        .bind(route.departure_time.map(|t| t.to_string()))
        .bind(route.arrival_time.map(|t| t.to_string()))
        .execute(&self.pool)
        .await
        .context("Failed to save route")?;
        Ok(())
    }

    pub async fn get_route(&self, from: &str, to: &str) -> Result<Option<TransportRoute>> {
        let row = sqlx::query(
            r#"
            SELECT id, from_location, to_location, one_way_price, round_trip_price,
                   departure_time, arrival_time
            FROM routes
            WHERE from_location = ? AND to_location = ?
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch route")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_route(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_routes(&self) -> Result<Vec<TransportRoute>> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_location, to_location, one_way_price, round_trip_price,
                   departure_time, arrival_time
            FROM routes
            ORDER BY from_location, to_location
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list routes")?;

        rows.iter().map(Self::row_to_route).collect()
    }

    fn row_to_route(row: &sqlx::sqlite::SqliteRow) -> Result<TransportRoute> {
        let id_str: String = row.get("id");
        let departure_str: Option<String> = row.get("departure_time");
        let arrival_str: Option<String> = row.get("arrival_time");

        Ok(TransportRoute {
            id: Uuid::parse_str(&id_str).context("Invalid route ID")?,
            from_location: row.get("from_location"),
            to_location: row.get("to_location"),
            one_way_price: row.get("one_way_price"),
            round_trip_price: row.get("round_trip_price"),
            departure_time: parse_optional_time(departure_str)?,
            arrival_time: parse_optional_time(arrival_str)?,
        })
    }

    // ========================
    // Policies
    // ========================

    pub async fn save_policy(&self, policy: &CancellationPolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO policies (id, name, category, hours_trigger, condition, fee, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(policy.id.to_string())
        .bind(&policy.name)
        .bind(policy.category.as_str())
        .bind(policy.hours_trigger)
        .bind(policy.condition.map(|c| c.as_str()))
        .bind(policy.fee)
        .bind(policy.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save policy")?;
        Ok(())
    }

    pub async fn list_policies(&self) -> Result<Vec<CancellationPolicy>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, category, hours_trigger, condition, fee, created_at
            FROM policies
            ORDER BY category, hours_trigger
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list policies")?;

        rows.iter().map(Self::row_to_policy).collect()
    }

    fn row_to_policy(row: &sqlx::sqlite::SqliteRow) -> Result<CancellationPolicy> {
        let id_str: String = row.get("id");
        let category_str: String = row.get("category");
        let condition_str: Option<String> = row.get("condition");
        let created_at_str: String = row.get("created_at");

        Ok(CancellationPolicy {
            id: Uuid::parse_str(&id_str).context("Invalid policy ID")?,
            name: row.get("name"),
            category: PolicyCategory::from_str(&category_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid policy category: {}", category_str))?,
            hours_trigger: row.get("hours_trigger"),
            condition: condition_str
                .map(|s| {
                    TriggerCondition::from_str(&s)
                        .ok_or_else(|| anyhow::anyhow!("Invalid trigger condition: {}", s))
                })
                .transpose()?,
            fee: row.get("fee"),
            created_at: parse_datetime(&created_at_str)?,
        })
    }

    // ========================
    // Tickets
    // ========================

    pub async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let row = sqlx::query(
            r#"
            SELECT id, applicant_id, from_location, to_location, trip_type, departure_at,
                   fare, status, created_at
            FROM tickets
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch ticket")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_ticket(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_tickets_for_applicant(&self, id: ApplicantId) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(
            r#"
            SELECT id, applicant_id, from_location, to_location, trip_type, departure_at,
                   fare, status, created_at
            FROM tickets
            WHERE applicant_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tickets for applicant")?;

        rows.iter().map(Self::row_to_ticket).collect()
    }

    /// Issued tickets on a route within a departure window, ordered by
    /// departure. Feeds the transport manifest export.
    pub async fn list_manifest_tickets(
        &self,
        from: &str,
        to: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(
            r#"
            SELECT id, applicant_id, from_location, to_location, trip_type, departure_at,
                   fare, status, created_at
            FROM tickets
            WHERE from_location = ? AND to_location = ? AND status = 'issued'
              AND departure_at >= ? AND departure_at < ?
            ORDER BY departure_at
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(window_start.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list manifest tickets")?;

        rows.iter().map(Self::row_to_ticket).collect()
    }

    fn row_to_ticket(row: &sqlx::sqlite::SqliteRow) -> Result<Ticket> {
        let id_str: String = row.get("id");
        let applicant_id_str: String = row.get("applicant_id");
        let trip_type_str: String = row.get("trip_type");
        let status_str: String = row.get("status");
        let departure_str: String = row.get("departure_at");
        let created_at_str: String = row.get("created_at");

        Ok(Ticket {
            id: Uuid::parse_str(&id_str).context("Invalid ticket ID")?,
            applicant_id: Uuid::parse_str(&applicant_id_str).context("Invalid applicant ID")?,
            from_location: row.get("from_location"),
            to_location: row.get("to_location"),
            trip_type: TripType::from_str(&trip_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid trip type: {}", trip_type_str))?,
            departure_at: parse_datetime(&departure_str)?,
            fare: row.get("fare"),
            status: TicketStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid ticket status: {}", status_str))?,
            created_at: parse_datetime(&created_at_str)?,
        })
    }

    // ========================
    // Transactions
    // ========================

    /// Record a standalone ledger entry (expense, withdrawal, or a
    /// payment outside a quote commit).
    pub async fn save_transaction(&self, entry: &mut Transaction) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_transaction_in_tx(&mut tx, entry).await?;
        tx.commit().await.context("Failed to save transaction")?;
        Ok(())
    }

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence, kind, amount, applicant_id, location, occurred_at,
                   recorded_at, description
            FROM transactions
            ORDER BY sequence
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    pub async fn list_transactions_for_applicant(
        &self,
        id: ApplicantId,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence, kind, amount, applicant_id, location, occurred_at,
                   recorded_at, description
            FROM transactions
            WHERE applicant_id = ?
            ORDER BY sequence
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions for applicant")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Inflow/outflow totals grouped by transaction kind.
    pub async fn aggregate_by_kind(
        &self,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<Vec<LedgerAggregate>> {
        self.aggregate_by("kind", from_date, to_date).await
    }

    /// Inflow/outflow totals grouped by location.
    pub async fn aggregate_by_location(
        &self,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<Vec<LedgerAggregate>> {
        self.aggregate_by("COALESCE(location, '')", from_date, to_date)
            .await
    }

    async fn aggregate_by(
        &self,
        group_expr: &str,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<Vec<LedgerAggregate>> {
        // group_expr is one of two fixed column expressions, never user input.
        let query = format!(
            r#"
            SELECT {group_expr} as grp,
                   COUNT(*) as count,
                   COALESCE(SUM(CASE WHEN kind = 'payment' THEN amount ELSE 0 END), 0) as inflow,
                   COALESCE(SUM(CASE WHEN kind != 'payment' THEN amount ELSE 0 END), 0) as outflow
            FROM transactions
            WHERE occurred_at >= ? AND occurred_at < ?
            GROUP BY grp
            ORDER BY grp
            "#
        );

        let rows = sqlx::query(&query)
            .bind(from_date.to_rfc3339())
            .bind(to_date.to_rfc3339())
            .fetch_all(&self.pool)
            .await
            .context("Failed to aggregate transactions")?;

        Ok(rows
            .iter()
            .map(|row| LedgerAggregate {
                group: row.get("grp"),
                count: row.get("count"),
                inflow: row.get("inflow"),
                outflow: row.get("outflow"),
            })
            .collect())
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let applicant_id_str: Option<String> = row.get("applicant_id");
        let occurred_at_str: String = row.get("occurred_at");
        let recorded_at_str: String = row.get("recorded_at");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("sequence"),
            kind: TransactionKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            amount: row.get("amount"),
            applicant_id: applicant_id_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid transaction applicant ID")?,
            location: row.get("location"),
            occurred_at: parse_datetime(&occurred_at_str)?,
            recorded_at: parse_datetime(&recorded_at_str)?,
            description: row.get("description"),
        })
    }

    // ========================
    // Integrity
    // ========================

    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let applicant_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM applicants")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let transaction_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM transactions")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let sequence_check = sqlx::query(
            r#"
            SELECT MIN(sequence) as min_seq, MAX(sequence) as max_seq, COUNT(*) as count
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let min_seq: Option<i64> = sequence_check.get("min_seq");
        let max_seq: Option<i64> = sequence_check.get("max_seq");
        let count: i64 = sequence_check.get("count");
        let has_sequence_gaps = match (min_seq, max_seq) {
            (Some(min), Some(max)) => (max - min + 1) != count,
            _ => false,
        };

        let balance_drift_count: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM applicants
            WHERE remaining_balance != total_amount - amount_paid
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let voucher_overuse_count: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM vouchers
            WHERE usage_count > max_uses
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        let orphan_ticket_count: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM tickets t
            WHERE NOT EXISTS (SELECT 1 FROM applicants a WHERE a.id = t.applicant_id)
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get("count");

        Ok(IntegrityStats {
            applicant_count,
            transaction_count,
            has_sequence_gaps,
            balance_drift_count,
            voucher_overuse_count,
            orphan_ticket_count,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_datetime(&s)).transpose()
}

fn parse_optional_time(s: Option<String>) -> Result<Option<NaiveTime>> {
    s.map(|s| {
        NaiveTime::parse_from_str(&s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
            .context("Invalid time of day")
    })
    .transpose()
}
