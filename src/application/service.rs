use chrono::{DateTime, Utc};

use crate::domain::{
    Amount, Applicant, ApplicantId, ApplicantStatus, DiscountSource, PricingConfig, Quote, Ticket,
    TicketId, TicketStatus, Transaction, TransactionKind, TransportSelection, TripType, Voucher,
    VoucherCategory, VoucherId, VoucherScope, VoucherValue, generate_code, quote_registration,
    quote_retake, quote_ticket_cancellation, quote_ticket_change, quote_ticket_issuance,
};
use crate::storage::{BalanceDrift, IntegrityStats, Repository, TicketConflict, VoucherConflict};

use super::AppError;

const MAX_CODE_ATTEMPTS: usize = 10;
const DEFAULT_REGISTRATION_PRICE: Amount = 16000;

/// Service-wide pricing configuration. Loaded once and snapshotted into
/// every quote, never read as ambient state mid-operation.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub registration_price: Amount,
    pub currency: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            registration_price: DEFAULT_REGISTRATION_PRICE,
            currency: "DZD".to_string(),
        }
    }
}

/// Inputs for registering a new applicant.
#[derive(Debug, Clone, Default)]
pub struct RegisterApplicant {
    pub full_name: String,
    pub phone: Option<String>,
    pub transport: Option<TransportSelection>,
    pub origin_location: Option<String>,
    pub exam_location: Option<String>,
    pub promo_code: Option<String>,
    pub manual_discount: Option<Amount>,
    /// Initial deposit taken at the counter, 0 for none
    pub deposit: Amount,
    /// Branch/office recording the deposit
    pub till_location: Option<String>,
}

/// Result of committing a registration.
#[derive(Debug)]
pub struct RegistrationResult {
    pub applicant: Applicant,
    pub quote: Quote,
}

/// Result of committing an exam retake.
#[derive(Debug)]
pub struct RetakeResult {
    pub applicant: Applicant,
    pub quote: Quote,
}

/// Result of committing a ticket issuance.
#[derive(Debug)]
pub struct TicketIssueResult {
    pub ticket: Ticket,
    pub quote: Quote,
}

/// Result of committing a ticket modification.
#[derive(Debug)]
pub struct TicketChangeResult {
    pub ticket: Ticket,
    pub quote: Quote,
}

/// Result of committing a ticket cancellation.
#[derive(Debug)]
pub struct CancellationResult {
    pub ticket: Ticket,
    pub quote: Quote,
    pub compensation: Option<Voucher>,
}

/// Application service pairing pure quotes with atomic commits.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
pub struct AgencyService {
    repo: Repository,
    config: ServiceConfig,
}

impl AgencyService {
    pub fn new(repo: Repository, config: ServiceConfig) -> Self {
        Self { repo, config }
    }

    /// Initialize a new database at the given path and persist config.
    pub async fn init(database_path: &str, config: ServiceConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        repo.set_config("registration_price", &config.registration_price.to_string())
            .await?;
        repo.set_config("currency", &config.currency).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database, loading its stored config.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;

        let mut config = ServiceConfig::default();
        if let Some(value) = repo.get_config("registration_price").await? {
            config.registration_price = value
                .parse()
                .map_err(|_| AppError::InvalidAmount(value.clone()))?;
        }
        if let Some(currency) = repo.get_config("currency").await? {
            config.currency = currency;
        }

        Ok(Self::new(repo, config))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn set_registration_price(&mut self, price: Amount) -> Result<(), AppError> {
        if price < 0 {
            return Err(AppError::InvalidAmount(price.to_string()));
        }
        self.repo
            .set_config("registration_price", &price.to_string())
            .await?;
        self.config.registration_price = price;
        Ok(())
    }

    fn pricing_config(&self) -> PricingConfig {
        PricingConfig {
            registration_price: self.config.registration_price,
        }
    }

    // ========================
    // Registration
    // ========================

    /// Compute a registration quote without committing anything.
    pub async fn preview_registration(&self, input: &RegisterApplicant) -> Result<Quote, AppError> {
        self.build_registration_quote(input, Utc::now()).await
    }

    /// Register a new applicant: quote, allocate a unique code, then
    /// commit the applicant, the promo consume and the deposit entry
    /// atomically.
    pub async fn register_applicant(
        &self,
        input: RegisterApplicant,
    ) -> Result<RegistrationResult, AppError> {
        if input.deposit < 0 {
            return Err(AppError::InvalidAmount(input.deposit.to_string()));
        }

        let now = Utc::now();
        let quote = self.build_registration_quote(&input, now).await?;
        let code = self.allocate_code().await?;

        let transport = input.transport.unwrap_or(TransportSelection::None);
        let mut applicant = Applicant::new(code, input.full_name.clone());
        applicant.phone = input.phone.clone();
        applicant.transport = transport;
        applicant.origin_location = input.origin_location.clone();
        applicant.exam_location = input.exam_location.clone();
        applicant.total_amount = quote.total;
        applicant.amount_paid = quote.amount_paid;
        applicant.discount_applied = quote.discount;
        applicant.remaining_balance = quote.remaining;
        applicant.status = ApplicantStatus::ServicesConfigured;

        let mut deposit_entry = if input.deposit > 0 {
            Some(
                Transaction::new(TransactionKind::Payment, input.deposit, now)
                    .with_applicant(applicant.id)
                    .with_description("registration deposit"),
            )
        } else {
            None
        };
        if let (Some(entry), Some(location)) = (deposit_entry.as_mut(), &input.till_location) {
            entry.location = Some(location.clone());
        }

        self.repo
            .commit_registration(
                &applicant,
                quote.voucher_ids.first().copied(),
                deposit_entry.as_mut(),
            )
            .await
            .map_err(map_commit_err)?;

        Ok(RegistrationResult { applicant, quote })
    }

    async fn build_registration_quote(
        &self,
        input: &RegisterApplicant,
        now: DateTime<Utc>,
    ) -> Result<Quote, AppError> {
        let transport = input.transport.unwrap_or(TransportSelection::None);

        let route = match transport {
            TransportSelection::None => None,
            _ => {
                let (from, to) = match (&input.origin_location, &input.exam_location) {
                    (Some(from), Some(to)) => (from.clone(), to.clone()),
                    _ => return Err(AppError::MissingTransportDetails),
                };
                let route = self
                    .repo
                    .get_route(&from, &to)
                    .await?
                    .ok_or(AppError::RouteNotFound { from, to })?;
                Some(route)
            }
        };

        if input.promo_code.is_some() && input.manual_discount.is_some() {
            return Err(AppError::InvalidAmount(
                "promo code and manual discount are mutually exclusive".to_string(),
            ));
        }

        let promo_voucher = match &input.promo_code {
            Some(code) => self.repo.get_voucher_by_code(code).await?,
            None => None,
        };

        let discount = match (&input.promo_code, input.manual_discount) {
            (Some(code), _) => DiscountSource::Promo {
                code,
                voucher: promo_voucher.as_ref(),
            },
            (None, Some(amount)) => DiscountSource::Manual(amount),
            (None, None) => DiscountSource::None,
        };

        let quote = quote_registration(
            &self.pricing_config(),
            &crate::domain::RegistrationInput {
                transport,
                route: route.as_ref(),
                discount,
                amount_paid: input.deposit,
                now,
            },
        )?;
        Ok(quote)
    }

    async fn allocate_code(&self) -> Result<String, AppError> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = {
                let mut rng = rand::thread_rng();
                generate_code(&mut rng)
            };
            if !self.repo.applicant_code_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(AppError::ApplicantCodeCollision(MAX_CODE_ATTEMPTS))
    }

    // ========================
    // Applicant lookups & lifecycle
    // ========================

    pub async fn get_applicant(&self, id: ApplicantId) -> Result<Applicant, AppError> {
        self.repo
            .get_applicant(id)
            .await?
            .ok_or_else(|| AppError::ApplicantNotFound(id.to_string()))
    }

    pub async fn get_applicant_by_code(&self, code: &str) -> Result<Applicant, AppError> {
        self.repo
            .get_applicant_by_code(code)
            .await?
            .ok_or_else(|| AppError::ApplicantNotFound(code.to_string()))
    }

    pub async fn list_applicants(&self) -> Result<Vec<Applicant>, AppError> {
        Ok(self.repo.list_applicants().await?)
    }

    pub async fn list_outstanding_applicants(&self) -> Result<Vec<Applicant>, AppError> {
        Ok(self.repo.list_outstanding_applicants().await?)
    }

    /// Record a payment against an applicant's balance.
    pub async fn record_payment(
        &self,
        applicant_id: ApplicantId,
        amount: Amount,
        location: Option<String>,
        description: Option<String>,
    ) -> Result<Transaction, AppError> {
        if amount <= 0 {
            return Err(AppError::InvalidAmount(amount.to_string()));
        }
        // Ensure the applicant exists before touching the ledger.
        self.get_applicant(applicant_id).await?;

        let mut entry = Transaction::new(TransactionKind::Payment, amount, Utc::now())
            .with_applicant(applicant_id);
        entry.location = location;
        entry.description = description;

        self.repo
            .commit_payment(applicant_id, &mut entry)
            .await
            .map_err(map_commit_err)?;
        Ok(entry)
    }

    /// Book the exam slot for an applicant with configured services.
    pub async fn schedule_exam(
        &self,
        applicant_id: ApplicantId,
        exam_at: DateTime<Utc>,
        exam_location: &str,
    ) -> Result<(), AppError> {
        let applicant = self.get_applicant(applicant_id).await?;
        self.ensure_transition(&applicant, ApplicantStatus::ExamScheduled)?;
        self.repo
            .schedule_exam(
                applicant_id,
                exam_at,
                exam_location,
                ApplicantStatus::ExamScheduled,
            )
            .await?;
        Ok(())
    }

    pub async fn mark_attended(&self, applicant_id: ApplicantId) -> Result<(), AppError> {
        self.transition_status(applicant_id, ApplicantStatus::AttendedExam)
            .await
    }

    pub async fn mark_absent(&self, applicant_id: ApplicantId) -> Result<(), AppError> {
        self.transition_status(applicant_id, ApplicantStatus::Absent)
            .await
    }

    pub async fn record_exam_result(
        &self,
        applicant_id: ApplicantId,
        passed: bool,
    ) -> Result<(), AppError> {
        let status = if passed {
            ApplicantStatus::Passed
        } else {
            ApplicantStatus::Failed
        };
        self.transition_status(applicant_id, status).await
    }

    /// Admin override stepping a recorded result back to attended.
    pub async fn undo_exam_result(&self, applicant_id: ApplicantId) -> Result<(), AppError> {
        self.transition_status(applicant_id, ApplicantStatus::AttendedExam)
            .await
    }

    async fn transition_status(
        &self,
        applicant_id: ApplicantId,
        next: ApplicantStatus,
    ) -> Result<(), AppError> {
        let applicant = self.get_applicant(applicant_id).await?;
        self.ensure_transition(&applicant, next)?;
        self.repo.update_applicant_status(applicant_id, next).await?;
        Ok(())
    }

    fn ensure_transition(
        &self,
        applicant: &Applicant,
        next: ApplicantStatus,
    ) -> Result<(), AppError> {
        if !applicant.status.can_transition_to(next) {
            return Err(AppError::InvalidStatusTransition {
                from: applicant.status,
                to: next,
            });
        }
        Ok(())
    }

    // ========================
    // Exam retake
    // ========================

    /// Compute a retake quote without committing anything.
    pub async fn preview_retake(
        &self,
        applicant_id: ApplicantId,
        voucher_id: Option<VoucherId>,
    ) -> Result<Quote, AppError> {
        let applicant = self.get_applicant(applicant_id).await?;
        let held = self.repo.list_vouchers_for_applicant(applicant_id).await?;
        let quote = quote_retake(
            &self.pricing_config(),
            applicant.status,
            &held,
            voucher_id,
            Utc::now(),
        )?;
        Ok(quote)
    }

    /// Schedule an exam retake: the fee lands on the running balance (it
    /// is not collected here), an eligible voucher may waive it, and the
    /// applicant goes back to scheduled.
    pub async fn commit_retake(
        &self,
        applicant_id: ApplicantId,
        voucher_id: Option<VoucherId>,
        exam_at: DateTime<Utc>,
        exam_location: &str,
    ) -> Result<RetakeResult, AppError> {
        let applicant = self.get_applicant(applicant_id).await?;
        let held = self.repo.list_vouchers_for_applicant(applicant_id).await?;
        let quote = quote_retake(
            &self.pricing_config(),
            applicant.status,
            &held,
            voucher_id,
            Utc::now(),
        )?;

        self.repo
            .commit_retake(
                applicant_id,
                quote.total,
                quote.discount,
                quote.voucher_ids.first().copied(),
                exam_at,
                exam_location,
            )
            .await
            .map_err(map_commit_err)?;

        let applicant = self.get_applicant(applicant_id).await?;
        Ok(RetakeResult { applicant, quote })
    }

    // ========================
    // Tickets
    // ========================

    pub async fn get_ticket(&self, id: TicketId) -> Result<Ticket, AppError> {
        self.repo
            .get_ticket(id)
            .await?
            .ok_or_else(|| AppError::TicketNotFound(id.to_string()))
    }

    pub async fn list_tickets_for_applicant(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<Ticket>, AppError> {
        Ok(self.repo.list_tickets_for_applicant(applicant_id).await?)
    }

    /// Compute a ticket issuance quote without committing anything.
    pub async fn preview_ticket_issuance(
        &self,
        applicant_id: ApplicantId,
        from: &str,
        to: &str,
        trip_type: TripType,
        voucher_ids: &[VoucherId],
    ) -> Result<Quote, AppError> {
        let (_, quote) = self
            .build_issuance_quote(applicant_id, from, to, trip_type, voucher_ids)
            .await?;
        Ok(quote)
    }

    /// Issue a ticket: fare from the route table, stacked credit
    /// vouchers fully consumed, payable added to the running balance.
    pub async fn issue_ticket(
        &self,
        applicant_id: ApplicantId,
        from: &str,
        to: &str,
        trip_type: TripType,
        departure_at: DateTime<Utc>,
        voucher_ids: &[VoucherId],
    ) -> Result<TicketIssueResult, AppError> {
        self.get_applicant(applicant_id).await?;
        let (fare, quote) = self
            .build_issuance_quote(applicant_id, from, to, trip_type, voucher_ids)
            .await?;

        let ticket = Ticket::new(applicant_id, from, to, trip_type, departure_at, fare);
        self.repo
            .commit_ticket_issuance(&ticket, &quote.voucher_ids, quote.total)
            .await
            .map_err(map_commit_err)?;

        Ok(TicketIssueResult { ticket, quote })
    }

    async fn build_issuance_quote(
        &self,
        applicant_id: ApplicantId,
        from: &str,
        to: &str,
        trip_type: TripType,
        voucher_ids: &[VoucherId],
    ) -> Result<(Amount, Quote), AppError> {
        let route = self
            .repo
            .get_route(from, to)
            .await?
            .ok_or_else(|| AppError::RouteNotFound {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        let mut vouchers = Vec::with_capacity(voucher_ids.len());
        for id in voucher_ids {
            let voucher = self
                .repo
                .get_voucher(*id)
                .await?
                .ok_or_else(|| AppError::VoucherNotFound(id.to_string()))?;
            // Personal grants are bound to their applicant; public credit
            // vouchers carry no binding.
            if voucher.applicant_id.is_some_and(|owner| owner != applicant_id) {
                return Err(AppError::VoucherNotRedeemable);
            }
            vouchers.push(voucher);
        }

        let refs: Vec<&Voucher> = vouchers.iter().collect();
        let quote = quote_ticket_issuance(Some(&route), trip_type, &refs, Utc::now())?;
        Ok((route.price(trip_type), quote))
    }

    /// Compute a modification quote without committing anything.
    pub async fn preview_ticket_change(
        &self,
        ticket_id: TicketId,
        new_from: &str,
        new_to: &str,
        new_trip_type: TripType,
    ) -> Result<Quote, AppError> {
        let ticket = self.get_open_ticket(ticket_id).await?;
        let (_, quote) = self
            .build_change_quote(&ticket, new_from, new_to, new_trip_type)
            .await?;
        Ok(quote)
    }

    /// Modify a ticket's route/trip: the policy fee plus the fare diff
    /// (against the fare stored at issuance) moves the running balance.
    pub async fn modify_ticket(
        &self,
        ticket_id: TicketId,
        new_from: &str,
        new_to: &str,
        new_trip_type: TripType,
        new_departure_at: Option<DateTime<Utc>>,
    ) -> Result<TicketChangeResult, AppError> {
        let ticket = self.get_open_ticket(ticket_id).await?;
        let (new_fare, quote) = self
            .build_change_quote(&ticket, new_from, new_to, new_trip_type)
            .await?;

        let mut updated = ticket.clone();
        updated.from_location = new_from.to_string();
        updated.to_location = new_to.to_string();
        updated.trip_type = new_trip_type;
        updated.fare = new_fare;
        if let Some(departure_at) = new_departure_at {
            updated.departure_at = departure_at;
        }

        self.repo
            .commit_ticket_change(&updated, quote.total)
            .await
            .map_err(map_commit_err)?;

        Ok(TicketChangeResult {
            ticket: updated,
            quote,
        })
    }

    async fn build_change_quote(
        &self,
        ticket: &Ticket,
        new_from: &str,
        new_to: &str,
        new_trip_type: TripType,
    ) -> Result<(Amount, Quote), AppError> {
        let route = self
            .repo
            .get_route(new_from, new_to)
            .await?
            .ok_or_else(|| AppError::RouteNotFound {
                from: new_from.to_string(),
                to: new_to.to_string(),
            })?;
        let policies = self.repo.list_policies().await?;
        let quote = quote_ticket_change(
            ticket,
            Some(&route),
            new_trip_type,
            &policies,
            Utc::now(),
        )?;
        Ok((route.price(new_trip_type), quote))
    }

    /// Compute a cancellation quote without committing anything.
    pub async fn preview_ticket_cancellation(&self, ticket_id: TicketId) -> Result<Quote, AppError> {
        let ticket = self.get_open_ticket(ticket_id).await?;
        let policies = self.repo.list_policies().await?;
        Ok(quote_ticket_cancellation(&ticket, &policies, Utc::now()))
    }

    /// Cancel a ticket: the fee is retained out of the stored fare and
    /// the remainder becomes an unused compensation voucher, created in
    /// the same commit.
    pub async fn cancel_ticket(&self, ticket_id: TicketId) -> Result<CancellationResult, AppError> {
        let ticket = self.get_open_ticket(ticket_id).await?;
        let policies = self.repo.list_policies().await?;
        let quote = quote_ticket_cancellation(&ticket, &policies, Utc::now());

        let compensation = if quote.compensation > 0 {
            Some(Voucher::new_compensation(
                ticket.applicant_id,
                quote.compensation,
            ))
        } else {
            None
        };

        self.repo
            .commit_ticket_cancellation(ticket_id, compensation.as_ref())
            .await
            .map_err(map_commit_err)?;

        let mut cancelled = ticket;
        cancelled.status = TicketStatus::Cancelled;
        Ok(CancellationResult {
            ticket: cancelled,
            quote,
            compensation,
        })
    }

    pub async fn mark_ticket_used(&self, ticket_id: TicketId) -> Result<(), AppError> {
        self.get_open_ticket(ticket_id).await?;
        self.repo
            .close_ticket(ticket_id, TicketStatus::Used)
            .await
            .map_err(map_commit_err)?;
        Ok(())
    }

    pub async fn mark_ticket_no_show(&self, ticket_id: TicketId) -> Result<(), AppError> {
        self.get_open_ticket(ticket_id).await?;
        self.repo
            .close_ticket(ticket_id, TicketStatus::NoShow)
            .await
            .map_err(map_commit_err)?;
        Ok(())
    }

    async fn get_open_ticket(&self, ticket_id: TicketId) -> Result<Ticket, AppError> {
        let ticket = self.get_ticket(ticket_id).await?;
        if !ticket.status.is_open() {
            return Err(AppError::InvalidTicketTransition {
                from: ticket.status,
                to: TicketStatus::Cancelled,
            });
        }
        Ok(ticket)
    }

    // ========================
    // Vouchers
    // ========================

    /// Create a shared promo code.
    pub async fn create_promo_code(
        &self,
        code: &str,
        percent: i64,
        max_uses: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Voucher, AppError> {
        if !(0..=100).contains(&percent) {
            return Err(AppError::InvalidAmount(percent.to_string()));
        }
        if max_uses <= 0 {
            return Err(AppError::InvalidAmount(max_uses.to_string()));
        }
        let mut voucher = Voucher::new_public(code, percent, max_uses);
        voucher.expires_at = expires_at;
        self.repo.save_voucher(&voucher).await?;
        Ok(voucher)
    }

    /// Grant a personal voucher to one applicant.
    pub async fn grant_voucher(
        &self,
        applicant_id: ApplicantId,
        scope: VoucherScope,
        value: VoucherValue,
    ) -> Result<Voucher, AppError> {
        self.get_applicant(applicant_id).await?;
        match value {
            VoucherValue::Percent(p) if !(0..=100).contains(&p) => {
                return Err(AppError::InvalidAmount(p.to_string()));
            }
            VoucherValue::Credit(balance) if balance <= 0 => {
                return Err(AppError::InvalidAmount(balance.to_string()));
            }
            _ => {}
        }
        let voucher = Voucher::new_personal(applicant_id, scope, value);
        self.repo.save_voucher(&voucher).await?;
        Ok(voucher)
    }

    pub async fn get_voucher(&self, id: VoucherId) -> Result<Voucher, AppError> {
        self.repo
            .get_voucher(id)
            .await?
            .ok_or_else(|| AppError::VoucherNotFound(id.to_string()))
    }

    pub async fn list_vouchers(&self) -> Result<Vec<Voucher>, AppError> {
        Ok(self.repo.list_vouchers().await?)
    }

    pub async fn list_vouchers_for_applicant(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<Voucher>, AppError> {
        Ok(self.repo.list_vouchers_for_applicant(applicant_id).await?)
    }

    /// Active credit vouchers an applicant can put toward a ticket.
    pub async fn list_usable_credit_vouchers(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<Voucher>, AppError> {
        let now = Utc::now();
        let held = self.repo.list_vouchers_for_applicant(applicant_id).await?;
        Ok(held
            .into_iter()
            .filter(|v| {
                v.is_active(now)
                    && v.value.credit().is_some()
                    && matches!(
                        v.category,
                        VoucherCategory::Personal | VoucherCategory::Compensation
                    )
            })
            .collect())
    }

    // ========================
    // Routes & policies
    // ========================

    pub async fn add_route(&self, route: &crate::domain::TransportRoute) -> Result<(), AppError> {
        Ok(self.repo.save_route(route).await?)
    }

    pub async fn get_route(
        &self,
        from: &str,
        to: &str,
    ) -> Result<crate::domain::TransportRoute, AppError> {
        self.repo
            .get_route(from, to)
            .await?
            .ok_or_else(|| AppError::RouteNotFound {
                from: from.to_string(),
                to: to.to_string(),
            })
    }

    pub async fn list_routes(&self) -> Result<Vec<crate::domain::TransportRoute>, AppError> {
        Ok(self.repo.list_routes().await?)
    }

    pub async fn add_policy(
        &self,
        policy: &crate::domain::CancellationPolicy,
    ) -> Result<(), AppError> {
        Ok(self.repo.save_policy(policy).await?)
    }

    pub async fn list_policies(&self) -> Result<Vec<crate::domain::CancellationPolicy>, AppError> {
        Ok(self.repo.list_policies().await?)
    }

    // ========================
    // Ledger & reports
    // ========================

    /// Record an agency expense (not tied to an applicant balance).
    pub async fn record_expense(
        &self,
        amount: Amount,
        location: Option<String>,
        description: Option<String>,
    ) -> Result<Transaction, AppError> {
        self.record_outflow(TransactionKind::Expense, amount, location, description)
            .await
    }

    /// Record a till withdrawal.
    pub async fn record_withdrawal(
        &self,
        amount: Amount,
        location: Option<String>,
        description: Option<String>,
    ) -> Result<Transaction, AppError> {
        self.record_outflow(TransactionKind::Withdrawal, amount, location, description)
            .await
    }

    async fn record_outflow(
        &self,
        kind: TransactionKind,
        amount: Amount,
        location: Option<String>,
        description: Option<String>,
    ) -> Result<Transaction, AppError> {
        if amount <= 0 {
            return Err(AppError::InvalidAmount(amount.to_string()));
        }
        let mut entry = Transaction::new(kind, amount, Utc::now());
        entry.location = location;
        entry.description = description;
        self.repo.save_transaction(&mut entry).await?;
        Ok(entry)
    }

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, AppError> {
        Ok(self.repo.list_transactions().await?)
    }

    pub async fn list_transactions_for_applicant(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(self.repo.list_transactions_for_applicant(applicant_id).await?)
    }

    /// Issued-ticket passenger list for a route and departure window.
    pub async fn manifest(
        &self,
        from: &str,
        to: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<(Ticket, Applicant)>, AppError> {
        let tickets = self
            .repo
            .list_manifest_tickets(from, to, window_start, window_end)
            .await?;

        let mut entries = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            let applicant = self.get_applicant(ticket.applicant_id).await?;
            entries.push((ticket, applicant));
        }
        Ok(entries)
    }

    /// Accounting summary over a date range: totals by transaction kind
    /// and by branch.
    pub async fn ledger_report(
        &self,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<super::LedgerReport, AppError> {
        let by_kind = self.repo.aggregate_by_kind(from_date, to_date).await?;
        let by_location = self.repo.aggregate_by_location(from_date, to_date).await?;
        Ok(super::build_ledger_report(
            from_date,
            to_date,
            &by_kind,
            &by_location,
        ))
    }

    /// Applicants still owing money, largest balance first.
    pub async fn outstanding_report(&self) -> Result<super::OutstandingReport, AppError> {
        let applicants = self.repo.list_outstanding_applicants().await?;
        let total_outstanding = applicants.iter().map(|a| a.remaining_balance).sum();
        Ok(super::OutstandingReport {
            as_of: Utc::now(),
            total_outstanding,
            entries: applicants
                .into_iter()
                .map(|a| super::OutstandingEntry {
                    code: a.code,
                    full_name: a.full_name,
                    remaining_balance: a.remaining_balance,
                    status: a.status,
                })
                .collect(),
        })
    }

    pub async fn check_integrity(&self) -> Result<IntegrityStats, AppError> {
        Ok(self.repo.get_integrity_stats().await?)
    }
}

/// Map repository commit failures onto the typed error taxonomy. The
/// marker errors always mean the transaction rolled back.
fn map_commit_err(err: anyhow::Error) -> AppError {
    if err.downcast_ref::<VoucherConflict>().is_some() {
        AppError::ConcurrentVoucherRedemption
    } else if err.downcast_ref::<BalanceDrift>().is_some() {
        AppError::BalanceInvariantViolation
    } else if err.downcast_ref::<TicketConflict>().is_some() {
        AppError::ConcurrentTicketUpdate
    } else {
        AppError::Database(err)
    }
}
