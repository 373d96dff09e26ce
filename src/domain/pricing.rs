use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    Amount, ApplicantStatus, CancellationPolicy, PolicyCategory, Ticket, TransportRoute,
    TransportSelection, TripType, Voucher, VoucherCategory, VoucherId, resolve_fee,
};

/// Configuration snapshot passed into every quote. Explicit, never
/// ambient: the unified registration price covers first registrations
/// and exam retakes alike.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricingConfig {
    pub registration_price: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteKind {
    Registration,
    Retake,
    TicketIssuance,
    TicketChange,
    TicketCancellation,
}

/// A computed monetary quote, ready to be committed.
///
/// `total` is the balance delta the commit applies (charge-style quotes
/// keep it non-negative; ticket changes may go negative, reducing the
/// balance). `voucher_ids` lists the vouchers the commit must consume
/// atomically alongside the money movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub kind: QuoteKind,
    pub base: Amount,
    pub transport: Amount,
    pub discount: Amount,
    pub fee: Amount,
    pub price_diff: Amount,
    pub total: Amount,
    pub amount_paid: Amount,
    pub remaining: Amount,
    pub compensation: Amount,
    pub voucher_ids: Vec<VoucherId>,
    pub policy_name: Option<String>,
}

impl Quote {
    fn empty(kind: QuoteKind) -> Self {
        Self {
            kind,
            base: 0,
            transport: 0,
            discount: 0,
            fee: 0,
            price_diff: 0,
            total: 0,
            amount_paid: 0,
            remaining: 0,
            compensation: 0,
            voucher_ids: Vec::new(),
            policy_name: None,
        }
    }
}

/// Exactly one discount source is authoritative per registration.
#[derive(Debug, Clone, Copy)]
pub enum DiscountSource<'a> {
    None,
    /// A promo code the caller resolved against the store; `None` means
    /// the code matched nothing.
    Promo {
        code: &'a str,
        voucher: Option<&'a Voucher>,
    },
    /// Admin-entered amount, taken verbatim (not validated against any cap)
    Manual(Amount),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    InvalidPromoCode(String),
    ExpiredPromoCode(String),
    PromoUsageExceeded(String),
    RouteNotFound,
    RetakeNotAllowed(ApplicantStatus),
    VoucherNotRedeemable,
    WrongVoucherKind,
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::InvalidPromoCode(code) => write!(f, "unknown promo code: {}", code),
            PricingError::ExpiredPromoCode(code) => write!(f, "promo code expired: {}", code),
            PricingError::PromoUsageExceeded(code) => {
                write!(f, "promo code usage cap reached: {}", code)
            }
            PricingError::RouteNotFound => write!(f, "no transport route for the requested pair"),
            PricingError::RetakeNotAllowed(status) => {
                write!(f, "retake not allowed from status {}", status)
            }
            PricingError::VoucherNotRedeemable => {
                write!(f, "voucher is used, expired or exhausted")
            }
            PricingError::WrongVoucherKind => {
                write!(f, "voucher value kind does not fit this operation")
            }
        }
    }
}

impl std::error::Error for PricingError {}

/// Inputs for a new-registration quote.
#[derive(Debug, Clone)]
pub struct RegistrationInput<'a> {
    pub transport: TransportSelection,
    /// Route for the chosen transport, looked up by the caller
    pub route: Option<&'a TransportRoute>,
    pub discount: DiscountSource<'a>,
    /// Initial deposit, 0 for a plain registration
    pub amount_paid: Amount,
    pub now: DateTime<Utc>,
}

/// Quote a new registration: unified base price, optional transport,
/// at most one discount source. The discount is clamped so the total
/// never goes negative.
pub fn quote_registration(
    config: &PricingConfig,
    input: &RegistrationInput<'_>,
) -> Result<Quote, PricingError> {
    let transport_price = match input.transport.trip_type() {
        Some(trip_type) => input
            .route
            .map(|r| r.price(trip_type))
            .ok_or(PricingError::RouteNotFound)?,
        None => 0,
    };

    let gross = config.registration_price + transport_price;

    let mut quote = Quote::empty(QuoteKind::Registration);
    quote.base = config.registration_price;
    quote.transport = transport_price;

    let discount = match input.discount {
        DiscountSource::None => 0,
        DiscountSource::Promo { code, voucher } => {
            let voucher = validate_promo(code, voucher, input.now)?;
            quote.voucher_ids.push(voucher.id);
            let percent = voucher.value.percent().ok_or(PricingError::WrongVoucherKind)?;
            gross * percent / 100
        }
        DiscountSource::Manual(amount) => amount,
    };

    quote.discount = discount.min(gross);
    quote.total = gross - quote.discount;
    quote.amount_paid = input.amount_paid;
    quote.remaining = quote.total - input.amount_paid;
    Ok(quote)
}

/// Validate a promo code against the voucher the caller resolved.
/// Codes match case-sensitively; a resolved voucher whose stored code
/// differs is as invalid as no voucher at all.
fn validate_promo<'a>(
    code: &str,
    voucher: Option<&'a Voucher>,
    now: DateTime<Utc>,
) -> Result<&'a Voucher, PricingError> {
    let voucher = voucher.ok_or_else(|| PricingError::InvalidPromoCode(code.to_string()))?;
    if voucher.category != VoucherCategory::Public || voucher.code.as_deref() != Some(code) {
        return Err(PricingError::InvalidPromoCode(code.to_string()));
    }
    if voucher.is_expired(now) {
        return Err(PricingError::ExpiredPromoCode(code.to_string()));
    }
    if voucher.is_used || voucher.is_exhausted() {
        return Err(PricingError::PromoUsageExceeded(code.to_string()));
    }
    Ok(voucher)
}

/// Quote an exam retake. The base fee is the same unified registration
/// price; an eligible percent voucher (Personal/Compensation, exam
/// scoped) reduces it, usually to zero. The caller may pin a specific
/// voucher, otherwise the first active one is taken.
pub fn quote_retake(
    config: &PricingConfig,
    status: ApplicantStatus,
    held_vouchers: &[Voucher],
    chosen: Option<VoucherId>,
    now: DateTime<Utc>,
) -> Result<Quote, PricingError> {
    if !status.is_retake_eligible() {
        return Err(PricingError::RetakeNotAllowed(status));
    }

    let eligible = |v: &Voucher| {
        matches!(
            v.category,
            VoucherCategory::Personal | VoucherCategory::Compensation
        ) && v.scope.covers_exam()
            && v.value.percent().is_some()
            && v.is_active(now)
    };

    let voucher = match chosen {
        Some(id) => {
            let voucher = held_vouchers
                .iter()
                .find(|v| v.id == id)
                .ok_or(PricingError::VoucherNotRedeemable)?;
            if !eligible(voucher) {
                return Err(PricingError::VoucherNotRedeemable);
            }
            Some(voucher)
        }
        None => held_vouchers.iter().find(|v| eligible(v)),
    };

    let base = config.registration_price;
    let mut quote = Quote::empty(QuoteKind::Retake);
    quote.base = base;

    if let Some(voucher) = voucher {
        let percent = voucher.value.percent().unwrap_or(100);
        quote.discount = (base * percent / 100).min(base);
        quote.voucher_ids.push(voucher.id);
    }

    quote.total = base - quote.discount;
    quote.remaining = quote.total;
    Ok(quote)
}

/// Quote a ticket issuance. Credit vouchers stack; each one is consumed
/// in full even when its balance exceeds what the fare needed — leftover
/// credit does not carry over.
pub fn quote_ticket_issuance(
    route: Option<&TransportRoute>,
    trip_type: TripType,
    credit_vouchers: &[&Voucher],
    now: DateTime<Utc>,
) -> Result<Quote, PricingError> {
    let fare = route
        .map(|r| r.price(trip_type))
        .ok_or(PricingError::RouteNotFound)?;

    let mut credit_total: Amount = 0;
    let mut quote = Quote::empty(QuoteKind::TicketIssuance);
    for voucher in credit_vouchers {
        if !voucher.is_active(now) {
            return Err(PricingError::VoucherNotRedeemable);
        }
        let balance = voucher.value.credit().ok_or(PricingError::WrongVoucherKind)?;
        credit_total += balance;
        quote.voucher_ids.push(voucher.id);
    }

    quote.transport = fare;
    quote.discount = credit_total.min(fare);
    quote.total = fare - quote.discount;
    quote.remaining = quote.total;
    Ok(quote)
}

/// Quote a ticket modification: fee from the Modification policies plus
/// the fare difference against the fare stored at issuance. The total is
/// a signed balance delta — a cheaper route reduces what is owed, it is
/// never paid out.
pub fn quote_ticket_change(
    ticket: &Ticket,
    new_route: Option<&TransportRoute>,
    new_trip_type: TripType,
    policies: &[CancellationPolicy],
    now: DateTime<Utc>,
) -> Result<Quote, PricingError> {
    let new_fare = new_route
        .map(|r| r.price(new_trip_type))
        .ok_or(PricingError::RouteNotFound)?;

    let hours = ticket.hours_until_departure(now);
    let resolution = resolve_fee(policies, PolicyCategory::Modification, hours);

    let mut quote = Quote::empty(QuoteKind::TicketChange);
    quote.transport = new_fare;
    quote.fee = resolution.fee;
    quote.price_diff = new_fare - ticket.fare;
    quote.total = resolution.fee + quote.price_diff;
    quote.remaining = quote.total;
    quote.policy_name = Some(resolution.policy_name);
    Ok(quote)
}

/// Quote a ticket cancellation: the Cancellation policy fee is retained
/// out of the stored fare and the rest becomes a compensation credit.
/// No balance delta — the fare was already charged at issuance.
pub fn quote_ticket_cancellation(
    ticket: &Ticket,
    policies: &[CancellationPolicy],
    now: DateTime<Utc>,
) -> Quote {
    let hours = ticket.hours_until_departure(now);
    let resolution = resolve_fee(policies, PolicyCategory::Cancellation, hours);

    let mut quote = Quote::empty(QuoteKind::TicketCancellation);
    quote.fee = resolution.fee;
    quote.compensation = (ticket.fare - resolution.fee).max(0);
    quote.policy_name = Some(resolution.policy_name);
    quote
}
