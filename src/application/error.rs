use thiserror::Error;

use crate::domain::{ApplicantStatus, PricingError, TicketStatus};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Applicant not found: {0}")]
    ApplicantNotFound(String),

    #[error("Could not allocate a unique applicant code after {0} attempts")]
    ApplicantCodeCollision(usize),

    #[error("Unknown promo code: {0}")]
    InvalidPromoCode(String),

    #[error("Promo code expired: {0}")]
    ExpiredPromoCode(String),

    #[error("Promo code usage cap reached: {0}")]
    PromoUsageExceeded(String),

    #[error("Voucher not found: {0}")]
    VoucherNotFound(String),

    #[error("Voucher is used, expired or exhausted")]
    VoucherNotRedeemable,

    #[error("Voucher value kind does not fit this operation")]
    WrongVoucherKind,

    #[error("No transport route from {from} to {to}")]
    RouteNotFound { from: String, to: String },

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Retake not allowed from status {0}")]
    RetakeNotAllowed(ApplicantStatus),

    #[error("Illegal applicant status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: ApplicantStatus,
        to: ApplicantStatus,
    },

    #[error("Illegal ticket status transition: {from} -> {to}")]
    InvalidTicketTransition {
        from: TicketStatus,
        to: TicketStatus,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Transport selected but origin or destination is missing")]
    MissingTransportDetails,

    #[error("Ticket was updated concurrently; retry the operation")]
    ConcurrentTicketUpdate,

    #[error("Voucher was redeemed concurrently; retry the operation")]
    ConcurrentVoucherRedemption,

    #[error("Applicant balance drifted from total minus paid; commit rolled back")]
    BalanceInvariantViolation,

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::InvalidPromoCode(code) => AppError::InvalidPromoCode(code),
            PricingError::ExpiredPromoCode(code) => AppError::ExpiredPromoCode(code),
            PricingError::PromoUsageExceeded(code) => AppError::PromoUsageExceeded(code),
            // The engine has no location context; callers with the pair
            // in hand construct RouteNotFound directly instead.
            PricingError::RouteNotFound => AppError::RouteNotFound {
                from: String::new(),
                to: String::new(),
            },
            PricingError::RetakeNotAllowed(status) => AppError::RetakeNotAllowed(status),
            PricingError::VoucherNotRedeemable => AppError::VoucherNotRedeemable,
            PricingError::WrongVoucherKind => AppError::WrongVoucherKind,
        }
    }
}
