mod repository;

pub use repository::*;

/// SQL migration for core schema (config, applicants, ledger, vouchers)
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for transport reference data and ticketing
pub const MIGRATION_002_TRANSPORT: &str = include_str!("migrations/002_transport.sql");
