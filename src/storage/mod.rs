mod repository;

pub use repository::*;

/// SQL migration for the core ledger schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for transaction audit logs and boosts
pub const MIGRATION_002_LOGS_BOOSTS: &str = include_str!("migrations/002_logs_boosts.sql");
