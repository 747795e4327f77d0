use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::accrual::AccrualBasis;
use super::Unit;

/// Per-float variables owned by the client-configuration store. This crate
/// only ever reads them; the shares and prudential factor are fractions of
/// the gross accrual (e.g. 0.1 = one tenth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatConfig {
    pub client_id: String,
    pub float_id: String,
    pub currency: String,
    pub accrual_rate_annual_bps: i64,
    pub bonus_pool_share_of_accrual: Decimal,
    pub client_share_of_accrual: Decimal,
    pub prudential_factor: Decimal,
    pub default_timezone: String,
    /// Allocation id for the bonus pool tracker entity.
    pub bonus_pool_tracker: String,
    /// Allocation id for the client share tracker entity.
    pub client_share_tracker: String,
    /// Display-only comparator rates, passed through when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparator_rates: Option<serde_json::Value>,
}

/// The instruction handed to the downstream distributor once a float's
/// gross accrual has been computed. The split between bonus pool, client fee
/// and user share is the distributor's business, not ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualInstruction {
    pub client_id: String,
    pub float_id: String,
    pub accrual_amount: i64,
    pub currency: String,
    pub unit: Unit,
    pub reference_time_millis: i64,
    pub backing_entity_identifier: String,
    pub calculation_basis: AccrualBasis,
}

/// What the distributor reports back. Success gates the durable write of the
/// accrual log; the detail is recorded for the run report and otherwise
/// opaque to this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionResult {
    pub entity_allocation_ids: Vec<String>,
    pub user_allocation_count: u64,
}
