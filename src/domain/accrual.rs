use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::round_money;
use super::FloatConfig;

pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// Basis points are hundredths of a percent.
const BASIS_POINT_DIVISOR: i64 = 10_000;

/// The annual rate is treated as simple, not effective.
const DAYS_PER_YEAR: i64 = 365;

/// Inputs and intermediate rate of a gross accrual computation, recorded in
/// the float log context so every accrued amount can be audited later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualBasis {
    pub float_balance_hundredth_cent: i64,
    pub accrual_rate_annual_bps: i64,
    pub millis_since_last_accrual: i64,
    pub accrual_rate_applied: Decimal,
}

/// Nominal gross daily rate: `bps / 10_000 / 365`.
pub fn gross_daily_rate(accrual_rate_annual_bps: i64) -> Decimal {
    Decimal::from(accrual_rate_annual_bps)
        / Decimal::from(BASIS_POINT_DIVISOR)
        / Decimal::from(DAYS_PER_YEAR)
}

/// Gross accrual for a whole float over the elapsed period, in
/// hundredth-cents. The portion of a day is deliberately uncapped: if the
/// nightly run was missed for N days the whole gap accrues linearly in one
/// shot rather than compounding day by day. A non-positive balance or a
/// non-positive elapsed period accrues nothing; the result is never negative
/// for a non-negative rate. Rounding is half-away-from-zero, applied once.
pub fn gross_accrual(
    float_balance_hundredth_cent: i64,
    accrual_rate_annual_bps: i64,
    millis_since_last_accrual: i64,
) -> (i64, AccrualBasis) {
    let portion_of_day = if millis_since_last_accrual > 0 {
        Decimal::from(millis_since_last_accrual) / Decimal::from(MILLIS_PER_DAY)
    } else {
        Decimal::ZERO
    };
    let rate_to_apply = gross_daily_rate(accrual_rate_annual_bps) * portion_of_day;

    let amount = if float_balance_hundredth_cent > 0 {
        round_money(Decimal::from(float_balance_hundredth_cent) * rate_to_apply).max(0)
    } else {
        0
    };

    let basis = AccrualBasis {
        float_balance_hundredth_cent,
        accrual_rate_annual_bps,
        millis_since_last_accrual,
        accrual_rate_applied: rate_to_apply,
    };
    (amount, basis)
}

/// Net daily growth rate seen by a user: the gross daily rate less the bonus
/// pool share, client share and prudential factor.
pub fn net_daily_rate(config: &FloatConfig) -> Decimal {
    let deductions = config.bonus_pool_share_of_accrual
        + config.client_share_of_accrual
        + config.prudential_factor;
    gross_daily_rate(config.accrual_rate_annual_bps) * (Decimal::ONE - deductions)
}

/// Apply exactly one full day of the net rate, regardless of how much of the
/// day has actually elapsed. This intentionally diverges from the gross
/// accrual's pro-rating: the end-of-day figure is a conservative display
/// estimate, not a bookkeeping amount. The result stays unrounded so forward
/// projections can compound it.
pub fn accrue_balance_by_day(starting_balance: Decimal, config: &FloatConfig) -> Decimal {
    starting_balance * (Decimal::ONE + net_daily_rate(config))
}

/// Annualised comparator rate for display next to reference products:
/// `floor(bps * (1 - bonus_share - client_share))`. The prudential factor is
/// excluded here, matching what gets quoted.
pub fn reference_rate_bps(config: &FloatConfig) -> i64 {
    let net = Decimal::from(config.accrual_rate_annual_bps)
        * (Decimal::ONE - config.bonus_pool_share_of_accrual - config.client_share_of_accrual);
    net.floor().to_i64().unwrap_or(0)
}
