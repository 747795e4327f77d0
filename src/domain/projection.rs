use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::accrual::accrue_balance_by_day;
use super::money::round_money;
use super::{FloatConfig, MoneyAmount, Unit};

/// A balance figure pinned to a moment in time, as shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub amount: i64,
    pub unit: Unit,
    pub currency: String,
    pub datetime: DateTime<Utc>,
    pub epoch_milli: i64,
}

impl BalanceSnapshot {
    pub fn new(amount: i64, currency: &str, moment: DateTime<Utc>) -> Self {
        Self {
            amount,
            unit: Unit::HundredthCent,
            currency: currency.to_string(),
            datetime: moment,
            epoch_milli: moment.timestamp_millis(),
        }
    }

    pub fn money(&self) -> MoneyAmount {
        MoneyAmount::new(self.amount, self.unit, self.currency.clone())
    }
}

/// Midnight UTC of the day containing `moment`.
pub fn start_of_day(moment: DateTime<Utc>) -> DateTime<Utc> {
    moment
        .date_naive()
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

/// Midnight UTC of the following day; the interpolation target.
pub fn end_of_day(moment: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(moment) + Duration::days(1)
}

/// Interpolate today's balance linearly between the starting balance at
/// `start_time` and the end-of-day figure. Multiplies before dividing so that
/// at the boundary the interpolation collapses to the end-of-day figure
/// itself; at or past the boundary that figure is returned directly, so the
/// current balance never jumps across the end of the day.
pub fn interpolate_current_balance(
    starting_balance: i64,
    end_of_day_balance: Decimal,
    start_time: DateTime<Utc>,
    end_of_day_time: DateTime<Utc>,
    as_of: DateTime<Utc>,
) -> i64 {
    if as_of >= end_of_day_time {
        return round_money(end_of_day_balance);
    }
    let total_seconds = end_of_day_time.timestamp() - start_time.timestamp();
    if total_seconds <= 0 {
        return round_money(end_of_day_balance);
    }
    let elapsed_seconds = (as_of.timestamp() - start_time.timestamp()).max(0);

    let accrued_so_far = (end_of_day_balance - Decimal::from(starting_balance))
        * Decimal::from(elapsed_seconds)
        / Decimal::from(total_seconds);
    round_money(Decimal::from(starting_balance) + accrued_so_far)
}

/// Compound the end-of-day balance forward, one full net day at a time,
/// producing an end-of-that-day snapshot per projected day. Rounding happens
/// only when each snapshot is produced; the running figure stays exact.
pub fn project_subsequent_days(
    end_of_day_balance: Decimal,
    end_of_day_time: DateTime<Utc>,
    currency: &str,
    config: &FloatConfig,
    days_to_project: u32,
) -> Vec<BalanceSnapshot> {
    let mut projected = Vec::with_capacity(days_to_project as usize);
    let mut running = end_of_day_balance;
    for day in 1..=i64::from(days_to_project) {
        running = accrue_balance_by_day(running, config);
        let moment = end_of_day_time + Duration::days(day);
        projected.push(BalanceSnapshot::new(round_money(running), currency, moment));
    }
    projected
}
