use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Monetary amounts are stored as integers in one of three units to avoid
/// floating-point currency math. The canonical unit for all arithmetic is
/// HUNDREDTH_CENT: 1 currency unit = 100 cents = 10_000 hundredth-cents,
/// so R50.00 = 500_000 hundredth-cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Unit {
    HundredthCent,
    WholeCent,
    WholeCurrency,
}

impl Unit {
    /// Hundredth-cents per one unit.
    pub fn factor(&self) -> i64 {
        match self {
            Unit::HundredthCent => 1,
            Unit::WholeCent => 100,
            Unit::WholeCurrency => 10_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::HundredthCent => "HUNDREDTH_CENT",
            Unit::WholeCent => "WHOLE_CENT",
            Unit::WholeCurrency => "WHOLE_CURRENCY",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HUNDREDTH_CENT" => Some(Unit::HundredthCent),
            "WHOLE_CENT" => Some(Unit::WholeCent),
            "WHOLE_CURRENCY" => Some(Unit::WholeCurrency),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Convert an integer amount between units. Integer-only arithmetic: the
/// result is `amount * factor[from] / factor[to]` with truncating division,
/// so converting to a coarser unit is lossy unless the amount divides evenly.
/// Callers formatting for display in WHOLE_CURRENCY must accept the loss of
/// sub-currency precision.
pub fn convert_amount(amount: i64, from: Unit, to: Unit) -> i64 {
    let widened = amount as i128 * from.factor() as i128 / to.factor() as i128;
    widened as i64
}

/// An amount tagged with its unit and ISO currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAmount {
    pub amount: i64,
    pub unit: Unit,
    pub currency: String,
}

impl MoneyAmount {
    pub fn new(amount: i64, unit: Unit, currency: impl Into<String>) -> Self {
        Self {
            amount,
            unit,
            currency: currency.into(),
        }
    }

    /// The explicit zero returned by aggregations with no matching rows.
    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, Unit::HundredthCent, currency)
    }

    /// Re-express this amount in another unit (truncating, see [`convert_amount`]).
    pub fn to_unit(&self, unit: Unit) -> Self {
        Self {
            amount: convert_amount(self.amount, self.unit, unit),
            unit,
            currency: self.currency.clone(),
        }
    }

    /// The amount standardised to hundredth-cents.
    pub fn equalized(&self) -> i64 {
        convert_amount(self.amount, self.unit, Unit::HundredthCent)
    }
}

impl fmt::Display for MoneyAmount {
    /// Formats as "ZAR 50.00": whole units with two decimal places, lossy
    /// below whole cents.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cents = convert_amount(self.amount, self.unit, Unit::WholeCent);
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.abs();
        write!(f, "{} {}{}.{:02}", self.currency, sign, abs / 100, abs % 100)
    }
}

/// Round a decimal figure to integer hundredth-cents, half away from zero.
/// Applied exactly once, at the point a computed figure is persisted or
/// returned; intermediate arithmetic stays in `Decimal`.
pub fn round_money(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_factors() {
        assert_eq!(Unit::HundredthCent.factor(), 1);
        assert_eq!(Unit::WholeCent.factor(), 100);
        assert_eq!(Unit::WholeCurrency.factor(), 10_000);
    }

    #[test]
    fn test_convert_between_units() {
        assert_eq!(convert_amount(1, Unit::WholeCurrency, Unit::HundredthCent), 10_000);
        assert_eq!(convert_amount(1, Unit::WholeCent, Unit::HundredthCent), 100);
        assert_eq!(convert_amount(50_000, Unit::HundredthCent, Unit::WholeCurrency), 5);
        assert_eq!(convert_amount(250, Unit::WholeCent, Unit::WholeCurrency), 0); // truncates
        assert_eq!(convert_amount(-15_000, Unit::HundredthCent, Unit::WholeCent), -150);
    }

    #[test]
    fn test_round_trip_exact_multiples() {
        let units = [Unit::HundredthCent, Unit::WholeCent, Unit::WholeCurrency];
        for from in units {
            for to in units {
                // multiples of the target factor always survive the round trip
                for base in [-7, -1, 0, 1, 3, 1250] {
                    let x = base * to.factor();
                    assert_eq!(
                        convert_amount(convert_amount(x, from, to), to, from),
                        x,
                        "round trip {from} -> {to} for {x}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_convert_is_lossy_when_not_divisible() {
        let x = 12_345; // hundredth-cents
        let there = convert_amount(x, Unit::HundredthCent, Unit::WholeCurrency);
        assert_eq!(there, 1);
        assert_eq!(convert_amount(there, Unit::WholeCurrency, Unit::HundredthCent), 10_000);
    }

    #[test]
    fn test_zero_amount() {
        let zero = MoneyAmount::zero("ZAR");
        assert_eq!(zero.amount, 0);
        assert_eq!(zero.unit, Unit::HundredthCent);
        assert_eq!(zero.currency, "ZAR");
    }

    #[test]
    fn test_display_formatting() {
        let amount = MoneyAmount::new(500_000, Unit::HundredthCent, "ZAR");
        assert_eq!(amount.to_string(), "ZAR 50.00");
        let negative = MoneyAmount::new(-1_234, Unit::WholeCent, "EUR");
        assert_eq!(negative.to_string(), "EUR -12.34");
    }

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(Decimal::new(25, 1)), 3); // 2.5 -> 3
        assert_eq!(round_money(Decimal::new(-25, 1)), -3); // -2.5 -> -3
        assert_eq!(round_money(Decimal::new(24, 1)), 2);
        assert_eq!(round_money(Decimal::new(19_999, 2)), 200);
    }
}
