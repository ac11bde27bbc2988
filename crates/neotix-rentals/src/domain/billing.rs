use crate::domain::types::{CostBreakdown, UsdAmount};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const SECONDS_PER_HOUR: i64 = 3600;

/// Pure tax/fee math over locked hourly prices. No I/O, no clock.
///
/// Two distinct hour conversions feed into [`BillingCalculator::quote`]:
/// [`billable_hours`] (ceiling, minimum 1) for money that actually moves, and
/// [`fractional_hours`] for advisory display estimates. They are separate on
/// purpose and must stay separate.
#[derive(Debug, Clone, Copy)]
pub struct BillingCalculator {
    tax_rate: Decimal,
    platform_fee_rate: Decimal,
}

impl BillingCalculator {
    pub fn new(tax_rate: Decimal, platform_fee_rate: Decimal) -> Self {
        Self {
            tax_rate,
            platform_fee_rate,
        }
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn platform_fee_rate(&self) -> Decimal {
        self.platform_fee_rate
    }

    /// Quote the cost of `hours` at `hourly_price`.
    ///
    /// Everything stays in decimal arithmetic; only the final total is
    /// rounded, to cents.
    pub fn quote(&self, hourly_price: UsdAmount, hours: Decimal) -> CostBreakdown {
        let base_cost = hourly_price.multiply(hours);
        let tax_amount = base_cost.multiply(self.tax_rate);
        let platform_fee_amount = base_cost.multiply(self.platform_fee_rate);
        let total_cost = base_cost
            .add(tax_amount)
            .add(platform_fee_amount)
            .round_to_cents();

        CostBreakdown {
            base_cost,
            tax_rate: self.tax_rate,
            tax_amount,
            platform_fee_rate: self.platform_fee_rate,
            platform_fee_amount,
            total_cost,
        }
    }

    /// Quote the up-front deposit: one minimum billing unit.
    pub fn quote_deposit(&self, hourly_price: UsdAmount) -> CostBreakdown {
        self.quote(hourly_price, Decimal::ONE)
    }
}

impl Default for BillingCalculator {
    fn default() -> Self {
        Self::new(dec!(0.08), dec!(0.05))
    }
}

/// Elapsed wall-clock time as billable hours: ceiling, minimum 1.
pub fn billable_hours(elapsed: Duration) -> Decimal {
    let seconds = elapsed.num_seconds().max(0);
    let hours = (seconds + SECONDS_PER_HOUR - 1) / SECONDS_PER_HOUR;
    Decimal::from(hours.max(1))
}

/// Elapsed wall-clock time as exact fractional hours, for display estimates.
pub fn fractional_hours(elapsed: Duration) -> Decimal {
    let seconds = elapsed.num_seconds().max(0);
    (Decimal::from(seconds) / Decimal::from(SECONDS_PER_HOUR)).round_dp(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_worked_example() {
        // $1.00/h, 8% tax, 5% fee
        let calculator = BillingCalculator::default();
        let price = UsdAmount::from_decimal(dec!(1.00));

        let deposit = calculator.quote_deposit(price);
        assert_eq!(deposit.base_cost.as_decimal(), dec!(1.00));
        assert_eq!(deposit.tax_amount.as_decimal(), dec!(0.08));
        assert_eq!(deposit.platform_fee_amount.as_decimal(), dec!(0.05));
        assert_eq!(deposit.total_cost.as_decimal(), dec!(1.13));

        let settlement = calculator.quote(price, dec!(3));
        assert_eq!(settlement.total_cost.as_decimal(), dec!(3.39));

        let delta = settlement
            .total_cost
            .checked_sub(deposit.total_cost)
            .unwrap();
        assert_eq!(delta.as_decimal(), dec!(2.26));
    }

    #[test]
    fn test_breakdown_invariant() {
        let calculator = BillingCalculator::default();
        let quote = calculator.quote(UsdAmount::from_decimal(dec!(3.17)), dec!(7));

        let recomputed = quote.base_cost.as_decimal()
            * (Decimal::ONE + quote.tax_rate + quote.platform_fee_rate);
        assert_eq!(quote.total_cost.as_decimal(), recomputed.round_dp(2));
    }

    #[test]
    fn test_billable_hours_ceiling() {
        // 0.1h bills as 1h
        assert_eq!(billable_hours(Duration::minutes(6)), dec!(1));
        // exactly 2.0h bills as 2h, not 3
        assert_eq!(billable_hours(Duration::hours(2)), dec!(2));
        assert_eq!(billable_hours(Duration::seconds(7201)), dec!(3));
        // minimum is one hour even for instant turnaround
        assert_eq!(billable_hours(Duration::zero()), dec!(1));
        assert_eq!(billable_hours(Duration::seconds(-5)), dec!(1));
    }

    #[test]
    fn test_fractional_hours_is_exact() {
        assert_eq!(fractional_hours(Duration::minutes(30)), dec!(0.5));
        assert_eq!(fractional_hours(Duration::minutes(90)), dec!(1.5));
        assert_eq!(fractional_hours(Duration::zero()), dec!(0));
    }

    #[test]
    fn test_display_estimate_differs_from_billed_amount() {
        // Half an hour: the live estimate shows 0.5h-based cost while a real
        // charge for the same elapsed time bills a full hour.
        let calculator = BillingCalculator::default();
        let price = UsdAmount::from_decimal(dec!(2.00));
        let elapsed = Duration::minutes(30);

        let estimate = calculator.quote(price, fractional_hours(elapsed));
        let billed = calculator.quote(price, billable_hours(elapsed));

        assert_eq!(estimate.total_cost.as_decimal(), dec!(1.13));
        assert_eq!(billed.total_cost.as_decimal(), dec!(2.26));
    }
}
