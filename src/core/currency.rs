use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement currencies with their minor-unit precision.
///
/// Payments and invoices carry a currency, but allocation never converts
/// between currencies: a payment can only be applied to invoices in the same
/// currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Indonesian Rupiah (no decimal places)
    IDR,
    /// Malaysian Ringgit (2 decimal places)
    MYR,
    /// US Dollar (2 decimal places)
    USD,
    /// Euro (2 decimal places)
    EUR,
}

impl Currency {
    /// Returns the decimal scale for this currency
    pub fn scale(&self) -> u32 {
        match self {
            Currency::IDR => 0,
            Currency::MYR | Currency::USD | Currency::EUR => 2,
        }
    }

    /// Half-up rounding to the currency scale, used for allocation shares
    pub fn round_half_up(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.scale(), RoundingStrategy::MidpointAwayFromZero)
    }

    /// Truncating rounding to the currency scale; never rounds a share up
    pub fn round_down(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.scale(), RoundingStrategy::ToZero)
    }

    /// Validates that an allocation amount is positive and fits the currency scale
    pub fn validate_amount(&self, amount: Decimal) -> Result<(), String> {
        if amount <= Decimal::ZERO {
            return Err(format!("{} amount must be greater than 0, got {}", self, amount));
        }

        let normalized = amount.normalize();
        if normalized.scale() > self.scale() {
            return Err(format!(
                "{} amounts must have at most {} decimal places, got {}",
                self,
                self.scale(),
                amount
            ));
        }

        Ok(())
    }

    /// Formats an amount for display with the correct decimal places
    pub fn format_amount(&self, amount: Decimal) -> String {
        let scale = self.scale();
        if scale == 0 {
            format!("{} {}", self, amount.round_dp(0))
        } else {
            format!("{} {:.width$}", self, amount, width = scale as usize)
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::IDR => write!(f, "IDR"),
            Currency::MYR => write!(f, "MYR"),
            Currency::USD => write!(f, "USD"),
            Currency::EUR => write!(f, "EUR"),
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IDR" => Ok(Currency::IDR),
            "MYR" => Ok(Currency::MYR),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            _ => Err(format!("Invalid currency: {}", s)),
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
