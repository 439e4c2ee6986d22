use rust_decimal::Decimal;
use thiserror::Error;

/// Amounts are exact decimals. Balances are folded with decimal arithmetic,
/// so 1032.52 - 500.00 is exactly 532.52.
pub type Amount = Decimal;

/// Format an amount with at least two decimal places, never rounding.
/// Example: 50 -> "50.00", 12.5 -> "12.50", 0.125 -> "0.125"
pub fn format_amount(amount: Amount) -> String {
    if amount.scale() >= 2 {
        amount.to_string()
    } else {
        let mut padded = amount;
        padded.rescale(2);
        padded.to_string()
    }
}

/// Parse a decimal string into an amount.
/// Example: "50.00" -> 50.00, "12.5" -> 12.5, "-0.01" -> -0.01
///
/// The sign is kept so callers can reject negative input with a proper
/// validation error instead of a parse failure.
pub fn parse_amount(input: &str) -> Result<Amount, ParseAmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseAmountError::Empty);
    }
    if input.contains(['e', 'E']) {
        return Err(ParseAmountError::InvalidFormat(input.to_string()));
    }
    Decimal::from_str_exact(input).map_err(|_| ParseAmountError::InvalidFormat(input.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid money format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Amount {
        Decimal::from_str_exact(s).unwrap()
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(d("50")), "50.00");
        assert_eq!(format_amount(d("12.5")), "12.50");
        assert_eq!(format_amount(d("1032.52")), "1032.52");
        assert_eq!(format_amount(d("0")), "0.00");
        assert_eq!(format_amount(d("-500.00")), "-500.00");
        assert_eq!(format_amount(d("0.125")), "0.125");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("50.00"), Ok(d("50.00")));
        assert_eq!(parse_amount("50"), Ok(d("50")));
        assert_eq!(parse_amount(" 1032.52 "), Ok(d("1032.52")));
        assert_eq!(parse_amount("-0.01"), Ok(d("-0.01")));
    }

    #[test]
    fn test_parse_amount_invalid() {
        assert_eq!(parse_amount(""), Err(ParseAmountError::Empty));
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("12.34.56").is_err());
        assert!(parse_amount("1e3").is_err());
    }
}
