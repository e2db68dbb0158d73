//! Formatting of money amounts for display.

use std::sync::OnceLock;

use numfmt::{Formatter, Precision};

fn formatter(prefix: &str) -> Option<Formatter> {
    Formatter::currency(prefix)
        .ok()
        .map(|formatter| formatter.precision(Precision::Decimals(2)))
}

/// Format `amount` as dollars with thousands separators and two decimal places,
/// e.g. "$1,234.50" or "-$5.00".
pub fn format_currency(amount: f64) -> String {
    static POSITIVE_FMT: OnceLock<Option<Formatter>> = OnceLock::new();
    static NEGATIVE_FMT: OnceLock<Option<Formatter>> = OnceLock::new();

    let formatted = if amount > 0.0 {
        POSITIVE_FMT
            .get_or_init(|| formatter("$"))
            .as_ref()
            .map(|formatter| formatter.fmt_string(amount))
    } else if amount < 0.0 {
        NEGATIVE_FMT
            .get_or_init(|| formatter("-$"))
            .as_ref()
            .map(|formatter| formatter.fmt_string(amount.abs()))
    } else {
        // numfmt renders zero as "0"
        Some("$0.00".to_owned())
    };

    match formatted {
        Some(formatted) => pad_cents(formatted),
        None if amount < 0.0 => format!("-${:.2}", amount.abs()),
        None => format!("${amount:.2}"),
    }
}

/// numfmt drops trailing zeros, e.g. "12.30" comes out as "12.3" and "5.00" as "5".
fn pad_cents(formatted: String) -> String {
    match formatted.rfind('.') {
        None => format!("{formatted}.00"),
        Some(index) if formatted.len() - index == 2 => format!("{formatted}0"),
        Some(_) => formatted,
    }
}

#[cfg(test)]
mod format_currency_tests {
    use super::{format_currency, pad_cents};

    #[test]
    fn formats_cents() {
        assert_eq!(format_currency(12.3), "$12.30");
        assert_eq!(format_currency(12.34), "$12.34");
    }

    #[test]
    fn formats_negative_amounts() {
        assert_eq!(format_currency(-5.0), "-$5.00");
    }

    #[test]
    fn formats_zero() {
        assert_eq!(format_currency(0.0), "$0.00");
    }

    #[test]
    fn pads_missing_cents() {
        assert_eq!(pad_cents("$5".to_owned()), "$5.00");
        assert_eq!(pad_cents("$1,234.5".to_owned()), "$1,234.50");
        assert_eq!(pad_cents("$1,234.56".to_owned()), "$1,234.56");
    }
}
