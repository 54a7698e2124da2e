//! Shared primitive types used across the entire platform.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DfsError, DfsResult};

/// Declare a closed enum persisted as an upper-case TEXT column.
///
/// Generates `as_str`, `parse`, `Display`, serde renames and the rusqlite
/// `ToSql`/`FromSql` impls, so store code binds and reads variants directly.
macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let raw = value.as_str()?;
                Self::parse(raw).ok_or_else(|| {
                    rusqlite::types::FromSqlError::Other(
                        format!("unknown {} '{raw}'", stringify!($name)).into(),
                    )
                })
            }
        }
    };
}

/// A stable, unique identifier for any entity (agent, account, queue item).
pub type EntityId = String;

/// Monetary amount. Never a float.
pub type Money = Decimal;

/// Number of decimal places carried by every monetary amount.
pub const MONEY_SCALE: u32 = 2;

/// Convert a monetary amount to INTEGER minor units for storage.
///
/// Amounts are rounded half-away-from-zero to two places first; callers that
/// accept user input should run [`validate_amount`] beforehand so nothing is
/// silently rounded.
pub fn to_minor(amount: Money) -> DfsResult<i64> {
    let scaled = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
        * Decimal::ONE_HUNDRED;
    scaled
        .to_i64()
        .ok_or_else(|| DfsError::Validation(format!("amount {amount} is out of range")))
}

/// Rebuild a monetary amount from stored minor units.
pub fn from_minor(minor: i64) -> Money {
    Decimal::new(minor, MONEY_SCALE)
}

/// Round a computed amount (commission, interest) to two places.
pub fn round_money(amount: Money) -> Money {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Reject non-positive amounts and amounts with sub-cent precision.
pub fn validate_amount(amount: Money) -> DfsResult<()> {
    if amount <= Decimal::ZERO {
        return Err(DfsError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(DfsError::Validation(format!(
            "amount {amount} has more than {MONEY_SCALE} decimal places"
        )));
    }
    Ok(())
}

/// Fixed-width timestamp so that text ordering equals chronological ordering.
pub fn format_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> DfsResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DfsError::Validation(format!("bad timestamp '{raw}': {e}")))
}

/// Calendar day key used by daily-limit queries.
pub fn day_key(at: &DateTime<Utc>) -> String {
    at.date_naive().format("%Y-%m-%d").to_string()
}

/// Generate a unique reference: `PREFIX-YYYYMMDD-XXXXXXXX`.
pub fn generate_reference(prefix: &str, at: &DateTime<Utc>) -> String {
    format!(
        "{prefix}-{}-{}",
        at.format("%Y%m%d"),
        short_uuid()
    )
}

/// First eight hex digits of a fresh v4 UUID, uppercased.
pub fn short_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_are_exact() {
        assert_eq!(to_minor(dec!(5000)).unwrap(), 500_000);
        assert_eq!(to_minor(dec!(12.34)).unwrap(), 1234);
        assert_eq!(from_minor(1234), dec!(12.34));
        assert_eq!(from_minor(to_minor(dec!(0.01)).unwrap()), dec!(0.01));
    }

    #[test]
    fn sub_cent_amounts_are_rejected() {
        assert!(validate_amount(dec!(10.005)).is_err());
        assert!(validate_amount(dec!(10.50)).is_ok());
        assert!(validate_amount(dec!(10.500)).is_ok());
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(dec!(-1)).is_err());
    }

    #[test]
    fn timestamps_sort_as_text() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert!(format_ts(&a) < format_ts(&b));
        assert_eq!(parse_ts(&format_ts(&a)).unwrap(), a);
        assert_eq!(day_key(&b), "2026-01-10");
    }

    #[test]
    fn references_carry_prefix_and_date() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap();
        let r = generate_reference("FLT", &at);
        assert!(r.starts_with("FLT-20260304-"), "unexpected reference {r}");
        assert_eq!(r.len(), "FLT-20260304-".len() + 8);
        assert_ne!(r, generate_reference("FLT", &at));
    }
}
