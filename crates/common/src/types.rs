use std::ops::{Add, Sub};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a reservation.
///
/// Wraps a UUID to provide type safety and prevent mixing up
/// reservation IDs with other UUID-based identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random reservation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a reservation ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ReservationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ReservationId> for Uuid {
    fn from(id: ReservationId) -> Self {
        id.0
    }
}

/// Material (stock item) code, the key of the inventory ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialCode(String);

impl MaterialCode {
    /// Creates a material code from a string.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MaterialCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MaterialCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MaterialCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for MaterialCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Sales order number as issued by the sales module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Monetary amount kept in cents to avoid rounding drift.
///
/// Serialized as a decimal with two places (`"123.45"`), which is what the
/// finance and invoicing modules exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the amount as a two-place decimal.
    pub fn amount(&self) -> Decimal {
        Decimal::new(self.cents, 2)
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Splits the amount into `parts` evenly; the last part absorbs the
    /// rounding remainder so the parts always sum to `self`.
    ///
    /// Returns an empty vector when `parts` is zero.
    pub fn split(&self, parts: u32) -> Vec<Money> {
        if parts == 0 {
            return Vec::new();
        }
        let parts = i64::from(parts);
        let base = self.cents / parts;
        let mut out = vec![Money::from_cents(base); (parts - 1) as usize];
        out.push(Money::from_cents(self.cents - base * (parts - 1)));
        out
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.amount())
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money::from_cents(self.cents + rhs.cents)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money::from_cents(self.cents - rhs.cents)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), Add::add)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.amount()
    }
}

impl TryFrom<Decimal> for Money {
    type Error = String;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        (value * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .map(Money::from_cents)
            .ok_or_else(|| format!("amount out of range: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_id_new_creates_unique_ids() {
        let id1 = ReservationId::new();
        let id2 = ReservationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn reservation_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = ReservationId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn material_code_serializes_as_plain_string() {
        let code = MaterialCode::new("ALU-001");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"ALU-001\"");
    }

    #[test]
    fn money_serializes_as_decimal() {
        let money = Money::from_cents(12345);
        let json = serde_json::to_string(&money).unwrap();
        assert_eq!(json, "\"123.45\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, money);
    }

    #[test]
    fn money_accepts_numeric_json() {
        let money: Money = serde_json::from_str("99.9").unwrap();
        assert_eq!(money.cents(), 9990);
    }

    #[test]
    fn split_absorbs_remainder_in_last_part() {
        let parts = Money::from_cents(10000).split(3);
        assert_eq!(
            parts,
            vec![
                Money::from_cents(3333),
                Money::from_cents(3333),
                Money::from_cents(3334)
            ]
        );
        assert_eq!(parts.into_iter().sum::<Money>(), Money::from_cents(10000));
    }

    #[test]
    fn split_single_part_is_whole_amount() {
        assert_eq!(Money::from_cents(501).split(1), vec![Money::from_cents(501)]);
        assert!(Money::from_cents(501).split(0).is_empty());
    }
}
