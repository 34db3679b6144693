//! Ledger entries: one per material code.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{LedgerError, MaterialCode, Result};

/// Stock position of a single material.
///
/// `available_quantity` is never set directly. Every mutation goes through
/// [`LedgerEntry::apply_reserved_delta`] or
/// [`LedgerEntry::apply_physical_delta`], which validate the resulting
/// quantities first and recompute availability in the same call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    material_code: MaterialCode,
    description: Option<String>,
    physical_quantity: Decimal,
    reserved_quantity: Decimal,
    available_quantity: Decimal,
    minimum_stock: Option<Decimal>,
    maximum_stock: Option<Decimal>,
    updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Builds an entry from a registration request.
    pub fn register(material: NewMaterial, at: DateTime<Utc>) -> Result<Self> {
        if material.physical_quantity < Decimal::ZERO {
            return Err(LedgerError::NegativeQuantity {
                material_code: material.material_code,
                field: "physical_quantity",
                value: material.physical_quantity,
            });
        }
        Ok(Self::from_parts(
            material.material_code,
            material.description,
            material.physical_quantity,
            Decimal::ZERO,
            material.minimum_stock,
            material.maximum_stock,
            at,
        ))
    }

    /// Rebuilds an entry from stored quantities, deriving availability.
    pub fn from_parts(
        material_code: MaterialCode,
        description: Option<String>,
        physical_quantity: Decimal,
        reserved_quantity: Decimal,
        minimum_stock: Option<Decimal>,
        maximum_stock: Option<Decimal>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            material_code,
            description,
            physical_quantity,
            reserved_quantity,
            available_quantity: physical_quantity - reserved_quantity,
            minimum_stock,
            maximum_stock,
            updated_at,
        }
    }

    pub fn material_code(&self) -> &MaterialCode {
        &self.material_code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn physical(&self) -> Decimal {
        self.physical_quantity
    }

    pub fn reserved(&self) -> Decimal {
        self.reserved_quantity
    }

    pub fn available(&self) -> Decimal {
        self.available_quantity
    }

    pub fn minimum_stock(&self) -> Option<Decimal> {
        self.minimum_stock
    }

    pub fn maximum_stock(&self) -> Option<Decimal> {
        self.maximum_stock
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the (physical, reserved, available) triple.
    pub fn availability(&self) -> Availability {
        Availability {
            material_code: self.material_code.clone(),
            physical: self.physical_quantity,
            reserved: self.reserved_quantity,
            available: self.available_quantity,
        }
    }

    /// True when more stock is reserved than physically on hand.
    pub fn is_overcommitted(&self) -> bool {
        self.available_quantity < Decimal::ZERO
    }

    /// Adds `delta` to the reserved quantity and recomputes availability.
    ///
    /// Fails with [`LedgerError::NegativeQuantity`] without touching the
    /// entry if the reserved quantity would drop below zero.
    pub fn apply_reserved_delta(&mut self, delta: Decimal, at: DateTime<Utc>) -> Result<()> {
        let reserved = self.reserved_quantity + delta;
        if reserved < Decimal::ZERO {
            return Err(LedgerError::NegativeQuantity {
                material_code: self.material_code.clone(),
                field: "reserved_quantity",
                value: reserved,
            });
        }
        self.reserved_quantity = reserved;
        self.recompute(at);
        Ok(())
    }

    /// Adds `delta` to the physical quantity and recomputes availability.
    pub fn apply_physical_delta(&mut self, delta: Decimal, at: DateTime<Utc>) -> Result<()> {
        let physical = self.physical_quantity + delta;
        if physical < Decimal::ZERO {
            return Err(LedgerError::NegativeQuantity {
                material_code: self.material_code.clone(),
                field: "physical_quantity",
                value: physical,
            });
        }
        self.physical_quantity = physical;
        self.recompute(at);
        Ok(())
    }

    fn recompute(&mut self, at: DateTime<Utc>) {
        self.available_quantity = self.physical_quantity - self.reserved_quantity;
        self.updated_at = at;
        if self.is_overcommitted() {
            tracing::error!(
                material = %self.material_code,
                physical = %self.physical_quantity,
                reserved = %self.reserved_quantity,
                "ledger entry is overcommitted"
            );
        }
    }
}

/// Stock position snapshot returned by availability queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub material_code: MaterialCode,
    pub physical: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

/// Registration request for a new ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMaterial {
    pub material_code: MaterialCode,
    pub description: Option<String>,
    pub physical_quantity: Decimal,
    pub minimum_stock: Option<Decimal>,
    pub maximum_stock: Option<Decimal>,
}

impl NewMaterial {
    pub fn new(material_code: impl Into<MaterialCode>, physical_quantity: Decimal) -> Self {
        Self {
            material_code: material_code.into(),
            description: None,
            physical_quantity,
            minimum_stock: None,
            maximum_stock: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_stock_limits(mut self, minimum: Decimal, maximum: Option<Decimal>) -> Self {
        self.minimum_stock = Some(minimum);
        self.maximum_stock = maximum;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(physical: i64) -> LedgerEntry {
        LedgerEntry::register(NewMaterial::new("ALU-001", Decimal::from(physical)), Utc::now())
            .unwrap()
    }

    #[test]
    fn test_register_starts_fully_available() {
        let entry = entry(100);
        assert_eq!(entry.physical(), Decimal::from(100));
        assert_eq!(entry.reserved(), Decimal::ZERO);
        assert_eq!(entry.available(), Decimal::from(100));
    }

    #[test]
    fn test_register_rejects_negative_physical() {
        let result = LedgerEntry::register(NewMaterial::new("ALU-001", Decimal::from(-1)), Utc::now());
        assert!(matches!(
            result,
            Err(LedgerError::NegativeQuantity {
                field: "physical_quantity",
                ..
            })
        ));
    }

    #[test]
    fn test_reserved_delta_recomputes_available() {
        let mut entry = entry(100);
        entry.apply_reserved_delta(Decimal::from(30), Utc::now()).unwrap();
        assert_eq!(entry.reserved(), Decimal::from(30));
        assert_eq!(entry.available(), Decimal::from(70));

        entry.apply_reserved_delta(Decimal::from(-30), Utc::now()).unwrap();
        assert_eq!(entry.available(), Decimal::from(100));
    }

    #[test]
    fn test_negative_reserved_leaves_entry_untouched() {
        let mut entry = entry(10);
        entry.apply_reserved_delta(Decimal::from(4), Utc::now()).unwrap();
        let before = entry.clone();

        let result = entry.apply_reserved_delta(Decimal::from(-5), Utc::now());
        assert!(matches!(
            result,
            Err(LedgerError::NegativeQuantity {
                field: "reserved_quantity",
                ..
            })
        ));
        assert_eq!(entry, before);
    }

    #[test]
    fn test_physical_delta_keeps_reserved() {
        let mut entry = entry(10);
        entry.apply_reserved_delta(Decimal::from(8), Utc::now()).unwrap();
        entry.apply_physical_delta(Decimal::from(-5), Utc::now()).unwrap();

        assert_eq!(entry.physical(), Decimal::from(5));
        assert_eq!(entry.reserved(), Decimal::from(8));
        assert_eq!(entry.available(), Decimal::from(-3));
        assert!(entry.is_overcommitted());
    }

    #[test]
    fn test_fractional_quantities() {
        let mut entry = LedgerEntry::register(
            NewMaterial::new("CAB-010", Decimal::new(12_500, 3)),
            Utc::now(),
        )
        .unwrap();
        entry.apply_reserved_delta(Decimal::new(2_250, 3), Utc::now()).unwrap();
        assert_eq!(entry.available(), Decimal::new(10_250, 3));
    }
}
