//! Low-stock alerts over ledger entries.

use ledger::{LedgerEntry, MaterialCode};
use rust_decimal::Decimal;
use serde::Serialize;

/// Severity of a low-stock alert, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Nothing available.
    Critical,
    /// At or below half the minimum stock.
    VeryLow,
    /// At or below the minimum stock.
    Low,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Critical => "critical",
            AlertLevel::VeryLow => "very_low",
            AlertLevel::Low => "low",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A material whose available stock is at or below its minimum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockAlert {
    pub material_code: MaterialCode,
    pub description: Option<String>,
    pub level: AlertLevel,
    pub physical: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
    pub minimum_stock: Decimal,
    pub suggested_purchase: Decimal,
}

impl StockAlert {
    /// Evaluates one entry. Materials without a positive minimum never alert.
    pub fn evaluate(entry: &LedgerEntry) -> Option<Self> {
        let minimum = entry.minimum_stock().filter(|m| *m > Decimal::ZERO)?;
        let available = entry.available();

        let level = if available <= Decimal::ZERO {
            AlertLevel::Critical
        } else if available <= minimum / Decimal::TWO {
            AlertLevel::VeryLow
        } else if available <= minimum {
            AlertLevel::Low
        } else {
            return None;
        };

        // Refill towards the maximum (or three times the minimum), never
        // below twice the minimum.
        let target = entry
            .maximum_stock()
            .filter(|m| *m > Decimal::ZERO)
            .unwrap_or(minimum * Decimal::from(3))
            .max(minimum * Decimal::TWO);
        let suggested_purchase = (target - entry.physical()).max(Decimal::ZERO);

        Some(Self {
            material_code: entry.material_code().clone(),
            description: entry.description().map(str::to_string),
            level,
            physical: entry.physical(),
            reserved: entry.reserved(),
            available,
            minimum_stock: minimum,
            suggested_purchase,
        })
    }
}

/// Evaluates all entries, most severe first, then lowest availability first.
pub fn evaluate_alerts(entries: &[LedgerEntry]) -> Vec<StockAlert> {
    let mut alerts: Vec<StockAlert> = entries.iter().filter_map(StockAlert::evaluate).collect();
    alerts.sort_by(|a, b| a.level.cmp(&b.level).then(a.available.cmp(&b.available)));
    alerts
}
