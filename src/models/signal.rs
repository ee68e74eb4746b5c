use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{Direction, MarginMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recorded but does not block execution (e.g. duplicate labels).
    Warning,
    /// The signal cannot be executed while this error stands.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl FieldError {
    pub fn fatal(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Fatal,
        }
    }

    pub fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Price range within which entry orders may fill. Always kept with
/// low <= high; a single quoted price becomes a zero-width zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryZone {
    pub low: f64,
    pub high: f64,
}

impl EntryZone {
    /// Build from two bounds in either order. Returns true in the second
    /// slot when the bounds had to be swapped.
    pub fn from_bounds(a: f64, b: f64) -> (Self, bool) {
        if a <= b {
            (Self { low: a, high: b }, false)
        } else {
            (Self { low: b, high: a }, true)
        }
    }

    pub fn single(price: f64) -> Self {
        Self {
            low: price,
            high: price,
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Structured result of parsing one signal message. Immutable once built —
/// the parser is the only producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSignal {
    #[serde(default)]
    pub id: u64,
    pub coin: Option<String>,
    pub pair: String,
    pub direction: Option<Direction>,
    pub entry_zone: Option<EntryZone>,
    pub leverage: u32,
    #[serde(default)]
    pub margin_mode: Option<MarginMode>,
    pub targets: Vec<f64>,
    pub stop_loss: Option<f64>,
    pub raw_text: String,
    pub parse_errors: Vec<FieldError>,
    /// Per-field extraction confidence in [0, 1], keyed by field name.
    #[serde(default)]
    pub confidence: BTreeMap<String, f64>,
}

impl ParsedSignal {
    /// A signal can move to execution only when coin, direction and entry
    /// zone all resolved and nothing fatal was recorded.
    pub fn is_actionable(&self) -> bool {
        self.coin.is_some()
            && self.direction.is_some()
            && self.entry_zone.is_some()
            && !self
                .parse_errors
                .iter()
                .any(|e| e.severity == Severity::Fatal)
    }

    /// Exchange symbol, e.g. "BTCUSDT".
    pub fn symbol(&self) -> Option<String> {
        self.coin.as_ref().map(|c| format!("{}{}", c, self.pair))
    }

    pub fn warnings(&self) -> impl Iterator<Item = &FieldError> {
        self.parse_errors
            .iter()
            .filter(|e| e.severity == Severity::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_zone_swaps_reversed_bounds() {
        let (zone, swapped) = EntryZone::from_bounds(46000.0, 45000.0);
        assert!(swapped);
        assert!((zone.low - 45000.0).abs() < 1e-9);
        assert!((zone.high - 46000.0).abs() < 1e-9);

        let (zone, swapped) = EntryZone::from_bounds(45000.0, 46000.0);
        assert!(!swapped);
        assert!(zone.low <= zone.high);
    }

    #[test]
    fn zero_width_zone_contains_only_its_price() {
        let zone = EntryZone::single(3200.0);
        assert!((zone.width()).abs() < 1e-9);
        assert!(zone.contains(3200.0));
        assert!(!zone.contains(3200.5));
        assert!((zone.midpoint() - 3200.0).abs() < 1e-9);
    }
}
