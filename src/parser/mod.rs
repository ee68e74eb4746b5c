pub mod extractors;

pub use extractors::Extraction;

use std::collections::BTreeMap;
use tracing::debug;

use crate::config::Config;
use crate::models::{Direction, FieldError, ParsedSignal};

/// Stateless, deterministic parser for free-form signal messages. Composes
/// the per-field extractors and merges their results; never fails — a
/// message that yields nothing comes back as an all-error ParsedSignal.
#[derive(Debug, Clone)]
pub struct SignalParser {
    default_pair: String,
    default_leverage: u32,
    max_leverage: u32,
}

impl SignalParser {
    pub fn new(cfg: &Config) -> Self {
        Self {
            default_pair: cfg.default_pair.clone(),
            default_leverage: cfg.default_leverage,
            max_leverage: cfg.max_leverage,
        }
    }

    pub fn parse(&self, raw_text: &str) -> ParsedSignal {
        let mut errors: Vec<FieldError> = Vec::new();
        let mut confidence: BTreeMap<String, f64> = BTreeMap::new();

        let coin_x = extractors::extract_coin(raw_text);
        let direction_x = extractors::extract_direction(raw_text);
        let entry_x = extractors::extract_entry_zone(raw_text);
        let leverage_x = extractors::extract_leverage(raw_text);
        let targets_x = extractors::extract_targets(raw_text);
        let stop_x = extractors::extract_stop_loss(raw_text);

        for error in [
            &coin_x.error,
            &direction_x.error,
            &entry_x.error,
            &leverage_x.error,
            &targets_x.error,
            &stop_x.error,
        ]
        .into_iter()
        .flatten()
        {
            errors.push(error.clone());
        }

        let (coin, pair) = match coin_x.value {
            Some((coin, pair)) => {
                confidence.insert("coin".to_string(), coin_x.confidence);
                (Some(coin), pair)
            }
            None => (None, None),
        };

        let direction = direction_x.value;
        if direction.is_some() {
            confidence.insert("direction".to_string(), direction_x.confidence);
        }

        let entry_zone = entry_x.value;
        if entry_zone.is_some() {
            confidence.insert("entry_zone".to_string(), entry_x.confidence);
        }

        // Leverage is frequently omitted; the configured default is not an
        // error. Extracted values are clamped to the exchange limit.
        let (leverage, margin_mode) = match leverage_x.value {
            Some((lev, mode)) if lev > 0 => {
                confidence.insert("leverage".to_string(), leverage_x.confidence);
                (lev.clamp(1, self.max_leverage), mode)
            }
            Some((_, mode)) => (self.default_leverage, mode),
            None => (self.default_leverage, None),
        };

        let targets = match (targets_x.value, direction) {
            (Some(list), dir) => {
                confidence.insert("targets".to_string(), targets_x.confidence);
                order_targets(list, dir)
            }
            (None, _) => Vec::new(),
        };

        let stop_loss = stop_x.value;
        if stop_loss.is_some() {
            confidence.insert("stop_loss".to_string(), stop_x.confidence);
        }

        let signal = ParsedSignal {
            id: 0,
            coin,
            pair: pair.unwrap_or_else(|| self.default_pair.clone()),
            direction,
            entry_zone,
            leverage,
            margin_mode,
            targets,
            stop_loss,
            raw_text: raw_text.to_string(),
            parse_errors: errors,
            confidence,
        };

        debug!(
            coin = signal.coin.as_deref().unwrap_or("?"),
            direction = %signal.direction.map(|d| d.to_string()).unwrap_or_else(|| "?".into()),
            actionable = signal.is_actionable(),
            errors = signal.parse_errors.len(),
            "parsed signal"
        );

        signal
    }

    /// Split a combined blob on blank-line boundaries — the documented
    /// separator contract with the message source — and parse each chunk.
    pub fn parse_batch(&self, blob: &str) -> Vec<ParsedSignal> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for line in blob.lines() {
            if line.trim().is_empty() {
                if !current.trim().is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                current.clear();
            } else {
                current.push_str(line);
                current.push('\n');
            }
        }
        if !current.trim().is_empty() {
            chunks.push(current);
        }

        chunks.iter().map(|c| self.parse(c)).collect()
    }
}

/// Stable sort ascending for longs, descending for shorts; exact duplicates
/// collapsed.
fn order_targets(mut targets: Vec<f64>, direction: Option<Direction>) -> Vec<f64> {
    match direction {
        Some(Direction::Short) => {
            targets.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal))
        }
        _ => targets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)),
    }
    targets.dedup();
    targets
}

/// Aggregate counts over a batch of parse results.
#[derive(Debug, Clone, Default)]
pub struct ParseStats {
    pub total: usize,
    pub actionable: usize,
    pub failed: usize,
    pub errors_by_field: BTreeMap<String, usize>,
}

impl ParseStats {
    pub fn from_results(results: &[ParsedSignal]) -> Self {
        let mut stats = ParseStats {
            total: results.len(),
            ..Default::default()
        };
        for signal in results {
            if signal.is_actionable() {
                stats.actionable += 1;
            } else {
                stats.failed += 1;
            }
            for error in &signal.parse_errors {
                *stats.errors_by_field.entry(error.field.clone()).or_insert(0) += 1;
            }
        }
        stats
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.actionable as f64 / self.total as f64
        }
    }
}
