//! One pure extractor per semantic field. Each scans the full message text
//! independently so field order in the source message never matters, and
//! reports its own confidence and error instead of aborting the parse.

use crate::models::{Direction, EntryZone, FieldError, MarginMode};

/// Result of one field extractor: a best-effort value, how sure the layered
/// heuristics were, and an optional field-level error.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub value: Option<T>,
    pub confidence: f64,
    pub error: Option<FieldError>,
}

impl<T> Extraction<T> {
    pub fn found(value: T, confidence: f64) -> Self {
        Self {
            value: Some(value),
            confidence,
            error: None,
        }
    }

    pub fn found_with_warning(value: T, confidence: f64, error: FieldError) -> Self {
        Self {
            value: Some(value),
            confidence,
            error: Some(error),
        }
    }

    pub fn missing() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            error: None,
        }
    }

    pub fn failed(error: FieldError) -> Self {
        Self {
            value: None,
            confidence: 0.0,
            error: Some(error),
        }
    }
}

const QUOTE_SUFFIXES: &[&str] = &["USDT", "USD", "PERP"];

/// Tokens that are signal vocabulary, never ticker symbols.
const RESERVED_WORDS: &[&str] = &[
    "LONG", "SHORT", "BUY", "SELL", "CALLS", "PUTS", "ENTRY", "ZONE", "ENTER", "PRICE", "COIN",
    "SYMBOL", "TP", "TPS", "TARGET", "TARGETS", "TAKE", "PROFIT", "SL", "STOP", "LOSS",
    "LEVERAGE", "LEV", "CROSS", "ISOLATED", "MARGIN", "USDT", "USD", "PERP", "SIGNAL", "VIP",
];

/// Uppercase ASCII copy with identical byte offsets, so label positions
/// found here index straight into the original text.
fn ascii_upper(text: &str) -> String {
    text.chars().map(|c| c.to_ascii_uppercase()).collect()
}

/// Parse a price token: strips `$`/parens/trailing punctuation and thousands
/// separators. Rejects non-finite and non-positive values.
fn parse_price(token: &str) -> Option<f64> {
    let cleaned: String = token
        .trim_matches(|c: char| matches!(c, '$' | '€' | '(' | ')' | ':' | ',' | ';'))
        .trim_end_matches('.')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Some(v),
        _ => None,
    }
}

fn is_word_char(c: u8) -> bool {
    c.is_ascii_alphanumeric()
}

/// Byte ranges of label occurrences in `upper`, at word boundaries only.
/// Labels must be sorted longest-first; overlapping shorter matches at the
/// same position are dropped.
fn label_occurrences(upper: &str, labels: &[&str]) -> Vec<(usize, usize)> {
    let bytes = upper.as_bytes();
    let mut hits: Vec<(usize, usize)> = Vec::new();

    for label in labels {
        for (pos, _) in upper.match_indices(label) {
            let before_ok = pos == 0 || !is_word_char(bytes[pos - 1]);
            let end = pos + label.len();
            let after_ok = end >= bytes.len() || !is_word_char(bytes[end]);
            if before_ok && after_ok && !hits.iter().any(|&(p, _)| p == pos) {
                hits.push((pos, end));
            }
        }
    }

    hits.sort_by_key(|&(p, _)| p);
    hits
}

/// Text immediately following a label, with the separator (`:`, `=`, `-`)
/// and surrounding spaces stripped.
fn rest_after<'a>(text: &'a str, label_end: usize) -> &'a str {
    let rest = &text[label_end..];
    rest.trim_start_matches(|c: char| c == ':' || c == '=' || c == '-' || c == ' ' || c == '\t')
}

fn valid_ticker(token: &str) -> bool {
    token.len() >= 2
        && token.len() <= 10
        && token.bytes().all(|b| b.is_ascii_uppercase())
        && !RESERVED_WORDS.contains(&token)
}

/// Split a candidate like "BTC/USDT", "BTCUSDT" or "BTC" into base and
/// optional quote asset.
fn split_pair(token: &str) -> (String, Option<String>) {
    if let Some((base, quote)) = token.split_once('/') {
        if QUOTE_SUFFIXES.contains(&quote) {
            return (base.to_string(), Some(quote.to_string()));
        }
        return (base.to_string(), None);
    }
    for quote in QUOTE_SUFFIXES {
        if let Some(base) = token.strip_suffix(quote) {
            if !base.is_empty() {
                return (base.to_string(), Some(quote.to_string()));
            }
        }
    }
    (token.to_string(), None)
}

/// Coin plus the quote asset when the text spells one out.
///
/// Layered patterns, most specific first: `#`/`$` prefix, `Coin:`/`Symbol:`
/// label, `BASE/QUOTE`, `BASEUSDT` suffix, then the first isolated uppercase
/// token of 2-10 characters.
pub fn extract_coin(text: &str) -> Extraction<(String, Option<String>)> {
    let upper = ascii_upper(text);

    // #BTC, $ETH, #BTC/USDT
    for token in upper.split_whitespace() {
        if let Some(stripped) = token.strip_prefix('#').or_else(|| token.strip_prefix('$')) {
            let (base, quote) = split_pair(stripped.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '/'));
            if valid_ticker(&base) {
                return Extraction::found((base, quote), 0.95);
            }
        }
    }

    // Coin: BTC / Symbol: ETHUSDT
    for (_, end) in label_occurrences(&upper, &["SYMBOL", "COIN"]) {
        if let Some(token) = rest_after(&upper, end).split_whitespace().next() {
            let (base, quote) = split_pair(token);
            if valid_ticker(&base) {
                return Extraction::found((base, quote), 0.9);
            }
        }
    }

    // BTC/USDT without prefix
    for token in upper.split_whitespace() {
        if token.contains('/') {
            let (base, quote) = split_pair(token);
            if quote.is_some() && valid_ticker(&base) {
                return Extraction::found((base, quote), 0.9);
            }
        }
    }

    // BTCUSDT suffix form
    for token in upper.split_whitespace() {
        let (base, quote) = split_pair(token);
        if quote.is_some() && valid_ticker(&base) {
            return Extraction::found((base, quote), 0.8);
        }
    }

    // First isolated uppercase token in the original text
    for token in text.split_whitespace() {
        let trimmed = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if valid_ticker(trimmed) {
            return Extraction::found((trimmed.to_string(), None), 0.5);
        }
    }

    Extraction::failed(FieldError::fatal("coin", "no coin symbol found"))
}

/// LONG/BUY/Calls vs SHORT/SELL/Puts, first synonym in token order wins.
pub fn extract_direction(text: &str) -> Extraction<Direction> {
    for token in ascii_upper(text).split_whitespace() {
        let word = token.trim_matches(|c: char| !c.is_ascii_alphabetic());
        match word {
            "LONG" => return Extraction::found(Direction::Long, 0.9),
            "SHORT" => return Extraction::found(Direction::Short, 0.9),
            "BUY" | "CALLS" => return Extraction::found(Direction::Long, 0.7),
            "SELL" | "PUTS" => return Extraction::found(Direction::Short, 0.7),
            _ => {}
        }
    }
    Extraction::failed(FieldError::fatal(
        "direction",
        "no position direction (LONG/SHORT) found",
    ))
}

/// Parse "A-B", "A - B" or a lone "A" from the text following an entry label.
fn parse_zone_tokens(rest: &str) -> Option<(EntryZone, bool)> {
    let line = rest.lines().next().unwrap_or("");
    let tokens: Vec<&str> = line.split_whitespace().take(3).collect();
    let first = tokens.first()?;

    // "45000-46000" in one token (split on the dash separating two numbers;
    // skip the first char so a leading sign or currency mark never matches)
    let interior_dash = first
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '-')
        .map(|(i, _)| i);
    if let Some(dash) = interior_dash {
        let (a, b) = (&first[..dash], &first[dash + 1..]);
        if let (Some(low), Some(high)) = (parse_price(a), parse_price(b)) {
            let (zone, swapped) = EntryZone::from_bounds(low, high);
            return Some((zone, swapped));
        }
    }

    let a = parse_price(first)?;

    // "45000 - 46000" across tokens
    if tokens.len() >= 3 && tokens[1] == "-" {
        if let Some(b) = parse_price(tokens[2]) {
            let (zone, swapped) = EntryZone::from_bounds(a, b);
            return Some((zone, swapped));
        }
    }

    Some((EntryZone::single(a), false))
}

/// Entry zone from `Entry:`/`Entry Zone:`/`Buy:` style labels, with a
/// bare-price fallback after the coin/direction when no label exists.
/// Reversed bounds are swapped, duplicate labels keep the first occurrence;
/// both are warnings, not failures.
pub fn extract_entry_zone(text: &str) -> Extraction<EntryZone> {
    let upper = ascii_upper(text);
    let labels = ["ENTRY ZONE", "ENTRY", "ENTER", "PRICE", "BUY"];

    let mut parsed: Vec<(EntryZone, bool)> = Vec::new();
    for (_, end) in label_occurrences(&upper, &labels) {
        if let Some(hit) = parse_zone_tokens(rest_after(text, end)) {
            parsed.push(hit);
        }
    }

    if let Some(&(zone, swapped)) = parsed.first() {
        let mut warnings: Vec<&str> = Vec::new();
        if swapped {
            warnings.push("bounds were reversed, swapped");
        }
        if parsed.len() > 1 {
            warnings.push("multiple entry labels, keeping first");
        }
        return if warnings.is_empty() {
            Extraction::found(zone, 0.9)
        } else {
            Extraction::found_with_warning(
                zone,
                0.8,
                FieldError::warning("entry_zone", warnings.join("; ")),
            )
        };
    }

    // Bare price after the coin/direction anchor, skipping lines owned by
    // other labels and leverage-looking tokens.
    let skip_labels = ["TARGET", "TP", "STOP", "SL", "LEVERAGE", "LEV", "LOSS"];
    let mut anchored = false;
    for line in upper.lines() {
        let owned = !label_occurrences(line, &skip_labels).is_empty();
        for token in line.split_whitespace() {
            if !anchored {
                let word = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
                let is_anchor = token.starts_with('#')
                    || token.starts_with('$')
                    || token.contains('/')
                    || matches!(word, "LONG" | "SHORT" | "BUY" | "SELL" | "CALLS" | "PUTS");
                if is_anchor {
                    anchored = true;
                }
                continue;
            }
            if owned || looks_like_leverage(token) {
                continue;
            }
            if let Some(price) = parse_price(token) {
                return Extraction::found(EntryZone::single(price), 0.4);
            }
        }
    }

    Extraction::failed(FieldError::fatal("entry_zone", "no entry zone found"))
}

fn looks_like_leverage(token: &str) -> bool {
    let t = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    (t.ends_with('X') && t[..t.len() - 1].bytes().all(|b| b.is_ascii_digit()) && t.len() > 1)
        || (t.starts_with('X') && t[1..].bytes().all(|b| b.is_ascii_digit()) && t.len() > 1)
}

fn parse_leverage_token(token: &str) -> Option<u32> {
    let t = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let digits = t
        .strip_suffix('X')
        .or_else(|| t.strip_prefix('X'))
        .unwrap_or(t);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Leverage from `NNx` tokens or `Leverage:`/`Lev:` labels, plus the
/// Cross/Isolated margin qualifier when one is spelled out. Absence is not
/// an error; the caller fills the configured default.
pub fn extract_leverage(text: &str) -> Extraction<(u32, Option<MarginMode>)> {
    let upper = ascii_upper(text);

    let margin_mode = if label_occurrences(&upper, &["CROSS"]).first().is_some() {
        Some(MarginMode::Cross)
    } else if label_occurrences(&upper, &["ISOLATED"]).first().is_some() {
        Some(MarginMode::Isolated)
    } else {
        None
    };

    // Labeled form first: "Leverage: 20x" / "Lev 10"
    for (_, end) in label_occurrences(&upper, &["LEVERAGE", "LEV"]) {
        if let Some(token) = rest_after(&upper, end).split_whitespace().next() {
            if let Some(lev) = parse_leverage_token(token) {
                return Extraction::found((lev, margin_mode), 0.9);
            }
        }
    }

    // Bare "20x" anywhere
    for token in upper.split_whitespace() {
        if looks_like_leverage(token) {
            if let Some(lev) = parse_leverage_token(token) {
                return Extraction::found((lev, margin_mode), 0.8);
            }
        }
    }

    match margin_mode {
        // Margin qualifier without a number still worth carrying upward
        Some(mode) => Extraction {
            value: Some((0, Some(mode))),
            confidence: 0.3,
            error: None,
        },
        None => Extraction::missing(),
    }
}

/// Numeric list following a TP/Target label, consumed across comma, dash
/// and line separators until the first non-numeric token. Ordering by
/// direction happens in the parser, not here.
pub fn extract_targets(text: &str) -> Extraction<Vec<f64>> {
    let upper = ascii_upper(text);
    let labels = ["TAKE PROFIT", "TAKE-PROFIT", "TARGETS", "TARGET", "TPS", "TP"];

    let Some(&(_, end)) = label_occurrences(&upper, &labels).first() else {
        return Extraction::missing();
    };

    let mut targets = Vec::new();
    for token in rest_after(text, end).split_whitespace() {
        if token == "-" || token == "," {
            continue;
        }
        // Ordinals like "1:" in "Target 1: 47000"; any other trailing-colon
        // token is the next label and ends the numeric run
        if let Some(ordinal) = token.strip_suffix(':') {
            match ordinal.parse::<u32>() {
                Ok(n) if n < 100 => continue,
                _ => break,
            }
        }
        match parse_price(token) {
            Some(price) => targets.push(price),
            None => break,
        }
    }

    if targets.is_empty() {
        Extraction::missing()
    } else {
        Extraction::found(targets, 0.85)
    }
}

/// Single price after an SL/Stop Loss label. Optional field: absence only
/// disables automatic stop placement downstream.
pub fn extract_stop_loss(text: &str) -> Extraction<f64> {
    let upper = ascii_upper(text);
    let labels = ["STOP LOSS", "STOP-LOSS", "STOPLOSS", "STOP", "SL"];

    for (_, end) in label_occurrences(&upper, &labels) {
        if let Some(token) = rest_after(text, end).split_whitespace().next() {
            if let Some(price) = parse_price(token) {
                return Extraction::found(price, 0.9);
            }
        }
    }
    Extraction::missing()
}
