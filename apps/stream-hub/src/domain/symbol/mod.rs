//! Symbol Normalization
//!
//! Canonicalizes the many spellings clients use for an instrument into one
//! internal key space. The canonical form always carries an exchange-class
//! suffix:
//!
//! - `.NSE` / `.BSE` - Indian equities (accepting the `.NS` / `.BO` variants)
//! - `.INDX` - indices (accepting caret forms and colloquial names)
//! - `.CC` - crypto pairs, spelled `<BASE>-USD.CC`
//! - `.CMD` - commodity proxies, spelled `<PAIR>.CMD`
//! - `.US` - default for bare tickers
//!
//! `normalize` is total and idempotent: unknown inputs fall through unchanged
//! rather than erroring, and canonical inputs map to themselves.
//!
//! `SymbolMap` is the explicit bidirectional mapping between canonical
//! symbols and per-provider upstream codes. It is built per fetch batch so a
//! provider response is resolved by exact lookup, never by substring search.

use std::collections::HashMap;

// =============================================================================
// Asset Classes
// =============================================================================

/// Asset class of a canonical symbol, derived from its suffix.
///
/// Poller lanes use this to partition the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
    /// Listed equities (`.US`, `.NSE`, `.BSE`, unrecognized suffixes).
    Equity,
    /// Market indices (`.INDX`).
    Index,
    /// Crypto pairs (`.CC`).
    Crypto,
    /// Commodity proxies (`.CMD`).
    Commodity,
}

/// Classify a canonical symbol by suffix.
#[must_use]
pub fn asset_class(canonical: &str) -> AssetClass {
    if canonical.ends_with(".CC") {
        AssetClass::Crypto
    } else if canonical.ends_with(".INDX") {
        AssetClass::Index
    } else if canonical.ends_with(".CMD") {
        AssetClass::Commodity
    } else {
        AssetClass::Equity
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Index aliases: colloquial names and caret-prefixed forms.
const INDEX_ALIASES: &[(&str, &str)] = &[
    ("^NSEI", "NSEI.INDX"),
    ("NIFTY", "NSEI.INDX"),
    ("NIFTY50", "NSEI.INDX"),
    ("^NSEBANK", "NSEBANK.INDX"),
    ("BANKNIFTY", "NSEBANK.INDX"),
    ("^BSESN", "BSESN.INDX"),
    ("SENSEX", "BSESN.INDX"),
    ("^GSPC", "GSPC.INDX"),
    ("SPX", "GSPC.INDX"),
    ("^DJI", "DJI.INDX"),
    ("DOWJONES", "DJI.INDX"),
    ("^IXIC", "IXIC.INDX"),
    ("NASDAQ", "IXIC.INDX"),
    ("^N225", "N225.INDX"),
    ("NIKKEI", "N225.INDX"),
    ("^FTSE", "FTSE.INDX"),
];

/// Crypto short codes that imply a `-USD` pair.
const CRYPTO_BASES: &[&str] = &["BTC", "ETH", "SOL", "XRP", "DOGE", "ADA", "BNB"];

/// Commodity aliases mapped to their canonical proxy pair.
const COMMODITY_ALIASES: &[(&str, &str)] = &[
    ("GOLD", "XAUUSD.CMD"),
    ("XAU", "XAUUSD.CMD"),
    ("XAUUSD", "XAUUSD.CMD"),
    ("SILVER", "XAGUSD.CMD"),
    ("XAG", "XAGUSD.CMD"),
    ("XAGUSD", "XAGUSD.CMD"),
    ("OIL", "CLUSD.CMD"),
    ("CRUDE", "CLUSD.CMD"),
    ("WTI", "CLUSD.CMD"),
    ("CLUSD", "CLUSD.CMD"),
    ("BRENT", "BZUSD.CMD"),
    ("BZUSD", "BZUSD.CMD"),
    ("NATGAS", "NGUSD.CMD"),
    ("NGUSD", "NGUSD.CMD"),
];

/// Canonicalize a raw client-supplied symbol.
///
/// Deterministic, total, and idempotent: `normalize(normalize(x)) ==
/// normalize(x)` for every input.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let sym = raw.trim().to_uppercase();
    if sym.is_empty() {
        return sym;
    }

    // Already-canonical suffixes map to themselves.
    for suffix in [".NSE", ".BSE", ".INDX", ".CC", ".CMD", ".US"] {
        if sym.ends_with(suffix) {
            return sym;
        }
    }

    // Regional equity suffix variants.
    if let Some(root) = sym.strip_suffix(".NS") {
        return format!("{root}.NSE");
    }
    if let Some(root) = sym.strip_suffix(".BO") {
        return format!("{root}.BSE");
    }

    // Index aliases.
    for (alias, canonical) in INDEX_ALIASES {
        if sym == *alias {
            return (*canonical).to_string();
        }
    }
    // Unlisted caret form: treat as an index code.
    if let Some(code) = sym.strip_prefix('^') {
        return format!("{code}.INDX");
    }

    // Commodity aliases.
    for (alias, canonical) in COMMODITY_ALIASES {
        if sym == *alias {
            return (*canonical).to_string();
        }
    }

    // Crypto: short codes and -USD variants.
    if let Some(base) = sym.strip_suffix("-USD") {
        return format!("{base}-USD.CC");
    }
    if CRYPTO_BASES.contains(&sym.as_str()) {
        return format!("{sym}-USD.CC");
    }

    // Bare ticker defaults to the US listing; anything else (unknown dotted
    // suffix) falls through unchanged.
    if sym.contains('.') {
        sym
    } else {
        format!("{sym}.US")
    }
}

// =============================================================================
// Symbol Map
// =============================================================================

/// Exact bidirectional mapping between canonical symbols and the codes a
/// provider speaks, built once per fetch batch.
///
/// A provider response is resolved by exact code lookup. As a convenience for
/// providers that echo back the code without its suffix, the root form (text
/// before the first `.`) is also indexed - but only when it is unambiguous
/// within the batch. Two canonicals sharing a root drop the root entry and
/// resolve via exact match alone.
#[derive(Debug, Default)]
pub struct SymbolMap {
    canonical_to_code: HashMap<String, String>,
    code_to_canonical: HashMap<String, String>,
}

impl SymbolMap {
    /// Build a map for `canonicals` using `code_fn` to derive each upstream
    /// code.
    pub fn build<'a, I, F>(canonicals: I, code_fn: F) -> Self
    where
        I: IntoIterator<Item = &'a String>,
        F: Fn(&str) -> String,
    {
        let mut map = Self::default();

        for canonical in canonicals {
            let code = code_fn(canonical);
            map.canonical_to_code
                .insert(canonical.clone(), code.clone());
            map.code_to_canonical.insert(code, canonical.clone());
        }

        // Second pass: index root forms, but never shadow an exact code and
        // never keep a root two canonicals would both claim.
        let mut roots: HashMap<String, Option<String>> = HashMap::new();
        for (canonical, code) in &map.canonical_to_code {
            let root = code.split('.').next().unwrap_or(code);
            if root == code || map.code_to_canonical.contains_key(root) {
                continue;
            }
            roots
                .entry(root.to_string())
                .and_modify(|entry| *entry = None)
                .or_insert_with(|| Some(canonical.clone()));
        }
        for (root, canonical) in roots {
            if let Some(canonical) = canonical {
                map.code_to_canonical.insert(root, canonical);
            }
        }

        map
    }

    /// Upstream code for a canonical symbol.
    #[must_use]
    pub fn code(&self, canonical: &str) -> Option<&str> {
        self.canonical_to_code.get(canonical).map(String::as_str)
    }

    /// Canonical symbol for a code returned by the provider.
    #[must_use]
    pub fn canonical(&self, code: &str) -> Option<&str> {
        self.code_to_canonical.get(code).map(String::as_str)
    }

    /// All upstream codes in the batch.
    #[must_use]
    pub fn codes(&self) -> Vec<String> {
        self.canonical_to_code.values().cloned().collect()
    }

    /// Number of symbols in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.canonical_to_code.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.canonical_to_code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test_case("RELIANCE.NS", "RELIANCE.NSE" ; "nse suffix variant")]
    #[test_case("500325.BO", "500325.BSE" ; "bse suffix variant")]
    #[test_case("reliance.nse", "RELIANCE.NSE" ; "lowercase canonical")]
    #[test_case("^NSEI", "NSEI.INDX" ; "caret index")]
    #[test_case("NIFTY", "NSEI.INDX" ; "colloquial index")]
    #[test_case("SENSEX", "BSESN.INDX" ; "sensex alias")]
    #[test_case("^RUT", "RUT.INDX" ; "unlisted caret form")]
    #[test_case("BTC", "BTC-USD.CC" ; "crypto short code")]
    #[test_case("BTC-USD", "BTC-USD.CC" ; "crypto usd variant")]
    #[test_case("GOLD", "XAUUSD.CMD" ; "commodity alias")]
    #[test_case("WTI", "CLUSD.CMD" ; "oil alias")]
    #[test_case("AAPL", "AAPL.US" ; "bare us ticker")]
    #[test_case("AAPL.US", "AAPL.US" ; "canonical us passes through")]
    #[test_case("FOO.XETRA", "FOO.XETRA" ; "unknown suffix falls through")]
    fn normalizes(raw: &str, expected: &str) {
        assert_eq!(normalize(raw), expected);
    }

    #[test]
    fn idempotent_on_fixture_set() {
        let fixtures = [
            "RELIANCE.NS",
            "^NSEI",
            "NIFTY",
            "BTC",
            "ETH-USD",
            "GOLD",
            "AAPL",
            "FOO.XETRA",
            "  tsla  ",
        ];
        for raw in fixtures {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    proptest! {
        #[test]
        fn idempotent_for_arbitrary_input(raw in "[A-Za-z0-9.^-]{0,12}") {
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn classifies_by_suffix() {
        assert_eq!(asset_class("BTC-USD.CC"), AssetClass::Crypto);
        assert_eq!(asset_class("NSEI.INDX"), AssetClass::Index);
        assert_eq!(asset_class("XAUUSD.CMD"), AssetClass::Commodity);
        assert_eq!(asset_class("AAPL.US"), AssetClass::Equity);
        assert_eq!(asset_class("RELIANCE.NSE"), AssetClass::Equity);
    }

    #[test]
    fn symbol_map_exact_round_trip() {
        let symbols = vec!["NSEI.INDX".to_string(), "AAPL.US".to_string()];
        let map = SymbolMap::build(&symbols, std::string::ToString::to_string);

        assert_eq!(map.canonical("NSEI.INDX"), Some("NSEI.INDX"));
        assert_eq!(map.code("AAPL.US"), Some("AAPL.US"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn symbol_map_resolves_suffixless_root() {
        let symbols = vec!["NSEI.INDX".to_string()];
        let map = SymbolMap::build(&symbols, std::string::ToString::to_string);

        // Provider echoes the code without its suffix.
        assert_eq!(map.canonical("NSEI"), Some("NSEI.INDX"));
    }

    #[test]
    fn symbol_map_drops_ambiguous_roots() {
        // Two listings sharing a root ticker: root lookup must not guess.
        let symbols = vec!["INFY.NSE".to_string(), "INFY.US".to_string()];
        let map = SymbolMap::build(&symbols, std::string::ToString::to_string);

        assert_eq!(map.canonical("INFY"), None);
        assert_eq!(map.canonical("INFY.NSE"), Some("INFY.NSE"));
        assert_eq!(map.canonical("INFY.US"), Some("INFY.US"));
    }

    #[test]
    fn symbol_map_custom_codes() {
        let symbols = vec!["BTC-USD.CC".to_string()];
        let map = SymbolMap::build(&symbols, |c| {
            c.strip_suffix("-USD.CC").unwrap_or(c).to_string() + "USD"
        });

        assert_eq!(map.code("BTC-USD.CC"), Some("BTCUSD"));
        assert_eq!(map.canonical("BTCUSD"), Some("BTC-USD.CC"));
    }
}
