//! Trading-symbol → instrument-token cache.
//!
//! SmartAPI addresses every order by a numeric instrument token, not the
//! human-readable trading symbol. spec.md §4.8 calls for a hardcoded seed
//! map plus an API-backed search, cached in-memory; this struct is the
//! cache half (single-writer map keyed by `exchange:symbol`, per spec.md
//! §5's shared-resource policy). The search fallback lives on
//! `AngelOneAdapter::resolve_symbol_token`, which calls `insert` on a miss.

use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct SymbolCache {
    tokens: HashMap<String, String>,
}

impl SymbolCache {
    pub fn new() -> Self {
        let mut tokens = HashMap::new();
        // A handful of NSE large-caps, seeded so paper/demo wiring and tests
        // never need a live searchScrip round-trip. Real deployments extend
        // this via `seed_symbol_cache` from the published instrument master.
        for (symbol, token) in [
            ("RELIANCE-EQ", "2885"),
            ("TCS-EQ", "11536"),
            ("INFY-EQ", "1594"),
            ("HDFCBANK-EQ", "1333"),
            ("NIFTY-EQ", "99926000"),
        ] {
            tokens.insert(symbol.to_string(), token.to_string());
        }
        Self { tokens }
    }

    pub fn get(&self, trading_symbol: &str) -> Option<&str> {
        self.tokens.get(trading_symbol).map(|s| s.as_str())
    }

    pub fn insert(&mut self, trading_symbol: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(trading_symbol.into(), token.into());
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
