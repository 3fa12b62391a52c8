use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

pub type MissingSymbolSet = BTreeSet<String>;

// ld64:      "_foo", referenced from:
// GNU ld:    undefined reference to `foo'
// ld.lld:    undefined symbol: foo
const LD64_PATTERN: usize = 0;

const UNDEFINED_SYMBOL_PATTERNS: [&str; 3] = [
    r#""_([^"]+)", referenced from:"#,
    r"undefined reference to [`']([^'`]+)'",
    r"undefined symbol: ([^\s]+)",
];

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        UNDEFINED_SYMBOL_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Extracts the logical names of undefined symbols from a failed link diagnostic.
///
/// ld64 always reports mangled names and its pattern strips the `_` itself.
/// The other formats report whatever the object format uses, so
/// `symbol_prefix` is removed from their captures when present.
pub fn detect_missing_definitions(diagnostics: &str, symbol_prefix: &str) -> MissingSymbolSet {
    let mut missing = MissingSymbolSet::new();
    for line in diagnostics.lines() {
        for (position, pattern) in patterns().iter().enumerate() {
            if let Some(symbol) = pattern.captures(line).and_then(|c| c.get(1)) {
                let symbol = symbol.as_str();
                let logical = if position == LD64_PATTERN {
                    symbol
                } else {
                    demangle(symbol, symbol_prefix)
                };
                missing.insert(logical.to_string());
                break;
            }
        }
    }
    missing
}

fn demangle<'a>(symbol: &'a str, symbol_prefix: &str) -> &'a str {
    if symbol_prefix.is_empty() {
        return symbol;
    }
    match symbol.strip_prefix(symbol_prefix) {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => symbol,
    }
}
