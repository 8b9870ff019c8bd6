//! Utility helpers shared by exchange adapters.
//!
//! IMPORTANT:
//! - No exchange-specific business logic should live here.
//! - This module must remain lightweight and deterministic.

/// Normalize a trading symbol into the compact exchange form.
///
/// Examples:
/// - "BTC/USDT" -> "BTCUSDT"
/// - "eth-usdt" -> "ETHUSDT"
/// - "BTCUSDT"  -> "BTCUSDT"
pub fn compact_symbol(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '/' | '-' | '_'))
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_symbol_strips_separators_and_uppercases() {
        assert_eq!(compact_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(compact_symbol("eth-usdt"), "ETHUSDT");
        assert_eq!(compact_symbol("xrp_usd"), "XRPUSD");
        assert_eq!(compact_symbol("BTCUSDT"), "BTCUSDT");
    }
}
