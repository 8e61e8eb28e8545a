//! Canonicalizer (§4.1): a pure, I/O-free mapping between a venue-native
//! symbol and the canonical `<BASE>-<QUOTE>-PERP` form.
//!
//! Each venue's native shape is described by a small [`VenueShape`] —
//! separator, suffix, casing, and base-asset aliases — rather than one
//! bespoke parser per venue, since the only thing that actually varies is
//! that shape (see §3's examples: `BTCUSDT`, `BTC-USDT-SWAP`, `XBTUSDTM`,
//! `BTC_USDT`, `BTC-USDT`).

use crate::model::{Canonical, VenueId};

const QUOTE_ASSETS: [&str; 4] = ["USDT", "USDC", "BUSD", "USD"];

struct VenueShape {
    /// Separator between base and quote in the native symbol, if any.
    separator: Option<char>,
    /// Suffix appended after base+quote (e.g. OKX's `-SWAP`, Bitget's
    /// `_UMCBL`, KuCoin's `M`).
    suffix: &'static str,
    lowercase: bool,
    /// Canonical base asset -> venue-native base asset, e.g. KuCoin's
    /// `BTC` -> `XBT` futures alias.
    base_aliases: &'static [(&'static str, &'static str)],
}

fn shape(venue: VenueId) -> VenueShape {
    match venue {
        VenueId::Binance => VenueShape { separator: None, suffix: "", lowercase: false, base_aliases: &[] },
        VenueId::Bybit => VenueShape { separator: None, suffix: "", lowercase: false, base_aliases: &[] },
        VenueId::Okx => VenueShape { separator: Some('-'), suffix: "-SWAP", lowercase: false, base_aliases: &[] },
        VenueId::Kucoin => VenueShape {
            separator: None,
            suffix: "M",
            lowercase: false,
            base_aliases: &[("BTC", "XBT")],
        },
        VenueId::Mexc => VenueShape { separator: Some('_'), suffix: "", lowercase: false, base_aliases: &[] },
        VenueId::Bitget => VenueShape { separator: None, suffix: "_UMCBL", lowercase: false, base_aliases: &[] },
        VenueId::Gateio => VenueShape { separator: Some('_'), suffix: "", lowercase: false, base_aliases: &[] },
        VenueId::Bingx => VenueShape { separator: Some('-'), suffix: "", lowercase: false, base_aliases: &[] },
        VenueId::Coinex => VenueShape { separator: None, suffix: "", lowercase: false, base_aliases: &[] },
        VenueId::Lbank => VenueShape { separator: Some('_'), suffix: "", lowercase: true, base_aliases: &[] },
        VenueId::Htx => VenueShape { separator: Some('-'), suffix: "", lowercase: false, base_aliases: &[] },
    }
}

fn alias_to_venue<'a>(shape: &VenueShape, canonical_base: &'a str) -> &'a str {
    for (canon, native) in shape.base_aliases {
        if canon.eq_ignore_ascii_case(canonical_base) {
            return native;
        }
    }
    canonical_base
}

fn alias_from_venue<'a>(shape: &VenueShape, native_base: &'a str) -> String {
    for (canon, native) in shape.base_aliases {
        if native.eq_ignore_ascii_case(native_base) {
            return (*canon).to_string();
        }
    }
    native_base.to_string()
}

/// Builds a venue-native symbol from a canonical `<BASE>-<QUOTE>-PERP`.
/// Total on inputs generated by [`to_canonical`].
pub fn from_canonical(venue: VenueId, canonical: &str) -> Option<String> {
    let body = canonical.strip_suffix("-PERP")?;
    let (base, quote) = body.split_once('-')?;
    let shape = shape(venue);

    let native_base = alias_to_venue(&shape, base);
    let mut symbol = match shape.separator {
        Some(sep) => format!("{native_base}{sep}{quote}"),
        None => format!("{native_base}{quote}"),
    };
    symbol.push_str(shape.suffix);

    if shape.lowercase {
        symbol = symbol.to_lowercase();
    }

    Some(symbol)
}

/// Recovers the canonical `<BASE>-<QUOTE>-PERP` form from a venue-native
/// symbol, or `None` if the symbol is not a recognized perpetual shape for
/// that venue (malformed-symbol case in §4.1 — the caller drops the
/// message and increments a counter, it does not propagate an error here).
pub fn to_canonical(venue: VenueId, native: &str) -> Option<Canonical> {
    let shape = shape(venue);
    let upper = if shape.lowercase { native.to_uppercase() } else { native.to_string() };
    let stripped = upper.strip_suffix(shape.suffix)?;

    let (native_base, quote) = match shape.separator {
        Some(sep) => stripped.split_once(sep)?,
        None => split_no_separator(stripped)?,
    };

    if native_base.is_empty() || quote.is_empty() {
        return None;
    }

    let canonical_base = alias_from_venue(&shape, native_base);
    Some(format!("{canonical_base}-{quote}-PERP"))
}

/// Splits a symbol with no explicit separator (e.g. Binance's `BTCUSDT`)
/// by matching a known quote-asset suffix.
fn split_no_separator(symbol: &str) -> Option<(&str, &str)> {
    for quote in QUOTE_ASSETS {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return Some((base, quote));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_roundtrip(venue: VenueId, canonical: &str) {
        let native = from_canonical(venue, canonical).expect("from_canonical");
        let back = to_canonical(venue, &native).expect("to_canonical");
        assert_eq!(back, canonical, "venue={venue} native={native}");
    }

    #[test]
    fn roundtrips_all_venues() {
        for venue in VenueId::ALL {
            assert_roundtrip(venue, "BTC-USDT-PERP");
            assert_roundtrip(venue, "ETH-USDT-PERP");
        }
    }

    #[test]
    fn venue_native_shapes_match_spec_examples() {
        assert_eq!(from_canonical(VenueId::Binance, "BTC-USDT-PERP").unwrap(), "BTCUSDT");
        assert_eq!(from_canonical(VenueId::Okx, "BTC-USDT-PERP").unwrap(), "BTC-USDT-SWAP");
        assert_eq!(from_canonical(VenueId::Kucoin, "BTC-USDT-PERP").unwrap(), "XBTUSDTM");
        assert_eq!(from_canonical(VenueId::Gateio, "BTC-USDT-PERP").unwrap(), "BTC_USDT");
        assert_eq!(from_canonical(VenueId::Bingx, "BTC-USDT-PERP").unwrap(), "BTC-USDT");
        assert_eq!(from_canonical(VenueId::Lbank, "BTC-USDT-PERP").unwrap(), "btc_usdt");
    }

    #[test]
    fn kucoin_alias_round_trip() {
        // Scenario 5 in spec.md §8.
        assert_eq!(from_canonical(VenueId::Kucoin, "BTC-USDT-PERP").unwrap(), "XBTUSDTM");
        assert_eq!(to_canonical(VenueId::Kucoin, "XBTUSDTM").unwrap(), "BTC-USDT-PERP");
    }

    #[test]
    fn malformed_symbol_is_none() {
        assert!(to_canonical(VenueId::Binance, "").is_none());
        assert!(to_canonical(VenueId::Okx, "GARBAGE").is_none());
        assert!(to_canonical(VenueId::Bitget, "BTCUSDT").is_none()); // missing suffix
    }
}
