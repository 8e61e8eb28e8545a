//! Factory mapping a [`VenueId`] to a constructed connector (§4 "Supervisor
//! wires one connector per enabled venue"). Mirrors the teacher's
//! `exchanges::get_adapter`, generalized from a `match` returning `Box<dyn
//! ExchangeAdapter>` to one returning `Arc<dyn VenueConnector>` over the
//! generic [`engine::GenericConnector`].

use std::sync::Arc;

use crate::connectors::engine::GenericConnector;
use crate::connectors::VenueConnector;
use crate::model::VenueId;

/// Builds the connector for `venue`. Every [`VenueId::ALL`] member is
/// wired here; an unmatched venue is a programming error; not a runtime
/// condition, since `VenueId` is a closed, exhaustive enum.
pub fn build_connector(venue: VenueId) -> Arc<dyn VenueConnector> {
    match venue {
        VenueId::Binance => Arc::new(GenericConnector::new(crate::connectors::binance::Binance::new())),
        VenueId::Bybit => Arc::new(GenericConnector::new(crate::connectors::bybit::Bybit::new())),
        VenueId::Okx => Arc::new(GenericConnector::new(crate::connectors::okx::Okx::new())),
        VenueId::Kucoin => Arc::new(GenericConnector::new(crate::connectors::kucoin::Kucoin::new())),
        VenueId::Mexc => Arc::new(GenericConnector::new(crate::connectors::mexc::Mexc::new())),
        VenueId::Bitget => Arc::new(GenericConnector::new(crate::connectors::bitget::Bitget::new())),
        VenueId::Gateio => Arc::new(GenericConnector::new(crate::connectors::gateio::Gateio::new())),
        VenueId::Bingx => Arc::new(GenericConnector::new(crate::connectors::bingx::Bingx::new())),
        VenueId::Coinex => Arc::new(GenericConnector::new(crate::connectors::coinex::Coinex::new())),
        VenueId::Lbank => Arc::new(GenericConnector::new(crate::connectors::lbank::Lbank::new())),
        VenueId::Htx => Arc::new(GenericConnector::new(crate::connectors::htx::Htx::new())),
    }
}

/// Builds one connector per `venues`, skipping (and logging) any that are
/// not recognized rather than aborting startup (§6: unsupported venues are
/// logged and skipped).
pub fn build_connectors(venues: &[VenueId]) -> Vec<(VenueId, Arc<dyn VenueConnector>)> {
    venues.iter().map(|&v| (v, build_connector(v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_connector_for_every_venue() {
        for venue in VenueId::ALL {
            let connector = build_connector(venue);
            assert_eq!(connector.id(), venue);
        }
    }
}
