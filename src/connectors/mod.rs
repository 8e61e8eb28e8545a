//! Venue connector layer (§4.2): a uniform contract ([`connector::VenueConnector`])
//! driven by one generic runtime ([`engine::GenericConnector`]) parameterized
//! over per-venue wire logic ([`spec::VenueSpec`]), with a [`registry`]
//! factory mapping [`crate::model::VenueId`] to a constructed connector.

pub mod connector;
pub mod engine;
pub mod http;
pub mod registry;
pub mod spec;

pub mod binance;
pub mod bingx;
pub mod bitget;
pub mod bybit;
pub mod coinex;
pub mod gateio;
pub mod htx;
pub mod kucoin;
pub mod lbank;
pub mod mexc;
pub mod okx;

pub use connector::VenueConnector;
