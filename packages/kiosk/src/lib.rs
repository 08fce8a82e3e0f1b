//! Recycling kiosk daemon: configuration and concrete adapters around
//! [`claim_core`].

pub mod app;
pub mod artifacts;
pub mod card_reader;
pub mod classifier;
pub mod config;
pub mod cue;
pub mod ledger;
pub mod presenter;
pub mod telemetry_feed;
