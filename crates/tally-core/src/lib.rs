//! # tally-core
//! Foundation types for the Tally wallet ledger: chain data, chain events,
//! network parameters, and the error taxonomy shared by every crate.

pub mod error;
pub mod events;
pub mod params;
pub mod traits;
pub mod types;
