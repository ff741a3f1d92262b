pub mod api;
pub mod attendance;
pub mod config;
pub mod error;
pub mod geo;
pub mod ledger;
pub mod network;
pub mod presentation;
pub mod runtime;
pub mod sensor;
