pub mod coerce;
pub mod config;
pub mod driver;
pub mod error;
pub mod loader;
pub mod markdown;
pub mod matcher;
pub mod model;
pub mod notion;
pub mod reconcile;
