pub mod aggregator;
pub mod api;
pub mod board;
pub mod config;
pub mod model;
pub mod signal;
pub mod status;
pub mod store;
