pub mod actors;
pub mod config;
pub mod domain;
pub mod events;
pub mod messaging;
pub mod metrics;
pub mod service;
pub mod store;
pub mod utils;
