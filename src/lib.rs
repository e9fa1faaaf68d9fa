pub mod commands;
pub mod config;
pub mod datasource;
pub mod error;
pub mod fields;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod output;
pub mod predicate;
pub mod store;
