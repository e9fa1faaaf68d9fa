pub mod burndown;
pub mod fields;
pub mod import;
pub mod init;
pub mod query;
pub mod stats;
