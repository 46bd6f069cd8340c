//! CLI command implementations.

pub mod config;
pub mod run;
pub mod scenarios;
pub mod status;
pub mod stop;
pub mod version;
