pub mod aggregate;
pub mod config;
pub mod database;
pub mod error;
pub mod output;
pub mod report;
