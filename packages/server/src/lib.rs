// HN Aggregator - Admin Backend
//
// This crate provides the admin API for a Hacker News story aggregator:
// a single-flight background scraper with lifecycle tracking, run history
// in Postgres, and a session-authenticated REST surface.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;
