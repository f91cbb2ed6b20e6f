//! Kernel module - background execution infrastructure.

pub mod scraper;
