//! Application layer - the outward-facing crawl engine facade

pub mod engine;

pub use engine::CrawlEngine;
